/// CSV and JSON writers for run outputs.
pub mod export;
/// CSV session reader and writer.
pub mod sessions;
