/// Uncontrolled charge-on-arrival baseline.
pub mod baseline;
pub mod engine;
/// Planning horizon discretization.
pub mod grid;
pub mod optimizer;
pub mod policy;
pub mod report;
pub mod types;
