//! Depot EV charging scheduler.
//!
//! Turns a batch of charging sessions and depot power limits into a
//! per-vehicle, per-timestep power schedule for each of three risk
//! postures, and compares them against uncontrolled charging.

/// TOML run configuration and presets.
pub mod config;
pub mod io;
pub mod session;
/// Grid, baseline, policies, optimizer, report and run engine.
pub mod sim;
pub mod synth;
pub mod tariff;
