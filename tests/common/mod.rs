//! Shared test fixtures for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use chrono::TimeDelta;
use depot_sched::session::{RawSessionRecord, SessionSet};
use depot_sched::sim::grid::TimeGrid;
use depot_sched::sim::policy::DepotCapacity;
use depot_sched::synth::{SynthParams, generate_sessions};

/// Absolute tolerance for kW/kWh comparisons against solver output.
pub const TOL: f64 = 1e-5;

/// Builds a record on 2026-02-17 from `HH:MM` arrival/departure.
pub fn record(id: &str, arrive: &str, depart: &str, kwh: f64, kw: f64) -> RawSessionRecord {
    RawSessionRecord {
        vehicle_id: id.to_string(),
        arrival_time: format!("2026-02-17 {arrive}:00"),
        departure_time: format!("2026-02-17 {depart}:00"),
        energy_required: kwh,
        max_power: kw,
    }
}

/// The three-vehicle walkthrough: A 0-4h 20 kWh, B 1-3h 10 kWh,
/// C 2-6h 15 kWh, all at 10 kW.
pub fn three_sessions() -> SessionSet {
    SessionSet::build(&[
        record("A", "00:00", "04:00", 20.0, 10.0),
        record("B", "01:00", "03:00", 10.0, 10.0),
        record("C", "02:00", "06:00", 15.0, 10.0),
    ])
    .expect("walkthrough sessions are valid")
}

/// Depot ceiling for the walkthrough (kW).
pub fn walkthrough_capacity() -> DepotCapacity {
    DepotCapacity::new(15.0)
}

/// One-hour grid covering `sessions`.
pub fn hourly_grid(sessions: &SessionSet) -> TimeGrid {
    TimeGrid::covering(sessions, TimeDelta::hours(1)).expect("hourly grid")
}

/// A seeded synthetic batch with 30-minute steps.
///
/// Returns `(sessions, grid)`.
pub fn synthetic(count: usize, seed: u64) -> (SessionSet, TimeGrid) {
    let records = generate_sessions(&SynthParams {
        sessions: count,
        seed,
        ..SynthParams::default()
    })
    .expect("valid generator params");
    let sessions = SessionSet::build(&records).expect("generated sessions are valid");
    let grid = TimeGrid::covering(&sessions, TimeDelta::minutes(30)).expect("grid");
    (sessions, grid)
}

/// Fresh scratch directory unique to this process and `name`.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("depot-sched-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}
