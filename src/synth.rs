//! Seeded synthetic depot sessions for demos and load tests.
//!
//! Evening-heavy arrivals with multi-hour dwell and a mix of AC and DC
//! chargers. Every generated batch passes [`SessionSet::build`].
//!
//! [`SessionSet::build`]: crate::session::SessionSet::build

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Gamma, Normal};
use thiserror::Error;

use crate::session::RawSessionRecord;

/// Charger ratings (kW) and how often each occurs.
const CHARGER_KW: [f64; 4] = [7.4, 11.0, 22.0, 30.0];
const CHARGER_WEIGHTS: [f64; 4] = [0.35, 0.30, 0.25, 0.10];

/// Share of a window's deliverable energy a session may request.
const MAX_FILL: f64 = 0.95;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generator inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthParams {
    /// Horizon start; arrivals are placed relative to its midnight.
    pub start: NaiveDateTime,
    /// Horizon length (hours, > 0). Departures are clipped to its end.
    pub hours: u32,
    /// Number of sessions.
    pub sessions: usize,
    pub seed: u64,
}

impl Default for SynthParams {
    fn default() -> Self {
        let start = NaiveDate::from_ymd_opt(2026, 2, 17)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            start,
            hours: 24,
            sessions: 140,
            seed: 7,
        }
    }
}

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("horizon must be at least one hour")]
    EmptyHorizon,
    #[error("invalid distribution: {0}")]
    Distribution(String),
}

/// Generates `params.sessions` records sorted by arrival.
///
/// Arrival hour ~ N(19, 2.5) clipped to the horizon plus a random
/// five-minute slot; dwell ~ N(6, 2) hours clipped to [2, 10] and to the
/// horizon end; energy ~ Gamma(3, 10) kWh clipped to [10, 70] and to 95% of
/// what the window delivers at the charger rating.
///
/// # Errors
///
/// Returns a `SynthError` if the horizon is empty.
pub fn generate_sessions(params: &SynthParams) -> Result<Vec<RawSessionRecord>, SynthError> {
    if params.hours == 0 {
        return Err(SynthError::EmptyHorizon);
    }
    let dist = |e: &dyn std::fmt::Display| SynthError::Distribution(e.to_string());
    let arrival_hour = Normal::new(19.0, 2.5).map_err(|e| dist(&e))?;
    let dwell_hours = Normal::new(6.0, 2.0).map_err(|e| dist(&e))?;
    let energy = Gamma::new(3.0, 10.0).map_err(|e| dist(&e))?;
    let charger = WeightedIndex::new(CHARGER_WEIGHTS).map_err(|e| dist(&e))?;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let midnight = params.start.date().and_time(chrono::NaiveTime::MIN);
    let horizon_end = params.start + TimeDelta::hours(i64::from(params.hours));
    let last_hour = f64::from(params.hours.min(24) - 1);

    let mut rows: Vec<(NaiveDateTime, RawSessionRecord)> = (0..params.sessions)
        .map(|i| {
            let hour: f64 = arrival_hour.sample(&mut rng);
            let hour = hour.clamp(0.0, last_hour).floor() as i64;
            let minute = rng.random_range(0..12_i64) * 5;
            let arrival = (midnight + TimeDelta::hours(hour) + TimeDelta::minutes(minute))
                .max(params.start);

            let dwell: f64 = dwell_hours.sample(&mut rng);
            let dwell_secs = (dwell.clamp(2.0, 10.0) * 3600.0).round() as i64;
            let departure = (arrival + TimeDelta::seconds(dwell_secs)).min(horizon_end);

            let max_kw = CHARGER_KW[charger.sample(&mut rng)];
            let window_h = (departure - arrival).num_seconds() as f64 / 3600.0;
            let kwh: f64 = energy.sample(&mut rng);
            let kwh = kwh.clamp(10.0, 70.0).min(MAX_FILL * max_kw * window_h);
            // Floor to cents of a kWh so rounding never exceeds the window.
            let kwh = ((kwh * 100.0).floor() / 100.0).max(0.01);

            let record = RawSessionRecord {
                vehicle_id: format!("V{:04}", i + 1),
                arrival_time: arrival.format(TIMESTAMP_FORMAT).to_string(),
                departure_time: departure.format(TIMESTAMP_FORMAT).to_string(),
                energy_required: kwh,
                max_power: max_kw,
            };
            (arrival, record)
        })
        .collect();

    rows.sort_by_key(|(arrival, _)| *arrival);
    Ok(rows.into_iter().map(|(_, record)| record).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSet;

    #[test]
    fn same_seed_same_sessions() {
        let params = SynthParams::default();
        let a = generate_sessions(&params).expect("valid params");
        let b = generate_sessions(&params).expect("valid params");
        assert_eq!(a, b);
        let other = generate_sessions(&SynthParams { seed: 8, ..params }).expect("valid");
        assert_ne!(a, other);
    }

    #[test]
    fn generated_batch_validates() {
        let records = generate_sessions(&SynthParams::default()).expect("valid params");
        assert_eq!(records.len(), 140);
        let set = SessionSet::build(&records).expect("generated sessions are valid");
        for s in &set {
            assert!(CHARGER_KW.contains(&s.max_power()));
            assert!(s.energy_required() <= 70.0);
        }
    }

    #[test]
    fn short_horizon_keeps_sessions_inside() {
        let params = SynthParams {
            hours: 6,
            sessions: 50,
            ..SynthParams::default()
        };
        let records = generate_sessions(&params).expect("valid params");
        let set = SessionSet::build(&records).expect("valid");
        let end = params.start + TimeDelta::hours(6);
        assert!(set.latest_departure() <= end);
        assert!(set.earliest_arrival() >= params.start);
    }

    #[test]
    fn sorted_by_arrival() {
        let records = generate_sessions(&SynthParams::default()).expect("valid params");
        assert!(
            records
                .windows(2)
                .all(|w| w[0].arrival_time <= w[1].arrival_time)
        );
    }

    #[test]
    fn zero_hours_is_rejected() {
        let params = SynthParams {
            hours: 0,
            ..SynthParams::default()
        };
        assert!(matches!(
            generate_sessions(&params),
            Err(SynthError::EmptyHorizon)
        ));
    }
}
