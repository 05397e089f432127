//! Charging sessions and batch validation.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timestamp layouts accepted for arrival/departure columns.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// One unparsed session row as read from a tabular source.
///
/// Column names of the older depot export format (`earliest_start`,
/// `latest_end`, `energy_kwh`, `max_kw`) are accepted as aliases. Its
/// `session_id` column is ignored: vehicle ids must be unique within a
/// batch, so older files that reuse a vehicle id across sessions fail
/// [`SessionSet::build`] with [`ValidationReason::DuplicateVehicle`] and
/// need their ids made unique first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSessionRecord {
    /// Vehicle identifier.
    pub vehicle_id: String,
    /// Arrival timestamp text.
    #[serde(alias = "earliest_start")]
    pub arrival_time: String,
    /// Departure timestamp text.
    #[serde(alias = "latest_end")]
    pub departure_time: String,
    /// Energy to deliver (kWh).
    #[serde(alias = "energy_kwh")]
    pub energy_required: f64,
    /// Charger/vehicle power ceiling (kW).
    #[serde(alias = "max_kw")]
    pub max_power: f64,
}

/// Why a session record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationReason {
    #[error("vehicle id is empty")]
    EmptyVehicleId,
    #[error("malformed {field} timestamp \"{value}\"")]
    MalformedTimestamp { field: &'static str, value: String },
    #[error("departure {departure} is not after arrival {arrival}")]
    EmptyWindow {
        arrival: NaiveDateTime,
        departure: NaiveDateTime,
    },
    #[error("energy_required must be a positive finite number, got {0}")]
    NonPositiveEnergy(f64),
    #[error("max_power must be a positive finite number, got {0}")]
    NonPositivePower(f64),
    #[error("needs {required_kwh:.3} kWh but at most {deliverable_kwh:.3} kWh fits the window at max power")]
    InfeasibleWindow {
        required_kwh: f64,
        deliverable_kwh: f64,
    },
    #[error("vehicle id appears more than once")]
    DuplicateVehicle,
    #[error("no sessions in input")]
    EmptyBatch,
}

/// A rejected session batch, naming the offending vehicle where there is one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid session {}: {reason}", .vehicle_id.as_deref().unwrap_or("<batch>"))]
pub struct ValidationError {
    /// Offending vehicle, `None` for batch-level problems.
    pub vehicle_id: Option<String>,
    /// What was wrong with the record.
    pub reason: ValidationReason,
}

impl ValidationError {
    fn for_vehicle(vehicle_id: &str, reason: ValidationReason) -> Self {
        Self {
            vehicle_id: Some(vehicle_id.to_string()),
            reason,
        }
    }
}

/// A validated charging need for one vehicle.
///
/// Construction checks every invariant; there are no setters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingSession {
    vehicle_id: String,
    arrival_time: NaiveDateTime,
    departure_time: NaiveDateTime,
    energy_required: f64,
    max_power: f64,
}

impl ChargingSession {
    /// Creates a session from already-parsed values.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when the id is empty, the window is empty,
    /// energy or power is not a positive finite number, or the energy cannot
    /// be delivered even at `max_power` for the whole window.
    pub fn new(
        vehicle_id: impl Into<String>,
        arrival_time: NaiveDateTime,
        departure_time: NaiveDateTime,
        energy_required: f64,
        max_power: f64,
    ) -> Result<Self, ValidationError> {
        let vehicle_id = vehicle_id.into();
        let fail = |reason: ValidationReason| -> Result<Self, ValidationError> {
            Err(ValidationError::for_vehicle(&vehicle_id, reason))
        };

        if vehicle_id.trim().is_empty() {
            return Err(ValidationError {
                vehicle_id: None,
                reason: ValidationReason::EmptyVehicleId,
            });
        }
        if departure_time <= arrival_time {
            return fail(ValidationReason::EmptyWindow {
                arrival: arrival_time,
                departure: departure_time,
            });
        }
        if !energy_required.is_finite() || energy_required <= 0.0 {
            return fail(ValidationReason::NonPositiveEnergy(energy_required));
        }
        if !max_power.is_finite() || max_power <= 0.0 {
            return fail(ValidationReason::NonPositivePower(max_power));
        }

        let window_hours = (departure_time - arrival_time).num_seconds() as f64 / 3600.0;
        let deliverable_kwh = max_power * window_hours;
        if energy_required > deliverable_kwh {
            return fail(ValidationReason::InfeasibleWindow {
                required_kwh: energy_required,
                deliverable_kwh,
            });
        }

        Ok(Self {
            vehicle_id,
            arrival_time,
            departure_time,
            energy_required,
            max_power,
        })
    }

    /// Parses and validates one raw record.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` on malformed timestamps or any invariant
    /// checked by [`ChargingSession::new`].
    pub fn from_record(record: &RawSessionRecord) -> Result<Self, ValidationError> {
        let id = record.vehicle_id.trim();
        let arrival = parse_timestamp(&record.arrival_time).ok_or_else(|| {
            ValidationError::for_vehicle(
                id,
                ValidationReason::MalformedTimestamp {
                    field: "arrival_time",
                    value: record.arrival_time.clone(),
                },
            )
        })?;
        let departure = parse_timestamp(&record.departure_time).ok_or_else(|| {
            ValidationError::for_vehicle(
                id,
                ValidationReason::MalformedTimestamp {
                    field: "departure_time",
                    value: record.departure_time.clone(),
                },
            )
        })?;
        Self::new(
            id,
            arrival,
            departure,
            record.energy_required,
            record.max_power,
        )
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn arrival_time(&self) -> NaiveDateTime {
        self.arrival_time
    }

    pub fn departure_time(&self) -> NaiveDateTime {
        self.departure_time
    }

    /// Energy to deliver within the window (kWh).
    pub fn energy_required(&self) -> f64 {
        self.energy_required
    }

    /// Power ceiling (kW).
    pub fn max_power(&self) -> f64 {
        self.max_power
    }
}

/// Parses a session timestamp in any of the accepted layouts.
///
/// RFC 3339 values carrying an offset are converted to naive UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

/// Immutable, validated batch of sessions with unique vehicle ids.
///
/// Input order is preserved; it is the order the optimizer and every export
/// use.
#[derive(Debug, Clone)]
pub struct SessionSet {
    sessions: Vec<ChargingSession>,
}

impl SessionSet {
    /// Validates every record into a session.
    ///
    /// A single bad row fails the whole batch.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` encountered, a duplicate-id error,
    /// or `EmptyBatch` when there are no records.
    pub fn build<'a, I>(raw_records: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = &'a RawSessionRecord>,
    {
        let sessions = raw_records
            .into_iter()
            .map(ChargingSession::from_record)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_sessions(sessions)
    }

    /// Builds a set from sessions that were validated individually.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateVehicle` or `EmptyBatch`.
    pub fn from_sessions(sessions: Vec<ChargingSession>) -> Result<Self, ValidationError> {
        if sessions.is_empty() {
            return Err(ValidationError {
                vehicle_id: None,
                reason: ValidationReason::EmptyBatch,
            });
        }
        let mut seen = HashSet::with_capacity(sessions.len());
        for s in &sessions {
            if !seen.insert(s.vehicle_id()) {
                return Err(ValidationError::for_vehicle(
                    s.vehicle_id(),
                    ValidationReason::DuplicateVehicle,
                ));
            }
        }
        Ok(Self { sessions })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChargingSession> {
        self.sessions.iter()
    }

    /// Looks a session up by vehicle id.
    pub fn get(&self, vehicle_id: &str) -> Option<&ChargingSession> {
        self.sessions.iter().find(|s| s.vehicle_id() == vehicle_id)
    }

    /// Total requested energy (kWh).
    pub fn total_energy_required(&self) -> f64 {
        self.sessions.iter().map(ChargingSession::energy_required).sum()
    }

    /// Earliest arrival across the batch.
    pub fn earliest_arrival(&self) -> NaiveDateTime {
        self.sessions
            .iter()
            .map(ChargingSession::arrival_time)
            .min()
            .unwrap_or_default()
    }

    /// Latest departure across the batch.
    pub fn latest_departure(&self) -> NaiveDateTime {
        self.sessions
            .iter()
            .map(ChargingSession::departure_time)
            .max()
            .unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a SessionSet {
    type Item = &'a ChargingSession;
    type IntoIter = std::slice::Iter<'a, ChargingSession>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}
