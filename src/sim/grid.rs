//! Uniform discretization of the planning horizon.

use std::ops::Range;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::Serialize;
use thiserror::Error;

use crate::session::{ChargingSession, SessionSet};

/// Upper bound on grid length; beyond this the LP is not worth building.
pub const MAX_STEPS: usize = 100_000;

/// Reasons a horizon cannot be discretized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("step duration must be at least one second")]
    NonPositiveStep,
    #[error("horizon end {end} is not after start {start}")]
    EmptyHorizon {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("horizon needs {steps} steps, limit is {}", MAX_STEPS)]
    TooManySteps { steps: usize },
    #[error("{0} is outside the representable date range")]
    OutOfRange(&'static str),
}

/// An ordered sequence of equal-length timesteps.
///
/// Step `i` covers `[start + i·step, start + (i+1)·step)`.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, TimeDelta};
/// use depot_sched::sim::grid::TimeGrid;
///
/// let start = NaiveDate::from_ymd_opt(2026, 2, 17)
///     .and_then(|d| d.and_hms_opt(0, 0, 0))
///     .expect("valid date");
/// let end = start + TimeDelta::hours(6);
/// let grid = TimeGrid::new(start, end, TimeDelta::minutes(30)).expect("valid grid");
/// assert_eq!(grid.len(), 12);
/// assert_eq!(grid.step_hours(), 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeGrid {
    start: NaiveDateTime,
    #[serde(serialize_with = "serialize_step_minutes", rename = "step_minutes")]
    step: TimeDelta,
    len: usize,
}

fn serialize_step_minutes<S: serde::Serializer>(step: &TimeDelta, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(step.num_seconds() as f64 / 60.0)
}

impl TimeGrid {
    /// Creates a grid from `start` covering at least up to `end`.
    ///
    /// The last step is kept whole, so `end()` may lie after `end`.
    ///
    /// # Errors
    ///
    /// Returns a `GridError` if `step` is shorter than a second, the horizon
    /// is empty, it would need more than [`MAX_STEPS`] steps, or the end of
    /// its last step is not a representable timestamp.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, step: TimeDelta) -> Result<Self, GridError> {
        let step_s = step.num_seconds();
        if step_s <= 0 {
            return Err(GridError::NonPositiveStep);
        }
        if end <= start {
            return Err(GridError::EmptyHorizon { start, end });
        }
        let span_s = (end - start).num_seconds();
        let steps = span_s.div_euclid(step_s) + i64::from(span_s.rem_euclid(step_s) != 0);
        let len = usize::try_from(steps).unwrap_or(usize::MAX);
        if len > MAX_STEPS {
            return Err(GridError::TooManySteps { steps: len });
        }
        // Every step boundary up to `end()` must exist.
        step_s
            .checked_mul(steps)
            .and_then(TimeDelta::try_seconds)
            .and_then(|span| start.checked_add_signed(span))
            .ok_or(GridError::OutOfRange("horizon end"))?;
        Ok(Self {
            start,
            step: TimeDelta::seconds(step_s),
            len,
        })
    }

    /// Creates the smallest grid covering every session window.
    ///
    /// `start` is the earliest arrival rounded down to a multiple of `step`
    /// counted from that day's midnight, so 15-minute grids land on quarter
    /// hours.
    ///
    /// # Errors
    ///
    /// Same as [`TimeGrid::new`].
    pub fn covering(sessions: &SessionSet, step: TimeDelta) -> Result<Self, GridError> {
        let step_s = step.num_seconds();
        if step_s <= 0 {
            return Err(GridError::NonPositiveStep);
        }
        let first = sessions.earliest_arrival();
        let midnight = first.date().and_time(NaiveTime::MIN);
        let offset_s = (first - midnight).num_seconds();
        let start = midnight + TimeDelta::seconds(offset_s - offset_s.rem_euclid(step_s));
        Self::new(start, sessions.latest_departure(), step)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// End of the last step (exclusive).
    pub fn end(&self) -> NaiveDateTime {
        self.timestamp(self.len)
    }

    pub fn step(&self) -> TimeDelta {
        self.step
    }

    /// Step duration in hours, the factor between kW and kWh per step.
    pub fn step_hours(&self) -> f64 {
        self.step.num_seconds() as f64 / 3600.0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start time of step `index`.
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + TimeDelta::seconds(self.step.num_seconds() * index as i64)
    }

    /// Index of the step containing `ts`, rounding down (may be negative or past the end).
    fn floor_index(&self, ts: NaiveDateTime) -> i64 {
        (ts - self.start).num_seconds().div_euclid(self.step.num_seconds())
    }

    /// Index of the first step boundary at or after `ts`.
    fn ceil_index(&self, ts: NaiveDateTime) -> i64 {
        let secs = (ts - self.start).num_seconds();
        let step_s = self.step.num_seconds();
        secs.div_euclid(step_s) + i64::from(secs.rem_euclid(step_s) != 0)
    }

    /// Grid-snapped window of a session, clamped to the grid.
    ///
    /// Arrival rounds down and departure rounds up to the enclosing step
    /// boundaries. An empty range means the session lies entirely outside
    /// the grid.
    pub fn window(&self, session: &ChargingSession) -> Range<usize> {
        let clamp = |i: i64| i.clamp(0, self.len as i64) as usize;
        let lo = clamp(self.floor_index(session.arrival_time()));
        let hi = clamp(self.ceil_index(session.departure_time()));
        lo..hi.max(lo)
    }

    /// Step indices in order.
    pub fn steps(&self) -> Range<usize> {
        0..self.len
    }
}
