//! Optimizer output and derived load curves.

use std::ops::Range;

use super::grid::TimeGrid;
use super::policy::Scenario;

/// Total depot power per grid step.
///
/// Built only by the baseline simulator and the report builder.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadCurve {
    grid: TimeGrid,
    power_kw: Vec<f64>,
}

impl LoadCurve {
    /// # Panics
    ///
    /// Panics if `power_kw` does not have one value per grid step.
    pub(crate) fn from_power(grid: TimeGrid, power_kw: Vec<f64>) -> Self {
        assert_eq!(grid.len(), power_kw.len(), "one value per grid step");
        Self { grid, power_kw }
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Power per step (kW).
    pub fn power_kw(&self) -> &[f64] {
        &self.power_kw
    }

    /// `(timestep, total_power_kw)` pairs in grid order.
    pub fn points(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.power_kw.iter().copied().enumerate()
    }

    /// Highest total draw over the horizon (kW), zero for an all-idle curve.
    pub fn peak_kw(&self) -> f64 {
        self.power_kw.iter().copied().fold(0.0, f64::max)
    }

    /// Energy under the curve (kWh).
    pub fn energy_kwh(&self) -> f64 {
        self.power_kw.iter().sum::<f64>() * self.grid.step_hours()
    }

    pub fn len(&self) -> usize {
        self.power_kw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_kw.is_empty()
    }
}

/// One vehicle's power profile over its grid-snapped window.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSchedule {
    vehicle_id: String,
    window: Range<usize>,
    power_kw: Vec<f64>,
    energy_required_kwh: f64,
    delivered_kwh: f64,
    shortfall_kwh: f64,
}

impl VehicleSchedule {
    /// # Panics
    ///
    /// Panics if `power_kw` does not match the window length.
    pub(crate) fn new(
        vehicle_id: String,
        window: Range<usize>,
        power_kw: Vec<f64>,
        energy_required_kwh: f64,
        delivered_kwh: f64,
        shortfall_kwh: f64,
    ) -> Self {
        assert_eq!(window.len(), power_kw.len(), "one value per window step");
        Self {
            vehicle_id,
            window,
            power_kw,
            energy_required_kwh,
            delivered_kwh,
            shortfall_kwh,
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    /// Grid steps this vehicle may draw power in.
    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    /// Power over the window, index 0 being `window().start`.
    pub fn power_kw(&self) -> &[f64] {
        &self.power_kw
    }

    /// Power at grid step `t`; zero outside the window.
    pub fn power_at(&self, t: usize) -> f64 {
        if self.window.contains(&t) {
            self.power_kw[t - self.window.start]
        } else {
            0.0
        }
    }

    /// `(timestep, power_kw)` pairs over the window.
    pub fn steps(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.window.clone().zip(self.power_kw.iter().copied())
    }

    pub fn energy_required_kwh(&self) -> f64 {
        self.energy_required_kwh
    }

    pub fn delivered_kwh(&self) -> f64 {
        self.delivered_kwh
    }

    /// Energy left undelivered under the completion buffer (kWh).
    pub fn shortfall_kwh(&self) -> f64 {
        self.shortfall_kwh
    }

    /// Whether the completion buffer was used for this session.
    pub fn buffer_invoked(&self) -> bool {
        self.shortfall_kwh > 0.0
    }
}

/// A scenario's complete power assignment. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    scenario: Scenario,
    grid: TimeGrid,
    effective_capacity_kw: f64,
    schedules: Vec<VehicleSchedule>,
}

impl Allocation {
    pub(crate) fn new(
        scenario: Scenario,
        grid: TimeGrid,
        effective_capacity_kw: f64,
        schedules: Vec<VehicleSchedule>,
    ) -> Self {
        Self {
            scenario,
            grid,
            effective_capacity_kw,
            schedules,
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Capacity ceiling the allocation was solved against (kW).
    pub fn effective_capacity_kw(&self) -> f64 {
        self.effective_capacity_kw
    }

    /// Per-vehicle schedules in session order.
    pub fn schedules(&self) -> &[VehicleSchedule] {
        &self.schedules
    }

    pub fn get(&self, vehicle_id: &str) -> Option<&VehicleSchedule> {
        self.schedules.iter().find(|s| s.vehicle_id == vehicle_id)
    }

    /// Power for `(vehicle, t)`; zero for unknown vehicles or steps outside the window.
    pub fn power_at(&self, vehicle_id: &str, t: usize) -> f64 {
        self.get(vehicle_id).map_or(0.0, |s| s.power_at(t))
    }

    /// Total depot draw at step `t` (kW).
    pub fn total_at(&self, t: usize) -> f64 {
        self.schedules.iter().map(|s| s.power_at(t)).sum()
    }

    /// Energy delivered across all vehicles (kWh).
    pub fn total_delivered_kwh(&self) -> f64 {
        self.schedules.iter().map(VehicleSchedule::delivered_kwh).sum()
    }

    /// Number of sessions that ended short under the completion buffer.
    pub fn buffered_sessions(&self) -> usize {
        self.schedules.iter().filter(|s| s.buffer_invoked()).count()
    }
}
