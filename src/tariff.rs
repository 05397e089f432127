//! Electricity tariff and cost estimation for load curves.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::sim::grid::TimeGrid;
use crate::sim::types::LoadCurve;

/// A time-of-use block, applied on every day of the horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TouBlock {
    /// Block start, hour of day (inclusive, fractional allowed).
    pub start_hour: f64,
    /// Block end, hour of day (exclusive).
    pub end_hour: f64,
    pub rate_per_kwh: f64,
}

/// Energy rate plus demand charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tariff {
    /// Rate outside every TOU block.
    pub flat_energy_rate_per_kwh: f64,
    /// Charge per kW of peak load over the horizon.
    pub demand_charge_per_kw: f64,
    /// Checked in order; the first block containing the hour wins.
    pub tou_blocks: Vec<TouBlock>,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            flat_energy_rate_per_kwh: 0.20,
            demand_charge_per_kw: 12.0,
            tou_blocks: Vec::new(),
        }
    }
}

/// Cost breakdown for one load curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub total_kwh: f64,
    pub peak_kw: f64,
    pub energy_cost: f64,
    pub demand_charge_cost: f64,
    pub total_cost: f64,
}

/// Savings of an optimized curve against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Savings {
    pub peak_kw_reduction_pct: f64,
    pub total_cost_savings: f64,
    pub total_cost_savings_pct: f64,
}

impl Tariff {
    /// Energy rate in force at `ts`.
    pub fn rate_at(&self, ts: NaiveDateTime) -> f64 {
        let hour = f64::from(ts.hour()) + f64::from(ts.minute()) / 60.0;
        self.tou_blocks
            .iter()
            .find(|b| b.start_hour <= hour && hour < b.end_hour)
            .map_or(self.flat_energy_rate_per_kwh, |b| b.rate_per_kwh)
    }

    /// Energy rate at the start of every grid step, in order.
    pub fn rates_for(&self, grid: &TimeGrid) -> Vec<f64> {
        grid.steps().map(|t| self.rate_at(grid.timestamp(t))).collect()
    }

    /// Prices a load curve.
    pub fn estimate(&self, curve: &LoadCurve) -> CostEstimate {
        let grid = curve.grid();
        let dt = grid.step_hours();
        let (total_kwh, energy_cost) =
            curve
                .points()
                .fold((0.0, 0.0), |(kwh_acc, cost_acc), (t, kw)| {
                    let kwh = kw * dt;
                    (kwh_acc + kwh, cost_acc + kwh * self.rate_at(grid.timestamp(t)))
                });
        let peak_kw = curve.peak_kw();
        let demand_charge_cost = peak_kw * self.demand_charge_per_kw;
        CostEstimate {
            total_kwh,
            peak_kw,
            energy_cost,
            demand_charge_cost,
            total_cost: energy_cost + demand_charge_cost,
        }
    }
}

impl Savings {
    /// Compares `optimized` with `baseline`; percentages are zero when the
    /// baseline figure is zero.
    pub fn between(baseline: &CostEstimate, optimized: &CostEstimate) -> Self {
        let pct = |base: f64, new: f64| {
            if base > 0.0 {
                (1.0 - new / base) * 100.0
            } else {
                0.0
            }
        };
        Self {
            peak_kw_reduction_pct: pct(baseline.peak_kw, optimized.peak_kw),
            total_cost_savings: baseline.total_cost - optimized.total_cost,
            total_cost_savings_pct: pct(baseline.total_cost, optimized.total_cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};

    fn midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 17)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid")
    }

    fn tou_tariff() -> Tariff {
        Tariff {
            flat_energy_rate_per_kwh: 0.20,
            demand_charge_per_kw: 10.0,
            tou_blocks: vec![TouBlock {
                start_hour: 17.0,
                end_hour: 21.5,
                rate_per_kwh: 0.50,
            }],
        }
    }

    #[test]
    fn rate_lookup_respects_block_bounds() {
        let t = tou_tariff();
        let day = midnight();
        assert_eq!(t.rate_at(day + TimeDelta::hours(16)), 0.20);
        assert_eq!(t.rate_at(day + TimeDelta::hours(17)), 0.50);
        assert_eq!(t.rate_at(day + TimeDelta::minutes(21 * 60 + 15)), 0.50);
        assert_eq!(t.rate_at(day + TimeDelta::minutes(21 * 60 + 30)), 0.20);
        // Next day, same block.
        assert_eq!(t.rate_at(day + TimeDelta::hours(24 + 18)), 0.50);
    }

    #[test]
    fn estimate_sums_energy_and_demand_costs() {
        let start = midnight() + TimeDelta::hours(16);
        let grid =
            TimeGrid::new(start, start + TimeDelta::hours(2), TimeDelta::hours(1)).expect("grid");
        let curve = LoadCurve::from_power(grid, vec![10.0, 20.0]);
        let est = tou_tariff().estimate(&curve);
        assert!((est.total_kwh - 30.0).abs() < 1e-9);
        assert!((est.energy_cost - (10.0 * 0.2 + 20.0 * 0.5)).abs() < 1e-9);
        assert!((est.demand_charge_cost - 200.0).abs() < 1e-9);
        assert!((est.total_cost - 212.0).abs() < 1e-9);
    }

    #[test]
    fn savings_against_zero_baseline_are_zero_pct() {
        let zero = CostEstimate {
            total_kwh: 0.0,
            peak_kw: 0.0,
            energy_cost: 0.0,
            demand_charge_cost: 0.0,
            total_cost: 0.0,
        };
        let s = Savings::between(&zero, &zero);
        assert_eq!(s.peak_kw_reduction_pct, 0.0);
        assert_eq!(s.total_cost_savings_pct, 0.0);
    }

    #[test]
    fn savings_percentages() {
        let base = CostEstimate {
            total_kwh: 45.0,
            peak_kw: 20.0,
            energy_cost: 9.0,
            demand_charge_cost: 200.0,
            total_cost: 209.0,
        };
        let opt = CostEstimate {
            peak_kw: 10.0,
            demand_charge_cost: 100.0,
            total_cost: 109.0,
            ..base.clone()
        };
        let s = Savings::between(&base, &opt);
        assert!((s.peak_kw_reduction_pct - 50.0).abs() < 1e-9);
        assert!((s.total_cost_savings - 100.0).abs() < 1e-9);
    }
}
