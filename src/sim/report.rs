//! Scenario aggregation: load curves, peak and energy figures, costs.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::tariff::{CostEstimate, Savings, Tariff};

use super::grid::TimeGrid;
use super::optimizer::{FailureKind, OptimizationFailure};
use super::policy::Scenario;
use super::types::{Allocation, LoadCurve};

/// Result of one scenario solve as handed to the report.
pub type ScenarioOutcome = Result<Allocation, OptimizationFailure>;

/// Inconsistent inputs to the report. Always a defect upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("{scenario} allocation uses a different grid than the baseline")]
    GridMismatch { scenario: Scenario },
    #[error("{scenario} allocation for {vehicle_id} reaches step {timestep}, grid has {len}")]
    StepOutOfRange {
        scenario: Scenario,
        vehicle_id: String,
        timestep: usize,
        len: usize,
    },
    #[error("{0} scenario reported more than once")]
    DuplicateScenario(Scenario),
}

/// Whether a scenario produced an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Optimal,
    Failed,
}

/// Figures for a solved scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioMetrics {
    pub effective_capacity_kw: f64,
    pub peak_kw: f64,
    /// Energy delivered across all sessions (kWh).
    pub total_energy_kwh: f64,
    /// Energy left undelivered under the completion buffer (kWh).
    pub shortfall_kwh: f64,
    /// Sessions whose completion buffer was used.
    pub buffered_sessions: usize,
    pub cost: CostEstimate,
    /// Against the baseline; includes the peak reduction percentage.
    pub savings: Savings,
}

/// One scenario's row in the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub status: ScenarioStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
    #[serde(skip)]
    pub load: Option<LoadCurve>,
}

impl ScenarioReport {
    pub fn is_optimal(&self) -> bool {
        self.status == ScenarioStatus::Optimal
    }

    /// Peak reduction against the baseline (%), `None` for a failed scenario.
    pub fn peak_reduction_pct(&self) -> Option<f64> {
        self.metrics
            .as_ref()
            .map(|m| m.savings.peak_kw_reduction_pct)
    }
}

/// Baseline figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineSummary {
    pub peak_kw: f64,
    pub total_energy_kwh: f64,
    pub cost: CostEstimate,
}

/// Everything `summary.json` carries, plus the curves behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub grid: TimeGrid,
    pub baseline: BaselineSummary,
    /// Scenario rows in the order they were handed in.
    pub scenarios: Vec<ScenarioReport>,
    #[serde(skip)]
    pub baseline_load: LoadCurve,
}

impl Report {
    pub fn scenario(&self, scenario: Scenario) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.scenario == scenario)
    }
}

/// Turns allocations into load curves and summary figures.
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    tariff: Tariff,
}

impl ReportBuilder {
    pub fn new(tariff: Tariff) -> Self {
        Self { tariff }
    }

    /// Sums an allocation into a depot load curve.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::StepOutOfRange`] if any schedule reaches
    /// past the allocation's grid.
    pub fn load_curve(&self, allocation: &Allocation) -> Result<LoadCurve, AggregationError> {
        let grid = allocation.grid();
        let mut power = vec![0.0_f64; grid.len()];
        for schedule in allocation.schedules() {
            for (t, kw) in schedule.steps() {
                let slot = power
                    .get_mut(t)
                    .ok_or_else(|| AggregationError::StepOutOfRange {
                        scenario: allocation.scenario(),
                        vehicle_id: schedule.vehicle_id().to_string(),
                        timestep: t,
                        len: grid.len(),
                    })?;
                *slot += kw;
            }
        }
        Ok(LoadCurve::from_power(grid.clone(), power))
    }

    /// Builds the report for a run.
    ///
    /// Failed scenarios get a failure row and no figures; they never abort
    /// the report.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregationError`] if an allocation's grid differs from
    /// the baseline's, a schedule leaves the grid, or a scenario appears
    /// twice.
    pub fn build(
        &self,
        outcomes: &[ScenarioOutcome],
        baseline: &LoadCurve,
    ) -> Result<Report, AggregationError> {
        let baseline_cost = self.tariff.estimate(baseline);
        let mut scenarios: Vec<ScenarioReport> = Vec::with_capacity(outcomes.len());

        for outcome in outcomes {
            let scenario = match outcome {
                Ok(allocation) => allocation.scenario(),
                Err(failure) => failure.scenario,
            };
            if scenarios.iter().any(|s| s.scenario == scenario) {
                return Err(AggregationError::DuplicateScenario(scenario));
            }

            let row = match outcome {
                Ok(allocation) => {
                    if allocation.grid() != baseline.grid() {
                        return Err(AggregationError::GridMismatch { scenario });
                    }
                    let load = self.load_curve(allocation)?;
                    let cost = self.tariff.estimate(&load);
                    let metrics = ScenarioMetrics {
                        effective_capacity_kw: allocation.effective_capacity_kw(),
                        peak_kw: load.peak_kw(),
                        total_energy_kwh: allocation.total_delivered_kwh(),
                        shortfall_kwh: allocation
                            .schedules()
                            .iter()
                            .map(|s| s.shortfall_kwh())
                            .sum(),
                        buffered_sessions: allocation.buffered_sessions(),
                        savings: Savings::between(&baseline_cost, &cost),
                        cost,
                    };
                    ScenarioReport {
                        scenario,
                        status: ScenarioStatus::Optimal,
                        failure_kind: None,
                        detail: None,
                        metrics: Some(metrics),
                        load: Some(load),
                    }
                }
                Err(failure) => ScenarioReport {
                    scenario,
                    status: ScenarioStatus::Failed,
                    failure_kind: Some(failure.kind),
                    detail: Some(failure.detail.clone()),
                    metrics: None,
                    load: None,
                },
            };
            scenarios.push(row);
        }

        Ok(Report {
            grid: baseline.grid().clone(),
            baseline: BaselineSummary {
                peak_kw: baseline.peak_kw(),
                total_energy_kwh: baseline.energy_kwh(),
                cost: baseline_cost,
            },
            scenarios,
            baseline_load: baseline.clone(),
        })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Depot Schedule Report ---")?;
        writeln!(
            f,
            "Horizon:      {} + {} x {} min",
            self.grid.start(),
            self.grid.len(),
            self.grid.step().num_minutes()
        )?;
        write!(
            f,
            "Baseline:     peak {:.2} kW, {:.2} kWh, cost {:.2}",
            self.baseline.peak_kw, self.baseline.total_energy_kwh, self.baseline.cost.total_cost
        )?;
        for row in &self.scenarios {
            writeln!(f)?;
            match (&row.metrics, row.failure_kind) {
                (Some(m), _) => write!(
                    f,
                    "{:<13} peak {:.2} kW ({:+.1}%), {:.2} kWh, cost {:.2}, buffered {}",
                    format!("{}:", row.scenario),
                    m.peak_kw,
                    -m.savings.peak_kw_reduction_pct,
                    m.total_energy_kwh,
                    m.cost.total_cost,
                    m.buffered_sessions
                )?,
                (None, kind) => write!(
                    f,
                    "{:<13} FAILED ({}): {}",
                    format!("{}:", row.scenario),
                    kind.map_or_else(|| "unknown".to_string(), |k| k.to_string()),
                    row.detail.as_deref().unwrap_or("")
                )?,
            }
        }
        Ok(())
    }
}
