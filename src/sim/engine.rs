//! Run orchestration: baseline, scenario solves, report.

use rayon::prelude::*;
use tracing::{info, warn};

use crate::session::SessionSet;
use crate::tariff::Tariff;

use super::baseline::BaselineSimulator;
use super::grid::TimeGrid;
use super::optimizer::{ScheduleOptimizer, SolveControl, SolverSettings};
use super::policy::{DepotCapacity, Scenario, ScenarioPolicy};
use super::report::{AggregationError, Report, ReportBuilder, ScenarioOutcome};
use super::types::{Allocation, LoadCurve};

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub baseline: LoadCurve,
    /// One entry per policy, in policy order.
    pub outcomes: Vec<ScenarioOutcome>,
    pub report: Report,
}

impl RunOutcome {
    /// The allocation for `scenario`, if it solved.
    pub fn allocation(&self, scenario: Scenario) -> Option<&Allocation> {
        self.outcomes
            .iter()
            .filter_map(|o| o.as_ref().ok())
            .find(|a| a.scenario() == scenario)
    }
}

/// Runs the baseline and every scenario over one session set.
///
/// Scenario solves are independent and run on the rayon pool; a failing
/// scenario is recorded in the report and never stops the others.
pub struct Engine<'a> {
    sessions: &'a SessionSet,
    grid: &'a TimeGrid,
    capacity: DepotCapacity,
    policies: Vec<ScenarioPolicy>,
    optimizer: ScheduleOptimizer,
    tariff: Tariff,
}

impl<'a> Engine<'a> {
    /// Creates an engine with the default tariff.
    ///
    /// # Arguments
    ///
    /// * `sessions` - Validated sessions
    /// * `grid` - Planning horizon
    /// * `capacity` - Depot limits
    /// * `policies` - Scenarios to solve, reported in this order
    /// * `settings` - Solver tolerances
    pub fn new(
        sessions: &'a SessionSet,
        grid: &'a TimeGrid,
        capacity: DepotCapacity,
        policies: Vec<ScenarioPolicy>,
        settings: SolverSettings,
    ) -> Self {
        let tariff = Tariff::default();
        Self {
            sessions,
            grid,
            capacity,
            policies,
            optimizer: ScheduleOptimizer::new(settings).with_tariff(tariff.clone()),
            tariff,
        }
    }

    /// Uses `tariff` for both the cost objective and the report.
    pub fn with_tariff(mut self, tariff: Tariff) -> Self {
        self.optimizer = self.optimizer.with_tariff(tariff.clone());
        self.tariff = tariff;
        self
    }

    /// Executes the run.
    ///
    /// # Errors
    ///
    /// Returns an [`AggregationError`] only if the solved allocations are
    /// inconsistent with the baseline grid; optimization failures are part
    /// of the outcome.
    pub fn run(&self, control: &SolveControl) -> Result<RunOutcome, AggregationError> {
        let baseline = BaselineSimulator.simulate(self.sessions, self.grid);
        info!(
            sessions = self.sessions.len(),
            steps = self.grid.len(),
            peak_kw = baseline.peak_kw(),
            "baseline simulated"
        );

        let outcomes: Vec<ScenarioOutcome> = self
            .policies
            .par_iter()
            .map(|policy| {
                let outcome = self.optimizer.solve_with(
                    self.sessions,
                    self.grid,
                    &self.capacity,
                    policy,
                    control,
                );
                match &outcome {
                    Ok(allocation) => info!(
                        scenario = %policy.scenario,
                        delivered_kwh = allocation.total_delivered_kwh(),
                        buffered = allocation.buffered_sessions(),
                        "scenario solved"
                    ),
                    Err(failure) => warn!(
                        scenario = %policy.scenario,
                        kind = %failure.kind,
                        detail = %failure.detail,
                        "scenario failed"
                    ),
                }
                outcome
            })
            .collect();

        let report = ReportBuilder::new(self.tariff.clone()).build(&outcomes, &baseline)?;
        Ok(RunOutcome {
            baseline,
            outcomes,
            report,
        })
    }
}
