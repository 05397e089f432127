//! Linear-programming charge scheduler.
//!
//! Each solve builds a fresh LP over the per-vehicle, per-step power
//! variables and solves it with the pure-Rust `microlp` backend of `good_lp`:
//!
//! - energy: `Σ_t p[v,t]·Δt + u_v = E_v`, with shortfall `u_v ≤ buffer·E_v`
//!   only when the policy allows late completion,
//! - bounds: `0 ≤ p[v,t] ≤ P_v`,
//! - capacity: `L_t = Σ_v p[v,t] ≤ margin · max_total_power`,
//! - objective: peak `z ≥ L_t`, total variation `r_t ≥ |L_t − L_{t−1}|`,
//!   time-of-use energy cost, excess over the soft target, and a large
//!   shortfall penalty, weighted per policy.
//!
//! A depot charger limit turns the model into a MILP: a binary `b[v,t]` per
//! power variable with `p[v,t] ≤ P_v·b[v,t]` and `Σ_v b[v,t] ≤ N`. Without a
//! limit no integer variables are declared.
//!
//! A second LP then fixes the objective at its optimum and minimises each
//! vehicle's own peak, which spreads power evenly over its window and makes
//! the choice among equally good schedules deterministic.

use std::fmt;
use std::ops::Range;
use std::time::Instant;

use good_lp::solvers::microlp::microlp;
use good_lp::{
    Constraint, Expression, ProblemVariables, ResolutionError, Solution, SolverModel, Variable,
    constraint, variable,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::session::SessionSet;
use crate::tariff::Tariff;

use super::grid::TimeGrid;
use super::policy::{DepotCapacity, ObjectiveWeights, Scenario, ScenarioPolicy};
use super::types::{Allocation, VehicleSchedule};

/// Objective cost per kWh of undelivered energy.
///
/// Large enough that the completion buffer is only drawn on when exact
/// completion does not fit under the effective capacity.
pub const SHORTFALL_PENALTY_PER_KWH: f64 = 1_000.0;

/// Solver tolerances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverSettings {
    /// Relative tolerance for post-solve checks and the tie-break bound.
    pub tolerance: f64,
    /// Tolerance used for the single retry after a numerical failure.
    pub relaxed_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            relaxed_tolerance: 1e-4,
        }
    }
}

/// Failure classes surfaced across the optimizer boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Energy, power and capacity constraints cannot all hold.
    Infeasible,
    /// The solver did not produce a solution within tolerance.
    Numerical,
    /// Stopped by the caller's token or deadline.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Infeasible => "infeasible",
            Self::Numerical => "numerical",
            Self::Cancelled => "cancelled",
        })
    }
}

/// A scenario-scoped optimization failure. No allocation accompanies it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{scenario} scenario {kind}: {detail}")]
pub struct OptimizationFailure {
    pub kind: FailureKind,
    pub scenario: Scenario,
    pub detail: String,
}

/// External stop signals checked between solver stages.
///
/// A running LP stage is not interrupted; the check happens before model
/// construction, between stages and before the result is returned.
#[derive(Debug, Clone, Default)]
pub struct SolveControl {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl SolveControl {
    /// No cancellation, no deadline.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Why the solve must stop, if it must.
    fn stop_reason(&self) -> Option<&'static str> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            Some("cancelled by caller")
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some("deadline exceeded")
        } else {
            None
        }
    }
}

/// Produces feasible, near-optimal charging allocations.
///
/// Holds only configuration; every solve is independent, so one optimizer
/// may be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptimizer {
    settings: SolverSettings,
    tariff: Tariff,
}

impl ScheduleOptimizer {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            tariff: Tariff::default(),
        }
    }

    /// Uses `tariff` for the energy-cost objective term.
    pub fn with_tariff(mut self, tariff: Tariff) -> Self {
        self.tariff = tariff;
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Solves one scenario without cancellation.
    ///
    /// # Errors
    ///
    /// See [`ScheduleOptimizer::solve_with`].
    pub fn solve(
        &self,
        sessions: &SessionSet,
        grid: &TimeGrid,
        capacity: &DepotCapacity,
        policy: &ScenarioPolicy,
    ) -> Result<Allocation, OptimizationFailure> {
        self.solve_with(sessions, grid, capacity, policy, &SolveControl::none())
    }

    /// Solves one scenario, honouring `control`.
    ///
    /// # Errors
    ///
    /// - `Infeasible` when the sessions cannot be served under the effective
    ///   capacity (after any completion buffer),
    /// - `Numerical` when the solver fails or its answer violates a
    ///   constraint beyond tolerance, after one retry at the relaxed
    ///   tolerance,
    /// - `Cancelled` when `control` fires.
    pub fn solve_with(
        &self,
        sessions: &SessionSet,
        grid: &TimeGrid,
        capacity: &DepotCapacity,
        policy: &ScenarioPolicy,
        control: &SolveControl,
    ) -> Result<Allocation, OptimizationFailure> {
        let span = tracing::debug_span!("solve", scenario = %policy.scenario);
        let _guard = span.enter();

        check_stop(control, policy.scenario)?;
        let instance = LpInstance::new(
            sessions,
            grid,
            capacity,
            policy,
            self.tariff.rates_for(grid),
        )?;

        let schedules = match instance.solve(self.settings.tolerance, control) {
            Err(failure) if failure.kind == FailureKind::Numerical => {
                warn!(
                    scenario = %policy.scenario,
                    detail = %failure.detail,
                    tolerance = self.settings.relaxed_tolerance,
                    "numerical failure, retrying with relaxed tolerance"
                );
                instance.solve(self.settings.relaxed_tolerance, control)?
            }
            other => other?,
        };
        check_stop(control, policy.scenario)?;

        Ok(Allocation::new(
            policy.scenario,
            grid.clone(),
            instance.capacity_kw,
            schedules,
        ))
    }
}

fn check_stop(control: &SolveControl, scenario: Scenario) -> Result<(), OptimizationFailure> {
    match control.stop_reason() {
        Some(reason) => Err(OptimizationFailure {
            kind: FailureKind::Cancelled,
            scenario,
            detail: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Verification detail for a vehicle whose delivered energy misses its target.
fn energy_mismatch(vehicle_id: &str, delivered: f64, required: f64) -> String {
    format!(
        "vehicle {vehicle_id} delivered {delivered:.6} kWh, required {required:.6} ({:+.3e} kWh)",
        delivered - required
    )
}

/// Scale for a relative tolerance: `max(1, |x|)`.
fn scale(x: f64) -> f64 {
    x.abs().max(1.0)
}

/// One vehicle's data as the LP sees it.
#[derive(Debug, Clone)]
struct Demand {
    vehicle_id: String,
    window: Range<usize>,
    max_power: f64,
    energy: f64,
    /// Least energy that still counts as served.
    min_energy: f64,
}

/// Variable handles of one built LP.
struct Vars {
    /// `[vehicle][k]`, `k` counted from the window start.
    power: Vec<Vec<Variable>>,
    shortfall: Vec<Option<Variable>>,
    peak: Option<Variable>,
    /// `T + 1` total-variation terms, empty when smoothness is unweighted.
    ramps: Vec<Variable>,
    /// Per-step excess over the soft target, empty without one.
    excess: Vec<Variable>,
    /// Binary plugged-in flags shaped like `power`, empty without a
    /// charger limit.
    plugged: Vec<Vec<Variable>>,
}

/// Fixed inputs of a scenario LP; models are rebuilt from it per stage.
struct LpInstance {
    scenario: Scenario,
    demands: Vec<Demand>,
    steps: usize,
    dt: f64,
    capacity_kw: f64,
    soft_target: Option<f64>,
    charger_limit: Option<usize>,
    weights: ObjectiveWeights,
    rates: Vec<f64>,
}

impl LpInstance {
    fn new(
        sessions: &SessionSet,
        grid: &TimeGrid,
        capacity: &DepotCapacity,
        policy: &ScenarioPolicy,
        rates: Vec<f64>,
    ) -> Result<Self, OptimizationFailure> {
        let scenario = policy.scenario;
        let dt = grid.step_hours();
        let keep = 1.0 - policy.shortfall_fraction();
        let infeasible = |detail: String| OptimizationFailure {
            kind: FailureKind::Infeasible,
            scenario,
            detail,
        };

        let mut demands = Vec::with_capacity(sessions.len());
        for s in sessions {
            let window = grid.window(s);
            let reachable = s.max_power() * window.len() as f64 * dt;
            let min_energy = s.energy_required() * keep;
            if window.is_empty() {
                return Err(infeasible(format!(
                    "vehicle {} has no steps inside the grid",
                    s.vehicle_id()
                )));
            }
            if reachable + 1e-9 * scale(min_energy) < min_energy {
                return Err(infeasible(format!(
                    "vehicle {} needs {min_energy:.3} kWh but its clamped window allows {reachable:.3} kWh",
                    s.vehicle_id()
                )));
            }
            demands.push(Demand {
                vehicle_id: s.vehicle_id().to_string(),
                window,
                max_power: s.max_power(),
                energy: s.energy_required(),
                min_energy,
            });
        }

        Ok(Self {
            scenario,
            demands,
            steps: grid.len(),
            dt,
            capacity_kw: policy.effective_capacity(capacity),
            soft_target: capacity.soft_target,
            charger_limit: capacity.max_concurrent_chargers,
            weights: policy.objective_weights,
            rates,
        })
    }

    /// Runs the two LP stages at tolerance `tol`.
    fn solve(
        &self,
        tol: f64,
        control: &SolveControl,
    ) -> Result<Vec<VehicleSchedule>, OptimizationFailure> {
        let numerical = |detail: String| OptimizationFailure {
            kind: FailureKind::Numerical,
            scenario: self.scenario,
            detail,
        };

        // Stage 1: weighted objective.
        let mut pv = ProblemVariables::new();
        let vars = self.declare(&mut pv);
        let objective = self.primary_objective(&vars);
        let constraints = self.constraints(&vars);
        debug!(
            vehicles = self.demands.len(),
            steps = self.steps,
            constraints = constraints.len(),
            charger_limit = ?self.charger_limit,
            "solving primary LP"
        );
        let mut model = pv.minimise(objective).using(microlp);
        for c in constraints {
            model = model.with(c);
        }
        let primary = model.solve().map_err(|e| match e {
            ResolutionError::Infeasible => OptimizationFailure {
                kind: FailureKind::Infeasible,
                scenario: self.scenario,
                detail: format!(
                    "sessions cannot be served under {:.3} kW effective capacity",
                    self.capacity_kw
                ),
            },
            other => numerical(format!("primary LP: {other}")),
        })?;
        let optimum = self.primary_value(&vars, &primary);
        check_stop(control, self.scenario)?;

        // Stage 2: hold the optimum, spread each vehicle over its window.
        let mut pv = ProblemVariables::new();
        let vars = self.declare(&mut pv);
        let vehicle_peaks: Vec<Variable> = self
            .demands
            .iter()
            .map(|d| pv.add(variable().min(0.0).max(d.max_power)))
            .collect();
        let spread: Expression = vehicle_peaks
            .iter()
            .zip(&self.demands)
            .map(|(&m, d)| m * (1.0 / d.max_power))
            .sum();
        let mut constraints = self.constraints(&vars);
        for (powers, &m) in vars.power.iter().zip(&vehicle_peaks) {
            for &p in powers {
                constraints.push(constraint!(m >= p));
            }
        }
        let bound = optimum + tol * scale(optimum);
        let held = self.primary_objective(&vars);
        constraints.push(constraint!(held <= bound));

        let mut model = pv.minimise(spread).using(microlp);
        for c in constraints {
            model = model.with(c);
        }
        let spread_solution = model
            .solve()
            .map_err(|e| numerical(format!("tie-break LP: {e}")))?;
        check_stop(control, self.scenario)?;

        self.extract(&vars, &spread_solution, tol).map_err(numerical)
    }

    fn declare(&self, pv: &mut ProblemVariables) -> Vars {
        let power = self
            .demands
            .iter()
            .map(|d| pv.add_vector(variable().min(0.0).max(d.max_power), d.window.len()))
            .collect();
        let shortfall = self
            .demands
            .iter()
            .map(|d| {
                let slack = d.energy - d.min_energy;
                (slack > 0.0).then(|| pv.add(variable().min(0.0).max(slack)))
            })
            .collect();
        let peak = (self.weights.peak > 0.0).then(|| pv.add(variable().min(0.0)));
        let ramps = if self.weights.smoothness > 0.0 {
            pv.add_vector(variable().min(0.0), self.steps + 1)
        } else {
            Vec::new()
        };
        let excess = match self.soft_target {
            Some(_) if self.weights.soft_excess > 0.0 => {
                pv.add_vector(variable().min(0.0), self.steps)
            }
            _ => Vec::new(),
        };
        let plugged = match self.charger_limit {
            Some(_) => self
                .demands
                .iter()
                .map(|d| pv.add_vector(variable().binary(), d.window.len()))
                .collect(),
            None => Vec::new(),
        };
        Vars {
            power,
            shortfall,
            peak,
            ramps,
            excess,
            plugged,
        }
    }

    /// Total load expression per step; `None` where no vehicle is plugged in.
    fn loads(&self, vars: &Vars) -> Vec<Option<Expression>> {
        let mut by_step: Vec<Vec<Variable>> = vec![Vec::new(); self.steps];
        for (d, powers) in self.demands.iter().zip(&vars.power) {
            for (t, &p) in d.window.clone().zip(powers) {
                by_step[t].push(p);
            }
        }
        by_step
            .into_iter()
            .map(|vs| (!vs.is_empty()).then(|| vs.into_iter().sum::<Expression>()))
            .collect()
    }

    fn constraints(&self, vars: &Vars) -> Vec<Constraint> {
        let mut out = Vec::new();

        for (i, (d, powers)) in self.demands.iter().zip(&vars.power).enumerate() {
            let delivered: Expression = powers.iter().map(|&p| p * self.dt).sum();
            let energy = d.energy;
            match vars.shortfall[i] {
                Some(u) => out.push(constraint!(u + delivered == energy)),
                None => out.push(constraint!(delivered == energy)),
            }
        }

        let loads = self.loads(vars);
        let cap = self.capacity_kw;
        for (t, load) in loads.iter().enumerate() {
            let Some(load) = load else { continue };
            let l = load.clone();
            out.push(constraint!(l <= cap));
            if let Some(z) = vars.peak {
                let l = load.clone();
                out.push(constraint!(z >= l));
            }
            if let (Some(target), Some(&e)) = (self.soft_target, vars.excess.get(t)) {
                let l = load.clone();
                out.push(constraint!(l <= e + target));
            }
        }

        if let Some(limit) = self.charger_limit {
            let mut by_step: Vec<Vec<Variable>> = vec![Vec::new(); self.steps];
            for ((d, powers), flags) in self.demands.iter().zip(&vars.power).zip(&vars.plugged) {
                for ((t, &p), &b) in d.window.clone().zip(powers).zip(flags) {
                    let on = b * d.max_power;
                    out.push(constraint!(p <= on));
                    by_step[t].push(b);
                }
            }
            let n = limit as f64;
            for flags in by_step.into_iter().filter(|f| f.len() > limit) {
                let plugged_in: Expression = flags.into_iter().sum();
                out.push(constraint!(plugged_in <= n));
            }
        }

        if !vars.ramps.is_empty() {
            // Load is zero before the first and after the last step.
            for (k, &r) in vars.ramps.iter().enumerate() {
                let prev = if k == 0 { None } else { loads[k - 1].clone() };
                let cur = loads.get(k).cloned().flatten();
                match (prev, cur) {
                    (None, None) => {}
                    (Some(one), None) | (None, Some(one)) => out.push(constraint!(r >= one)),
                    (Some(prev), Some(cur)) => {
                        let up = cur.clone() - prev.clone();
                        let down = prev - cur;
                        out.push(constraint!(r >= up));
                        out.push(constraint!(r >= down));
                    }
                }
            }
        }

        out
    }

    /// Energy-cost coefficient per kW at step `t`.
    fn cost_coef(&self, t: usize) -> f64 {
        self.weights.energy_cost * self.rates.get(t).copied().unwrap_or(0.0) * self.dt
    }

    fn primary_objective(&self, vars: &Vars) -> Expression {
        let w = &self.weights;
        let mut terms: Vec<Expression> = Vec::new();
        if let Some(z) = vars.peak {
            terms.push(z * w.peak);
        }
        terms.extend(vars.ramps.iter().map(|&r| r * w.smoothness));
        terms.extend(vars.excess.iter().map(|&e| e * (w.soft_excess * self.dt)));
        terms.extend(
            vars.shortfall
                .iter()
                .flatten()
                .map(|&u| u * SHORTFALL_PENALTY_PER_KWH),
        );
        if w.energy_cost > 0.0 {
            for (d, powers) in self.demands.iter().zip(&vars.power) {
                terms.extend(
                    d.window
                        .clone()
                        .zip(powers)
                        .map(|(t, &p)| p * self.cost_coef(t)),
                );
            }
        }
        terms.into_iter().sum()
    }

    /// Value of [`LpInstance::primary_objective`] at `sol`.
    fn primary_value(&self, vars: &Vars, sol: &impl Solution) -> f64 {
        let w = &self.weights;
        let mut value = vars.peak.map_or(0.0, |z| sol.value(z) * w.peak);
        value += vars.ramps.iter().map(|&r| sol.value(r)).sum::<f64>() * w.smoothness;
        value += vars.excess.iter().map(|&e| sol.value(e)).sum::<f64>() * w.soft_excess * self.dt;
        value += vars
            .shortfall
            .iter()
            .flatten()
            .map(|&u| sol.value(u))
            .sum::<f64>()
            * SHORTFALL_PENALTY_PER_KWH;
        if w.energy_cost > 0.0 {
            for (d, powers) in self.demands.iter().zip(&vars.power) {
                value += d
                    .window
                    .clone()
                    .zip(powers)
                    .map(|(t, &p)| sol.value(p) * self.cost_coef(t))
                    .sum::<f64>();
            }
        }
        value
    }

    /// Reads the power values back, checks every constraint at tolerance
    /// `tol` and snaps values within tolerance onto their bounds.
    fn extract(
        &self,
        vars: &Vars,
        sol: &impl Solution,
        tol: f64,
    ) -> Result<Vec<VehicleSchedule>, String> {
        let mut totals = vec![0.0_f64; self.steps];
        let mut charging = vec![0_usize; self.steps];
        let mut schedules = Vec::with_capacity(self.demands.len());

        for (d, powers) in self.demands.iter().zip(&vars.power) {
            let p_tol = tol * scale(d.max_power);
            let e_tol = tol * scale(d.energy);
            let mut profile = Vec::with_capacity(powers.len());
            for &p in powers {
                let raw = sol.value(p);
                if !raw.is_finite() || raw < -p_tol || raw > d.max_power + p_tol {
                    return Err(format!(
                        "vehicle {} power {raw} outside [0, {}]",
                        d.vehicle_id, d.max_power
                    ));
                }
                let kw = if raw < p_tol {
                    0.0
                } else {
                    raw.min(d.max_power)
                };
                profile.push(kw);
            }

            let delivered = profile.iter().sum::<f64>() * self.dt;
            if delivered > d.energy + e_tol || delivered < d.min_energy - e_tol {
                return Err(energy_mismatch(&d.vehicle_id, delivered, d.energy));
            }
            for (t, &kw) in d.window.clone().zip(&profile) {
                totals[t] += kw;
                charging[t] += usize::from(kw > 0.0);
            }

            let shortfall = d.energy - delivered;
            let shortfall = if shortfall > e_tol { shortfall } else { 0.0 };
            schedules.push(VehicleSchedule::new(
                d.vehicle_id.clone(),
                d.window.clone(),
                profile,
                d.energy,
                delivered,
                shortfall,
            ));
        }

        let cap_tol = tol * scale(self.capacity_kw);
        if let Some((t, &load)) = totals
            .iter()
            .enumerate()
            .find(|&(_, &load)| load > self.capacity_kw + cap_tol)
        {
            return Err(format!(
                "step {t} load {load:.6} kW exceeds capacity {:.6} kW ({:+.3e} kW)",
                self.capacity_kw,
                load - self.capacity_kw
            ));
        }
        if let Some(limit) = self.charger_limit {
            if let Some((t, &count)) = charging.iter().enumerate().find(|&(_, &n)| n > limit) {
                return Err(format!("step {t} has {count} vehicles charging, limit is {limit}"));
            }
        }

        Ok(schedules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RawSessionRecord;
    use chrono::TimeDelta;

    fn sessions(rows: &[(&str, &str, &str, f64, f64)]) -> SessionSet {
        let raw: Vec<RawSessionRecord> = rows
            .iter()
            .map(|&(id, a, d, kwh, kw)| RawSessionRecord {
                vehicle_id: id.into(),
                arrival_time: format!("2026-02-17 {a}:00"),
                departure_time: format!("2026-02-17 {d}:00"),
                energy_required: kwh,
                max_power: kw,
            })
            .collect();
        SessionSet::build(&raw).expect("valid sessions")
    }

    fn three_sessions() -> SessionSet {
        sessions(&[
            ("A", "00:00", "04:00", 20.0, 10.0),
            ("B", "01:00", "03:00", 10.0, 10.0),
            ("C", "02:00", "06:00", 15.0, 10.0),
        ])
    }

    fn hourly(set: &SessionSet) -> TimeGrid {
        TimeGrid::covering(set, TimeDelta::hours(1)).expect("grid")
    }

    #[test]
    fn single_vehicle_is_spread_evenly() {
        let set = sessions(&[("A", "00:00", "04:00", 20.0, 10.0)]);
        let grid = hourly(&set);
        let alloc = ScheduleOptimizer::default()
            .solve(
                &set,
                &grid,
                &DepotCapacity::new(50.0),
                &Scenario::Expected.default_policy(),
            )
            .expect("feasible");
        let a = alloc.get("A").expect("scheduled");
        for &kw in a.power_kw() {
            assert!((kw - 5.0).abs() < 1e-6, "expected flat 5 kW, got {kw}");
        }
        assert!((a.delivered_kwh() - 20.0).abs() < 1e-6);
        assert!(!a.buffer_invoked());
    }

    #[test]
    fn three_sessions_fit_under_depot_cap() {
        let set = three_sessions();
        let grid = hourly(&set);
        let policy = Scenario::Expected.default_policy();
        let capacity = DepotCapacity::new(15.0);
        let alloc = ScheduleOptimizer::default()
            .solve(&set, &grid, &capacity, &policy)
            .expect("feasible");
        for t in grid.steps() {
            assert!(alloc.total_at(t) <= policy.effective_capacity(&capacity) + 1e-6);
        }
        for s in &set {
            let delivered = alloc.get(s.vehicle_id()).map(VehicleSchedule::delivered_kwh);
            assert!((delivered.unwrap_or(0.0) - s.energy_required()).abs() < 1e-6);
        }
        // 30 kWh for A+B inside [0h, 4h) bounds the peak at 7.5 kW.
        let peak = grid.steps().map(|t| alloc.total_at(t)).fold(0.0, f64::max);
        assert!((peak - 7.5).abs() < 1e-4, "peak {peak}");
    }

    #[test]
    fn too_little_capacity_is_infeasible() {
        let set = three_sessions();
        let grid = hourly(&set);
        let mut policy = Scenario::Aggressive.default_policy();
        policy.capacity_margin_fraction = 0.5;
        let err = ScheduleOptimizer::default()
            .solve(&set, &grid, &DepotCapacity::new(10.0), &policy)
            .expect_err("5 kW cannot serve 30 kWh in 4 h");
        assert_eq!(err.kind, FailureKind::Infeasible);
        assert_eq!(err.scenario, Scenario::Aggressive);
    }

    #[test]
    fn completion_buffer_absorbs_a_tight_cap() {
        // 30 kWh for A+B in 4 h needs 7.5 kW; 7.2 kW falls 1.2 kWh short,
        // within a 10% buffer.
        let set = sessions(&[
            ("A", "00:00", "04:00", 20.0, 10.0),
            ("B", "01:00", "03:00", 10.0, 10.0),
        ]);
        let grid = hourly(&set);
        let mut policy = Scenario::Conservative.default_policy();
        policy.capacity_margin_fraction = 0.72;
        let alloc = ScheduleOptimizer::default()
            .solve(&set, &grid, &DepotCapacity::new(10.0), &policy)
            .expect("buffer makes it feasible");
        assert!(alloc.buffered_sessions() >= 1);
        let short: f64 = alloc.schedules().iter().map(VehicleSchedule::shortfall_kwh).sum();
        assert!((short - 1.2).abs() < 1e-4, "shortfall {short}");
        for s in alloc.schedules() {
            assert!(s.delivered_kwh() >= 0.9 * s.energy_required_kwh() - 1e-6);
        }
    }

    #[test]
    fn cancelled_token_returns_cancelled() {
        let set = three_sessions();
        let grid = hourly(&set);
        let token = CancellationToken::new();
        token.cancel();
        let err = ScheduleOptimizer::default()
            .solve_with(
                &set,
                &grid,
                &DepotCapacity::new(15.0),
                &Scenario::Expected.default_policy(),
                &SolveControl::none().with_token(token),
            )
            .expect_err("cancelled");
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[test]
    fn expired_deadline_returns_cancelled() {
        let set = three_sessions();
        let grid = hourly(&set);
        let err = ScheduleOptimizer::default()
            .solve_with(
                &set,
                &grid,
                &DepotCapacity::new(15.0),
                &Scenario::Expected.default_policy(),
                &SolveControl::none().with_deadline(Instant::now()),
            )
            .expect_err("deadline passed");
        assert_eq!(err.kind, FailureKind::Cancelled);
    }

    #[test]
    fn session_outside_explicit_horizon_is_infeasible() {
        let set = three_sessions();
        let start = set.earliest_arrival();
        let grid = TimeGrid::new(start, start + TimeDelta::hours(2), TimeDelta::hours(1))
            .expect("grid");
        let err = ScheduleOptimizer::default()
            .solve(
                &set,
                &grid,
                &DepotCapacity::new(100.0),
                &Scenario::Expected.default_policy(),
            )
            .expect_err("C arrives after the horizon");
        assert_eq!(err.kind, FailureKind::Infeasible);
        assert!(err.detail.contains('C') || err.detail.contains('A'));
    }

    fn charging_count(alloc: &Allocation, t: usize) -> usize {
        alloc
            .schedules()
            .iter()
            .filter(|s| s.power_at(t) > 1e-9)
            .count()
    }

    #[test]
    fn charger_limit_caps_vehicles_per_step() {
        let set = three_sessions();
        let grid = hourly(&set);
        let policy = Scenario::Expected.default_policy();
        let optimizer = ScheduleOptimizer::default();

        let free = optimizer
            .solve(&set, &grid, &DepotCapacity::new(15.0), &policy)
            .expect("feasible");
        assert!(grid.steps().any(|t| charging_count(&free, t) > 1));

        let capacity = DepotCapacity::new(15.0).with_charger_limit(1);
        let alloc = optimizer
            .solve(&set, &grid, &capacity, &policy)
            .expect("one charger can serve A, B and C in turn");
        for t in grid.steps() {
            assert!(charging_count(&alloc, t) <= 1, "step {t}");
        }
        for s in &set {
            let delivered = alloc.get(s.vehicle_id()).map(VehicleSchedule::delivered_kwh);
            assert!((delivered.unwrap_or(0.0) - s.energy_required()).abs() < 1e-6);
        }
        // A and B each need whole steps at full power.
        let peak = grid.steps().map(|t| alloc.total_at(t)).fold(0.0, f64::max);
        assert!((peak - 10.0).abs() < 1e-5, "peak {peak}");
    }

    #[test]
    fn charger_limit_can_make_a_batch_infeasible() {
        // Both vehicles need every step of the same two-hour window.
        let set = sessions(&[
            ("A", "00:00", "02:00", 20.0, 10.0),
            ("B", "00:00", "02:00", 20.0, 10.0),
        ]);
        let grid = hourly(&set);
        let policy = Scenario::Expected.default_policy();
        let optimizer = ScheduleOptimizer::default();
        assert!(
            optimizer
                .solve(&set, &grid, &DepotCapacity::new(50.0), &policy)
                .is_ok()
        );
        let err = optimizer
            .solve(
                &set,
                &grid,
                &DepotCapacity::new(50.0).with_charger_limit(1),
                &policy,
            )
            .expect_err("one charger cannot serve both");
        assert_eq!(err.kind, FailureKind::Infeasible);
    }

    #[test]
    fn energy_mismatch_detail_shows_signed_difference() {
        let detail = energy_mismatch("V0026", 10.000_000_4, 10.0);
        assert!(detail.contains("V0026"), "{detail}");
        assert!(detail.contains("+4.000e-7"), "{detail}");
        let short = energy_mismatch("V1", 9.5, 10.0);
        assert!(short.contains("-5.000e-1"), "{short}");
    }

    #[test]
    fn soft_target_pulls_load_down_when_possible() {
        let set = sessions(&[("A", "00:00", "04:00", 20.0, 10.0)]);
        let grid = hourly(&set);
        let capacity = DepotCapacity::new(50.0).with_soft_target(6.0);
        let alloc = ScheduleOptimizer::default()
            .solve(
                &set,
                &grid,
                &capacity,
                &Scenario::Conservative.default_policy(),
            )
            .expect("feasible");
        for t in grid.steps() {
            assert!(alloc.total_at(t) <= 6.0 + 1e-6);
        }
    }
}
