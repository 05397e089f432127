//! TOML-based run configuration and preset definitions.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;

use crate::session::{SessionSet, parse_timestamp};
use crate::sim::grid::{GridError, TimeGrid};
use crate::sim::optimizer::SolverSettings;
use crate::sim::policy::{DepotCapacity, ObjectiveWeights, Scenario, ScenarioPolicy};
use crate::tariff::{Tariff, TouBlock};

/// Longest accepted grid step (one day).
pub const MAX_STEP_MINUTES: i64 = 24 * 60;

/// Longest accepted explicit horizon (one leap year).
pub const MAX_HORIZON_HOURS: i64 = 366 * 24;

/// Top-level run configuration parsed from TOML.
///
/// All fields have defaults matching the `default` preset. Load from TOML
/// with [`RunConfig::from_toml_file`] or pick a built-in preset with
/// [`RunConfig::from_preset`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Depot power limits.
    #[serde(default)]
    pub depot: DepotConfig,
    /// Planning horizon discretization.
    #[serde(default)]
    pub grid: GridConfig,
    /// Solver tolerances and deadline.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Energy and demand pricing.
    #[serde(default)]
    pub tariff: Tariff,
    /// Per-scenario policy overrides.
    #[serde(default)]
    pub scenarios: ScenarioOverrides,
}

/// Depot power limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepotConfig {
    /// Hard ceiling on total depot draw (kW).
    pub max_total_power_kw: f64,
    /// Preferred ceiling; draw above it is penalized (kW).
    pub soft_target_kw: Option<f64>,
    /// Chargers that may draw power in the same step; unlimited when unset.
    pub max_concurrent_chargers: Option<usize>,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            max_total_power_kw: 600.0,
            soft_target_kw: None,
            max_concurrent_chargers: None,
        }
    }
}

/// Planning horizon discretization.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Step length in minutes, 1 to [`MAX_STEP_MINUTES`].
    pub step_minutes: i64,
    /// Explicit horizon start; when unset the grid covers every session.
    pub horizon_start: Option<String>,
    /// Explicit horizon length, used with `horizon_start` (default 24, at
    /// most [`MAX_HORIZON_HOURS`]).
    pub horizon_hours: Option<i64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_minutes: 15,
            horizon_start: None,
            horizon_hours: None,
        }
    }
}

/// Solver tolerances and deadline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Relative tolerance for post-solve checks.
    pub tolerance: f64,
    /// Tolerance for the retry after a numerical failure.
    pub relaxed_tolerance: f64,
    /// Wall-clock budget for the whole run, in seconds.
    pub deadline_secs: Option<f64>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let settings = SolverSettings::default();
        Self {
            tolerance: settings.tolerance,
            relaxed_tolerance: settings.relaxed_tolerance,
            deadline_secs: None,
        }
    }
}

/// Partial objective weights; unset fields keep the scenario default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightOverrides {
    pub peak: Option<f64>,
    pub smoothness: Option<f64>,
    pub energy_cost: Option<f64>,
    pub soft_excess: Option<f64>,
}

/// Partial scenario policy; unset fields keep the scenario default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyOverrides {
    pub capacity_margin_fraction: Option<f64>,
    pub objective_weights: WeightOverrides,
    pub allow_late_completion: Option<bool>,
    pub completion_buffer: Option<f64>,
}

impl PolicyOverrides {
    fn apply(&self, mut policy: ScenarioPolicy) -> ScenarioPolicy {
        let w = &self.objective_weights;
        let base = policy.objective_weights;
        policy.objective_weights = ObjectiveWeights {
            peak: w.peak.unwrap_or(base.peak),
            smoothness: w.smoothness.unwrap_or(base.smoothness),
            energy_cost: w.energy_cost.unwrap_or(base.energy_cost),
            soft_excess: w.soft_excess.unwrap_or(base.soft_excess),
        };
        if let Some(m) = self.capacity_margin_fraction {
            policy.capacity_margin_fraction = m;
        }
        if let Some(late) = self.allow_late_completion {
            policy.allow_late_completion = late;
        }
        if let Some(b) = self.completion_buffer {
            policy.completion_buffer = b;
        }
        policy
    }
}

/// `[scenarios.<name>]` tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioOverrides {
    pub conservative: PolicyOverrides,
    pub expected: PolicyOverrides,
    pub aggressive: PolicyOverrides,
}

impl ScenarioOverrides {
    fn get(&self, scenario: Scenario) -> &PolicyOverrides {
        match scenario {
            Scenario::Conservative => &self.conservative,
            Scenario::Expected => &self.expected,
            Scenario::Aggressive => &self.aggressive,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"depot.max_total_power_kw"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl RunConfig {
    /// Available preset names.
    pub const PRESETS: &[&str] = &["default", "tight_depot"];

    /// A mid-sized depot with a flat tariff and 15-minute steps.
    pub fn default_depot() -> Self {
        Self::default()
    }

    /// A depot with little headroom, a soft target and an evening peak rate.
    pub fn tight_depot() -> Self {
        Self {
            depot: DepotConfig {
                max_total_power_kw: 450.0,
                soft_target_kw: Some(350.0),
                max_concurrent_chargers: None,
            },
            tariff: Tariff {
                tou_blocks: vec![TouBlock {
                    start_hour: 17.0,
                    end_hour: 21.0,
                    rate_per_kwh: 0.45,
                }],
                ..Tariff::default()
            },
            ..Self::default()
        }
    }

    /// Loads a configuration from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "default" => Ok(Self::default_depot()),
            "tight_depot" => Ok(Self::tight_depot()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("config", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let positive = |v: f64| v.is_finite() && v > 0.0;

        let d = &self.depot;
        if !positive(d.max_total_power_kw) {
            errors.push(ConfigError::new("depot.max_total_power_kw", "must be > 0"));
        }
        if let Some(soft) = d.soft_target_kw {
            if !positive(soft) {
                errors.push(ConfigError::new("depot.soft_target_kw", "must be > 0"));
            }
        }
        if d.max_concurrent_chargers == Some(0) {
            errors.push(ConfigError::new(
                "depot.max_concurrent_chargers",
                "must be >= 1",
            ));
        }

        let g = &self.grid;
        if !(1..=MAX_STEP_MINUTES).contains(&g.step_minutes) {
            errors.push(ConfigError::new(
                "grid.step_minutes",
                format!("must be in [1, {MAX_STEP_MINUTES}]"),
            ));
        }
        if let Some(start) = &g.horizon_start {
            if parse_timestamp(start).is_none() {
                errors.push(ConfigError::new(
                    "grid.horizon_start",
                    format!("cannot parse timestamp \"{start}\""),
                ));
            }
        }
        if g
            .horizon_hours
            .is_some_and(|h| !(1..=MAX_HORIZON_HOURS).contains(&h))
        {
            errors.push(ConfigError::new(
                "grid.horizon_hours",
                format!("must be in [1, {MAX_HORIZON_HOURS}]"),
            ));
        }
        if g.horizon_hours.is_some() && g.horizon_start.is_none() {
            errors.push(ConfigError::new(
                "grid.horizon_hours",
                "requires grid.horizon_start",
            ));
        }

        let s = &self.solver;
        if !positive(s.tolerance) {
            errors.push(ConfigError::new("solver.tolerance", "must be > 0"));
        }
        if !(s.relaxed_tolerance.is_finite() && s.relaxed_tolerance >= s.tolerance) {
            errors.push(ConfigError::new(
                "solver.relaxed_tolerance",
                "must be >= solver.tolerance",
            ));
        }
        if s.deadline_secs.is_some_and(|secs| !positive(secs)) {
            errors.push(ConfigError::new("solver.deadline_secs", "must be > 0"));
        }

        let t = &self.tariff;
        if !(t.flat_energy_rate_per_kwh.is_finite() && t.flat_energy_rate_per_kwh >= 0.0) {
            errors.push(ConfigError::new(
                "tariff.flat_energy_rate_per_kwh",
                "must be >= 0",
            ));
        }
        if !(t.demand_charge_per_kw.is_finite() && t.demand_charge_per_kw >= 0.0) {
            errors.push(ConfigError::new("tariff.demand_charge_per_kw", "must be >= 0"));
        }
        for (i, b) in t.tou_blocks.iter().enumerate() {
            if !(0.0 <= b.start_hour && b.start_hour < b.end_hour && b.end_hour <= 24.0) {
                errors.push(ConfigError::new(
                    format!("tariff.tou_blocks[{i}]"),
                    "must satisfy 0 <= start_hour < end_hour <= 24",
                ));
            }
            if !(b.rate_per_kwh.is_finite() && b.rate_per_kwh >= 0.0) {
                errors.push(ConfigError::new(
                    format!("tariff.tou_blocks[{i}].rate_per_kwh"),
                    "must be >= 0",
                ));
            }
        }

        for policy in self.policies() {
            let prefix = format!("scenarios.{}", policy.scenario);
            let m = policy.capacity_margin_fraction;
            if !(m.is_finite() && m > 0.0 && m <= 1.0) {
                errors.push(ConfigError::new(
                    format!("{prefix}.capacity_margin_fraction"),
                    "must be in (0.0, 1.0]",
                ));
            }
            let b = policy.completion_buffer;
            if !(0.0..1.0).contains(&b) {
                errors.push(ConfigError::new(
                    format!("{prefix}.completion_buffer"),
                    "must be in [0.0, 1.0)",
                ));
            }
            let w = policy.objective_weights;
            for (name, value) in [
                ("peak", w.peak),
                ("smoothness", w.smoothness),
                ("energy_cost", w.energy_cost),
                ("soft_excess", w.soft_excess),
            ] {
                if !(value.is_finite() && value >= 0.0) {
                    errors.push(ConfigError::new(
                        format!("{prefix}.objective_weights.{name}"),
                        "must be >= 0",
                    ));
                }
            }
        }

        errors
    }

    /// Depot limits.
    ///
    /// # Panics
    ///
    /// Panics if the depot section does not pass [`RunConfig::validate`].
    pub fn capacity(&self) -> DepotCapacity {
        let mut capacity = DepotCapacity::new(self.depot.max_total_power_kw);
        if let Some(soft) = self.depot.soft_target_kw {
            capacity = capacity.with_soft_target(soft);
        }
        if let Some(chargers) = self.depot.max_concurrent_chargers {
            capacity = capacity.with_charger_limit(chargers);
        }
        capacity
    }

    /// The three scenario policies with overrides applied, most cautious first.
    pub fn policies(&self) -> Vec<ScenarioPolicy> {
        Scenario::ALL
            .into_iter()
            .map(|s| self.scenarios.get(s).apply(s.default_policy()))
            .collect()
    }

    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            tolerance: self.solver.tolerance,
            relaxed_tolerance: self.solver.relaxed_tolerance,
        }
    }

    /// Run deadline, if configured.
    pub fn deadline(&self) -> Option<Duration> {
        self.solver
            .deadline_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Grid step.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::OutOfRange`] if `step_minutes` does not fit a
    /// duration.
    pub fn step(&self) -> Result<TimeDelta, GridError> {
        TimeDelta::try_minutes(self.grid.step_minutes)
            .ok_or(GridError::OutOfRange("grid.step_minutes"))
    }

    /// Builds the planning grid: the explicit horizon when configured,
    /// otherwise one covering every session.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if the step or horizon is unusable.
    pub fn grid_for(&self, sessions: &SessionSet) -> Result<TimeGrid, GridError> {
        let step = self.step()?;
        match self.grid.horizon_start.as_deref().and_then(parse_timestamp) {
            Some(start) => {
                let hours = self.grid.horizon_hours.unwrap_or(24);
                let end = TimeDelta::try_hours(hours)
                    .and_then(|span| start.checked_add_signed(span))
                    .ok_or(GridError::OutOfRange("grid.horizon_hours"))?;
                TimeGrid::new(start, end, step)
            }
            None => TimeGrid::covering(sessions, step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preset_valid() {
        let cfg = RunConfig::default_depot();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "default should be valid: {errors:?}");
    }

    #[test]
    fn from_preset_unknown() {
        let err = RunConfig::from_preset("nonexistent");
        assert!(err.is_err());
        let e = err.err().map(|e| e.message).unwrap_or_default();
        assert!(e.contains("unknown preset"));
    }

    #[test]
    fn all_presets_are_valid() {
        for name in RunConfig::PRESETS {
            let cfg = RunConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn tight_depot_has_less_headroom() {
        let base = RunConfig::default_depot();
        let tight = RunConfig::tight_depot();
        assert!(tight.depot.max_total_power_kw < base.depot.max_total_power_kw);
        assert!(tight.capacity().soft_target.is_some());
        assert!(!tight.tariff.tou_blocks.is_empty());
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[depot]
max_total_power_kw = 15.0
soft_target_kw = 12.0

[grid]
step_minutes = 60
horizon_start = "2026-02-17 00:00:00"
horizon_hours = 8

[solver]
tolerance = 1e-7
relaxed_tolerance = 1e-5
deadline_secs = 30.0

[tariff]
flat_energy_rate_per_kwh = 0.25
demand_charge_per_kw = 8.0

[[tariff.tou_blocks]]
start_hour = 17.0
end_hour = 21.0
rate_per_kwh = 0.5

[scenarios.aggressive]
capacity_margin_fraction = 0.95
allow_late_completion = true
completion_buffer = 0.02

[scenarios.aggressive.objective_weights]
energy_cost = 2.0
"#;
        let cfg = RunConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.unwrap_or_default();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.depot.max_total_power_kw, 15.0);
        assert_eq!(cfg.tariff.tou_blocks.len(), 1);
        assert_eq!(cfg.deadline(), Some(Duration::from_secs(30)));

        let aggressive = cfg.policies()[2];
        assert_eq!(aggressive.scenario, Scenario::Aggressive);
        assert_eq!(aggressive.capacity_margin_fraction, 0.95);
        assert!(aggressive.allow_late_completion);
        assert_eq!(aggressive.objective_weights.energy_cost, 2.0);
        // Untouched weights keep the scenario default.
        assert_eq!(
            aggressive.objective_weights.peak,
            Scenario::Aggressive.default_policy().objective_weights.peak
        );
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[depot]
max_total_power_kw = 100.0
bogus_field = true
"#;
        assert!(RunConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[grid]
step_minutes = 5
"#;
        let cfg = RunConfig::from_toml_str(toml).unwrap_or_default();
        assert_eq!(cfg.grid.step_minutes, 5);
        assert_eq!(cfg.depot.max_total_power_kw, 600.0);
        assert_eq!(cfg.policies(), ScenarioPolicy::defaults().to_vec());
    }

    #[test]
    fn validation_collects_every_error() {
        let mut cfg = RunConfig::default_depot();
        cfg.depot.max_total_power_kw = 0.0;
        cfg.grid.step_minutes = 0;
        cfg.solver.relaxed_tolerance = 1e-9;
        cfg.scenarios.expected.capacity_margin_fraction = Some(1.5);
        cfg.scenarios.conservative.completion_buffer = Some(1.0);
        cfg.scenarios.aggressive.objective_weights.peak = Some(-1.0);
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for expected in [
            "depot.max_total_power_kw",
            "grid.step_minutes",
            "solver.relaxed_tolerance",
            "scenarios.expected.capacity_margin_fraction",
            "scenarios.conservative.completion_buffer",
            "scenarios.aggressive.objective_weights.peak",
        ] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}");
        }
    }

    #[test]
    fn validation_catches_bad_horizon() {
        let mut cfg = RunConfig::default_depot();
        cfg.grid.horizon_start = Some("yesterday".into());
        cfg.grid.horizon_hours = Some(0);
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.iter().any(|f| f == "grid.horizon_start"));
        assert!(fields.iter().any(|f| f == "grid.horizon_hours"));
    }

    #[test]
    fn validation_bounds_step_and_horizon() {
        let mut cfg = RunConfig::default_depot();
        cfg.grid.step_minutes = 999_999_999_999_999;
        cfg.grid.horizon_start = Some("2026-02-17 00:00:00".into());
        cfg.grid.horizon_hours = Some(9_223_372_036_854_775);
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.iter().any(|f| f == "grid.step_minutes"));
        assert!(fields.iter().any(|f| f == "grid.horizon_hours"));

        cfg.grid.step_minutes = MAX_STEP_MINUTES;
        cfg.grid.horizon_hours = Some(MAX_HORIZON_HOURS);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn oversized_step_or_horizon_is_a_grid_error() {
        let sessions = SessionSet::build(&[crate::session::RawSessionRecord {
            vehicle_id: "A".into(),
            arrival_time: "2026-02-17 00:00:00".into(),
            departure_time: "2026-02-17 04:00:00".into(),
            energy_required: 10.0,
            max_power: 10.0,
        }])
        .expect("valid session");

        let mut cfg = RunConfig::default_depot();
        cfg.grid.step_minutes = 999_999_999_999_999;
        assert_eq!(
            cfg.grid_for(&sessions),
            Err(GridError::OutOfRange("grid.step_minutes"))
        );

        let mut cfg = RunConfig::default_depot();
        cfg.grid.horizon_start = Some("2026-02-17 00:00:00".into());
        cfg.grid.horizon_hours = Some(9_223_372_036_854_775);
        assert_eq!(
            cfg.grid_for(&sessions),
            Err(GridError::OutOfRange("grid.horizon_hours"))
        );

        // Representable as a duration, but the grid end is past the calendar.
        let mut cfg = RunConfig::default_depot();
        cfg.grid.step_minutes = 1_000_000_000_000;
        assert_eq!(
            cfg.grid_for(&sessions),
            Err(GridError::OutOfRange("horizon end"))
        );
    }

    #[test]
    fn charger_limit_flows_into_capacity() {
        let toml = r#"
[depot]
max_total_power_kw = 150.0
max_concurrent_chargers = 4
"#;
        let cfg = RunConfig::from_toml_str(toml).unwrap_or_default();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.capacity().max_concurrent_chargers, Some(4));
        assert_eq!(RunConfig::default_depot().capacity().max_concurrent_chargers, None);

        let mut cfg = RunConfig::default_depot();
        cfg.depot.max_concurrent_chargers = Some(0);
        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.iter().any(|f| f == "depot.max_concurrent_chargers"));
    }

    #[test]
    fn validation_catches_bad_tou_block() {
        let mut cfg = RunConfig::default_depot();
        cfg.tariff.tou_blocks.push(TouBlock {
            start_hour: 22.0,
            end_hour: 6.0,
            rate_per_kwh: 0.1,
        });
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "tariff.tou_blocks[0]"));
    }
}
