//! Depot limits and the three risk postures the optimizer runs under.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Depot-wide power limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DepotCapacity {
    /// Hard ceiling on total depot draw at any timestep (kW).
    pub max_total_power: f64,
    /// Preferred ceiling, penalized when exceeded (kW).
    pub soft_target: Option<f64>,
    /// Vehicles that may draw power in the same step.
    pub max_concurrent_chargers: Option<usize>,
}

impl DepotCapacity {
    /// Creates a capacity with no soft target.
    ///
    /// # Panics
    ///
    /// Panics if `max_total_power` is not a positive finite number.
    pub fn new(max_total_power: f64) -> Self {
        assert!(max_total_power.is_finite() && max_total_power > 0.0);
        Self {
            max_total_power,
            soft_target: None,
            max_concurrent_chargers: None,
        }
    }

    /// Adds a soft target.
    ///
    /// # Panics
    ///
    /// Panics if `soft_target` is not a positive finite number.
    pub fn with_soft_target(mut self, soft_target: f64) -> Self {
        assert!(soft_target.is_finite() && soft_target > 0.0);
        self.soft_target = Some(soft_target);
        self
    }

    /// Caps the number of vehicles charging in any one step.
    ///
    /// # Panics
    ///
    /// Panics if `chargers` is zero.
    pub fn with_charger_limit(mut self, chargers: usize) -> Self {
        assert!(chargers > 0);
        self.max_concurrent_chargers = Some(chargers);
        self
    }
}

/// Risk posture tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Conservative,
    Expected,
    Aggressive,
}

impl Scenario {
    /// All scenarios, most cautious first.
    pub const ALL: [Scenario; 3] = [
        Scenario::Conservative,
        Scenario::Expected,
        Scenario::Aggressive,
    ];

    /// Lower-case name used in file names and the summary.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Expected => "expected",
            Self::Aggressive => "aggressive",
        }
    }

    /// Parses a lower-case scenario name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Built-in parameters for this posture.
    pub fn default_policy(self) -> ScenarioPolicy {
        match self {
            Self::Conservative => ScenarioPolicy {
                scenario: self,
                capacity_margin_fraction: 0.80,
                objective_weights: ObjectiveWeights {
                    peak: 1.0,
                    smoothness: 0.5,
                    energy_cost: 0.0,
                    soft_excess: 2.0,
                },
                allow_late_completion: true,
                completion_buffer: 0.10,
            },
            Self::Expected => ScenarioPolicy {
                scenario: self,
                capacity_margin_fraction: 0.90,
                objective_weights: ObjectiveWeights {
                    peak: 1.0,
                    smoothness: 0.25,
                    energy_cost: 0.1,
                    soft_excess: 1.0,
                },
                allow_late_completion: true,
                completion_buffer: 0.05,
            },
            Self::Aggressive => ScenarioPolicy {
                scenario: self,
                capacity_margin_fraction: 1.0,
                objective_weights: ObjectiveWeights {
                    peak: 0.4,
                    smoothness: 0.1,
                    energy_cost: 1.0,
                    soft_excess: 0.25,
                },
                allow_late_completion: false,
                completion_buffer: 0.0,
            },
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative weights of the objective terms.
///
/// Units: `peak` per kW of peak load, `smoothness` per kW of step-to-step
/// change, `energy_cost` per currency unit of time-of-use energy cost,
/// `soft_excess` per kWh drawn above the soft target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub peak: f64,
    pub smoothness: f64,
    pub energy_cost: f64,
    pub soft_excess: f64,
}

/// Constraint and objective parameters for one scenario. Plain data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScenarioPolicy {
    pub scenario: Scenario,
    /// Share of `max_total_power` the optimizer may use, in (0, 1].
    pub capacity_margin_fraction: f64,
    pub objective_weights: ObjectiveWeights,
    /// Whether sessions may end short of their requirement by up to
    /// `completion_buffer`.
    pub allow_late_completion: bool,
    /// Fraction of each session's energy that may go undelivered, in [0, 1).
    pub completion_buffer: f64,
}

impl ScenarioPolicy {
    /// Capacity ceiling the optimizer enforces (kW).
    pub fn effective_capacity(&self, capacity: &DepotCapacity) -> f64 {
        capacity.max_total_power * self.capacity_margin_fraction
    }

    /// Fraction of energy that may be left undelivered, zero when late
    /// completion is off.
    pub fn shortfall_fraction(&self) -> f64 {
        if self.allow_late_completion {
            self.completion_buffer
        } else {
            0.0
        }
    }

    /// The three built-in policies, most cautious first.
    pub fn defaults() -> [ScenarioPolicy; 3] {
        Scenario::ALL.map(Scenario::default_policy)
    }
}
