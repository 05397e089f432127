//! Uncontrolled "charge on arrival" load curve.

use crate::session::SessionSet;

use super::grid::TimeGrid;
use super::types::LoadCurve;

/// Energy below which a session counts as fully charged (kWh).
const DONE_EPS_KWH: f64 = 1e-9;

/// Simulates every vehicle charging flat out from the moment it plugs in.
///
/// Depot capacity is deliberately not an input: the curve shows what the
/// depot would draw with no control at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct BaselineSimulator;

impl BaselineSimulator {
    /// Computes the uncontrolled load curve.
    ///
    /// Each session draws `min(max_power, remaining / Δt)` from its snapped
    /// arrival step until its energy is delivered or its snapped departure
    /// step is reached. A session cut off by departure simply receives less
    /// energy.
    pub fn simulate(&self, sessions: &SessionSet, grid: &TimeGrid) -> LoadCurve {
        let dt = grid.step_hours();
        let mut load = vec![0.0_f64; grid.len()];

        for session in sessions {
            let mut remaining_kwh = session.energy_required();
            for t in grid.window(session) {
                if remaining_kwh <= DONE_EPS_KWH {
                    break;
                }
                let deliver_kwh = remaining_kwh.min(session.max_power() * dt);
                load[t] += deliver_kwh / dt;
                remaining_kwh -= deliver_kwh;
            }
        }

        LoadCurve::from_power(grid.clone(), load)
    }
}
