use crate::analysis::{classify_regime, orbit, OrbitView, Regime};
use crate::equilibrium::{equilibria, Equilibria};
use crate::error::Result;
use crate::grid::GridSpec;
use crate::integrate::{integrate, lotka_volterra_runner, IntegrationRunner, SolverSettings};
use crate::model::{InitialState, LotkaVolterra, ModelParameters};
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything one simulation needs, passed by value. Missing fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationRequest {
    pub parameters: ModelParameters,
    pub initial: InitialState,
    pub grid: GridSpec,
    pub settings: SolverSettings,
    pub include_orbit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub parameters: ModelParameters,
    pub trajectory: Trajectory,
    pub equilibria: Equilibria,
    pub regime: Regime,
    pub orbit: Option<OrbitView>,
}

impl SimulationRequest {
    /// Validates the request and returns a runner that has not taken any steps yet.
    pub fn runner(&self) -> Result<IntegrationRunner<LotkaVolterra>> {
        let grid = self.grid.build()?;
        lotka_volterra_runner(&self.parameters, &self.initial, grid, self.settings)
    }

    /// Bundles an already computed trajectory into a report.
    pub fn report(&self, trajectory: Trajectory) -> SimulationReport {
        let orbit = self.include_orbit.then(|| orbit(&trajectory));
        SimulationReport {
            parameters: self.parameters,
            equilibria: equilibria(&self.parameters),
            regime: classify_regime(&self.parameters, &self.initial),
            trajectory,
            orbit,
        }
    }
}

pub fn simulate(request: &SimulationRequest) -> Result<SimulationReport> {
    let grid = request.grid.build()?;
    let trajectory = integrate(&request.parameters, &request.initial, &grid, &request.settings)?;
    let report = request.report(trajectory);
    info!(
        samples = report.trajectory.len(),
        regime = ?report.regime,
        accepted = report.trajectory.stats().accepted_steps,
        "simulation complete"
    );
    Ok(report)
}
