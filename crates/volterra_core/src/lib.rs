/// The `volterra_core` crate is the numerical engine behind the predator-prey simulator.
/// It integrates the Lotka-Volterra model over a fixed time grid and derives the
/// equilibria, phase-plane orbit and summary views a front end displays.
///
/// Key components:
/// - **Traits**: `Scalar`, `DynamicalSystem`, `Differentiable` (analytic Jacobians) and `Steppable`.
/// - **Model**: `ModelParameters`, `InitialState` and the `LotkaVolterra` vector field.
/// - **Solvers**: RK4, adaptive Tsit5 with stiffness detection, and Rosenbrock23.
/// - **Integrate**: grid-landing driver with a batched `IntegrationRunner`.
/// - **Equilibrium / Analysis / Plot**: read-only views over parameters and trajectories.
pub mod analysis;
pub mod equilibrium;
pub mod error;
pub mod grid;
pub mod integrate;
pub mod model;
pub mod plot;
pub mod simulation;
pub mod solvers;
pub mod traits;
pub mod trajectory;

pub use error::{Result, SimulationError};
pub use simulation::{simulate, SimulationReport, SimulationRequest};
