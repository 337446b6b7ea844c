use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Represents a continuous-time vector field.
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field.
    /// t: current time (may lie between grid samples)
    /// x: current state
    /// out: buffer to write dx/dt
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A system that can report its Jacobian, required by the linearly implicit solver.
pub trait Differentiable: DynamicalSystem<f64> {
    /// Writes ∂f/∂x into `out` in row-major order (dim * dim entries).
    fn jacobian(&self, t: f64, x: &[f64], out: &mut [f64]);

    /// Writes ∂f/∂t into `out`. Autonomous systems keep the default.
    fn time_derivative(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
        out.fill(0.0);
    }
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
