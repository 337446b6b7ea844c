//! The predator-prey vector field and its inputs.
//!
//! ```text
//! dx/dt = A*x - B*x*y
//! dy/dt = C*x*y - D*y
//! ```
//!
//! `x` is the prey population and `y` the predator population, both in
//! abstract units, conventionally hundreds of individuals.

use crate::equilibrium::nontrivial_equilibrium;
use crate::error::{Result, SimulationError};
use crate::traits::{Differentiable, DynamicalSystem, Scalar};
use serde::{Deserialize, Serialize};

/// Rate constants of the model. All four must be finite and non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    /// A: prey growth rate in the absence of predators.
    pub growth_prey: f64,
    /// B: rate at which encounters remove prey.
    pub predation_rate: f64,
    /// C: rate at which encounters produce predators.
    pub conversion_efficiency: f64,
    /// D: predator death rate in the absence of prey.
    pub predator_death_rate: f64,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            growth_prey: 1.1,
            predation_rate: 0.4,
            conversion_efficiency: 0.1,
            predator_death_rate: 0.4,
        }
    }
}

impl ModelParameters {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self {
            growth_prey: a,
            predation_rate: b,
            conversion_efficiency: c,
            predator_death_rate: d,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("growth_prey", self.growth_prey)?;
        check_non_negative("predation_rate", self.predation_rate)?;
        check_non_negative("conversion_efficiency", self.conversion_efficiency)?;
        check_non_negative("predator_death_rate", self.predator_death_rate)
    }
}

/// Population levels at t = 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialState {
    pub prey: f64,
    pub predator: f64,
}

impl Default for InitialState {
    fn default() -> Self {
        Self {
            prey: 10.0,
            predator: 1.0,
        }
    }
}

impl InitialState {
    pub fn new(prey: f64, predator: f64) -> Self {
        Self { prey, predator }
    }

    /// Starts the system at its interior equilibrium `(D/C, A/B)`.
    pub fn at_equilibrium(params: &ModelParameters) -> Result<Self> {
        let point = nontrivial_equilibrium(params)?;
        Ok(Self::new(point.prey, point.predator))
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("prey", self.prey)?;
        check_non_negative("predator", self.predator)
    }

    pub fn to_vec(self) -> Vec<f64> {
        vec![self.prey, self.predator]
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(SimulationError::invalid(name, format!("{value} is not finite")));
    }
    if value < 0.0 {
        return Err(SimulationError::invalid(name, format!("{value} is negative")));
    }
    Ok(())
}

/// The Lotka-Volterra vector field bound to one parameter set.
///
/// Negative states are evaluated as-is; the solver may probe them between
/// grid samples and clamping would corrupt its error estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotkaVolterra {
    params: ModelParameters,
}

impl LotkaVolterra {
    pub fn new(params: ModelParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// Rate of change at `(prey, predator)`.
    pub fn rates(&self, prey: f64, predator: f64) -> (f64, f64) {
        let mut out = [0.0; 2];
        self.apply(0.0, &[prey, predator], &mut out);
        (out[0], out[1])
    }
}

impl<T: Scalar> DynamicalSystem<T> for LotkaVolterra {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let a = T::from_f64(self.params.growth_prey).unwrap_or_else(T::nan);
        let b = T::from_f64(self.params.predation_rate).unwrap_or_else(T::nan);
        let c = T::from_f64(self.params.conversion_efficiency).unwrap_or_else(T::nan);
        let d = T::from_f64(self.params.predator_death_rate).unwrap_or_else(T::nan);

        let prey = x[0];
        let predator = x[1];
        out[0] = a * prey - b * prey * predator;
        out[1] = c * prey * predator - d * predator;
    }
}

impl Differentiable for LotkaVolterra {
    fn jacobian(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let ModelParameters {
            growth_prey: a,
            predation_rate: b,
            conversion_efficiency: c,
            predator_death_rate: d,
        } = self.params;
        out[0] = a - b * x[1];
        out[1] = -b * x[0];
        out[2] = c * x[1];
        out[3] = c * x[0] - d;
    }
}

#[cfg(test)]
mod tests {
    use super::{InitialState, LotkaVolterra, ModelParameters};
    use crate::error::SimulationError;
    use crate::traits::{Differentiable, DynamicalSystem};

    #[test]
    fn rates_match_closed_form() {
        let system = LotkaVolterra::new(ModelParameters::new(1.1, 0.4, 0.1, 0.4));
        let (dx, dy) = system.rates(10.0, 1.0);
        assert!((dx - (11.0 - 4.0)).abs() < 1e-12);
        assert!((dy - (1.0 - 0.4)).abs() < 1e-12);
    }

    #[test]
    fn time_argument_is_ignored() {
        let system = LotkaVolterra::new(ModelParameters::default());
        let mut early = [0.0_f64; 2];
        let mut late = [0.0_f64; 2];
        system.apply(0.0, &[3.0, 2.0], &mut early);
        system.apply(17.3, &[3.0, 2.0], &mut late);
        assert_eq!(early, late);
    }

    #[test]
    fn negative_states_are_not_clamped() {
        let system = LotkaVolterra::new(ModelParameters::new(1.0, 1.0, 1.0, 1.0));
        let (dx, dy) = system.rates(-1.0, 2.0);
        assert_eq!(dx, -1.0 + 2.0);
        assert_eq!(dy, -2.0 - 2.0);
    }

    #[test]
    fn evaluates_in_f32() {
        let system = LotkaVolterra::new(ModelParameters::new(1.0, 1.0, 1.0, 2.0));
        let mut out = [0.0_f32; 2];
        system.apply(0.0_f32, &[2.0_f32, 1.0_f32], &mut out);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn jacobian_matches_finite_difference() {
        let system = LotkaVolterra::new(ModelParameters::default());
        let x = [3.0, 2.5];
        let mut jac = [0.0; 4];
        system.jacobian(0.0, &x, &mut jac);

        let h = 1e-6;
        for j in 0..2 {
            let mut plus = x;
            let mut minus = x;
            plus[j] += h;
            minus[j] -= h;
            let mut f_plus = [0.0; 2];
            let mut f_minus = [0.0; 2];
            system.apply(0.0, &plus, &mut f_plus);
            system.apply(0.0, &minus, &mut f_minus);
            for i in 0..2 {
                let fd = (f_plus[i] - f_minus[i]) / (2.0 * h);
                assert!((jac[i * 2 + j] - fd).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn validate_rejects_negative_and_non_finite() {
        let err = ModelParameters::new(1.0, -0.1, 1.0, 1.0)
            .validate()
            .expect_err("negative B should fail");
        assert!(matches!(
            err,
            SimulationError::InvalidParameter {
                name: "predation_rate",
                ..
            }
        ));

        let err = ModelParameters::new(1.0, 1.0, f64::NAN, 1.0)
            .validate()
            .expect_err("NaN C should fail");
        assert!(format!("{err}").contains("conversion_efficiency"));

        let err = InitialState::new(-1.0, 0.0)
            .validate()
            .expect_err("negative prey should fail");
        assert!(format!("{err}").contains("prey"));
    }

    #[test]
    fn zero_parameters_are_accepted() {
        assert!(ModelParameters::new(0.0, 0.0, 0.0, 0.0).validate().is_ok());
        assert!(InitialState::new(0.0, 0.0).validate().is_ok());
    }

    #[test]
    fn at_equilibrium_uses_interior_point() {
        let state = InitialState::at_equilibrium(&ModelParameters::new(1.0, 1.0, 1.0, 2.0))
            .expect("equilibrium should exist");
        assert_eq!(state, InitialState::new(2.0, 1.0));

        let err = InitialState::at_equilibrium(&ModelParameters::new(1.0, 1.0, 0.0, 2.0))
            .expect_err("C = 0 has no interior equilibrium");
        assert!(matches!(err, SimulationError::UndefinedEquilibrium { .. }));

        InitialState::at_equilibrium(&ModelParameters::new(1.0, 1.0, 1e-310, 1.0))
            .expect_err("D/C overflows");
    }
}
