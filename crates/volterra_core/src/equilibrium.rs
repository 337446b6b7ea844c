use crate::error::{DegenerateRate, Result, SimulationError};
use crate::model::{LotkaVolterra, ModelParameters};
use crate::traits::Differentiable;
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumPoint {
    pub prey: f64,
    pub predator: f64,
}

impl EquilibriumPoint {
    pub const ORIGIN: EquilibriumPoint = EquilibriumPoint {
        prey: 0.0,
        predator: 0.0,
    };
}

/// Both canonical zero-derivative points of the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Equilibria {
    pub trivial: EquilibriumPoint,
    /// `(D/C, A/B)`, or `None` when B = 0, C = 0 or either ratio overflows.
    pub nontrivial: Option<EquilibriumPoint>,
}

pub fn equilibria(params: &ModelParameters) -> Equilibria {
    Equilibria {
        trivial: EquilibriumPoint::ORIGIN,
        nontrivial: nontrivial_equilibrium(params).ok(),
    }
}

/// The interior equilibrium `(D/C, A/B)`.
pub fn nontrivial_equilibrium(params: &ModelParameters) -> Result<EquilibriumPoint> {
    let undefined = |reason| Err(SimulationError::UndefinedEquilibrium { reason });
    if params.predation_rate == 0.0 {
        return undefined(DegenerateRate::Predation);
    }
    if params.conversion_efficiency == 0.0 {
        return undefined(DegenerateRate::Conversion);
    }
    let point = EquilibriumPoint {
        prey: params.predator_death_rate / params.conversion_efficiency,
        predator: params.growth_prey / params.predation_rate,
    };
    if !point.prey.is_finite() || !point.predator.is_finite() {
        return undefined(DegenerateRate::Overflow);
    }
    Ok(point)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EquilibriumKind {
    Saddle,
    Center,
    StableNode,
    UnstableNode,
    StableFocus,
    UnstableFocus,
    /// At least one zero eigenvalue; linearization is inconclusive.
    Degenerate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linearization {
    pub point: EquilibriumPoint,
    /// Row-major 2x2 Jacobian.
    pub jacobian: Vec<f64>,
    pub eigenvalues: Vec<ComplexNumber>,
    pub kind: EquilibriumKind,
}

/// Jacobian, eigenvalues and stability class of the vector field at `point`.
pub fn linearize(params: &ModelParameters, point: EquilibriumPoint) -> Result<Linearization> {
    params.validate()?;
    if !point.prey.is_finite() || !point.predator.is_finite() {
        return Err(SimulationError::invalid(
            "point",
            format!("({}, {}) is not finite", point.prey, point.predator),
        ));
    }
    let system = LotkaVolterra::new(*params);
    let mut jacobian = vec![0.0; 4];
    system.jacobian(0.0, &[point.prey, point.predator], &mut jacobian);
    if jacobian.iter().any(|v| !v.is_finite()) {
        return Err(SimulationError::invalid(
            "point",
            "Jacobian overflows at this point",
        ));
    }

    let matrix = DMatrix::from_row_slice(2, 2, &jacobian);
    let eigenvalues: Vec<Complex<f64>> = matrix.complex_eigenvalues().iter().copied().collect();
    let kind = classify(&eigenvalues);

    Ok(Linearization {
        point,
        jacobian,
        eigenvalues: eigenvalues.into_iter().map(ComplexNumber::from).collect(),
        kind,
    })
}

fn classify(eigenvalues: &[Complex<f64>]) -> EquilibriumKind {
    let scale = eigenvalues
        .iter()
        .map(|l| l.norm())
        .fold(1.0_f64, f64::max);
    let tol = 1e-9 * scale;

    if eigenvalues.iter().any(|l| l.norm() <= tol) {
        return EquilibriumKind::Degenerate;
    }

    let oscillatory = eigenvalues.iter().any(|l| l.im.abs() > tol);
    if oscillatory {
        let re = eigenvalues[0].re;
        return if re.abs() <= tol {
            EquilibriumKind::Center
        } else if re < 0.0 {
            EquilibriumKind::StableFocus
        } else {
            EquilibriumKind::UnstableFocus
        };
    }

    let negative = eigenvalues.iter().filter(|l| l.re < 0.0).count();
    match negative {
        0 => EquilibriumKind::UnstableNode,
        n if n == eigenvalues.len() => EquilibriumKind::StableNode,
        _ => EquilibriumKind::Saddle,
    }
}
