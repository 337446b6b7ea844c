use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimulationError>;

/// Errors surfaced at the boundary of the simulation engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("no finite non-trivial equilibrium: {reason}")]
    UndefinedEquilibrium { reason: DegenerateRate },

    #[error("integration failed at grid index {index} (t = {time}): {reason}")]
    IntegrationFailure {
        index: usize,
        time: f64,
        reason: FailureReason,
    },
}

impl SimulationError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn failure(index: usize, time: f64, reason: FailureReason) -> Self {
        Self::IntegrationFailure {
            index,
            time,
            reason,
        }
    }
}

/// Which rate constant makes the interior equilibrium undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegenerateRate {
    /// B = 0, so A/B has no finite value.
    Predation,
    /// C = 0, so D/C has no finite value.
    Conversion,
    /// Both rates are positive but D/C or A/B exceeds the `f64` range.
    Overflow,
}

impl fmt::Display for DegenerateRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegenerateRate::Predation => write!(f, "predation rate B is zero"),
            DegenerateRate::Conversion => write!(f, "conversion efficiency C is zero"),
            DegenerateRate::Overflow => write!(f, "D/C or A/B overflows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    StepBudgetExhausted { max_steps: usize },
    StepSizeUnderflow { step: f64 },
    NonFinite,
    NegativePopulation { component: usize, value: f64 },
    SingularIteration,
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::StepBudgetExhausted { max_steps } => {
                write!(f, "exceeded the budget of {max_steps} internal steps")
            }
            FailureReason::StepSizeUnderflow { step } => {
                write!(f, "step size {step:e} fell below the minimum")
            }
            FailureReason::NonFinite => write!(f, "state became non-finite"),
            FailureReason::NegativePopulation { component, value } => {
                write!(f, "component {component} went negative ({value:e})")
            }
            FailureReason::SingularIteration => {
                write!(f, "Rosenbrock iteration matrix is singular")
            }
            FailureReason::Cancelled => write!(f, "cancelled by caller"),
        }
    }
}
