use crate::traits::{Differentiable, DynamicalSystem, Scalar, Steppable};
use nalgebra::{DMatrix, DVector};

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![T::zero(); dim],
            k2: vec![T::zero(); dim],
            k3: vec![T::zero(); dim],
            k4: vec![T::zero(); dim],
            tmp: vec![T::zero(); dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let two = T::one() + T::one();
        let half = T::one() / two;
        let sixth = T::one() / (two + two + two);

        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Mixed absolute/relative error weights for embedded error estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub rtol: f64,
    pub atol: f64,
}

impl Tolerance {
    /// RMS of `err[i] / (atol + rtol * max(|old[i]|, |new[i]|))`.
    pub fn error_norm(&self, old: &[f64], new: &[f64], err: &[f64]) -> f64 {
        if err.is_empty() {
            return 0.0;
        }
        let sum: f64 = err
            .iter()
            .zip(old.iter().zip(new.iter()))
            .map(|(e, (o, n))| {
                let scale = self.atol + self.rtol * o.abs().max(n.abs());
                let ratio = e / scale;
                ratio * ratio
            })
            .sum();
        (sum / err.len() as f64).sqrt()
    }

    fn weighted_norm(&self, reference: &[f64], values: &[f64]) -> f64 {
        self.error_norm(reference, reference, values)
    }
}

/// Result of a single trial step of an adaptive method.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepAttempt {
    /// Weighted error norm; the step is acceptable when this is <= 1.
    pub error_norm: f64,
    /// Estimate of `dt * |λ|` for the dominant eigenvalue, when the method provides one.
    pub stiffness: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFailure {
    /// The linear system of a linearly implicit stage could not be solved.
    Singular,
}

/// A method with an embedded error estimate.
pub trait AdaptiveStepper {
    /// Exponent denominator used by the step-size controller (error order + 1).
    fn controller_order(&self) -> u32;

    /// Attempts a step from `(t, state)` of size `dt`, writing the candidate into `out`.
    fn attempt(
        &mut self,
        system: &impl Differentiable,
        t: f64,
        state: &[f64],
        dt: f64,
        tol: &Tolerance,
        out: &mut [f64],
    ) -> Result<StepAttempt, StepFailure>;

    /// Right-hand side evaluations performed so far.
    fn evaluations(&self) -> usize;

    /// Jacobian evaluations performed so far.
    fn jacobians(&self) -> usize {
        0
    }
}

// Tsit5 tableau.
const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.898;
const A42: f64 = -6.359447987781783;
const A43: f64 = 4.361447987781783;
const A51: f64 = 5.325864858437957;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.495539342889693;
const A54: f64 = -0.09249506636030195;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.02826857949054663;

// 5th order weights (also the 7th stage row, FSAL).
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436099;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 1.0 / 66.0;

/// `dt * |λ|` above which a Tsit5 step is treated as stability limited
/// (80% of the 3.5068 extent of its stability region on the real axis).
pub const TSIT5_STIFFNESS_THRESHOLD: f64 = 2.8;

/// Tsitouras 5/4 Solver
pub struct Tsit5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    k7: Vec<T>,
    tmp: Vec<T>,
    err: Vec<T>,
    evaluations: usize,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            k7: vec![z; dim],
            tmp: vec![z; dim],
            err: vec![z; dim],
            evaluations: 0,
        }
    }

    fn coeff(value: f64) -> T {
        T::from_f64(value).unwrap_or_else(T::nan)
    }

    /// Evaluates stages k1..k6 and leaves the 6th stage state in `tmp`.
    fn stages(&mut self, system: &impl DynamicalSystem<T>, t0: T, state: &[T], dt: T) {
        let c = Self::coeff;

        // k1
        system.apply(t0, state, &mut self.k1);

        // k2
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (c(A21) * self.k1[i]);
        }
        system.apply(t0 + c(C2) * dt, &self.tmp, &mut self.k2);

        // k3
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (c(A31) * self.k1[i] + c(A32) * self.k2[i]);
        }
        system.apply(t0 + c(C3) * dt, &self.tmp, &mut self.k3);

        // k4
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (c(A41) * self.k1[i] + c(A42) * self.k2[i] + c(A43) * self.k3[i]);
        }
        system.apply(t0 + c(C4) * dt, &self.tmp, &mut self.k4);

        // k5
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (c(A51) * self.k1[i]
                    + c(A52) * self.k2[i]
                    + c(A53) * self.k3[i]
                    + c(A54) * self.k4[i]);
        }
        system.apply(t0 + c(C5) * dt, &self.tmp, &mut self.k5);

        // k6
        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (c(A61) * self.k1[i]
                    + c(A62) * self.k2[i]
                    + c(A63) * self.k3[i]
                    + c(A64) * self.k4[i]
                    + c(A65) * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6);

        self.evaluations += 6;
    }

    fn combine(&self, state: &[T], dt: T, out: &mut [T]) {
        let c = Self::coeff;
        for i in 0..state.len() {
            out[i] = state[i]
                + dt * (c(B1) * self.k1[i]
                    + c(B2) * self.k2[i]
                    + c(B3) * self.k3[i]
                    + c(B4) * self.k4[i]
                    + c(B5) * self.k5[i]
                    + c(B6) * self.k6[i]);
        }
    }
}

impl AdaptiveStepper for Tsit5<f64> {
    fn controller_order(&self) -> u32 {
        5
    }

    fn attempt(
        &mut self,
        system: &impl Differentiable,
        t: f64,
        state: &[f64],
        dt: f64,
        tol: &Tolerance,
        out: &mut [f64],
    ) -> Result<StepAttempt, StepFailure> {
        self.stages(system, t, state, dt);
        self.combine(state, dt, out);

        // k7 = f(t + dt, y_next), shared with the next step's k1 in FSAL methods.
        system.apply(t + dt, out, &mut self.k7);
        self.evaluations += 1;

        for i in 0..state.len() {
            self.err[i] = dt
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
        }
        let error_norm = tol.error_norm(state, out, &self.err);

        // Stages 6 and 7 share the abscissa t + dt, so their difference
        // quotient estimates the dominant eigenvalue magnitude.
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..state.len() {
            let dk = self.k7[i] - self.k6[i];
            let dy = out[i] - self.tmp[i];
            num += dk * dk;
            den += dy * dy;
        }
        let stiffness = if den > 0.0 {
            Some(dt * (num / den).sqrt())
        } else {
            None
        };

        Ok(StepAttempt {
            error_norm,
            stiffness,
        })
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }
}

/// Second order linearly implicit Rosenbrock method with third order error
/// estimate (the ode23s pair). L-stable, suited to stiff regimes.
pub struct Rosenbrock23 {
    dim: usize,
    f0: Vec<f64>,
    f1: Vec<f64>,
    f2: Vec<f64>,
    dfdt: Vec<f64>,
    jac: Vec<f64>,
    tmp: Vec<f64>,
    err: Vec<f64>,
    evaluations: usize,
    jacobians: usize,
}

impl Rosenbrock23 {
    const D: f64 = 0.2928932188134524; // 1 / (2 + sqrt(2))
    const E32: f64 = 7.414213562373095; // 6 + sqrt(2)

    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            f0: vec![0.0; dim],
            f1: vec![0.0; dim],
            f2: vec![0.0; dim],
            dfdt: vec![0.0; dim],
            jac: vec![0.0; dim * dim],
            tmp: vec![0.0; dim],
            err: vec![0.0; dim],
            evaluations: 0,
            jacobians: 0,
        }
    }
}

impl AdaptiveStepper for Rosenbrock23 {
    fn controller_order(&self) -> u32 {
        3
    }

    fn attempt(
        &mut self,
        system: &impl Differentiable,
        t: f64,
        state: &[f64],
        dt: f64,
        tol: &Tolerance,
        out: &mut [f64],
    ) -> Result<StepAttempt, StepFailure> {
        let dim = self.dim;
        let hd = dt * Self::D;

        system.apply(t, state, &mut self.f0);
        system.jacobian(t, state, &mut self.jac);
        system.time_derivative(t, state, &mut self.dfdt);
        self.evaluations += 1;
        self.jacobians += 1;

        // W = I - h*d*J, factored once per attempt.
        let mut w = DMatrix::from_row_slice(dim, dim, &self.jac);
        w *= -hd;
        for i in 0..dim {
            w[(i, i)] += 1.0;
        }
        let lu = w.lu();
        let solve = |rhs: Vec<f64>| -> Result<DVector<f64>, StepFailure> {
            lu.solve(&DVector::from_vec(rhs))
                .ok_or(StepFailure::Singular)
        };

        let rhs1: Vec<f64> = (0..dim).map(|i| self.f0[i] + hd * self.dfdt[i]).collect();
        let k1 = solve(rhs1)?;

        for i in 0..dim {
            self.tmp[i] = state[i] + 0.5 * dt * k1[i];
        }
        system.apply(t + 0.5 * dt, &self.tmp, &mut self.f1);

        let rhs2: Vec<f64> = (0..dim).map(|i| self.f1[i] - k1[i]).collect();
        let mut k2 = solve(rhs2)?;
        k2 += &k1;

        for i in 0..dim {
            out[i] = state[i] + dt * k2[i];
        }
        system.apply(t + dt, out, &mut self.f2);
        self.evaluations += 2;

        let rhs3: Vec<f64> = (0..dim)
            .map(|i| {
                self.f2[i] - Self::E32 * (k2[i] - self.f1[i]) - 2.0 * (k1[i] - self.f0[i])
                    + hd * self.dfdt[i]
            })
            .collect();
        let k3 = solve(rhs3)?;

        for i in 0..dim {
            self.err[i] = dt / 6.0 * (k1[i] - 2.0 * k2[i] + k3[i]);
        }
        let error_norm = tol.error_norm(state, out, &self.err);

        Ok(StepAttempt {
            error_norm,
            stiffness: None,
        })
    }

    fn evaluations(&self) -> usize {
        self.evaluations
    }

    fn jacobians(&self) -> usize {
        self.jacobians
    }
}

/// Hairer's starting step heuristic: 1% of the ratio of state to slope
/// magnitudes, or a tiny step when either is negligible.
pub fn initial_step(system: &impl DynamicalSystem<f64>, state: &[f64], tol: &Tolerance) -> f64 {
    let mut slope = vec![0.0; state.len()];
    system.apply(0.0, state, &mut slope);
    let d0 = tol.weighted_norm(state, state);
    let d1 = tol.weighted_norm(state, &slope);
    if d0 < 1e-5 || d1 < 1e-5 || !d1.is_finite() {
        1e-6
    } else {
        0.01 * d0 / d1
    }
}
