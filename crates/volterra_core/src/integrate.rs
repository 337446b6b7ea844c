//! Drives a solver across a fixed time grid.
//!
//! Internal steps are clamped so they land exactly on each grid sample; the
//! recorded states are solver states, never interpolants.

use crate::error::{FailureReason, Result, SimulationError};
use crate::grid::TimeGrid;
use crate::model::{InitialState, LotkaVolterra, ModelParameters};
use crate::solvers::{
    initial_step, AdaptiveStepper, Rosenbrock23, StepAttempt, StepFailure, Tolerance, Tsit5,
    RK4, TSIT5_STIFFNESS_THRESHOLD,
};
use crate::trajectory::Trajectory;
use crate::traits::{Differentiable, Steppable};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;
const NON_FINITE_SHRINK: f64 = 0.25;
const CALM_STEPS_TO_RESET: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Method {
    /// Tsit5, switching to Rosenbrock23 once stiffness is detected.
    Auto,
    Tsit5,
    Rosenbrock23,
    /// Classic RK4 with a fixed number of substeps per grid interval.
    Rk4 { substeps: usize },
}

impl Default for Method {
    fn default() -> Self {
        Method::Auto
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub method: Method,
    pub rtol: f64,
    pub atol: f64,
    pub initial_step: Option<f64>,
    pub max_step: Option<f64>,
    /// Smallest admissible step, relative to `max(1, |t|)`.
    pub min_step: f64,
    /// Budget of internal steps (accepted and rejected) for a whole run.
    pub max_steps: usize,
    /// States below `-negativity_tolerance` abort the run. `None` disables the check.
    pub negativity_tolerance: Option<f64>,
    /// Stability-limited Tsit5 steps required before `Auto` switches methods.
    pub stiffness_detections: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            method: Method::Auto,
            rtol: 1e-6,
            atol: 1e-6,
            initial_step: None,
            max_step: None,
            min_step: 1e-12,
            max_steps: 500_000,
            negativity_tolerance: Some(1e-6),
            stiffness_detections: 15,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.rtol.is_finite() || self.rtol < 0.0 {
            return Err(SimulationError::invalid("rtol", "must be finite and non-negative"));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(SimulationError::invalid("atol", "must be finite and positive"));
        }
        if let Some(h) = self.initial_step {
            if !h.is_finite() || h <= 0.0 {
                return Err(SimulationError::invalid(
                    "initial_step",
                    "must be finite and positive",
                ));
            }
        }
        if let Some(h) = self.max_step {
            if !h.is_finite() || h <= 0.0 {
                return Err(SimulationError::invalid("max_step", "must be finite and positive"));
            }
        }
        if !self.min_step.is_finite() || self.min_step < 0.0 {
            return Err(SimulationError::invalid(
                "min_step",
                "must be finite and non-negative",
            ));
        }
        if self.max_steps == 0 {
            return Err(SimulationError::invalid("max_steps", "must be greater than zero"));
        }
        if let Some(tol) = self.negativity_tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(SimulationError::invalid(
                    "negativity_tolerance",
                    "must be finite and non-negative",
                ));
            }
        }
        if self.stiffness_detections == 0 {
            return Err(SimulationError::invalid(
                "stiffness_detections",
                "must be greater than zero",
            ));
        }
        if let Method::Rk4 { substeps: 0 } = self.method {
            return Err(SimulationError::invalid("substeps", "must be greater than zero"));
        }
        Ok(())
    }

    fn tolerance(&self) -> Tolerance {
        Tolerance {
            rtol: self.rtol,
            atol: self.atol,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub evaluations: usize,
    pub jacobians: usize,
    /// Time at which `Method::Auto` switched to the stiff method, if it did.
    pub stiff_switch_time: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunnerProgress {
    pub done: bool,
    /// Grid samples recorded so far, the initial state included.
    pub completed_samples: usize,
    pub total_samples: usize,
    pub time: f64,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
}

/// Raw output of a run: row-major states, `dimension` values per grid sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub dimension: usize,
    pub times: Vec<f64>,
    pub states: Vec<f64>,
    pub stats: IntegrationStats,
}

impl Solution {
    pub fn state(&self, index: usize) -> &[f64] {
        &self.states[index * self.dimension..(index + 1) * self.dimension]
    }

    /// Reinterprets a two-dimensional solution as population samples.
    pub fn into_trajectory(self) -> Result<Trajectory> {
        if self.dimension != 2 {
            return Err(SimulationError::invalid(
                "dimension",
                format!("a trajectory needs 2 components, got {}", self.dimension),
            ));
        }
        Ok(Trajectory::from_flat(self.times, &self.states, self.stats))
    }
}

struct AdaptiveEngine {
    explicit: Tsit5<f64>,
    implicit: Rosenbrock23,
    stiff: bool,
    auto_switch: bool,
    stiff_hits: usize,
    calm_steps: usize,
    required_hits: usize,
}

impl AdaptiveEngine {
    fn attempt(
        &mut self,
        system: &impl Differentiable,
        t: f64,
        state: &[f64],
        dt: f64,
        tol: &Tolerance,
        out: &mut [f64],
    ) -> std::result::Result<StepAttempt, StepFailure> {
        if self.stiff {
            self.implicit.attempt(system, t, state, dt, tol, out)
        } else {
            self.explicit.attempt(system, t, state, dt, tol, out)
        }
    }

    fn controller_order(&self) -> u32 {
        if self.stiff {
            self.implicit.controller_order()
        } else {
            self.explicit.controller_order()
        }
    }

    /// Counts stability-limited steps; returns true when the engine switches to the stiff method.
    fn observe_stiffness(&mut self, estimate: Option<f64>) -> bool {
        if !self.auto_switch || self.stiff {
            return false;
        }
        match estimate {
            Some(h_lambda) if h_lambda > TSIT5_STIFFNESS_THRESHOLD => {
                self.stiff_hits += 1;
                self.calm_steps = 0;
                if self.stiff_hits >= self.required_hits {
                    self.stiff = true;
                    return true;
                }
            }
            _ => {
                self.calm_steps += 1;
                if self.calm_steps >= CALM_STEPS_TO_RESET {
                    self.stiff_hits = 0;
                }
            }
        }
        false
    }
}

enum Engine {
    Fixed { stepper: RK4<f64>, substeps: usize },
    Adaptive(AdaptiveEngine),
}

/// An integration that can be advanced a batch of grid samples at a time.
///
/// A host that must stay responsive calls [`advance`](Self::advance) with a
/// small batch and yields in between; dropping the runner abandons the run.
pub struct IntegrationRunner<S: Differentiable> {
    system: S,
    grid: TimeGrid,
    settings: SolverSettings,
    tol: Tolerance,
    engine: Engine,
    t: f64,
    dt: f64,
    state: Vec<f64>,
    candidate: Vec<f64>,
    states: Vec<f64>,
    next_index: usize,
    steps_taken: usize,
    last_non_finite: bool,
    stats: IntegrationStats,
    cancel: Option<Arc<AtomicBool>>,
    failure: Option<SimulationError>,
}

impl<S: Differentiable> IntegrationRunner<S> {
    pub fn new(system: S, initial: &[f64], grid: TimeGrid, settings: SolverSettings) -> Result<Self> {
        settings.validate()?;
        let dim = system.dimension();
        if dim == 0 {
            return Err(SimulationError::invalid("system", "has zero dimension"));
        }
        if initial.len() != dim {
            return Err(SimulationError::invalid(
                "initial",
                format!("expected {} components, got {}", dim, initial.len()),
            ));
        }
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(SimulationError::invalid("initial", "contains non-finite values"));
        }

        let tol = settings.tolerance();
        let engine = match settings.method {
            Method::Rk4 { substeps } => Engine::Fixed {
                stepper: RK4::new(dim),
                substeps,
            },
            method => Engine::Adaptive(AdaptiveEngine {
                explicit: Tsit5::new(dim),
                implicit: Rosenbrock23::new(dim),
                stiff: method == Method::Rosenbrock23,
                auto_switch: method == Method::Auto,
                stiff_hits: 0,
                calm_steps: 0,
                required_hits: settings.stiffness_detections,
            }),
        };

        let mut dt = settings
            .initial_step
            .unwrap_or_else(|| initial_step(&system, initial, &tol));
        if let Some(max) = settings.max_step {
            dt = dt.min(max);
        }

        let mut states = Vec::with_capacity(grid.len() * dim);
        states.extend_from_slice(initial);

        debug!(
            method = ?settings.method,
            samples = grid.len(),
            end = grid.end(),
            initial_step = dt,
            "starting integration"
        );

        Ok(Self {
            system,
            grid,
            settings,
            tol,
            engine,
            t: 0.0,
            dt,
            state: initial.to_vec(),
            candidate: vec![0.0; dim],
            states,
            next_index: 1,
            steps_taken: 0,
            last_non_finite: false,
            stats: IntegrationStats::default(),
            cancel: None,
            failure: None,
        })
    }

    /// Attaches a flag that aborts the run with `FailureReason::Cancelled` once set.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn is_done(&self) -> bool {
        self.failure.is_none() && self.next_index >= self.grid.len()
    }

    pub fn failure(&self) -> Option<&SimulationError> {
        self.failure.as_ref()
    }

    pub fn progress(&self) -> RunnerProgress {
        RunnerProgress {
            done: self.is_done(),
            completed_samples: self.next_index,
            total_samples: self.grid.len(),
            time: self.t,
            accepted_steps: self.stats.accepted_steps,
            rejected_steps: self.stats.rejected_steps,
        }
    }

    /// Integrates up to `max_samples` further grid samples.
    pub fn advance(&mut self, max_samples: usize) -> Result<RunnerProgress> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let mut produced = 0usize;
        while produced < max_samples && self.next_index < self.grid.len() {
            if let Err(err) = self.advance_to_next_sample() {
                warn!(
                    error = %err,
                    accepted = self.stats.accepted_steps,
                    rejected = self.stats.rejected_steps,
                    "integration failed"
                );
                self.failure = Some(err.clone());
                return Err(err);
            }
            produced += 1;
        }

        if produced > 0 && self.is_done() {
            debug!(
                accepted = self.stats.accepted_steps,
                rejected = self.stats.rejected_steps,
                evaluations = self.stats.evaluations,
                jacobians = self.stats.jacobians,
                "integration finished"
            );
        }

        Ok(self.progress())
    }

    /// Runs any remaining samples and returns the full solution.
    pub fn finish(mut self) -> Result<Solution> {
        self.advance(usize::MAX)?;
        Ok(Solution {
            dimension: self.state.len(),
            times: self.grid.times().to_vec(),
            states: self.states,
            stats: self.stats,
        })
    }

    fn advance_to_next_sample(&mut self) -> Result<()> {
        let index = self.next_index;
        let target = self.grid.times()[index];

        match &mut self.engine {
            Engine::Fixed { stepper, substeps } => {
                let substeps = *substeps;
                let h = (target - self.t) / substeps as f64;
                for k in 0..substeps {
                    check_cancelled(&self.cancel, index, self.t)?;
                    if self.steps_taken >= self.settings.max_steps {
                        return Err(budget_exhausted(index, self.t, self.settings.max_steps));
                    }
                    stepper.step(&self.system, &mut self.t, &mut self.state, h);
                    if k + 1 == substeps {
                        self.t = target;
                    }
                    self.steps_taken += 1;
                    self.stats.accepted_steps += 1;
                    self.stats.evaluations += 4;
                    if !all_finite(&self.state) {
                        return Err(SimulationError::failure(
                            index,
                            self.t,
                            FailureReason::NonFinite,
                        ));
                    }
                    check_negativity(&self.state, self.settings.negativity_tolerance, index, self.t)?;
                }
            }
            Engine::Adaptive(engine) => {
                while self.t < target {
                    check_cancelled(&self.cancel, index, self.t)?;
                    if self.steps_taken >= self.settings.max_steps {
                        return Err(budget_exhausted(index, self.t, self.settings.max_steps));
                    }
                    if self.dt < self.settings.min_step * self.t.abs().max(1.0) {
                        let reason = if self.last_non_finite {
                            FailureReason::NonFinite
                        } else {
                            FailureReason::StepSizeUnderflow { step: self.dt }
                        };
                        return Err(SimulationError::failure(index, self.t, reason));
                    }

                    let remaining = target - self.t;
                    let landing = self.dt >= remaining;
                    let h = if landing { remaining } else { self.dt };

                    let attempt = engine
                        .attempt(
                            &self.system,
                            self.t,
                            &self.state,
                            h,
                            &self.tol,
                            &mut self.candidate,
                        )
                        .map_err(|_: StepFailure| {
                            SimulationError::failure(
                                index,
                                self.t,
                                FailureReason::SingularIteration,
                            )
                        })?;
                    self.steps_taken += 1;

                    if !attempt.error_norm.is_finite() || !all_finite(&self.candidate) {
                        self.stats.rejected_steps += 1;
                        self.last_non_finite = true;
                        self.dt = h * NON_FINITE_SHRINK;
                        continue;
                    }
                    self.last_non_finite = false;

                    let factor = step_factor(attempt.error_norm, engine.controller_order());
                    if attempt.error_norm <= 1.0 {
                        self.t = if landing { target } else { self.t + h };
                        std::mem::swap(&mut self.state, &mut self.candidate);
                        self.stats.accepted_steps += 1;
                        check_negativity(
                            &self.state,
                            self.settings.negativity_tolerance,
                            index,
                            self.t,
                        )?;

                        let proposed = h * factor;
                        self.dt = if landing { self.dt.max(proposed) } else { proposed };
                        if let Some(max) = self.settings.max_step {
                            self.dt = self.dt.min(max);
                        }

                        if engine.observe_stiffness(attempt.stiffness) {
                            info!(t = self.t, step = h, "stiffness detected; switching to Rosenbrock23");
                            self.stats.stiff_switch_time = Some(self.t);
                        }
                    } else {
                        self.stats.rejected_steps += 1;
                        self.dt = h * factor;
                    }
                }
                self.stats.evaluations =
                    engine.explicit.evaluations() + engine.implicit.evaluations();
                self.stats.jacobians = engine.implicit.jacobians();
            }
        }

        self.states.extend_from_slice(&self.state);
        self.next_index += 1;
        Ok(())
    }
}

fn step_factor(error_norm: f64, order: u32) -> f64 {
    if error_norm <= 0.0 {
        return MAX_FACTOR;
    }
    (SAFETY * error_norm.powf(-1.0 / order as f64)).clamp(MIN_FACTOR, MAX_FACTOR)
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn budget_exhausted(index: usize, t: f64, max_steps: usize) -> SimulationError {
    SimulationError::failure(index, t, FailureReason::StepBudgetExhausted { max_steps })
}

fn check_cancelled(flag: &Option<Arc<AtomicBool>>, index: usize, t: f64) -> Result<()> {
    match flag {
        Some(flag) if flag.load(Ordering::Relaxed) => {
            Err(SimulationError::failure(index, t, FailureReason::Cancelled))
        }
        _ => Ok(()),
    }
}

fn check_negativity(state: &[f64], tolerance: Option<f64>, index: usize, t: f64) -> Result<()> {
    let Some(tolerance) = tolerance else {
        return Ok(());
    };
    match state.iter().position(|v| *v < -tolerance) {
        Some(component) => Err(SimulationError::failure(
            index,
            t,
            FailureReason::NegativePopulation {
                component,
                value: state[component],
            },
        )),
        None => Ok(()),
    }
}

/// Validated runner for the predator-prey model.
pub fn lotka_volterra_runner(
    params: &ModelParameters,
    initial: &InitialState,
    grid: TimeGrid,
    settings: SolverSettings,
) -> Result<IntegrationRunner<LotkaVolterra>> {
    params.validate()?;
    initial.validate()?;
    IntegrationRunner::new(LotkaVolterra::new(*params), &initial.to_vec(), grid, settings)
}

/// Integrates the model over `grid`, one population pair per sample.
pub fn integrate(
    params: &ModelParameters,
    initial: &InitialState,
    grid: &TimeGrid,
    settings: &SolverSettings,
) -> Result<Trajectory> {
    lotka_volterra_runner(params, initial, grid.clone(), *settings)?
        .finish()?
        .into_trajectory()
}

/// Like [`integrate`], aborting with `FailureReason::Cancelled` once `cancel` is set.
pub fn integrate_with_cancellation(
    params: &ModelParameters,
    initial: &InitialState,
    grid: &TimeGrid,
    settings: &SolverSettings,
    cancel: Arc<AtomicBool>,
) -> Result<Trajectory> {
    lotka_volterra_runner(params, initial, grid.clone(), *settings)?
        .with_cancellation(cancel)
        .finish()?
        .into_trajectory()
}

#[cfg(test)]
mod tests {
    use super::{
        integrate, integrate_with_cancellation, lotka_volterra_runner, IntegrationRunner, Method,
        SolverSettings,
    };
    use crate::error::{FailureReason, SimulationError};
    use crate::grid::TimeGrid;
    use crate::model::{InitialState, ModelParameters};
    use crate::traits::{Differentiable, DynamicalSystem};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct LinearSystem {
        rate: f64,
    }

    impl DynamicalSystem<f64> for LinearSystem {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = self.rate * x[0];
        }
    }

    impl Differentiable for LinearSystem {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = self.rate;
        }
    }

    /// x' = -k (x - cos t): a fast relaxation onto a slow forcing.
    struct RelaxationSystem {
        k: f64,
    }

    impl DynamicalSystem<f64> for RelaxationSystem {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = -self.k * (x[0] - t.cos());
        }
    }

    impl Differentiable for RelaxationSystem {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -self.k;
        }

        fn time_derivative(&self, t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -self.k * t.sin();
        }
    }

    /// x' = -1, crossing zero at t = x0.
    struct Drain;

    impl DynamicalSystem<f64> for Drain {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = -1.0;
        }
    }

    impl Differentiable for Drain {
        fn jacobian(&self, _t: f64, _x: &[f64], out: &mut [f64]) {
            out[0] = 0.0;
        }
    }

    /// x' = x^2, blowing up at t = 1 from x0 = 1.
    struct BlowUp;

    impl DynamicalSystem<f64> for BlowUp {
        fn dimension(&self) -> usize {
            1
        }

        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    impl Differentiable for BlowUp {
        fn jacobian(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = 2.0 * x[0];
        }
    }

    fn failure_parts(err: SimulationError) -> (usize, FailureReason) {
        match err {
            SimulationError::IntegrationFailure { index, reason, .. } => (index, reason),
            other => panic!("expected integration failure, got {other:?}"),
        }
    }

    #[test]
    fn tsit5_matches_exponential_decay() {
        let grid = TimeGrid::linspace(5.0, 51).expect("grid");
        let settings = SolverSettings {
            method: Method::Tsit5,
            ..SolverSettings::default()
        };
        let solution = IntegrationRunner::new(LinearSystem { rate: -1.0 }, &[1.0], grid, settings)
            .expect("runner")
            .finish()
            .expect("solution");
        for (i, t) in solution.times.iter().enumerate() {
            let exact = (-t).exp();
            assert!(
                (solution.state(i)[0] - exact).abs() < 1e-5,
                "t = {t}: {} vs {exact}",
                solution.state(i)[0]
            );
        }
    }

    #[test]
    fn extinction_stays_at_origin_for_every_method() {
        let grid = TimeGrid::default();
        let methods = [
            Method::Auto,
            Method::Tsit5,
            Method::Rosenbrock23,
            Method::Rk4 { substeps: 2 },
        ];
        for params in [
            ModelParameters::default(),
            ModelParameters::new(2.0, 2.0, 1.0, 2.0),
            ModelParameters::new(0.0, 0.0, 0.0, 0.0),
        ] {
            for method in methods {
                let settings = SolverSettings {
                    method,
                    ..SolverSettings::default()
                };
                let trajectory = integrate(&params, &InitialState::new(0.0, 0.0), &grid, &settings)
                    .expect("extinct system integrates");
                assert_eq!(trajectory.len(), grid.len());
                assert!(trajectory
                    .samples()
                    .iter()
                    .all(|s| s.prey == 0.0 && s.predator == 0.0));
            }
        }
    }

    #[test]
    fn interior_equilibrium_is_a_fixed_point() {
        let params = ModelParameters::default();
        let start = InitialState::at_equilibrium(&params).expect("equilibrium");
        let trajectory = integrate(
            &params,
            &start,
            &TimeGrid::default(),
            &SolverSettings::default(),
        )
        .expect("trajectory");
        for sample in trajectory.samples() {
            assert!(((sample.prey - start.prey) / start.prey).abs() <= 1e-3);
            assert!(((sample.predator - start.predator) / start.predator).abs() <= 1e-3);
        }
    }

    #[test]
    fn repeated_runs_are_identical() {
        let params = ModelParameters::default();
        let initial = InitialState::default();
        let grid = TimeGrid::default();
        let settings = SolverSettings::default();
        let first = integrate(&params, &initial, &grid, &settings).expect("first");
        let second = integrate(&params, &initial, &grid, &settings).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn default_scenario_stays_positive_and_bounded() {
        let trajectory = integrate(
            &ModelParameters::default(),
            &InitialState::default(),
            &TimeGrid::default(),
            &SolverSettings::default(),
        )
        .expect("trajectory");
        assert_eq!(trajectory.times()[0], 0.0);
        assert_eq!(trajectory.samples()[0].prey, 10.0);
        assert_eq!(trajectory.samples()[0].predator, 1.0);
        for sample in trajectory.samples() {
            assert!(sample.prey > 0.0 && sample.prey < 100.0, "{sample:?}");
            assert!(sample.predator > 0.0 && sample.predator < 100.0, "{sample:?}");
        }
        assert!(trajectory.stats().stiff_switch_time.is_none());
    }

    #[test]
    fn methods_agree_on_the_default_scenario() {
        let params = ModelParameters::default();
        let initial = InitialState::default();
        let grid = TimeGrid::linspace(10.0, 201).expect("grid");
        let run = |method| {
            let settings = SolverSettings {
                method,
                ..SolverSettings::default()
            };
            integrate(&params, &initial, &grid, &settings).expect("trajectory")
        };
        let reference = run(Method::Tsit5);
        let rk4 = run(Method::Rk4 { substeps: 10 });
        let rosenbrock = run(Method::Rosenbrock23);
        for i in 0..grid.len() {
            let r = reference.samples()[i];
            let a = rk4.samples()[i];
            let b = rosenbrock.samples()[i];
            assert!((r.prey - a.prey).abs() < 1e-4 && (r.predator - a.predator).abs() < 1e-4);
            assert!((r.prey - b.prey).abs() < 5e-2 && (r.predator - b.predator).abs() < 5e-2);
        }
    }

    #[test]
    fn auto_switches_on_stiff_relaxation() {
        let grid = TimeGrid::linspace(10.0, 11).expect("grid");
        let solution = IntegrationRunner::new(
            RelaxationSystem { k: 1.0e4 },
            &[1.0],
            grid,
            SolverSettings::default(),
        )
        .expect("runner")
        .finish()
        .expect("auto integrates stiff system");

        assert!(solution.stats.stiff_switch_time.is_some());
        assert!(solution.stats.jacobians > 0);
        let last = solution.state(10)[0];
        assert!((last - 10.0_f64.cos()).abs() < 1e-3, "got {last}");
    }

    #[test]
    fn explicit_method_exhausts_budget_on_stiff_relaxation() {
        let grid = TimeGrid::linspace(10.0, 11).expect("grid");
        let settings = SolverSettings {
            method: Method::Tsit5,
            max_steps: 1000,
            ..SolverSettings::default()
        };
        let err = IntegrationRunner::new(RelaxationSystem { k: 1.0e4 }, &[1.0], grid, settings)
            .expect("runner")
            .finish()
            .expect_err("budget should run out");
        let (index, reason) = failure_parts(err);
        assert!(index >= 1);
        assert_eq!(reason, FailureReason::StepBudgetExhausted { max_steps: 1000 });
    }

    #[test]
    fn negative_population_is_reported_with_grid_index() {
        let grid = TimeGrid::linspace(2.0, 5).expect("grid");
        let err = IntegrationRunner::new(Drain, &[1.0], grid, SolverSettings::default())
            .expect("runner")
            .finish()
            .expect_err("state crosses zero");
        let (index, reason) = failure_parts(err);
        assert_eq!(index, 3);
        assert!(matches!(
            reason,
            FailureReason::NegativePopulation { component: 0, .. }
        ));
    }

    #[test]
    fn negativity_check_can_be_disabled() {
        let grid = TimeGrid::linspace(2.0, 5).expect("grid");
        let settings = SolverSettings {
            negativity_tolerance: None,
            ..SolverSettings::default()
        };
        let solution = IntegrationRunner::new(Drain, &[1.0], grid, settings)
            .expect("runner")
            .finish()
            .expect("solution");
        assert!((solution.state(4)[0] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn blow_up_surfaces_failure_instead_of_garbage() {
        let grid = TimeGrid::linspace(2.0, 5).expect("grid");
        let settings = SolverSettings {
            method: Method::Tsit5,
            ..SolverSettings::default()
        };
        let err = IntegrationRunner::new(BlowUp, &[1.0], grid, settings)
            .expect("runner")
            .finish()
            .expect_err("solution blows up at t = 1");
        let (index, _) = failure_parts(err);
        assert_eq!(index, 2);
    }

    #[test]
    fn cancelled_run_reports_cancellation() {
        let flag = Arc::new(AtomicBool::new(true));
        let err = integrate_with_cancellation(
            &ModelParameters::default(),
            &InitialState::default(),
            &TimeGrid::default(),
            &SolverSettings::default(),
            flag,
        )
        .expect_err("cancelled before the first step");
        let (index, reason) = failure_parts(err);
        assert_eq!(index, 1);
        assert_eq!(reason, FailureReason::Cancelled);
    }

    #[test]
    fn batched_runner_matches_one_shot() {
        let params = ModelParameters::default();
        let initial = InitialState::default();
        let grid = TimeGrid::default();
        let settings = SolverSettings::default();

        let mut runner =
            lotka_volterra_runner(&params, &initial, grid.clone(), settings).expect("runner");
        let progress = runner.advance(100).expect("first batch");
        assert!(!progress.done);
        assert_eq!(progress.completed_samples, 101);
        assert_eq!(progress.total_samples, 1000);
        while !runner.is_done() {
            runner.advance(250).expect("batch");
        }
        assert!(runner.progress().done);
        let batched = runner
            .finish()
            .expect("solution")
            .into_trajectory()
            .expect("trajectory");

        let one_shot = integrate(&params, &initial, &grid, &settings).expect("trajectory");
        assert_eq!(batched, one_shot);
    }

    #[test]
    fn failed_runner_keeps_reporting_its_failure() {
        let grid = TimeGrid::linspace(2.0, 5).expect("grid");
        let mut runner =
            IntegrationRunner::new(Drain, &[1.0], grid, SolverSettings::default()).expect("runner");
        let first = runner.advance(10).expect_err("fails");
        let second = runner.advance(10).expect_err("still failed");
        assert_eq!(first, second);
        assert!(runner.failure().is_some());
        assert!(!runner.is_done());
    }

    #[test]
    fn single_sample_grid_returns_initial_state() {
        let grid = TimeGrid::from_samples(vec![0.0]).expect("grid");
        let trajectory = integrate(
            &ModelParameters::default(),
            &InitialState::new(3.0, 4.0),
            &grid,
            &SolverSettings::default(),
        )
        .expect("trajectory");
        assert_eq!(trajectory.len(), 1);
        assert_eq!(trajectory.samples()[0].prey, 3.0);
        assert_eq!(trajectory.stats().accepted_steps, 0);
    }

    #[test]
    fn invalid_inputs_are_rejected_before_integration() {
        let grid = TimeGrid::default();
        let err = integrate(
            &ModelParameters::new(-1.0, 0.4, 0.1, 0.4),
            &InitialState::default(),
            &grid,
            &SolverSettings::default(),
        )
        .expect_err("negative A");
        assert!(matches!(err, SimulationError::InvalidParameter { name: "growth_prey", .. }));

        for settings in [
            SolverSettings {
                atol: 0.0,
                ..SolverSettings::default()
            },
            SolverSettings {
                max_steps: 0,
                ..SolverSettings::default()
            },
            SolverSettings {
                method: Method::Rk4 { substeps: 0 },
                ..SolverSettings::default()
            },
            SolverSettings {
                initial_step: Some(-1.0),
                ..SolverSettings::default()
            },
        ] {
            let err = integrate(
                &ModelParameters::default(),
                &InitialState::default(),
                &grid,
                &settings,
            )
            .expect_err("invalid settings");
            assert!(matches!(err, SimulationError::InvalidParameter { .. }));
        }

        let err = IntegrationRunner::new(
            LinearSystem { rate: 1.0 },
            &[1.0, 2.0],
            grid,
            SolverSettings::default(),
        )
        .err()
        .expect("dimension mismatch");
        assert!(format!("{err}").contains("expected 1 components"));
    }
}
