//! Batched simulation runner for hosts that must keep their event loop responsive.

use crate::{parse_request, serialize};
use volterra_core::integrate::{IntegrationRunner, RunnerProgress};
use volterra_core::model::LotkaVolterra;
use volterra_core::SimulationRequest;
use wasm_bindgen::prelude::*;

struct SimulationRunnerState {
    request: SimulationRequest,
    runner: IntegrationRunner<LotkaVolterra>,
}

#[wasm_bindgen]
pub struct WasmSimulationRunner {
    state: Option<SimulationRunnerState>,
    last_progress: Option<RunnerProgress>,
}

#[wasm_bindgen]
impl WasmSimulationRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(request: JsValue) -> Result<WasmSimulationRunner, JsValue> {
        console_error_panic_hook::set_once();

        let request = parse_request(request)?;
        let runner = request
            .runner()
            .map_err(|e| JsValue::from_str(&format!("Invalid simulation request: {}", e)))?;
        let last_progress = Some(runner.progress());

        Ok(WasmSimulationRunner {
            state: Some(SimulationRunnerState { request, runner }),
            last_progress,
        })
    }

    pub fn is_done(&self) -> bool {
        self.state.as_ref().map_or(true, |state| state.runner.is_done())
    }

    /// Integrates up to `batch_size` further grid samples.
    pub fn run_steps(&mut self, batch_size: u32) -> Result<JsValue, JsValue> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        let progress = state
            .runner
            .advance(batch_size as usize)
            .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;
        self.last_progress = Some(progress);

        serialize(&progress)
    }

    pub fn get_progress(&self) -> Result<JsValue, JsValue> {
        let progress = self
            .state
            .as_ref()
            .map(|state| state.runner.progress())
            .or(self.last_progress)
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;

        serialize(&progress)
    }

    /// Consumes the finished run and returns its report.
    pub fn get_result(&mut self) -> Result<JsValue, JsValue> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        if let Some(err) = state.runner.failure() {
            return Err(JsValue::from_str(&format!("Simulation failed: {}", err)));
        }
        if !state.runner.is_done() {
            return Err(JsValue::from_str("Simulation has not finished yet."));
        }

        let SimulationRunnerState { request, runner } = self
            .state
            .take()
            .ok_or_else(|| JsValue::from_str("Runner not initialized"))?;
        let trajectory = runner
            .finish()
            .and_then(|solution| solution.into_trajectory())
            .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;

        serialize(&request.report(trajectory))
    }

    /// Abandons the run; later calls report an uninitialized runner.
    pub fn cancel(&mut self) {
        self.state = None;
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::WasmSimulationRunner;
    use serde_wasm_bindgen::{from_value, to_value};
    use volterra_core::grid::GridSpec;
    use volterra_core::integrate::{RunnerProgress, SolverSettings};
    use volterra_core::{SimulationReport, SimulationRequest};
    use wasm_bindgen_test::wasm_bindgen_test;

    fn runner(samples: usize) -> WasmSimulationRunner {
        let request = SimulationRequest {
            grid: GridSpec::Linspace { end: 5.0, samples },
            ..SimulationRequest::default()
        };
        WasmSimulationRunner::new(to_value(&request).expect("request")).expect("runner")
    }

    #[wasm_bindgen_test]
    fn runner_reports_progress_in_batches() {
        let mut runner = runner(51);
        let progress: RunnerProgress =
            from_value(runner.run_steps(10).expect("batch")).expect("decode");
        assert_eq!(progress.completed_samples, 11);
        assert!(!progress.done);
        assert!(!runner.is_done());

        let message = runner
            .get_result()
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("not finished"));

        while !runner.is_done() {
            runner.run_steps(16).expect("batch");
        }
        let report: SimulationReport = from_value(runner.get_result().expect("result")).expect("decode");
        assert_eq!(report.trajectory.len(), 51);

        let progress: RunnerProgress =
            from_value(runner.get_progress().expect("progress")).expect("decode");
        assert!(progress.done);
        assert_eq!(progress.completed_samples, 51);
    }

    #[wasm_bindgen_test]
    fn failed_runner_reports_its_failure_as_result() {
        let request = SimulationRequest {
            grid: GridSpec::Linspace {
                end: 50.0,
                samples: 11,
            },
            settings: SolverSettings {
                max_steps: 3,
                ..SolverSettings::default()
            },
            ..SimulationRequest::default()
        };
        let mut runner =
            WasmSimulationRunner::new(to_value(&request).expect("request")).expect("runner");
        assert!(runner.run_steps(10).is_err());
        assert!(!runner.is_done());

        let message = runner
            .get_result()
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.starts_with("Simulation failed:"), "{message}");
        assert!(message.contains("budget of 3"), "{message}");
    }

    #[wasm_bindgen_test]
    fn cancelled_runner_rejects_further_work() {
        let mut runner = runner(51);
        runner.run_steps(5).expect("batch");
        runner.cancel();
        assert!(runner.is_done());
        let message = runner
            .run_steps(5)
            .err()
            .and_then(|err| err.as_string())
            .unwrap_or_default();
        assert!(message.contains("Runner not initialized"));
    }
}
