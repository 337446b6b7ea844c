use serde_wasm_bindgen::{from_value, to_value};
use volterra_core::analysis::orbit;
use volterra_core::equilibrium::{equilibria as core_equilibria, linearize, EquilibriumPoint};
use volterra_core::model::ModelParameters;
use volterra_core::plot::{phase_portrait, time_series};
use volterra_core::{simulate as core_simulate, SimulationRequest};
use wasm_bindgen::prelude::*;

mod runner;

pub use runner::WasmSimulationRunner;

/// `undefined` and `null` stand for the default request.
pub(crate) fn parse_request(request: JsValue) -> Result<SimulationRequest, JsValue> {
    if request.is_undefined() || request.is_null() {
        return Ok(SimulationRequest::default());
    }
    from_value(request).map_err(|e| JsValue::from_str(&format!("Invalid simulation request: {}", e)))
}

pub(crate) fn serialize<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
pub fn simulate(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let request = parse_request(request)?;
    let report = core_simulate(&request)
        .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;
    serialize(&report)
}

/// Time-series charts plus the phase portrait for one request.
#[wasm_bindgen]
pub fn simulate_plots(request: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let request = parse_request(request)?;
    let report = core_simulate(&request)
        .map_err(|e| JsValue::from_str(&format!("Simulation failed: {}", e)))?;
    let mut plots = time_series(&report.trajectory);
    plots.push(phase_portrait(
        &orbit(&report.trajectory),
        report.equilibria.nontrivial,
    ));
    serialize(&plots)
}

#[wasm_bindgen]
pub fn equilibria(a: f64, b: f64, c: f64, d: f64) -> Result<JsValue, JsValue> {
    let params = ModelParameters::new(a, b, c, d);
    params
        .validate()
        .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))?;
    serialize(&core_equilibria(&params))
}

/// Jacobian, eigenvalues and stability class at `(prey, predator)`.
#[wasm_bindgen]
pub fn linearize_at(
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    prey: f64,
    predator: f64,
) -> Result<JsValue, JsValue> {
    let params = ModelParameters::new(a, b, c, d);
    params
        .validate()
        .map_err(|e| JsValue::from_str(&format!("Invalid parameters: {}", e)))?;
    let linearization = linearize(&params, EquilibriumPoint { prey, predator })
        .map_err(|e| JsValue::from_str(&format!("Linearization failed: {}", e)))?;
    serialize(&linearization)
}
