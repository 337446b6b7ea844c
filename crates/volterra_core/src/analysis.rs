//! Read-only views over a computed trajectory. Nothing here re-integrates the model.

use crate::equilibrium::nontrivial_equilibrium;
use crate::model::{InitialState, ModelParameters};
use crate::trajectory::{PopulationSample, Trajectory};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitPoint {
    pub predator: f64,
    pub prey: f64,
}

/// A trajectory re-paired as `(predator, prey)` for phase-plane plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitView {
    pub points: Vec<OrbitPoint>,
}

impl OrbitView {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub fn orbit(trajectory: &Trajectory) -> OrbitView {
    OrbitView {
        points: trajectory
            .samples()
            .iter()
            .map(|s| OrbitPoint {
                predator: s.predator,
                prey: s.prey,
            })
            .collect(),
    }
}

/// `V = C*x - D*ln(x) + B*y - A*ln(y)`, constant along exact solutions.
///
/// Only defined for strictly positive populations.
pub fn first_integral(params: &ModelParameters, sample: &PopulationSample) -> Option<f64> {
    if sample.prey <= 0.0 || sample.predator <= 0.0 {
        return None;
    }
    let ModelParameters {
        growth_prey: a,
        predation_rate: b,
        conversion_efficiency: c,
        predator_death_rate: d,
    } = *params;
    let x = sample.prey;
    let y = sample.predator;
    Some(c * x - d * x.ln() + b * y - a * y.ln())
}

/// Largest deviation of the first integral from its initial value, scaled by `max(1, |V0|)`.
pub fn conservation_drift(params: &ModelParameters, trajectory: &Trajectory) -> Option<f64> {
    let mut values = trajectory
        .samples()
        .iter()
        .map(|s| first_integral(params, s));
    let initial = values.next()??;
    let scale = initial.abs().max(1.0);
    let mut drift = 0.0_f64;
    for value in values {
        drift = drift.max((value? - initial).abs() / scale);
    }
    Some(drift)
}

/// Period of small oscillations about the interior equilibrium, `2π / sqrt(A*D)`.
pub fn linearized_period(params: &ModelParameters) -> Option<f64> {
    let product = params.growth_prey * params.predator_death_rate;
    if product <= 0.0 || nontrivial_equilibrium(params).is_err() {
        return None;
    }
    Some(2.0 * PI / product.sqrt())
}

/// Indices of interior local maxima. A plateau counts once, at its first sample.
pub fn peak_indices(series: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if series.len() < 3 {
        return peaks;
    }
    let mut i = 1;
    while i < series.len() - 1 {
        if series[i] > series[i - 1] {
            let mut j = i;
            while j + 1 < series.len() && series[j + 1] == series[i] {
                j += 1;
            }
            if j + 1 < series.len() && series[j + 1] < series[i] {
                peaks.push(i);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// Mean spacing between successive peaks of `series`; needs at least two peaks.
pub fn estimate_period(times: &[f64], series: &[f64]) -> Option<f64> {
    let peaks = peak_indices(series);
    if peaks.len() < 2 {
        return None;
    }
    let first = times[peaks[0]];
    let last = times[peaks[peaks.len() - 1]];
    Some((last - first) / (peaks.len() - 1) as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseLag {
    pub prey_peak: usize,
    pub predator_peak: usize,
    /// Time from the prey maximum to the following predator maximum.
    pub lag: f64,
}

/// Pairs each prey peak with the first predator peak that follows it and
/// precedes the next prey peak.
pub fn phase_lags(trajectory: &Trajectory) -> Vec<PhaseLag> {
    let times = trajectory.times();
    let prey_peaks = peak_indices(&trajectory.prey());
    let predator_peaks = peak_indices(&trajectory.predator());

    let mut lags = Vec::new();
    for (n, &prey_peak) in prey_peaks.iter().enumerate() {
        let next_prey = prey_peaks.get(n + 1).copied().unwrap_or(usize::MAX);
        if let Some(&predator_peak) = predator_peaks
            .iter()
            .find(|&&p| p > prey_peak && p < next_prey)
        {
            lags.push(PhaseLag {
                prey_peak,
                predator_peak,
                lag: times[predator_peak] - times[prey_peak],
            });
        }
    }
    lags
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    /// Both populations start at zero and stay there.
    Extinct,
    /// No predators: prey grow exponentially at rate A.
    PreyOnly,
    /// No prey: predators decay exponentially at rate D.
    PredatorOnly,
    /// Starts on the interior equilibrium.
    Equilibrium,
    /// Closed orbits around the interior equilibrium.
    Oscillating,
    /// A zero rate, or an equilibrium beyond `f64` range, removes the interior oscillation.
    Degenerate,
}

/// Qualitative behavior of the exact solution, read off the inputs alone.
pub fn classify_regime(params: &ModelParameters, initial: &InitialState) -> Regime {
    match (initial.prey == 0.0, initial.predator == 0.0) {
        (true, true) => return Regime::Extinct,
        (false, true) => return Regime::PreyOnly,
        (true, false) => return Regime::PredatorOnly,
        (false, false) => {}
    }

    let Ok(point) = nontrivial_equilibrium(params) else {
        return Regime::Degenerate;
    };
    if params.growth_prey == 0.0 || params.predator_death_rate == 0.0 {
        return Regime::Degenerate;
    }

    let close = |a: f64, b: f64| (a - b).abs() <= 1e-12 * a.abs().max(b.abs()).max(1.0);
    if close(initial.prey, point.prey) && close(initial.predator, point.predator) {
        Regime::Equilibrium
    } else {
        Regime::Oscillating
    }
}
