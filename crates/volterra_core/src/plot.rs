//! Renderer-agnostic chart data. Hosts draw these however they like.

use crate::analysis::OrbitView;
use crate::equilibrium::EquilibriumPoint;
use crate::trajectory::Trajectory;
use serde::{Deserialize, Serialize};

pub const PREY_LABEL: &str = "Prey (hundreds)";
pub const PREDATOR_LABEL: &str = "Predators (hundreds)";
pub const TIME_LABEL: &str = "Time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    pub label: String,
    pub points: Vec<[f64; 2]>,
}

/// A single chart: axis labels, line series and optional point markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotData {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<PlotSeries>,
    pub markers: Vec<PlotSeries>,
}

impl PlotData {
    #[must_use]
    pub fn new(title: &str, x_label: &str, y_label: &str) -> Self {
        Self {
            title: title.to_string(),
            x_label: x_label.to_string(),
            y_label: y_label.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn add_series(mut self, label: &str, points: Vec<[f64; 2]>) -> Self {
        self.series.push(PlotSeries {
            label: label.to_string(),
            points,
        });
        self
    }

    #[must_use]
    pub fn add_marker(mut self, label: &str, point: [f64; 2]) -> Self {
        self.markers.push(PlotSeries {
            label: label.to_string(),
            points: vec![point],
        });
        self
    }
}

/// One chart per population against time.
pub fn time_series(trajectory: &Trajectory) -> Vec<PlotData> {
    let prey = trajectory.iter().map(|(t, s)| [t, s.prey]).collect();
    let predator = trajectory.iter().map(|(t, s)| [t, s.predator]).collect();
    vec![
        PlotData::new(PREY_LABEL, TIME_LABEL, PREY_LABEL).add_series(PREY_LABEL, prey),
        PlotData::new(PREDATOR_LABEL, TIME_LABEL, PREDATOR_LABEL)
            .add_series(PREDATOR_LABEL, predator),
    ]
}

/// Predators on x, prey on y, with the interior equilibrium marked when known.
pub fn phase_portrait(orbit: &OrbitView, equilibrium: Option<EquilibriumPoint>) -> PlotData {
    let points = orbit.points.iter().map(|p| [p.predator, p.prey]).collect();
    let plot = PlotData::new("Phase portrait", PREDATOR_LABEL, PREY_LABEL).add_series("Orbit", points);
    match equilibrium {
        Some(point) => plot.add_marker("Equilibrium", [point.predator, point.prey]),
        None => plot,
    }
}
