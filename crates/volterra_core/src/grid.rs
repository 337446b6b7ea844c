use crate::error::{Result, SimulationError};
use serde::{Deserialize, Serialize};

/// Strictly increasing sample times starting at exactly zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TimeGrid {
    times: Vec<f64>,
}

impl TimeGrid {
    pub const DEFAULT_END: f64 = 50.0;
    pub const DEFAULT_SAMPLES: usize = 1000;

    /// Evenly spaced samples over `[0, end]`, both ends included.
    pub fn linspace(end: f64, samples: usize) -> Result<Self> {
        if samples == 0 {
            return Err(SimulationError::invalid("grid", "must contain at least one sample"));
        }
        if !end.is_finite() || end < 0.0 {
            return Err(SimulationError::invalid(
                "grid",
                format!("end time {end} must be finite and non-negative"),
            ));
        }
        if samples == 1 {
            return Ok(Self { times: vec![0.0] });
        }
        if end == 0.0 {
            return Err(SimulationError::invalid(
                "grid",
                "end time must be positive when more than one sample is requested",
            ));
        }

        let last = samples - 1;
        let step = end / last as f64;
        let mut times: Vec<f64> = (0..samples).map(|i| i as f64 * step).collect();
        times[last] = end;
        Self::from_samples(times)
    }

    /// Validates an arbitrary sample vector.
    pub fn from_samples(times: Vec<f64>) -> Result<Self> {
        let first = *times
            .first()
            .ok_or_else(|| SimulationError::invalid("grid", "must contain at least one sample"))?;
        if first != 0.0 {
            return Err(SimulationError::invalid(
                "grid",
                format!("must start at 0, starts at {first}"),
            ));
        }
        if let Some(bad) = times.iter().position(|t| !t.is_finite()) {
            return Err(SimulationError::invalid(
                "grid",
                format!("sample {bad} is not finite"),
            ));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(SimulationError::invalid(
                "grid",
                format!(
                    "samples must be strictly increasing (t[{}] = {} >= t[{}] = {})",
                    i,
                    times[i],
                    i + 1,
                    times[i + 1]
                ),
            ));
        }
        Ok(Self { times })
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub(crate) fn into_times(self) -> Vec<f64> {
        self.times
    }

    pub fn end(&self) -> f64 {
        self.times[self.times.len() - 1]
    }
}

impl Default for TimeGrid {
    fn default() -> Self {
        let last = Self::DEFAULT_SAMPLES - 1;
        let step = Self::DEFAULT_END / last as f64;
        let mut times: Vec<f64> = (0..Self::DEFAULT_SAMPLES)
            .map(|i| i as f64 * step)
            .collect();
        times[last] = Self::DEFAULT_END;
        Self { times }
    }
}

impl<'de> Deserialize<'de> for TimeGrid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let times = Vec::<f64>::deserialize(deserializer)?;
        TimeGrid::from_samples(times).map_err(serde::de::Error::custom)
    }
}

/// How a request describes its grid: evenly spaced or explicit samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridSpec {
    Linspace { end: f64, samples: usize },
    Samples { times: Vec<f64> },
}

impl Default for GridSpec {
    fn default() -> Self {
        GridSpec::Linspace {
            end: TimeGrid::DEFAULT_END,
            samples: TimeGrid::DEFAULT_SAMPLES,
        }
    }
}

impl GridSpec {
    pub fn build(&self) -> Result<TimeGrid> {
        match self {
            GridSpec::Linspace { end, samples } => TimeGrid::linspace(*end, *samples),
            GridSpec::Samples { times } => TimeGrid::from_samples(times.clone()),
        }
    }
}
