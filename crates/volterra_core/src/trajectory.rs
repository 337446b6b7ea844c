use crate::grid::TimeGrid;
use crate::integrate::IntegrationStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationSample {
    pub prey: f64,
    pub predator: f64,
}

/// Populations at every grid sample, computed once and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    times: Vec<f64>,
    samples: Vec<PopulationSample>,
    stats: IntegrationStats,
}

impl Trajectory {
    /// Builds a trajectory from a row-major `[prey, predator, prey, predator, ...]` buffer.
    pub(crate) fn from_flat(times: Vec<f64>, states: &[f64], stats: IntegrationStats) -> Self {
        let samples = states
            .chunks_exact(2)
            .map(|pair| PopulationSample {
                prey: pair[0],
                predator: pair[1],
            })
            .collect();
        Self {
            times,
            samples,
            stats,
        }
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn samples(&self) -> &[PopulationSample] {
        &self.samples
    }

    pub fn get(&self, index: usize) -> Option<&PopulationSample> {
        self.samples.get(index)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn prey(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.prey).collect()
    }

    pub fn predator(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.predator).collect()
    }

    pub fn stats(&self) -> &IntegrationStats {
        &self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &PopulationSample)> {
        self.times.iter().copied().zip(self.samples.iter())
    }
}

/// Accepts only records that could have come out of the integrator: a valid
/// grid with exactly one finite sample per time.
impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Record {
            times: Vec<f64>,
            samples: Vec<PopulationSample>,
            stats: IntegrationStats,
        }

        let record = Record::deserialize(deserializer)?;
        let times = TimeGrid::from_samples(record.times)
            .map_err(serde::de::Error::custom)?
            .into_times();
        if times.len() != record.samples.len() {
            return Err(serde::de::Error::custom(format!(
                "trajectory has {} times but {} samples",
                times.len(),
                record.samples.len()
            )));
        }
        if record
            .samples
            .iter()
            .any(|s| !s.prey.is_finite() || !s.predator.is_finite())
        {
            return Err(serde::de::Error::custom("trajectory contains non-finite samples"));
        }
        Ok(Self {
            times,
            samples: record.samples,
            stats: record.stats,
        })
    }
}
