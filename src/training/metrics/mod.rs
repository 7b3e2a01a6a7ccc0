//! Training metrics
//!
//! Each loss term gets a [`RunningMean`] that is reset at the start of every
//! epoch and updated once per step. At epoch end the means are frozen into
//! an [`EpochMetrics`] record; `fit` returns all records as a
//! [`TrainingHistory`]. Per-step values are also streamed to any attached
//! [`MetricsSink`].

pub mod sinks;

pub use sinks::{InMemorySink, JsonLinesSink, MetricRecord, MetricsSink, TracingSink};

#[cfg(test)]
pub use sinks::MockMetricsSink;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Running mean of a scalar loss
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningMean {
    total: f64,
    count: u64,
}

impl RunningMean {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation
    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
    }

    /// Current mean, `None` before the first observation
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.total / self.count as f64)
        }
    }

    /// Number of observations since the last reset
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Forget all observations
    pub fn reset(&mut self) {
        self.total = 0.0;
        self.count = 0;
    }
}

/// Named running means for the loss terms of one training loop
#[derive(Debug, Clone, Default)]
pub struct LossAccumulators {
    means: BTreeMap<String, RunningMean>,
}

impl LossAccumulators {
    /// Accumulators for the given loss names
    pub fn new(names: &[&str]) -> Self {
        Self {
            means: names
                .iter()
                .map(|name| (name.to_string(), RunningMean::new()))
                .collect(),
        }
    }

    /// Record a value, creating the accumulator if it is new
    pub fn update(&mut self, name: &str, value: f64) {
        self.means.entry(name.to_string()).or_default().update(value);
    }

    /// Reset every accumulator
    pub fn reset(&mut self) {
        self.means.values_mut().for_each(RunningMean::reset);
    }

    /// Accumulator for `name`
    pub fn get(&self, name: &str) -> Option<&RunningMean> {
        self.means.get(name)
    }

    /// Freeze the current means into an epoch record
    pub fn snapshot(&self, epoch: usize, steps: u64, elapsed: Duration) -> EpochMetrics {
        EpochMetrics {
            epoch,
            steps,
            elapsed_secs: elapsed.as_secs_f64(),
            losses: self
                .means
                .iter()
                .filter_map(|(name, mean)| mean.mean().map(|value| (name.clone(), value)))
                .collect(),
        }
    }
}

/// Mean losses of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Epoch number (1-based)
    pub epoch: usize,

    /// Steps taken in this epoch
    pub steps: u64,

    /// Wall-clock duration of the epoch
    pub elapsed_secs: f64,

    /// Mean of each loss term over the epoch
    pub losses: BTreeMap<String, f64>,
}

impl EpochMetrics {
    /// Mean of a named loss term
    pub fn loss(&self, name: &str) -> Option<f64> {
        self.losses.get(name).copied()
    }

    /// Human-readable `name: value` summary, sorted by name
    pub fn summary(&self) -> String {
        self.losses
            .iter()
            .map(|(name, value)| format!("{}: {:.6}", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of a `fit` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// One record per completed epoch
    pub epochs: Vec<EpochMetrics>,

    /// Total optimizer steps across all epochs
    pub total_steps: u64,
}

impl TrainingHistory {
    /// Record of the last completed epoch
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// Per-epoch series of one loss term
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.epochs.iter().filter_map(|epoch| epoch.loss(name)).collect()
    }
}
