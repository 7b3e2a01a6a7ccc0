//! Training loops for the generative models
//!
//! - [`ReconstructionTrainer`] drives any [`ReconstructionModel`] (the
//!   convolutional autoencoder and the VAE): one forward pass, one loss, one
//!   optimizer update per batch.
//! - [`GanTrainer`] drives a DCGAN with a strict two-phase step: a
//!   discriminator update followed by a generator update against the
//!   just-updated discriminator.
//!
//! Both loops are synchronous, run exactly `epochs` passes over the batch
//! source and poll an optional [`StopFlag`] before every step.

pub mod adversarial;
pub mod reconstruction;

pub use adversarial::{discriminator_step, generator_step, GanTrainer, StepOutput};
pub use reconstruction::{ReconstructionLosses, ReconstructionModel, ReconstructionTrainer};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::training::metrics::{JsonLinesSink, MetricsSink, TracingSink};
use crate::training::optimizers::{OptimizerConfig, OptimizerKind};

/// Options for [`ReconstructionTrainer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Number of passes over the batch source
    pub epochs: usize,

    /// Optimizer type
    pub optimizer: OptimizerKind,

    /// Optimizer learning rate
    pub learning_rate: f64,

    /// Show progress and log epoch summaries at info level
    pub verbose: bool,

    /// Directory to write the checkpoint to after training
    pub checkpoint_dir: Option<PathBuf>,

    /// JSON-lines file receiving per-step metrics
    pub metrics_log: Option<PathBuf>,

    /// Seed for the reparameterization noise
    pub seed: Option<u64>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            optimizer: OptimizerKind::Adam,
            learning_rate: 1e-3,
            verbose: true,
            checkpoint_dir: None,
            metrics_log: None,
            seed: None,
        }
    }
}

impl FitOptions {
    /// Default options for `epochs` epochs
    pub fn with_epochs(epochs: usize) -> Self {
        Self {
            epochs,
            ..Default::default()
        }
    }

    /// Optimizer configuration implied by these options
    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig::new(self.optimizer, self.learning_rate)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("epochs must be > 0"));
        }
        self.optimizer_config().validate()
    }
}

/// Options for [`GanTrainer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GanFitOptions {
    /// Number of passes over the batch source
    pub epochs: usize,

    /// Generator optimizer type
    pub gen_optimizer: OptimizerKind,

    /// Discriminator optimizer type
    pub disc_optimizer: OptimizerKind,

    /// Generator learning rate
    pub gen_learning_rate: f64,

    /// Discriminator learning rate
    pub disc_learning_rate: f64,

    /// First-moment decay, applied to Adam-family optimizers only
    pub beta1: f64,

    /// Show progress and log epoch summaries at info level
    pub verbose: bool,

    /// Directory to write both checkpoints to after training
    pub checkpoint_dir: Option<PathBuf>,

    /// JSON-lines file receiving per-step metrics
    pub metrics_log: Option<PathBuf>,

    /// Seed for the latent noise
    pub seed: Option<u64>,
}

impl Default for GanFitOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            gen_optimizer: OptimizerKind::Adam,
            disc_optimizer: OptimizerKind::Adam,
            gen_learning_rate: 1e-4,
            disc_learning_rate: 2e-4,
            beta1: 0.5,
            verbose: true,
            checkpoint_dir: None,
            metrics_log: None,
            seed: None,
        }
    }
}

impl GanFitOptions {
    /// Default options for `epochs` epochs
    pub fn with_epochs(epochs: usize) -> Self {
        Self {
            epochs,
            ..Default::default()
        }
    }

    fn adversarial_config(&self, kind: OptimizerKind, learning_rate: f64) -> OptimizerConfig {
        let config = OptimizerConfig::new(kind, learning_rate);
        if kind.is_adam_family() {
            config.with_beta1(self.beta1)
        } else {
            config
        }
    }

    /// Generator optimizer configuration
    pub fn gen_optimizer_config(&self) -> OptimizerConfig {
        self.adversarial_config(self.gen_optimizer, self.gen_learning_rate)
    }

    /// Discriminator optimizer configuration
    pub fn disc_optimizer_config(&self) -> OptimizerConfig {
        self.adversarial_config(self.disc_optimizer, self.disc_learning_rate)
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("epochs must be > 0"));
        }
        self.gen_optimizer_config().validate()?;
        self.disc_optimizer_config().validate()
    }
}

/// Cooperative cancellation flag, checked before every training step
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that training stop before its next step
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Default sinks plus those requested through options, opened before training starts
pub(crate) fn option_sinks<'a>(
    metrics_log: Option<&PathBuf>,
) -> Result<Vec<Box<dyn MetricsSink + 'a>>> {
    let mut sinks: Vec<Box<dyn MetricsSink + 'a>> = vec![Box::new(TracingSink)];
    if let Some(path) = metrics_log {
        sinks.push(Box::new(JsonLinesSink::new(path)?));
    }
    Ok(sinks)
}

/// Record `values` at `step` in every sink
pub(crate) fn emit(
    sinks: &mut [Box<dyn MetricsSink + '_>],
    values: &[(&str, f64)],
    step: u64,
) -> Result<()> {
    for sink in sinks.iter_mut() {
        for (name, value) in values {
            sink.record(name, *value, step)?;
        }
    }
    Ok(())
}
