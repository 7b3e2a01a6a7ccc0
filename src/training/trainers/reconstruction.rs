//! Training loop for reconstruction models
//!
//! One step per batch: forward pass, total loss (reconstruction plus any
//! KL or regularization terms the model adds), gradients over the model's
//! variables, one optimizer update. Loss values are read from the forward
//! pass before the update is applied.

use std::time::Instant;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::{debug, info, instrument};

use super::{emit, option_sinks, FitOptions, StopFlag};
use crate::error::{Error, Result};
use crate::models::ImageShape;
use crate::training::checkpoints::{ensure_checkpoint_dir, save_checkpoint, CheckpointKind};
use crate::training::data::BatchSource;
use crate::training::loss::scalar;
use crate::training::metrics::{LossAccumulators, MetricsSink, TrainingHistory};
use crate::training::noise::NoiseSource;
use crate::training::optimizers::{create_optimizer, Optimizer};
use crate::training::progress::EpochProgress;

/// Name of the total loss metric
pub const TOTAL_LOSS: &str = "loss";

/// Loss tensors of one forward pass
pub struct ReconstructionLosses {
    /// Scalar loss the gradients are taken of
    pub total: Tensor,

    /// Named components of `total`, reported as separate metrics
    pub terms: Vec<(&'static str, Tensor)>,
}

/// A model trainable by [`ReconstructionTrainer`]
pub trait ReconstructionModel {
    /// Name used in log messages
    fn model_name(&self) -> &'static str;

    /// Checkpoint file this model is saved under
    fn checkpoint_kind(&self) -> CheckpointKind;

    /// Names of the loss terms reported by [`Self::training_losses`]
    fn loss_terms(&self) -> Vec<&'static str>;

    /// Image shape the model was built for, `None` if not built
    fn image_shape(&self) -> Option<ImageShape>;

    /// Device the model's parameters live on
    fn device(&self) -> &Device;

    /// Variables of the built network
    fn var_map(&self) -> Result<&VarMap>;

    /// Forward pass in training mode and the resulting losses
    fn training_losses(&self, batch: &Tensor, noise: &mut NoiseSource) -> Result<ReconstructionLosses>;
}

/// Trainer for autoencoder-style models
pub struct ReconstructionTrainer<'a, M: ReconstructionModel + ?Sized> {
    model: &'a M,
    shape: ImageShape,
    options: FitOptions,
    optimizer: Box<dyn Optimizer>,
    noise: NoiseSource,
    sinks: Vec<Box<dyn MetricsSink + 'a>>,
    stop: Option<StopFlag>,
    step: u64,
}

impl<'a, M: ReconstructionModel + ?Sized> ReconstructionTrainer<'a, M> {
    /// Create a trainer for a built model
    pub fn new(model: &'a M, options: FitOptions) -> Result<Self> {
        options.validate()?;
        let shape = model.image_shape().ok_or_else(|| {
            Error::precondition(format!(
                "{} must be built before training; call build first",
                model.model_name()
            ))
        })?;
        let optimizer = create_optimizer(&options.optimizer_config(), model.var_map()?.all_vars())?;
        let noise = NoiseSource::new(options.seed, model.device());
        let sinks = option_sinks(options.metrics_log.as_ref())?;
        Ok(Self {
            model,
            shape,
            options,
            optimizer,
            noise,
            sinks,
            stop: None,
            step: 0,
        })
    }

    /// Attach a metrics sink
    pub fn with_sink(mut self, sink: Box<dyn MetricsSink + 'a>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Attach a stop flag
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Optimizer driving the updates
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Steps taken so far
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// One gradient update on one batch, returning the step's loss values
    pub fn train_step(&mut self, batch: &Tensor) -> Result<Vec<(&'static str, f64)>> {
        self.shape.check_batch(batch)?;
        let losses = self.model.training_losses(batch, &mut self.noise)?;

        let mut values = Vec::with_capacity(losses.terms.len() + 1);
        values.push((TOTAL_LOSS, scalar(&losses.total)?));
        for (name, term) in &losses.terms {
            values.push((*name, scalar(term)?));
        }

        let grads = losses.total.backward()?;
        self.optimizer.step(&grads)?;
        self.step += 1;
        Ok(values)
    }

    /// Train for the configured number of epochs
    #[instrument(skip(self, source), fields(model = self.model.model_name()))]
    pub fn fit(&mut self, source: &mut dyn BatchSource) -> Result<TrainingHistory> {
        if let Some(dir) = &self.options.checkpoint_dir {
            ensure_checkpoint_dir(dir)?;
        }
        let epochs = self.options.epochs;
        let mut names = vec![TOTAL_LOSS];
        names.extend(self.model.loss_terms());
        let mut metrics = LossAccumulators::new(&names);
        let mut history = TrainingHistory::default();
        info!(
            "Training {} for {} epochs with {}",
            self.model.model_name(),
            epochs,
            self.optimizer.name()
        );

        for epoch in 1..=epochs {
            metrics.reset();
            let started = Instant::now();
            let progress = EpochProgress::new(epoch, epochs, source.num_batches(), self.options.verbose);
            let mut epoch_steps = 0u64;

            for batch in source.batches()? {
                if self.stop.as_ref().is_some_and(StopFlag::is_stopped) {
                    progress.finish();
                    info!("Stop requested after {} steps", self.step);
                    return Err(Error::Interrupted { steps: self.step });
                }
                let values = self.train_step(&batch?)?;
                for (name, value) in &values {
                    metrics.update(name, *value);
                }
                emit(&mut self.sinks, &values, self.step)?;
                progress.advance(&values);
                epoch_steps += 1;
            }
            progress.finish();

            if epoch_steps == 0 {
                return Err(Error::data("Batch source yielded no batches"));
            }
            let record = metrics.snapshot(epoch, epoch_steps, started.elapsed());
            if self.options.verbose {
                info!("Epoch {}/{} - {}", epoch, epochs, record.summary());
            } else {
                debug!("Epoch {}/{} - {}", epoch, epochs, record.summary());
            }
            history.epochs.push(record);
        }
        history.total_steps = self.step;

        for sink in self.sinks.iter_mut() {
            sink.flush()?;
        }
        if let Some(dir) = &self.options.checkpoint_dir {
            save_checkpoint(self.model.var_map()?, dir, self.model.checkpoint_kind())?;
        }
        Ok(history)
    }
}
