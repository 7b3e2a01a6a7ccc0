//! Adversarial training loop for DCGAN
//!
//! Each step runs two phases, never interleaved:
//!
//! 1. [`discriminator_step`]: fresh noise, fakes from the current generator
//!    (detached), discriminator loss on reals and fakes, gradients for the
//!    discriminator only, discriminator update.
//! 2. [`generator_step`]: new independent noise, fakes scored by the
//!    just-updated discriminator, generator loss, gradients for the
//!    generator only, generator update.

use std::time::Instant;

use candle_core::backprop::GradStore;
use candle_core::Tensor;
use tracing::{debug, info, instrument};

use super::{emit, option_sinks, GanFitOptions, StopFlag};
use crate::error::{Error, Result};
use crate::models::dcgan::{Dcgan, Discriminator, Generator};
use crate::models::ImageShape;
use crate::training::checkpoints::{ensure_checkpoint_dir, save_checkpoint, CheckpointKind};
use crate::training::data::BatchSource;
use crate::training::loss::{discriminator_loss, generator_loss, scalar};
use crate::training::metrics::{LossAccumulators, MetricsSink, TrainingHistory};
use crate::training::noise::NoiseSource;
use crate::training::optimizers::{create_optimizer, Optimizer};
use crate::training::progress::EpochProgress;

/// Metric name of the discriminator loss
pub const DISCRIMINATOR_LOSS: &str = "discriminator_loss";

/// Metric name of the generator loss
pub const GENERATOR_LOSS: &str = "generator_loss";

/// Loss and gradients of one phase of an adversarial step
pub struct StepOutput {
    /// Scalar loss, read before any update
    pub loss: f64,

    /// Gradients of the loss for exactly one network's variables
    pub grads: GradStore,
}

/// Discriminator phase: loss on reals and detached fakes
pub fn discriminator_step(
    generator: &Generator,
    discriminator: &Discriminator,
    real: &Tensor,
    noise: &mut NoiseSource,
) -> Result<StepOutput> {
    let batch_size = real.dims()[0];
    let z = noise.sample((batch_size, generator.noise_dim()))?;
    let fake = generator.forward(&z)?.detach();

    let real_logits = discriminator.forward_t(real, true)?;
    let fake_logits = discriminator.forward_t(&fake, true)?;
    let mut loss = discriminator_loss(&real_logits, &fake_logits)?;
    if let Some(penalty) = discriminator.regularization()? {
        loss = (loss + penalty)?;
    }

    let value = scalar(&loss)?;
    let grads = loss.backward()?;
    Ok(StepOutput { loss: value, grads })
}

/// Generator phase: loss of fresh fakes against the current discriminator
pub fn generator_step(
    generator: &Generator,
    discriminator: &Discriminator,
    batch_size: usize,
    noise: &mut NoiseSource,
) -> Result<StepOutput> {
    let z = noise.sample((batch_size, generator.noise_dim()))?;
    let fake = generator.forward(&z)?;
    let fake_logits = discriminator.forward_t(&fake, true)?;
    let mut loss = generator_loss(&fake_logits)?;
    if let Some(penalty) = generator.regularization()? {
        loss = (loss + penalty)?;
    }

    let value = scalar(&loss)?;
    let mut grads = loss.backward()?;
    for var in discriminator.var_map().all_vars() {
        grads.remove(var.as_tensor());
    }
    Ok(StepOutput { loss: value, grads })
}

/// Trainer for [`Dcgan`]
pub struct GanTrainer<'a> {
    generator: &'a Generator,
    discriminator: &'a Discriminator,
    shape: ImageShape,
    options: GanFitOptions,
    gen_optimizer: Box<dyn Optimizer>,
    disc_optimizer: Box<dyn Optimizer>,
    noise: NoiseSource,
    sinks: Vec<Box<dyn MetricsSink + 'a>>,
    stop: Option<StopFlag>,
    step: u64,
}

impl<'a> GanTrainer<'a> {
    /// Create a trainer for a built DCGAN
    pub fn new(model: &'a Dcgan, options: GanFitOptions) -> Result<Self> {
        options.validate()?;
        let (generator, discriminator) = model.networks()?;
        let shape = model
            .image_shape()
            .ok_or_else(|| Error::precondition("DCGAN must be built before training"))?;
        let gen_optimizer =
            create_optimizer(&options.gen_optimizer_config(), generator.var_map().all_vars())?;
        let disc_optimizer =
            create_optimizer(&options.disc_optimizer_config(), discriminator.var_map().all_vars())?;
        let noise = NoiseSource::new(options.seed, model.device());
        let sinks = option_sinks(options.metrics_log.as_ref())?;
        Ok(Self {
            generator,
            discriminator,
            shape,
            options,
            gen_optimizer,
            disc_optimizer,
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

    /// Generator optimizer
    pub fn gen_optimizer(&self) -> &dyn Optimizer {
        self.gen_optimizer.as_ref()
    }

    /// Discriminator optimizer
    pub fn disc_optimizer(&self) -> &dyn Optimizer {
        self.disc_optimizer.as_ref()
    }

    /// Steps taken so far
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// One discriminator update followed by one generator update
    ///
    /// Returns `(discriminator_loss, generator_loss)`. Each loss is
    /// emitted to the sinks right after its own update.
    pub fn train_step(&mut self, real: &Tensor) -> Result<(f64, f64)> {
        let batch_size = self.shape.check_batch(real)?;
        let step = self.step + 1;

        let d = discriminator_step(self.generator, self.discriminator, real, &mut self.noise)?;
        self.disc_optimizer.step(&d.grads)?;
        emit(&mut self.sinks, &[(DISCRIMINATOR_LOSS, d.loss)], step)?;

        let g = generator_step(self.generator, self.discriminator, batch_size, &mut self.noise)?;
        self.gen_optimizer.step(&g.grads)?;
        emit(&mut self.sinks, &[(GENERATOR_LOSS, g.loss)], step)?;

        self.step = step;
        Ok((d.loss, g.loss))
    }

    /// Train for the configured number of epochs
    #[instrument(skip(self, source))]
    pub fn fit(&mut self, source: &mut dyn BatchSource) -> Result<TrainingHistory> {
        if let Some(dir) = &self.options.checkpoint_dir {
            ensure_checkpoint_dir(dir)?;
        }
        let epochs = self.options.epochs;
        let mut metrics = LossAccumulators::new(&[GENERATOR_LOSS, DISCRIMINATOR_LOSS]);
        let mut history = TrainingHistory::default();
        info!(
            "Training DCGAN for {} epochs (generator: {}, discriminator: {})",
            epochs,
            self.gen_optimizer.name(),
            self.disc_optimizer.name()
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
                let (d_loss, g_loss) = self.train_step(&batch?)?;
                metrics.update(DISCRIMINATOR_LOSS, d_loss);
                metrics.update(GENERATOR_LOSS, g_loss);
                progress.advance(&[(GENERATOR_LOSS, g_loss), (DISCRIMINATOR_LOSS, d_loss)]);
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
            save_checkpoint(self.generator.var_map(), dir, CheckpointKind::Generator)?;
            save_checkpoint(self.discriminator.var_map(), dir, CheckpointKind::Discriminator)?;
        }
        Ok(history)
    }
}
