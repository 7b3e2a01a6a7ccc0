//! SimpleGen - generative image models on candle
//!
//! This crate provides a convolutional autoencoder, a variational
//! autoencoder and a DCGAN together with the plumbing they share: batch
//! sources, loss functions, optimizers, training loops, metrics, checkpoints
//! and sample writing.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod models;
pub mod sampling;
pub mod training;
pub mod utils;

// Re-exports
pub use config::{DataConfig, ModelSpec, RunConfig};
pub use error::{Error, Result};
pub use models::{ConvAutoencoder, Dcgan, ImageShape, Vae};
pub use sampling::PixelRange;
pub use training::{BatchSource, FitOptions, GanFitOptions, StopFlag, TrainingHistory};

use std::path::Path;

use candle_core::Device;
use tracing::{info, instrument};

use crate::models::DcganConfig;
use crate::training::data::ImageFolder;
use crate::training::noise::NoiseSource;

/// Outcome of [`run_training`]
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Short name of the trained model
    pub model: &'static str,
    /// Per-epoch loss means
    pub history: TrainingHistory,
    /// Number of sample files written after training
    pub samples_written: usize,
}

/// Load the configured image folder, build and train the model, then write samples
#[instrument(skip(run, device), fields(model = run.model.name()))]
pub fn run_training(run: &RunConfig, device: &Device) -> Result<TrainingReport> {
    run.validate()?;
    let shape = run.data.image_shape();
    let folder = ImageFolder::new(&run.data.dir, shape, run.model.pixel_range())?;
    let mut dataset = folder.load(run.data.loader_config(), device)?;

    let sample_dir = match (&run.sample_dir, run.samples) {
        (Some(dir), n) if n > 0 => {
            std::fs::create_dir_all(dir)?;
            Some(dir.as_path())
        }
        _ => None,
    };

    let (history, samples_written) = match &run.model {
        ModelSpec::Autoencoder { config, fit } => {
            let mut model = ConvAutoencoder::with_device(config.clone(), device.clone())?;
            model.build(shape)?;
            let history = model.fit(&mut dataset, fit)?;
            let samples = match sample_dir {
                Some(dir) => model.generate_samples(&mut dataset, run.samples, Some(dir))?.len(),
                None => 0,
            };
            (history, samples)
        }
        ModelSpec::Vae { config, fit } => {
            let mut model = Vae::with_device(config.clone(), device.clone())?;
            model.build(shape)?;
            let history = model.fit(&mut dataset, fit)?;
            let samples = match sample_dir {
                Some(dir) => model.generate_samples(&mut dataset, run.samples, Some(dir))?.len(),
                None => 0,
            };
            (history, samples)
        }
        ModelSpec::Dcgan { config, fit } => {
            let mut model = Dcgan::with_device(config.clone(), device.clone())?;
            model.build(shape)?;
            let history = model.fit(&mut dataset, fit)?;
            let samples = match sample_dir {
                Some(dir) => model.generate_samples(run.samples, Some(dir))?.len(),
                None => 0,
            };
            (history, samples)
        }
    };

    info!(
        "Finished training {} ({} steps, {} samples written)",
        run.model.name(),
        history.total_steps,
        samples_written
    );
    Ok(TrainingReport {
        model: run.model.name(),
        history,
        samples_written,
    })
}

/// Restore a DCGAN generator checkpoint and write `n` samples into `save_dir`
#[instrument(skip(config, device))]
pub fn generate_from_checkpoint(
    config: &DcganConfig,
    generator_checkpoint: &Path,
    shape: ImageShape,
    n: usize,
    save_dir: &Path,
    seed: Option<u64>,
    device: &Device,
) -> Result<usize> {
    let config = DcganConfig {
        gen_path: Some(generator_checkpoint.to_path_buf()),
        disc_path: None,
        ..config.clone()
    };
    let mut model = Dcgan::with_device(config, device.clone())?;
    model.build(shape)?;
    let mut noise = NoiseSource::new(seed, device);
    let samples = model.generate_samples_with(n, Some(save_dir), &mut noise)?;
    Ok(samples.len())
}
