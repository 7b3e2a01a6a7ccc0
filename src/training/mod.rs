//! Training infrastructure for the generative models
//!
//! This module provides the batch sources, loss functions, optimizers,
//! metrics, checkpointing and the two training loops shared by the
//! convolutional autoencoder, the VAE and the DCGAN.
//!
//! # Main Components
//!
//! - **Data**: restartable [`BatchSource`]s over tensors or image folders
//! - **Trainers**: [`ReconstructionTrainer`] and [`GanTrainer`]
//! - **Loss**: reconstruction, KL, adversarial and kernel penalty terms
//! - **Optimizers**: Adam/AdamW, SGD and RMSprop behind one trait
//! - **Metrics**: per-epoch running means and per-step sinks
//! - **Checkpoints**: safetensors snapshots with topology checks on restore
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use simplegen::models::{ConvAutoencoder, ConvAutoencoderConfig};
//! use simplegen::training::{DataLoaderConfig, FitOptions, TensorDataset};
//!
//! let mut dataset = TensorDataset::new(images, DataLoaderConfig::with_batch_size(16))?;
//! let mut model = ConvAutoencoder::new(ConvAutoencoderConfig::default())?;
//! model.build_from_source(&mut dataset)?;
//! let history = model.fit(&mut dataset, &FitOptions::with_epochs(10))?;
//! ```

pub mod checkpoints;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod noise;
pub mod optimizers;
pub mod progress;
pub mod trainers;

// Tests module
#[cfg(test)]
pub mod tests;

pub use checkpoints::{
    checkpoint_path, inspect_checkpoint, network_topology, restore_checkpoint, save_checkpoint,
    CheckpointKind,
};
pub use data::{BatchList, BatchSource, DataLoaderConfig, ImageFolder, TensorDataset};
pub use metrics::{
    EpochMetrics, InMemorySink, JsonLinesSink, LossAccumulators, MetricRecord, MetricsSink,
    RunningMean, TracingSink, TrainingHistory,
};
pub use noise::NoiseSource;
pub use optimizers::{create_optimizer, Optimizer, OptimizerConfig, OptimizerKind};
pub use trainers::{
    FitOptions, GanFitOptions, GanTrainer, ReconstructionModel, ReconstructionTrainer, StopFlag,
};
