//! Variational autoencoder over flattened images
//!
//! The encoder maps a flattened image through dense layers to the mean and
//! log-variance of a diagonal Gaussian posterior. Training samples the
//! latent code with the reparameterization `z = mean + exp(0.5 * log_var) * eps`
//! and adds the closed-form KL term to the reconstruction loss. Inference
//! decodes the posterior mean, so it is deterministic.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::layers::{dense, Activation, Initializer, Regularizer};
use super::{check_layer_widths, ImageShape};
use crate::error::{Error, Result};
use crate::sampling::{save_samples, split_batch, take_samples, PixelRange};
use crate::training::checkpoints::{restore_checkpoint, save_checkpoint, CheckpointKind};
use crate::training::data::{infer_image_shape, BatchSource};
use crate::training::loss::{kernel_penalty, kl_divergence, reconstruction_loss};
use crate::training::metrics::TrainingHistory;
use crate::training::noise::NoiseSource;
use crate::training::trainers::{
    FitOptions, ReconstructionLosses, ReconstructionModel, ReconstructionTrainer,
};
use crate::utils::io::require_dir;

/// Hyperparameters of [`Vae`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaeConfig {
    /// Width of the layer feeding the posterior parameters
    pub interm_dim: usize,
    /// Latent dimension
    pub latent_dim: usize,
    /// Units per encoder dense layer
    pub enc_units: Vec<usize>,
    /// Units per decoder dense layer
    pub dec_units: Vec<usize>,
    /// Hidden-layer activation
    pub activation: Activation,
    /// Kernel initializer
    pub kernel_initializer: Initializer,
    /// Optional kernel penalty added to the loss
    pub kernel_regularizer: Option<Regularizer>,
    /// Checkpoint restored into the network on `build`
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for VaeConfig {
    fn default() -> Self {
        Self {
            interm_dim: 256,
            latent_dim: 32,
            enc_units: vec![256, 128],
            dec_units: vec![128, 256],
            activation: Activation::Relu,
            kernel_initializer: Initializer::GlorotUniform,
            kernel_regularizer: None,
            checkpoint_path: None,
        }
    }
}

impl VaeConfig {
    /// Validate the hyperparameters; encoder and decoder depth follow the unit lists
    pub fn validate(&self) -> Result<()> {
        check_layer_widths(&self.enc_units, "enc_units")?;
        check_layer_widths(&self.dec_units, "dec_units")?;
        if self.interm_dim == 0 || self.latent_dim == 0 {
            return Err(Error::config("interm_dim and latent_dim must be > 0"));
        }
        Ok(())
    }
}

/// Outputs of a VAE forward pass
#[derive(Debug, Clone)]
pub struct VaeOutput {
    /// Reconstruction, shaped like the input
    pub reconstruction: Tensor,
    /// Posterior mean
    pub z_mean: Tensor,
    /// Posterior log-variance
    pub z_log_var: Tensor,
    /// Latent code that was decoded
    pub z: Tensor,
}

/// Built encoder and decoder
pub struct VaeNetwork {
    var_map: VarMap,
    shape: ImageShape,
    activation: Activation,
    regularizer: Option<Regularizer>,
    encoder: Vec<Linear>,
    z_mean: Linear,
    z_log_var: Linear,
    decoder: Vec<Linear>,
    output: Linear,
}

impl VaeNetwork {
    /// Build the network for `shape` with freshly initialized weights
    pub fn new(config: &VaeConfig, shape: ImageShape, device: &Device) -> Result<Self> {
        config.validate()?;
        shape.validate()?;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let init = config.kernel_initializer;
        let flat = shape.num_elements();

        let mut widths = vec![config.enc_units[0] * 2];
        widths.extend(&config.enc_units);
        widths.push(config.interm_dim);
        let mut encoder = Vec::with_capacity(widths.len());
        let mut in_dim = flat;
        for (i, &out) in widths.iter().enumerate() {
            encoder.push(dense(in_dim, out, init, vb.pp(format!("encoder.dense{}", i)))?);
            in_dim = out;
        }
        let z_mean = dense(in_dim, config.latent_dim, Initializer::GlorotUniform, vb.pp("encoder.z_mean"))?;
        let z_log_var = dense(in_dim, config.latent_dim, Initializer::GlorotUniform, vb.pp("encoder.z_log_var"))?;

        let mut widths = vec![(config.dec_units[0] / 2).max(1)];
        widths.extend(&config.dec_units);
        let mut decoder = Vec::with_capacity(widths.len());
        let mut in_dim = config.latent_dim;
        for (i, &out) in widths.iter().enumerate() {
            decoder.push(dense(in_dim, out, init, vb.pp(format!("decoder.dense{}", i)))?);
            in_dim = out;
        }
        let output = dense(in_dim, flat, Initializer::GlorotUniform, vb.pp("decoder.output"))?;

        Ok(Self {
            var_map,
            shape,
            activation: config.activation,
            regularizer: config.kernel_regularizer,
            encoder,
            z_mean,
            z_log_var,
            decoder,
            output,
        })
    }

    /// Posterior mean and log-variance of a `[B, C, H, W]` batch
    pub fn encode(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut hidden = xs.flatten_from(1)?;
        for layer in &self.encoder {
            hidden = self.activation.apply(&layer.forward(&hidden)?)?;
        }
        Ok((self.z_mean.forward(&hidden)?, self.z_log_var.forward(&hidden)?))
    }

    /// `z = z_mean + exp(0.5 * z_log_var) * eps`
    pub fn reparameterize(z_mean: &Tensor, z_log_var: &Tensor, eps: &Tensor) -> Result<Tensor> {
        let std = (z_log_var * 0.5)?.exp()?;
        Ok((z_mean + (std * eps)?)?)
    }

    /// Decode `[B, latent_dim]` codes into `[B, C, H, W]` images in `(0, 1)`
    pub fn decode(&self, z: &Tensor) -> Result<Tensor> {
        let mut hidden = z.clone();
        for layer in &self.decoder {
            hidden = self.activation.apply(&layer.forward(&hidden)?)?;
        }
        let flat = candle_nn::ops::sigmoid(&self.output.forward(&hidden)?)?;
        let (c, h, w) = self.shape.dims();
        Ok(flat.reshape((z.dims()[0], c, h, w))?)
    }

    /// Full forward pass; samples `z` from `noise` when given, else decodes the mean
    pub fn forward(&self, xs: &Tensor, noise: Option<&mut NoiseSource>) -> Result<VaeOutput> {
        let (z_mean, z_log_var) = self.encode(xs)?;
        let z = match noise {
            Some(noise) => {
                let eps = noise.sample(z_mean.shape())?;
                Self::reparameterize(&z_mean, &z_log_var, &eps)?
            }
            None => z_mean.clone(),
        };
        let reconstruction = self.decode(&z)?;
        Ok(VaeOutput {
            reconstruction,
            z_mean,
            z_log_var,
            z,
        })
    }

    /// Kernel penalty of the hidden layers, `None` without a regularizer
    pub fn regularization(&self) -> Result<Option<Tensor>> {
        let Some(regularizer) = &self.regularizer else {
            return Ok(None);
        };
        let kernels: Vec<Tensor> = self
            .encoder
            .iter()
            .chain(&self.decoder)
            .map(|layer| layer.weight().clone())
            .collect();
        Ok(Some(kernel_penalty(&kernels, regularizer)?))
    }

    /// Image shape the network was built for
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Network variables
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    pub(crate) fn restore<P: AsRef<Path> + std::fmt::Debug>(&mut self, path: P) -> Result<()> {
        restore_checkpoint(&mut self.var_map, path)
    }
}

/// Variational autoencoder model
pub struct Vae {
    config: VaeConfig,
    device: Device,
    network: Option<VaeNetwork>,
}

impl Vae {
    /// Create an unbuilt model on the CPU
    pub fn new(config: VaeConfig) -> Result<Self> {
        Self::with_device(config, Device::Cpu)
    }

    /// Create an unbuilt model on `device`
    pub fn with_device(config: VaeConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            network: None,
        })
    }

    /// Model hyperparameters
    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    /// Whether `build` has been called
    pub fn is_built(&self) -> bool {
        self.network.is_some()
    }

    /// Built network
    pub fn network(&self) -> Result<&VaeNetwork> {
        self.network
            .as_ref()
            .ok_or_else(|| Error::precondition("VAE is not built; call build first"))
    }

    /// Build the network for `shape`, restoring the configured checkpoint
    #[instrument(skip(self))]
    pub fn build(&mut self, shape: ImageShape) -> Result<()> {
        let mut network = VaeNetwork::new(&self.config, shape, &self.device)?;
        if let Some(path) = &self.config.checkpoint_path {
            network.restore(path)?;
            info!("Restored VAE from {}", path.display());
        }
        self.network = Some(network);
        Ok(())
    }

    /// Build for the image shape of the source's first batch
    pub fn build_from_source(&mut self, source: &mut dyn BatchSource) -> Result<ImageShape> {
        let shape = infer_image_shape(source)?;
        self.build(shape)?;
        Ok(shape)
    }

    /// Deterministic reconstruction of a `[B, C, H, W]` batch
    pub fn reconstruct(&self, batch: &Tensor) -> Result<Tensor> {
        let network = self.network()?;
        network.shape().check_batch(batch)?;
        Ok(network.forward(batch, None)?.reconstruction.detach())
    }

    /// Train with [`ReconstructionTrainer`]
    pub fn fit(&self, source: &mut dyn BatchSource, options: &FitOptions) -> Result<TrainingHistory> {
        ReconstructionTrainer::new(self, options.clone())?.fit(source)
    }

    /// Reconstruct up to `n` samples drawn from `source`, optionally writing them
    pub fn generate_samples(
        &self,
        source: &mut dyn BatchSource,
        n: usize,
        save_dir: Option<&Path>,
    ) -> Result<Vec<Tensor>> {
        self.network()?;
        if let Some(dir) = save_dir {
            require_dir(dir)?;
        }
        let inputs = take_samples(source, n)?;
        if inputs.is_empty() {
            return Ok(inputs);
        }
        let outputs = split_batch(&self.reconstruct(&Tensor::stack(&inputs, 0)?)?)?;
        if let Some(dir) = save_dir {
            save_samples(&outputs, dir, PixelRange::UnitInterval)?;
        }
        Ok(outputs)
    }

    /// Save the network to `{dir}/variational_autoencoder_checkpoint`
    pub fn save_checkpoint<P: AsRef<Path> + std::fmt::Debug>(&self, dir: P) -> Result<PathBuf> {
        save_checkpoint(self.network()?.var_map(), dir, CheckpointKind::VariationalAutoencoder)
    }
}

impl ReconstructionModel for Vae {
    fn model_name(&self) -> &'static str {
        "VAE"
    }

    fn checkpoint_kind(&self) -> CheckpointKind {
        CheckpointKind::VariationalAutoencoder
    }

    fn loss_terms(&self) -> Vec<&'static str> {
        let mut terms = vec!["reconstruction_loss", "kl_loss"];
        if self.config.kernel_regularizer.is_some() {
            terms.push("regularization_loss");
        }
        terms
    }

    fn image_shape(&self) -> Option<ImageShape> {
        self.network.as_ref().map(VaeNetwork::shape)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn var_map(&self) -> Result<&VarMap> {
        Ok(self.network()?.var_map())
    }

    fn training_losses(&self, batch: &Tensor, noise: &mut NoiseSource) -> Result<ReconstructionLosses> {
        let network = self.network()?;
        let output = network.forward(batch, Some(noise))?;
        let reconstruction = reconstruction_loss(batch, &output.reconstruction)?;
        let kl = kl_divergence(&output.z_mean, &output.z_log_var)?;
        let mut total = (&reconstruction + &kl)?;
        let mut terms = vec![("reconstruction_loss", reconstruction), ("kl_loss", kl)];
        if let Some(penalty) = network.regularization()? {
            total = (total + &penalty)?;
            terms.push(("regularization_loss", penalty));
        }
        Ok(ReconstructionLosses { total, terms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::loss::scalar;
    use approx::assert_relative_eq;

    fn small_vae() -> Vae {
        let config = VaeConfig {
            interm_dim: 8,
            latent_dim: 4,
            enc_units: vec![16, 8],
            dec_units: vec![8, 16],
            ..Default::default()
        };
        let mut vae = Vae::new(config).unwrap();
        vae.build(ImageShape::new(4, 4, 1)).unwrap();
        vae
    }

    #[test]
    fn test_empty_units_rejected() {
        let config = VaeConfig {
            enc_units: vec![],
            ..Default::default()
        };
        assert!(matches!(Vae::new(config), Err(Error::Configuration(_))));

        let config = VaeConfig {
            dec_units: vec![64, 0],
            ..Default::default()
        };
        assert!(matches!(Vae::new(config), Err(Error::Configuration(msg)) if msg.contains("dec_units")));
    }

    #[test]
    fn test_total_is_reconstruction_plus_kl() -> Result<()> {
        let vae = small_vae();
        let batch = Tensor::rand(0f32, 1f32, (3, 1, 4, 4), &Device::Cpu)?;
        let mut noise = NoiseSource::seeded(3, &Device::Cpu);
        let losses = vae.training_losses(&batch, &mut noise)?;
        let total = scalar(&losses.total)?;
        let reconstruction = scalar(&losses.terms[0].1)?;
        let kl = scalar(&losses.terms[1].1)?;
        assert_eq!(losses.terms[1].0, "kl_loss");
        assert_relative_eq!(total, reconstruction + kl, epsilon = 1e-6);
        assert!(kl >= 0.0);
        Ok(())
    }

    #[test]
    fn test_inference_is_deterministic() -> Result<()> {
        let vae = small_vae();
        let batch = Tensor::rand(0f32, 1f32, (2, 1, 4, 4), &Device::Cpu)?;
        let first = vae.reconstruct(&batch)?.flatten_all()?.to_vec1::<f32>()?;
        let second = vae.reconstruct(&batch)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_reparameterize_with_zero_noise_is_mean() -> Result<()> {
        let device = Device::Cpu;
        let z_mean = Tensor::new(&[[1.0f32, -2.0]], &device)?;
        let z_log_var = Tensor::new(&[[0.3f32, 0.7]], &device)?;
        let eps = z_mean.zeros_like()?;
        let z = VaeNetwork::reparameterize(&z_mean, &z_log_var, &eps)?;
        assert_eq!(z.to_vec2::<f32>()?, vec![vec![1.0, -2.0]]);

        // unit noise with zero log-variance shifts by one
        let z = VaeNetwork::reparameterize(&z_mean, &z_mean.zeros_like()?, &z_mean.ones_like()?)?;
        assert_eq!(z.to_vec2::<f32>()?, vec![vec![2.0, -1.0]]);
        Ok(())
    }

    #[test]
    fn test_output_shapes() -> Result<()> {
        let vae = small_vae();
        let batch = Tensor::rand(0f32, 1f32, (2, 1, 4, 4), &Device::Cpu)?;
        let output = vae.network()?.forward(&batch, None)?;
        assert_eq!(output.z_mean.dims(), &[2, 4]);
        assert_eq!(output.reconstruction.dims(), &[2, 1, 4, 4]);
        Ok(())
    }
}
