//! Deep convolutional GAN
//!
//! The generator maps `[B, noise_dim]` latent vectors to `[B, C, H, W]`
//! images in `(-1, 1)`. The discriminator maps images to one unnormalized
//! logit per sample. Each network owns its own [`VarMap`] so the two
//! optimizers and the two checkpoints never share a variable.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{Conv2d, ConvTranspose2d, Dropout, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::layers::{
    conv2d_same, conv_transpose2d_same, dense, upsampling_stack, Activation, Initializer,
    Regularizer, LEAKY_RELU_SLOPE,
};
use super::{check_kernel_size, check_layer_widths, ImageShape};
use crate::error::{Error, Result};
use crate::sampling::{save_samples, split_batch, PixelRange};
use crate::training::checkpoints::{restore_checkpoint, save_checkpoint, CheckpointKind};
use crate::training::data::{infer_image_shape, BatchSource};
use crate::training::loss::kernel_penalty;
use crate::training::metrics::TrainingHistory;
use crate::training::noise::NoiseSource;
use crate::training::trainers::{GanFitOptions, GanTrainer};
use crate::utils::io::require_dir;
use crate::utils::math::same_conv_output;

/// Hyperparameters of [`Dcgan`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcganConfig {
    /// Latent vector size
    pub noise_dim: usize,
    /// Discriminator dropout probability
    pub dropout_rate: f64,
    /// Filters per generator transposed convolution
    pub gen_channels: Vec<usize>,
    /// Filters per discriminator convolution
    pub disc_channels: Vec<usize>,
    /// Square kernel size, must be odd
    pub kernel_size: usize,
    /// Activation after the generator's dense layer
    pub activation: Activation,
    /// Kernel initializer for both networks
    pub kernel_initializer: Initializer,
    /// Optional kernel penalty added to both losses
    pub kernel_regularizer: Option<Regularizer>,
    /// Generator checkpoint restored on `build`
    pub gen_path: Option<PathBuf>,
    /// Discriminator checkpoint restored on `build`
    pub disc_path: Option<PathBuf>,
}

impl Default for DcganConfig {
    fn default() -> Self {
        Self {
            noise_dim: 100,
            dropout_rate: 0.4,
            gen_channels: vec![64, 32, 16],
            disc_channels: vec![16, 32, 64],
            kernel_size: 5,
            activation: Activation::Relu,
            kernel_initializer: Initializer::GlorotUniform,
            kernel_regularizer: None,
            gen_path: None,
            disc_path: None,
        }
    }
}

impl DcganConfig {
    /// Validate the hyperparameters
    ///
    /// The generator and discriminator depths are the lengths of
    /// `gen_channels` and `disc_channels`.
    pub fn validate(&self) -> Result<()> {
        check_layer_widths(&self.gen_channels, "gen_channels")?;
        check_layer_widths(&self.disc_channels, "disc_channels")?;
        check_kernel_size(self.kernel_size)?;
        if self.noise_dim == 0 {
            return Err(Error::config("noise_dim must be > 0"));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }
}

fn leaky_relu(xs: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::leaky_relu(xs, LEAKY_RELU_SLOPE)?)
}

/// Generator network
pub struct Generator {
    var_map: VarMap,
    noise_dim: usize,
    activation: Activation,
    regularizer: Option<Regularizer>,
    input: Linear,
    input_dims: (usize, usize, usize),
    deconvs: Vec<ConvTranspose2d>,
    output: ConvTranspose2d,
}

impl Generator {
    /// Build a generator producing images of `shape`
    pub fn new(config: &DcganConfig, shape: ImageShape, device: &Device) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let (k, init) = (config.kernel_size, config.kernel_initializer);

        let input_dims = (config.gen_channels[0] * 2, shape.height / 4, shape.width / 4);
        let (c0, h0, w0) = input_dims;
        let input = dense(config.noise_dim, c0 * h0 * w0, init, vb.pp("generator.dense"))?;
        let mut deconvs = Vec::with_capacity(config.gen_channels.len());
        let mut in_channels = c0;
        for (i, (out, stride)) in upsampling_stack(&config.gen_channels).into_iter().enumerate() {
            let name = format!("generator.deconv{}", i);
            deconvs.push(conv_transpose2d_same(in_channels, out, k, stride, false, init, vb.pp(name))?);
            in_channels = out;
        }
        let output =
            conv_transpose2d_same(in_channels, shape.channels, k, 2, false, init, vb.pp("generator.output"))?;

        Ok(Self {
            var_map,
            noise_dim: config.noise_dim,
            activation: config.activation,
            regularizer: config.kernel_regularizer,
            input,
            input_dims,
            deconvs,
            output,
        })
    }

    /// Latent vector size
    pub fn noise_dim(&self) -> usize {
        self.noise_dim
    }

    /// Map `[B, noise_dim]` latents to `[B, C, H, W]` images in `(-1, 1)`
    pub fn forward(&self, z: &Tensor) -> Result<Tensor> {
        let batch_size = z.dims()[0];
        let (c, h, w) = self.input_dims;
        let hidden = self.activation.apply(&self.input.forward(z)?)?;
        let mut xs = leaky_relu(&hidden)?.reshape((batch_size, c, h, w))?;
        for deconv in &self.deconvs {
            xs = leaky_relu(&deconv.forward(&xs)?)?;
        }
        Ok(self.output.forward(&xs)?.tanh()?)
    }

    /// Kernel penalty of all layers, `None` without a regularizer
    pub fn regularization(&self) -> Result<Option<Tensor>> {
        let Some(regularizer) = &self.regularizer else {
            return Ok(None);
        };
        let mut kernels = vec![self.input.weight().clone()];
        kernels.extend(self.deconvs.iter().map(|d| d.weight().clone()));
        kernels.push(self.output.weight().clone());
        Ok(Some(kernel_penalty(&kernels, regularizer)?))
    }

    /// Generator variables
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        restore_checkpoint(&mut self.var_map, path)
    }
}

/// Discriminator network
pub struct Discriminator {
    var_map: VarMap,
    regularizer: Option<Regularizer>,
    convs: Vec<Conv2d>,
    dropout: Dropout,
    output: Linear,
}

impl Discriminator {
    /// Build a discriminator for images of `shape`
    pub fn new(config: &DcganConfig, shape: ImageShape, device: &Device) -> Result<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let (k, init) = (config.kernel_size, config.kernel_initializer);

        // stride-2 input conv, one stride-1 conv per entry, stride-2 exit conv
        let mut layers = vec![((config.disc_channels[0] / 2).max(1), 2)];
        layers.extend(config.disc_channels.iter().map(|&c| (c, 1)));
        let last = config.disc_channels[config.disc_channels.len() - 1];
        layers.push((last * 2, 2));

        let mut convs = Vec::with_capacity(layers.len());
        let mut in_channels = shape.channels;
        for (i, (out, stride)) in layers.into_iter().enumerate() {
            let name = format!("discriminator.conv{}", i);
            convs.push(conv2d_same(in_channels, out, k, stride, init, vb.pp(name))?);
            in_channels = out;
        }
        let out_h = same_conv_output(same_conv_output(shape.height, 2), 2);
        let out_w = same_conv_output(same_conv_output(shape.width, 2), 2);
        let output = dense(in_channels * out_h * out_w, 1, init, vb.pp("discriminator.output"))?;

        Ok(Self {
            var_map,
            regularizer: config.kernel_regularizer,
            convs,
            dropout: Dropout::new(config.dropout_rate as f32),
            output,
        })
    }

    /// Map `[B, C, H, W]` images to `[B, 1]` logits; dropout only when `train`
    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for conv in &self.convs {
            xs = self.dropout.forward_t(&leaky_relu(&conv.forward(&xs)?)?, train)?;
        }
        Ok(self.output.forward(&xs.flatten_from(1)?)?)
    }

    /// Kernel penalty of all layers, `None` without a regularizer
    pub fn regularization(&self) -> Result<Option<Tensor>> {
        let Some(regularizer) = &self.regularizer else {
            return Ok(None);
        };
        let mut kernels: Vec<Tensor> = self.convs.iter().map(|c| c.weight().clone()).collect();
        kernels.push(self.output.weight().clone());
        Ok(Some(kernel_penalty(&kernels, regularizer)?))
    }

    /// Discriminator variables
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        restore_checkpoint(&mut self.var_map, path)
    }
}

/// DCGAN model
pub struct Dcgan {
    config: DcganConfig,
    device: Device,
    networks: Option<(Generator, Discriminator, ImageShape)>,
}

impl Dcgan {
    /// Create an unbuilt model on the CPU
    pub fn new(config: DcganConfig) -> Result<Self> {
        Self::with_device(config, Device::Cpu)
    }

    /// Create an unbuilt model on `device`
    pub fn with_device(config: DcganConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            networks: None,
        })
    }

    /// Model hyperparameters
    pub fn config(&self) -> &DcganConfig {
        &self.config
    }

    /// Whether `build` has been called
    pub fn is_built(&self) -> bool {
        self.networks.is_some()
    }

    /// Device both networks live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Image shape the networks were built for
    pub fn image_shape(&self) -> Option<ImageShape> {
        self.networks.as_ref().map(|(_, _, shape)| *shape)
    }

    /// Built generator and discriminator
    pub fn networks(&self) -> Result<(&Generator, &Discriminator)> {
        self.networks
            .as_ref()
            .map(|(generator, discriminator, _)| (generator, discriminator))
            .ok_or_else(|| Error::precondition("DCGAN is not built; call build first"))
    }

    /// Build both networks for `shape`, restoring any configured checkpoints
    #[instrument(skip(self))]
    pub fn build(&mut self, shape: ImageShape) -> Result<()> {
        shape.validate()?;
        shape.require_divisible_by_four("DCGAN")?;
        let mut generator = Generator::new(&self.config, shape, &self.device)?;
        let mut discriminator = Discriminator::new(&self.config, shape, &self.device)?;
        if let Some(path) = &self.config.gen_path {
            generator.restore(path)?;
            info!("Restored generator from {}", path.display());
        }
        if let Some(path) = &self.config.disc_path {
            discriminator.restore(path)?;
            info!("Restored discriminator from {}", path.display());
        }
        self.networks = Some((generator, discriminator, shape));
        Ok(())
    }

    /// Build for the image shape of the source's first batch
    pub fn build_from_source(&mut self, source: &mut dyn BatchSource) -> Result<ImageShape> {
        let shape = infer_image_shape(source)?;
        self.build(shape)?;
        Ok(shape)
    }

    /// Train with [`GanTrainer`]
    pub fn fit(&self, source: &mut dyn BatchSource, options: &GanFitOptions) -> Result<TrainingHistory> {
        GanTrainer::new(self, options.clone())?.fit(source)
    }

    /// Generate `n` images from fresh noise, optionally writing them
    pub fn generate_samples(&self, n: usize, save_dir: Option<&Path>) -> Result<Vec<Tensor>> {
        let mut noise = NoiseSource::from_entropy(&self.device);
        self.generate_samples_with(n, save_dir, &mut noise)
    }

    /// Generate `n` `[C, H, W]` images in `(-1, 1)` from `noise`
    pub fn generate_samples_with(
        &self,
        n: usize,
        save_dir: Option<&Path>,
        noise: &mut NoiseSource,
    ) -> Result<Vec<Tensor>> {
        let (generator, _) = self.networks()?;
        if let Some(dir) = save_dir {
            require_dir(dir)?;
        }
        if n == 0 {
            return Ok(Vec::new());
        }
        let z = noise.sample((n, generator.noise_dim()))?;
        let samples = split_batch(&generator.forward(&z)?.detach())?;
        if let Some(dir) = save_dir {
            save_samples(&samples, dir, PixelRange::Symmetric)?;
        }
        Ok(samples)
    }

    /// Save both networks under `dir`
    pub fn save_checkpoint<P: AsRef<Path>>(&self, dir: P) -> Result<(PathBuf, PathBuf)> {
        let (generator, discriminator) = self.networks()?;
        let dir = dir.as_ref();
        let gen = save_checkpoint(generator.var_map(), dir, CheckpointKind::Generator)?;
        let disc = save_checkpoint(discriminator.var_map(), dir, CheckpointKind::Discriminator)?;
        Ok((gen, disc))
    }
}
