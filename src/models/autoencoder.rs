//! Convolutional autoencoder
//!
//! Encoder: a stride-1 convolution with `enc_channels[0] / 2` filters, then
//! one convolution per `enc_channels` entry, each followed by the activation
//! and 2x2 max pooling; flattened into a sigmoid bottleneck of `interm_dim`
//! units.
//!
//! Decoder: a dense layer reshaped to `(dec_channels[0] * 2, H/4, W/4)`,
//! one transposed convolution per `dec_channels` entry (the middle one at
//! stride 2) and a final stride-2 transposed convolution back to the image
//! channels with a sigmoid output.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Conv2d, ConvTranspose2d, Linear, VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::layers::{
    conv2d_same, conv_transpose2d_same, dense, upsampling_stack, Activation, Initializer,
    Regularizer,
};
use super::{check_kernel_size, check_layer_count, ImageShape};
use crate::error::{Error, Result};
use crate::sampling::{save_samples, split_batch, take_samples, PixelRange};
use crate::training::checkpoints::{restore_checkpoint, save_checkpoint, CheckpointKind};
use crate::training::data::{infer_image_shape, BatchSource};
use crate::training::loss::{kernel_penalty, reconstruction_loss};
use crate::training::metrics::TrainingHistory;
use crate::training::noise::NoiseSource;
use crate::training::trainers::{
    FitOptions, ReconstructionLosses, ReconstructionModel, ReconstructionTrainer,
};
use crate::utils::io::require_dir;

/// Hyperparameters of [`ConvAutoencoder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvAutoencoderConfig {
    /// Number of encoder convolutions, must equal `enc_channels.len()`
    pub encoder_layers: usize,
    /// Number of decoder transposed convolutions, must equal `dec_channels.len()`
    pub decoder_layers: usize,
    /// Bottleneck width
    pub interm_dim: usize,
    /// Filters per encoder convolution
    pub enc_channels: Vec<usize>,
    /// Filters per decoder transposed convolution
    pub dec_channels: Vec<usize>,
    /// Square kernel size, must be odd
    pub kernel_size: usize,
    /// Hidden-layer activation
    pub activation: Activation,
    /// Kernel initializer
    pub kernel_initializer: Initializer,
    /// Optional kernel penalty added to the loss
    pub kernel_regularizer: Option<Regularizer>,
    /// Checkpoint restored into the network on `build`
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for ConvAutoencoderConfig {
    fn default() -> Self {
        Self {
            encoder_layers: 2,
            decoder_layers: 2,
            interm_dim: 128,
            enc_channels: vec![32, 64],
            dec_channels: vec![64, 32],
            kernel_size: 5,
            activation: Activation::Relu,
            kernel_initializer: Initializer::GlorotUniform,
            kernel_regularizer: None,
            checkpoint_path: None,
        }
    }
}

impl ConvAutoencoderConfig {
    /// Validate the hyperparameters
    pub fn validate(&self) -> Result<()> {
        check_layer_count(self.encoder_layers, &self.enc_channels, "encoder_layers", "enc_channels")?;
        check_layer_count(self.decoder_layers, &self.dec_channels, "decoder_layers", "dec_channels")?;
        check_kernel_size(self.kernel_size)?;
        if self.interm_dim == 0 {
            return Err(Error::config("interm_dim must be > 0"));
        }
        Ok(())
    }
}

/// Built encoder and decoder
pub struct ConvAutoencoderNetwork {
    var_map: VarMap,
    shape: ImageShape,
    activation: Activation,
    regularizer: Option<Regularizer>,
    encoder_convs: Vec<Conv2d>,
    bottleneck: Linear,
    decoder_input: Linear,
    decoder_input_dims: (usize, usize, usize),
    decoder_convs: Vec<ConvTranspose2d>,
    output: ConvTranspose2d,
}

impl ConvAutoencoderNetwork {
    /// Build the network for `shape` with freshly initialized weights
    pub fn new(config: &ConvAutoencoderConfig, shape: ImageShape, device: &Device) -> Result<Self> {
        config.validate()?;
        shape.validate()?;
        shape.require_divisible_by_four("Convolutional autoencoder")?;
        // one pooling per encoder convolution plus the input convolution
        let pools = config.encoder_layers + 1;
        let (enc_h, enc_w) = (shape.height >> pools, shape.width >> pools);
        if enc_h == 0 || enc_w == 0 {
            return Err(Error::config(format!(
                "Image {}x{} is too small for {} pooling stages",
                shape.height, shape.width, pools
            )));
        }

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let (k, init) = (config.kernel_size, config.kernel_initializer);

        let mut encoder_convs = Vec::with_capacity(pools);
        let first = (config.enc_channels[0] / 2).max(1);
        encoder_convs.push(conv2d_same(shape.channels, first, k, 1, init, vb.pp("encoder.conv0"))?);
        let mut in_channels = first;
        for (i, &out) in config.enc_channels.iter().enumerate() {
            let name = format!("encoder.conv{}", i + 1);
            encoder_convs.push(conv2d_same(in_channels, out, k, 1, init, vb.pp(name))?);
            in_channels = out;
        }
        let bottleneck = dense(
            in_channels * enc_h * enc_w,
            config.interm_dim,
            init,
            vb.pp("encoder.bottleneck"),
        )?;

        let decoder_input_dims = (config.dec_channels[0] * 2, shape.height / 4, shape.width / 4);
        let (c0, h0, w0) = decoder_input_dims;
        let decoder_input = dense(config.interm_dim, c0 * h0 * w0, init, vb.pp("decoder.dense"))?;
        let mut decoder_convs = Vec::with_capacity(config.decoder_layers);
        let mut in_channels = c0;
        for (i, (out, stride)) in upsampling_stack(&config.dec_channels).into_iter().enumerate() {
            let name = format!("decoder.deconv{}", i);
            decoder_convs.push(conv_transpose2d_same(in_channels, out, k, stride, true, init, vb.pp(name))?);
            in_channels = out;
        }
        let output = conv_transpose2d_same(in_channels, shape.channels, k, 2, true, init, vb.pp("decoder.output"))?;

        Ok(Self {
            var_map,
            shape,
            activation: config.activation,
            regularizer: config.kernel_regularizer,
            encoder_convs,
            bottleneck,
            decoder_input,
            decoder_input_dims,
            decoder_convs,
            output,
        })
    }

    /// Map a `[B, C, H, W]` batch to `[B, interm_dim]` codes in `(0, 1)`
    pub fn encode(&self, xs: &Tensor) -> Result<Tensor> {
        let mut xs = xs.clone();
        for conv in &self.encoder_convs {
            xs = self.activation.apply(&conv.forward(&xs)?)?.max_pool2d(2)?;
        }
        let codes = self.bottleneck.forward(&xs.flatten_from(1)?)?;
        Ok(candle_nn::ops::sigmoid(&codes)?)
    }

    /// Map `[B, interm_dim]` codes back to `[B, C, H, W]` images in `(0, 1)`
    pub fn decode(&self, codes: &Tensor) -> Result<Tensor> {
        let batch_size = codes.dims()[0];
        let (c, h, w) = self.decoder_input_dims;
        let mut xs = self
            .activation
            .apply(&self.decoder_input.forward(codes)?)?
            .reshape((batch_size, c, h, w))?;
        for deconv in &self.decoder_convs {
            xs = self.activation.apply(&deconv.forward(&xs)?)?;
        }
        Ok(candle_nn::ops::sigmoid(&self.output.forward(&xs)?)?)
    }

    /// Encode then decode
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.decode(&self.encode(xs)?)
    }

    /// Kernel penalty of all layers, `None` without a regularizer
    pub fn regularization(&self) -> Result<Option<Tensor>> {
        let Some(regularizer) = &self.regularizer else {
            return Ok(None);
        };
        let mut kernels: Vec<Tensor> = self
            .encoder_convs
            .iter()
            .map(|conv| conv.weight().clone())
            .collect();
        kernels.push(self.bottleneck.weight().clone());
        kernels.push(self.decoder_input.weight().clone());
        kernels.extend(self.decoder_convs.iter().map(|deconv| deconv.weight().clone()));
        kernels.push(self.output.weight().clone());
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

/// Convolutional autoencoder model
pub struct ConvAutoencoder {
    config: ConvAutoencoderConfig,
    device: Device,
    network: Option<ConvAutoencoderNetwork>,
}

impl ConvAutoencoder {
    /// Create an unbuilt model on the CPU
    pub fn new(config: ConvAutoencoderConfig) -> Result<Self> {
        Self::with_device(config, Device::Cpu)
    }

    /// Create an unbuilt model on `device`
    pub fn with_device(config: ConvAutoencoderConfig, device: Device) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            device,
            network: None,
        })
    }

    /// Model hyperparameters
    pub fn config(&self) -> &ConvAutoencoderConfig {
        &self.config
    }

    /// Whether `build` has been called
    pub fn is_built(&self) -> bool {
        self.network.is_some()
    }

    /// Built network
    pub fn network(&self) -> Result<&ConvAutoencoderNetwork> {
        self.network.as_ref().ok_or_else(|| {
            Error::precondition("Convolutional autoencoder is not built; call build first")
        })
    }

    /// Build the network for `shape`, restoring the configured checkpoint
    #[instrument(skip(self))]
    pub fn build(&mut self, shape: ImageShape) -> Result<()> {
        let mut network = ConvAutoencoderNetwork::new(&self.config, shape, &self.device)?;
        if let Some(path) = &self.config.checkpoint_path {
            network.restore(path)?;
            info!("Restored convolutional autoencoder from {}", path.display());
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

    /// Reconstruct a `[B, C, H, W]` batch
    pub fn reconstruct(&self, batch: &Tensor) -> Result<Tensor> {
        let network = self.network()?;
        network.shape().check_batch(batch)?;
        Ok(network.forward(batch)?.detach())
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

    /// Save the network to `{dir}/convolutional_autoencoder_checkpoint`
    pub fn save_checkpoint<P: AsRef<Path> + std::fmt::Debug>(&self, dir: P) -> Result<PathBuf> {
        save_checkpoint(self.network()?.var_map(), dir, CheckpointKind::ConvolutionalAutoencoder)
    }
}

impl ReconstructionModel for ConvAutoencoder {
    fn model_name(&self) -> &'static str {
        "convolutional autoencoder"
    }

    fn checkpoint_kind(&self) -> CheckpointKind {
        CheckpointKind::ConvolutionalAutoencoder
    }

    fn loss_terms(&self) -> Vec<&'static str> {
        let mut terms = vec!["reconstruction_loss"];
        if self.config.kernel_regularizer.is_some() {
            terms.push("regularization_loss");
        }
        terms
    }

    fn image_shape(&self) -> Option<ImageShape> {
        self.network.as_ref().map(ConvAutoencoderNetwork::shape)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn var_map(&self) -> Result<&VarMap> {
        Ok(self.network()?.var_map())
    }

    fn training_losses(&self, batch: &Tensor, _noise: &mut NoiseSource) -> Result<ReconstructionLosses> {
        let network = self.network()?;
        let reconstruction = reconstruction_loss(batch, &network.forward(batch)?)?;
        let mut total = reconstruction.clone();
        let mut terms = vec![("reconstruction_loss", reconstruction)];
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
    use crate::training::data::BatchList;
    use test_case::test_case;

    fn small_config() -> ConvAutoencoderConfig {
        ConvAutoencoderConfig {
            interm_dim: 8,
            enc_channels: vec![4, 8],
            dec_channels: vec![8, 4],
            kernel_size: 3,
            ..Default::default()
        }
    }

    #[test_case(3, 2 ; "too many encoder layers")]
    #[test_case(1, 2 ; "too few encoder layers")]
    fn test_layer_count_mismatch(encoder_layers: usize, decoder_layers: usize) {
        let config = ConvAutoencoderConfig {
            encoder_layers,
            decoder_layers,
            ..Default::default()
        };
        assert!(matches!(ConvAutoencoder::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_even_kernel_rejected() {
        let config = ConvAutoencoderConfig {
            kernel_size: 4,
            ..Default::default()
        };
        assert!(matches!(ConvAutoencoder::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let mut model = ConvAutoencoder::new(small_config())?;
        assert!(!model.is_built());
        model.build(ImageShape::new(16, 16, 1))?;
        assert!(model.is_built());

        let batch = Tensor::rand(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu)?;
        let network = model.network()?;
        assert_eq!(network.encode(&batch)?.dims(), &[2, 8]);
        let output = model.reconstruct(&batch)?;
        assert_eq!(output.dims(), &[2, 1, 16, 16]);
        let min = output.min_all()?.to_scalar::<f32>()?;
        let max = output.max_all()?.to_scalar::<f32>()?;
        assert!(min >= 0.0 && max <= 1.0);
        Ok(())
    }

    #[test]
    fn test_image_too_small_for_pooling() {
        let mut model = ConvAutoencoder::new(small_config()).unwrap();
        assert!(matches!(
            model.build(ImageShape::new(4, 4, 1)),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_unbuilt_model_fails_fast() -> Result<()> {
        let model = ConvAutoencoder::new(small_config())?;
        let batch = Tensor::zeros((1, 1, 16, 16), DType::F32, &Device::Cpu)?;
        let mut source = BatchList::new(vec![batch]);
        assert!(matches!(
            model.fit(&mut source, &FitOptions::with_epochs(1)),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            model.generate_samples(&mut source, 1, None),
            Err(Error::Precondition(_))
        ));
        Ok(())
    }

    #[test]
    fn test_regularization_term_reported() -> Result<()> {
        let config = ConvAutoencoderConfig {
            kernel_regularizer: Some(Regularizer::L2(1e-3)),
            ..small_config()
        };
        let mut model = ConvAutoencoder::new(config)?;
        model.build(ImageShape::new(16, 16, 1))?;
        assert_eq!(model.loss_terms(), vec!["reconstruction_loss", "regularization_loss"]);

        let batch = Tensor::rand(0f32, 1f32, (2, 1, 16, 16), &Device::Cpu)?;
        let mut noise = NoiseSource::seeded(0, &Device::Cpu);
        let losses = model.training_losses(&batch, &mut noise)?;
        let total = crate::training::loss::scalar(&losses.total)?;
        let parts: f64 = losses
            .terms
            .iter()
            .map(|(_, t)| crate::training::loss::scalar(t).unwrap())
            .sum();
        assert!((total - parts).abs() < 1e-6);
        Ok(())
    }
}
