//! Network builders and model wrappers
//!
//! Each model owns an immutable configuration, validated when the model is
//! constructed, and an optional set of built networks. Networks are built
//! explicitly with `build` (or `build_from_source`, which infers the image
//! shape from the first batch of a [`BatchSource`]); training and sampling
//! fail with a precondition error until then.
//!
//! [`BatchSource`]: crate::training::data::BatchSource

pub mod autoencoder;
pub mod dcgan;
pub mod layers;
pub mod vae;

pub use autoencoder::{ConvAutoencoder, ConvAutoencoderConfig, ConvAutoencoderNetwork};
pub use dcgan::{Dcgan, DcganConfig, Discriminator, Generator};
pub use layers::{Activation, Initializer, Regularizer};
pub use vae::{Vae, VaeConfig, VaeNetwork, VaeOutput};

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of a single image sample (channels-first in tensors)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    /// Image height in pixels
    pub height: usize,
    /// Image width in pixels
    pub width: usize,
    /// Number of channels (1 = grayscale, 3 = RGB)
    pub channels: usize,
}

impl ImageShape {
    /// Create a new image shape
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self { height, width, channels }
    }

    /// Infer the per-sample shape of a `[B, C, H, W]` batch
    pub fn from_batch(batch: &Tensor) -> Result<Self> {
        match batch.dims() {
            &[_, channels, height, width] => Ok(Self { height, width, channels }),
            dims => Err(Error::data(format!(
                "Expected a [batch, channels, height, width] tensor, got shape {:?}",
                dims
            ))),
        }
    }

    /// Number of values in one sample
    pub fn num_elements(&self) -> usize {
        self.height * self.width * self.channels
    }

    /// Per-sample dims in tensor order `(C, H, W)`
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Check that a batch matches this shape and return its batch size
    pub fn check_batch(&self, batch: &Tensor) -> Result<usize> {
        let shape = Self::from_batch(batch)?;
        if shape != *self {
            return Err(Error::data(format!(
                "Batch sample shape {:?} does not match the built image shape {:?}",
                shape, self
            )));
        }
        let batch_size = batch.dims()[0];
        if batch_size == 0 {
            return Err(Error::data("Received an empty batch"));
        }
        Ok(batch_size)
    }

    /// Validate the shape is non-degenerate
    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(Error::config("Image height and width must be > 0"));
        }
        if self.channels == 0 {
            return Err(Error::config("Image channels must be > 0"));
        }
        Ok(())
    }

    /// Require height and width divisible by 4 (two stride-2 upsampling stages)
    pub(crate) fn require_divisible_by_four(&self, model: &str) -> Result<()> {
        if self.height % 4 != 0 || self.width % 4 != 0 {
            return Err(Error::config(format!(
                "{} requires image height and width divisible by 4, got {}x{}",
                model, self.height, self.width
            )));
        }
        Ok(())
    }
}

/// Check a declared layer count against the length of its per-layer list
pub(crate) fn check_layer_count(
    layers: usize,
    list: &[usize],
    layers_name: &str,
    list_name: &str,
) -> Result<()> {
    if layers == 0 {
        return Err(Error::config(format!("{} must be > 0", layers_name)));
    }
    if list.len() != layers {
        return Err(Error::config(format!(
            "Dimension mismatch: length of {} ({}) should match {} ({})",
            list_name,
            list.len(),
            layers_name,
            layers
        )));
    }
    check_layer_widths(list, list_name)
}

/// Check a per-layer list that also defines the layer count: non-empty, no zero widths
pub(crate) fn check_layer_widths(list: &[usize], list_name: &str) -> Result<()> {
    if list.is_empty() {
        return Err(Error::config(format!("{} must not be empty", list_name)));
    }
    if list.iter().any(|&units| units == 0) {
        return Err(Error::config(format!("{} entries must be > 0", list_name)));
    }
    Ok(())
}

/// Check a convolution kernel size is odd and non-zero
pub(crate) fn check_kernel_size(kernel_size: usize) -> Result<()> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(Error::config(format!(
            "kernel_size must be a positive odd number, got {}",
            kernel_size
        )));
    }
    Ok(())
}
