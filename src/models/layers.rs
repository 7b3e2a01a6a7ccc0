//! Layer helpers shared by the network builders
//!
//! Activations, kernel initializers and kernel regularizers are closed
//! enumerations so that configuration files are checked at parse time.
//! Convolutions use "same" padding: a stride-1 convolution preserves the
//! spatial size, a stride-2 one halves it (rounding up) and a stride-2
//! transposed convolution doubles it.

use candle_core::{Result, Tensor};
use candle_nn::{
    Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, Init, Linear, VarBuilder,
};
use serde::{Deserialize, Serialize};

use crate::utils::math;

/// Negative slope used by leaky ReLU layers
pub const LEAKY_RELU_SLOPE: f64 = 0.3;

/// Non-linearity applied after hidden layers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Rectified linear unit
    #[default]
    Relu,
    /// Leaky ReLU with slope [`LEAKY_RELU_SLOPE`]
    LeakyRelu,
    /// Exponential linear unit
    Elu,
    /// GELU activation
    Gelu,
    /// Hyperbolic tangent
    Tanh,
    /// Logistic sigmoid
    Sigmoid,
    /// Identity
    Linear,
}

impl Activation {
    /// Apply the activation to a tensor
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Relu => xs.relu(),
            Activation::LeakyRelu => candle_nn::ops::leaky_relu(xs, LEAKY_RELU_SLOPE),
            Activation::Elu => xs.elu(1.0),
            Activation::Gelu => xs.gelu(),
            Activation::Tanh => xs.tanh(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs),
            Activation::Linear => Ok(xs.clone()),
        }
    }
}

/// Kernel weight initialization scheme
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Xavier/Glorot uniform
    #[default]
    GlorotUniform,
    /// Xavier/Glorot normal
    GlorotNormal,
    /// He/Kaiming uniform
    HeUniform,
    /// He/Kaiming normal
    HeNormal,
}

impl Initializer {
    /// Resolve to a candle initializer for the given fan-in and fan-out
    pub fn init(&self, fan_in: usize, fan_out: usize) -> Init {
        match self {
            Initializer::GlorotUniform => {
                let bound = math::xavier_bound(fan_in, fan_out);
                Init::Uniform { lo: -bound, up: bound }
            }
            Initializer::GlorotNormal => Init::Randn {
                mean: 0.0,
                stdev: math::xavier_std(fan_in, fan_out),
            },
            Initializer::HeUniform => {
                let bound = math::he_bound(fan_in);
                Init::Uniform { lo: -bound, up: bound }
            }
            Initializer::HeNormal => Init::Randn {
                mean: 0.0,
                stdev: math::he_std(fan_in),
            },
        }
    }
}

/// Penalty added to the training loss for kernel weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Regularizer {
    /// `factor * sum(|w|)`
    L1(f64),
    /// `factor * sum(w^2)`
    L2(f64),
}

impl Regularizer {
    /// Regularization factor
    pub fn factor(&self) -> f64 {
        match self {
            Regularizer::L1(factor) | Regularizer::L2(factor) => *factor,
        }
    }
}

/// Fully connected layer with a configurable kernel initializer
pub fn dense(in_dim: usize, out_dim: usize, init: Initializer, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints((out_dim, in_dim), "weight", init.init(in_dim, out_dim))?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// "Same"-padded 2D convolution
pub fn conv2d_same(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    init: Initializer,
    vb: VarBuilder,
) -> Result<Conv2d> {
    let receptive = kernel_size * kernel_size;
    let weight = vb.get_with_hints(
        (out_channels, in_channels, kernel_size, kernel_size),
        "weight",
        init.init(in_channels * receptive, out_channels * receptive),
    )?;
    let bias = vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?;
    let config = Conv2dConfig {
        padding: math::same_padding(kernel_size),
        stride,
        ..Default::default()
    };
    Ok(Conv2d::new(weight, Some(bias), config))
}

/// "Same"-padded 2D transposed convolution (stride 1 or 2)
pub fn conv_transpose2d_same(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    use_bias: bool,
    init: Initializer,
    vb: VarBuilder,
) -> Result<ConvTranspose2d> {
    let receptive = kernel_size * kernel_size;
    let weight = vb.get_with_hints(
        (in_channels, out_channels, kernel_size, kernel_size),
        "weight",
        init.init(in_channels * receptive, out_channels * receptive),
    )?;
    let bias = if use_bias {
        Some(vb.get_with_hints(out_channels, "bias", Init::Const(0.0))?)
    } else {
        None
    };
    let config = ConvTranspose2dConfig {
        padding: math::same_padding(kernel_size),
        output_padding: stride.saturating_sub(1),
        stride,
        dilation: 1,
    };
    Ok(ConvTranspose2d::new(weight, bias, config))
}

/// Output channels and stride of each layer in an upsampling stack
///
/// The first half of the layers keep the spatial size, the middle layer
/// doubles it and the remaining layers keep it again.
pub(crate) fn upsampling_stack(channels: &[usize]) -> Vec<(usize, usize)> {
    let middle = channels.len() / 2;
    channels
        .iter()
        .enumerate()
        .map(|(i, &out)| (out, if i == middle { 2 } else { 1 }))
        .collect()
}
