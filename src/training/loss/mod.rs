//! Loss functions for the generative models
//!
//! All functions are pure: they take tensors produced by a forward pass and
//! return a scalar (rank-0) loss tensor that stays attached to the graph, so
//! the trainers can call `backward` on it directly.
//!
//! - **Reconstruction**: mean squared error and the closed-form VAE KL term
//! - **Adversarial**: sigmoid cross-entropy on logits and the paired
//!   generator/discriminator losses
//! - **Regularization**: L1/L2 kernel penalties
//!
//! ```rust,ignore
//! use simplegen::training::loss::{discriminator_loss, generator_loss};
//!
//! let d_loss = discriminator_loss(&real_logits, &fake_logits)?;
//! let g_loss = generator_loss(&fake_logits)?;
//! ```

pub mod adversarial;
pub mod reconstruction;
pub mod regularization;

pub use adversarial::{discriminator_loss, generator_loss, sigmoid_cross_entropy_with_logits};
pub use reconstruction::{kl_divergence, reconstruction_loss};
pub use regularization::kernel_penalty;

use candle_core::Tensor;

use crate::error::Result;

/// Read a scalar loss tensor as `f64`
pub fn scalar(loss: &Tensor) -> Result<f64> {
    Ok(loss.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?)
}
