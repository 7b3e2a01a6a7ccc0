//! Adversarial losses on raw discriminator logits

use candle_core::Tensor;

use crate::error::Result;

/// Numerically stable sigmoid cross-entropy, mean-reduced
///
/// `max(x, 0) - x * z + log(1 + exp(-|x|))` for logits `x` and labels `z`.
pub fn sigmoid_cross_entropy_with_logits(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let positive = logits.relu()?;
    let log_term = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
    let per_element = ((positive - (logits * labels)?)? + log_term)?;
    Ok(per_element.mean_all()?)
}

/// Discriminator loss: `bce(real, 1) + bce(fake, 0)`
pub fn discriminator_loss(real_logits: &Tensor, fake_logits: &Tensor) -> Result<Tensor> {
    let real = sigmoid_cross_entropy_with_logits(real_logits, &real_logits.ones_like()?)?;
    let fake = sigmoid_cross_entropy_with_logits(fake_logits, &fake_logits.zeros_like()?)?;
    Ok((real + fake)?)
}

/// Generator loss: `bce(fake, 1)`
pub fn generator_loss(fake_logits: &Tensor) -> Result<Tensor> {
    sigmoid_cross_entropy_with_logits(fake_logits, &fake_logits.ones_like()?)
}
