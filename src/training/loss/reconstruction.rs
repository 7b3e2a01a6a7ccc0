//! Reconstruction and KL-divergence losses

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Mean squared error between an input batch and its reconstruction
///
/// Averaged over every element of every batch member. Shapes must match
/// exactly; broadcasting is not applied.
pub fn reconstruction_loss(input: &Tensor, output: &Tensor) -> Result<Tensor> {
    if input.dims() != output.dims() {
        return Err(Error::shape(format!(
            "Reconstruction shape {:?} does not match input shape {:?}",
            output.dims(),
            input.dims()
        )));
    }
    Ok((input - output)?.sqr()?.mean_all()?)
}

/// Closed-form KL divergence of `N(z_mean, exp(z_log_var))` from `N(0, 1)`
///
/// `-0.5 * mean(z_log_var - z_mean^2 - exp(z_log_var) + 1)`, averaged over
/// the latent units and the batch.
pub fn kl_divergence(z_mean: &Tensor, z_log_var: &Tensor) -> Result<Tensor> {
    if z_mean.dims() != z_log_var.dims() {
        return Err(Error::shape(format!(
            "z_mean shape {:?} does not match z_log_var shape {:?}",
            z_mean.dims(),
            z_log_var.dims()
        )));
    }
    let inner = ((z_log_var - z_mean.sqr()?)? - z_log_var.exp()?)?;
    Ok(((inner + 1.0)?.mean_all()? * -0.5)?)
}
