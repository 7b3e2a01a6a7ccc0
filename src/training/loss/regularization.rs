//! Kernel weight penalties

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::models::Regularizer;

/// L1 or L2 penalty summed over a set of kernel tensors
///
/// `L1: factor * sum(|w|)`, `L2: factor * sum(w^2)`, summed across kernels.
/// An empty kernel list is rejected since there is no device to place a
/// zero on.
pub fn kernel_penalty(kernels: &[Tensor], regularizer: &Regularizer) -> Result<Tensor> {
    let mut terms = Vec::with_capacity(kernels.len());
    for kernel in kernels {
        let term = match regularizer {
            Regularizer::L1(_) => kernel.abs()?.sum_all()?,
            Regularizer::L2(_) => kernel.sqr()?.sum_all()?,
        };
        terms.push(term);
    }
    let total = match terms.split_first() {
        Some((first, rest)) => rest
            .iter()
            .try_fold(first.clone(), |acc, term| acc + term)?,
        None => return Err(Error::precondition("No kernels to regularize")),
    };
    Ok((total * regularizer.factor())?)
}
