//! SGD optimizer with momentum
//!
//! Velocity form: `v = momentum * v - lr * g`, `w = w + v`. With zero
//! momentum this is plain gradient descent.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::Optimizer;
use crate::error::Result;

/// SGD optimizer with momentum
pub struct SgdOptimizer {
    /// Parameters with their velocity buffers
    params: Vec<(Var, Option<Tensor>)>,

    /// Learning rate
    learning_rate: f64,

    /// Momentum coefficient
    momentum: f64,

    /// L2 weight decay added to the gradient
    weight_decay: f64,

    /// Current step count
    step_count: u64,
}

impl SgdOptimizer {
    /// Create a new SGD optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, momentum: f64, weight_decay: f64) -> Result<Self> {
        Ok(Self {
            params: vars.into_iter().map(|var| (var, None)).collect(),
            learning_rate,
            momentum,
            weight_decay,
            step_count: 0,
        })
    }
}

impl Optimizer for SgdOptimizer {
    fn name(&self) -> &str {
        if self.momentum > 0.0 {
            "sgd_momentum"
        } else {
            "sgd"
        }
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for (var, velocity) in self.params.iter_mut() {
            let Some(grad) = gradients.get(var.as_tensor()) else {
                continue;
            };
            let grad = if self.weight_decay > 0.0 {
                (grad + (var.as_tensor() * self.weight_decay)?)?
            } else {
                grad.clone()
            };
            let scaled = (grad * self.learning_rate)?;

            let update = if self.momentum > 0.0 {
                let next = match velocity.as_ref() {
                    Some(previous) => ((previous * self.momentum)? - scaled)?,
                    None => scaled.neg()?,
                };
                *velocity = Some(next.clone());
                next
            } else {
                scaled.neg()?
            };
            var.set(&(var.as_tensor() + update)?)?;
        }
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.params.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_plain_sgd_update() -> Result<()> {
        let var = Var::from_tensor(&Tensor::new(&[2.0f32], &Device::Cpu)?)?;
        let mut sgd = SgdOptimizer::new(vec![var.clone()], 0.1, 0.0, 0.0)?;
        // d/dw w^2 = 2w = 4
        let loss = var.as_tensor().sqr()?.sum_all()?;
        sgd.step(&loss.backward()?)?;
        assert_relative_eq!(var.as_tensor().to_vec1::<f32>()?[0], 1.6, epsilon = 1e-6);
        assert_eq!(sgd.name(), "sgd");
        Ok(())
    }

    #[test]
    fn test_momentum_accumulates() -> Result<()> {
        let var = Var::from_tensor(&Tensor::new(&[0.0f32], &Device::Cpu)?)?;
        let mut sgd = SgdOptimizer::new(vec![var.clone()], 0.1, 0.9, 0.0)?;
        // constant gradient of 1
        for _ in 0..2 {
            let loss = var.as_tensor().sum_all()?;
            sgd.step(&loss.backward()?)?;
        }
        // v1 = -0.1, v2 = -0.09 - 0.1 = -0.19, w = -0.29
        assert_relative_eq!(var.as_tensor().to_vec1::<f32>()?[0], -0.29, epsilon = 1e-6);
        assert_eq!(sgd.name(), "sgd_momentum");
        Ok(())
    }
}
