//! Adam and AdamW backed by candle's fused implementation

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};

use super::Optimizer;
use crate::error::Result;

/// AdamW optimizer with decoupled weight decay (Adam when `weight_decay` is 0)
pub struct AdamWOptimizer {
    inner: AdamW,
    weight_decay: f64,
    step_count: u64,
    parameter_count: usize,
}

impl AdamWOptimizer {
    /// Create a new AdamW optimizer over `vars`
    pub fn new(
        vars: Vec<Var>,
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
        weight_decay: f64,
    ) -> Result<Self> {
        let parameter_count = vars.len();
        let params = ParamsAdamW {
            lr: learning_rate,
            beta1,
            beta2,
            eps: epsilon,
            weight_decay,
        };
        Ok(Self {
            inner: AdamW::new(vars, params)?,
            weight_decay,
            step_count: 0,
            parameter_count,
        })
    }
}

impl Optimizer for AdamWOptimizer {
    fn name(&self) -> &str {
        if self.weight_decay > 0.0 {
            "adamw"
        } else {
            "adam"
        }
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        self.inner.step(gradients)?;
        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }

    fn step_count(&self) -> u64 {
        self.step_count
    }

    fn parameter_count(&self) -> usize {
        self.parameter_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn test_adam_name_and_learning_rate() -> Result<()> {
        let var = Var::from_tensor(&Tensor::new(&[1.0f32], &Device::Cpu)?)?;
        let mut adam = AdamWOptimizer::new(vec![var.clone()], 1e-3, 0.5, 0.999, 1e-7, 0.0)?;
        assert_eq!(adam.name(), "adam");
        adam.set_learning_rate(2e-4);
        assert!((adam.learning_rate() - 2e-4).abs() < 1e-12);

        let adamw = AdamWOptimizer::new(vec![var], 1e-3, 0.9, 0.999, 1e-7, 0.01)?;
        assert_eq!(adamw.name(), "adamw");
        Ok(())
    }
}
