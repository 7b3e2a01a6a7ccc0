//! RMSprop optimizer
//!
//! `acc = rho * acc + (1 - rho) * g^2`, `w = w - lr * g / (sqrt(acc) + eps)`

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};

use super::Optimizer;
use crate::error::Result;

/// RMSprop optimizer
pub struct RmsPropOptimizer {
    params: Vec<(Var, Option<Tensor>)>,
    learning_rate: f64,
    rho: f64,
    epsilon: f64,
    step_count: u64,
}

impl RmsPropOptimizer {
    /// Create a new RMSprop optimizer
    pub fn new(vars: Vec<Var>, learning_rate: f64, rho: f64, epsilon: f64) -> Result<Self> {
        Ok(Self {
            params: vars.into_iter().map(|var| (var, None)).collect(),
            learning_rate,
            rho,
            epsilon,
            step_count: 0,
        })
    }
}

impl Optimizer for RmsPropOptimizer {
    fn name(&self) -> &str {
        "rmsprop"
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        for (var, accumulator) in self.params.iter_mut() {
            let Some(grad) = gradients.get(var.as_tensor()) else {
                continue;
            };
            let fresh = (grad.sqr()? * (1.0 - self.rho))?;
            let acc = match accumulator.as_ref() {
                Some(previous) => ((previous * self.rho)? + fresh)?,
                None => fresh,
            };
            let denom = (acc.sqrt()? + self.epsilon)?;
            let update = (grad.div(&denom)? * self.learning_rate)?;
            *accumulator = Some(acc);
            var.set(&(var.as_tensor() - update)?)?;
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
