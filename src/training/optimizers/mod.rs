//! Optimizers for the training loops
//!
//! Every optimizer owns the variables of exactly one network and updates
//! them from a [`GradStore`]. Gradients of variables it does not own are
//! ignored, which lets the adversarial trainer pass a shared gradient store
//! without touching the other network.

pub mod adamw;
pub mod rmsprop;
pub mod sgd;

pub use adamw::AdamWOptimizer;
pub use rmsprop::RmsPropOptimizer;
pub use sgd::SgdOptimizer;

use std::fmt;
use std::str::FromStr;

use candle_core::backprop::GradStore;
use candle_core::Var;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Trait for optimizers
pub trait Optimizer {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from the given gradients
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Number of updates applied so far
    fn step_count(&self) -> u64;

    /// Number of parameter tensors managed by this optimizer
    fn parameter_count(&self) -> usize;
}

/// Closed set of supported optimizers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam (AdamW without weight decay)
    #[default]
    Adam,
    /// Adam with decoupled weight decay
    AdamW,
    /// Stochastic gradient descent with optional momentum
    Sgd,
    /// RMSprop
    RmsProp,
}

impl OptimizerKind {
    /// Whether `beta1` applies to this optimizer
    pub fn is_adam_family(&self) -> bool {
        matches!(self, OptimizerKind::Adam | OptimizerKind::AdamW)
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::Adam => "adam",
            OptimizerKind::AdamW => "adamw",
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::RmsProp => "rmsprop",
        };
        f.write_str(name)
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            "sgd" => Ok(OptimizerKind::Sgd),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            other => Err(Error::config(format!("Unknown optimizer: {}", other))),
        }
    }
}

/// Optimizer hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Optimizer type
    pub kind: OptimizerKind,

    /// Learning rate
    pub learning_rate: f64,

    /// First-moment decay for Adam-family optimizers
    pub beta1: f64,

    /// Second-moment decay for Adam-family optimizers
    pub beta2: f64,

    /// Epsilon for numerical stability
    pub epsilon: f64,

    /// Weight decay (AdamW and SGD only)
    pub weight_decay: f64,

    /// SGD momentum
    pub momentum: f64,

    /// RMSprop discounting factor
    pub rho: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            weight_decay: 0.0,
            momentum: 0.0,
            rho: 0.9,
        }
    }
}

impl OptimizerConfig {
    /// Defaults for `kind` with the given learning rate
    pub fn new(kind: OptimizerKind, learning_rate: f64) -> Self {
        let weight_decay = if kind == OptimizerKind::AdamW { 0.01 } else { 0.0 };
        Self {
            kind,
            learning_rate,
            weight_decay,
            ..Default::default()
        }
    }

    /// Override beta1
    pub fn with_beta1(mut self, beta1: f64) -> Self {
        self.beta1 = beta1;
        self
    }

    /// Validate hyperparameters
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::config(format!(
                "Learning rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        for (name, value) in [("beta1", self.beta1), ("beta2", self.beta2), ("rho", self.rho)] {
            if !(0.0..1.0).contains(&value) {
                return Err(Error::config(format!("{} must be in [0, 1), got {}", name, value)));
            }
        }
        if self.momentum < 0.0 || self.weight_decay < 0.0 || self.epsilon <= 0.0 {
            return Err(Error::config(
                "momentum and weight_decay must be >= 0 and epsilon must be > 0",
            ));
        }
        Ok(())
    }
}

/// Create an optimizer over `vars` from configuration
pub fn create_optimizer(config: &OptimizerConfig, vars: Vec<Var>) -> Result<Box<dyn Optimizer>> {
    config.validate()?;
    let optimizer: Box<dyn Optimizer> = match config.kind {
        OptimizerKind::AdamW => Box::new(AdamWOptimizer::new(
            vars,
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.epsilon,
            config.weight_decay,
        )?),
        OptimizerKind::Adam => Box::new(AdamWOptimizer::new(
            vars,
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.epsilon,
            0.0,
        )?),
        OptimizerKind::Sgd => Box::new(SgdOptimizer::new(
            vars,
            config.learning_rate,
            config.momentum,
            config.weight_decay,
        )?),
        OptimizerKind::RmsProp => Box::new(RmsPropOptimizer::new(
            vars,
            config.learning_rate,
            config.rho,
            config.epsilon,
        )?),
    };
    Ok(optimizer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use test_case::test_case;

    /// Minimize `sum((w - 3)^2)` for a few steps and return the final value
    fn descend(config: &OptimizerConfig, steps: usize) -> Result<f32> {
        let var = Var::from_tensor(&Tensor::new(&[0.0f32], &Device::Cpu)?)?;
        let mut optimizer = create_optimizer(config, vec![var.clone()])?;
        for _ in 0..steps {
            let loss = (var.as_tensor() - 3.0)?.sqr()?.sum_all()?;
            optimizer.step(&loss.backward()?)?;
        }
        assert_eq!(optimizer.step_count(), steps as u64);
        assert_eq!(optimizer.parameter_count(), 1);
        Ok(var.as_tensor().to_vec1::<f32>()?[0])
    }

    #[test_case(OptimizerKind::Adam ; "adam")]
    #[test_case(OptimizerKind::AdamW ; "adamw")]
    #[test_case(OptimizerKind::Sgd ; "sgd")]
    #[test_case(OptimizerKind::RmsProp ; "rmsprop")]
    fn test_optimizer_reduces_loss(kind: OptimizerKind) {
        let config = OptimizerConfig::new(kind, 0.05);
        let value = descend(&config, 20).unwrap();
        assert!(value > 0.0, "{} did not move the parameter", kind);
        assert!(value <= 3.5);
    }

    #[test]
    fn test_optimizer_kind_parsing() {
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert_eq!("rmsprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert!("lbfgs".parse::<OptimizerKind>().is_err());
        assert_eq!(OptimizerKind::AdamW.to_string(), "adamw");
        assert!(OptimizerKind::Adam.is_adam_family());
        assert!(!OptimizerKind::Sgd.is_adam_family());
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-1e-3 ; "negative")]
    #[test_case(f64::NAN ; "nan")]
    fn test_invalid_learning_rate(lr: f64) {
        let config = OptimizerConfig::new(OptimizerKind::Adam, lr);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_ignores_foreign_gradients() -> Result<()> {
        let owned = Var::from_tensor(&Tensor::new(&[1.0f32], &Device::Cpu)?)?;
        let foreign = Var::from_tensor(&Tensor::new(&[1.0f32], &Device::Cpu)?)?;
        let mut optimizer =
            create_optimizer(&OptimizerConfig::new(OptimizerKind::Sgd, 0.1), vec![owned.clone()])?;

        let loss = (owned.as_tensor() * foreign.as_tensor())?.sum_all()?;
        optimizer.step(&loss.backward()?)?;

        assert_eq!(foreign.as_tensor().to_vec1::<f32>()?, vec![1.0]);
        assert!(owned.as_tensor().to_vec1::<f32>()?[0] < 1.0);
        Ok(())
    }
}
