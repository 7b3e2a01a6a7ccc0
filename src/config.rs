//! Run configuration for the `simplegen` binary
//!
//! A run file (JSON or YAML, chosen by extension) selects one model with its
//! hyperparameters and fit options, the image folder to train on and how many
//! samples to write afterwards. Any key can be overridden from the
//! environment with the `SIMPLEGEN__` prefix and `__` as the nesting
//! separator, e.g. `SIMPLEGEN__MODEL__FIT__EPOCHS=5`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ConvAutoencoderConfig, DcganConfig, ImageShape, VaeConfig};
use crate::sampling::PixelRange;
use crate::training::data::DataLoaderConfig;
use crate::training::trainers::{FitOptions, GanFitOptions};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SIMPLEGEN";

/// Model selection with its hyperparameters and fit options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    /// Convolutional autoencoder
    Autoencoder {
        /// Network hyperparameters
        #[serde(default)]
        config: ConvAutoencoderConfig,
        /// Training options
        #[serde(default)]
        fit: FitOptions,
    },
    /// Variational autoencoder
    Vae {
        /// Network hyperparameters
        #[serde(default)]
        config: VaeConfig,
        /// Training options
        #[serde(default)]
        fit: FitOptions,
    },
    /// Deep convolutional GAN
    Dcgan {
        /// Network hyperparameters
        #[serde(default)]
        config: DcganConfig,
        /// Training options
        #[serde(default)]
        fit: GanFitOptions,
    },
}

impl ModelSpec {
    /// Short model name
    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::Autoencoder { .. } => "autoencoder",
            ModelSpec::Vae { .. } => "vae",
            ModelSpec::Dcgan { .. } => "dcgan",
        }
    }

    /// Pixel range the model trains and samples in
    pub fn pixel_range(&self) -> PixelRange {
        match self {
            ModelSpec::Dcgan { .. } => PixelRange::Symmetric,
            _ => PixelRange::UnitInterval,
        }
    }

    /// Validate hyperparameters and fit options
    pub fn validate(&self) -> Result<()> {
        match self {
            ModelSpec::Autoencoder { config, fit } => {
                config.validate()?;
                fit.validate()
            }
            ModelSpec::Vae { config, fit } => {
                config.validate()?;
                fit.validate()
            }
            ModelSpec::Dcgan { config, fit } => {
                config.validate()?;
                fit.validate()
            }
        }
    }
}

/// Image folder and batching options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of training images
    pub dir: PathBuf,
    /// Target height
    pub height: usize,
    /// Target width
    pub width: usize,
    /// 1 for grayscale, 3 for RGB
    pub channels: usize,
    /// Samples per batch
    pub batch_size: usize,
    /// Shuffle before every epoch
    pub shuffle: bool,
    /// Shuffle seed
    pub seed: Option<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            height: 28,
            width: 28,
            channels: 1,
            batch_size: 32,
            shuffle: true,
            seed: None,
        }
    }
}

impl DataConfig {
    /// Per-sample image shape
    pub fn image_shape(&self) -> ImageShape {
        ImageShape::new(self.height, self.width, self.channels)
    }

    /// Batching options for the loaded dataset
    pub fn loader_config(&self) -> DataLoaderConfig {
        DataLoaderConfig {
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            drop_last: false,
            seed: self.seed,
        }
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        self.image_shape().validate()?;
        if self.channels != 1 && self.channels != 3 {
            return Err(Error::config(format!(
                "data.channels must be 1 or 3, got {}",
                self.channels
            )));
        }
        self.loader_config().validate()
    }
}

/// Complete description of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model to train
    pub model: ModelSpec,

    /// Training data
    #[serde(default)]
    pub data: DataConfig,

    /// Samples to generate after training
    #[serde(default)]
    pub samples: usize,

    /// Directory receiving the generated samples
    #[serde(default)]
    pub sample_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Load a run file, apply `SIMPLEGEN__*` overrides and validate
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::not_found(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;
        let run: Self = settings
            .try_deserialize()
            .map_err(|e| Error::config(format!("Invalid configuration {}: {}", path.display(), e)))?;
        run.validate()?;
        Ok(run)
    }

    /// Write the configuration as JSON, or YAML for `.yaml`/`.yml` paths
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)
                .map_err(|e| Error::config(format!("Failed to serialize configuration: {}", e)))?,
            _ => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.data.validate()?;
        if self.samples > 0 && self.sample_dir.is_none() {
            return Err(Error::config("sample_dir is required when samples > 0"));
        }
        Ok(())
    }
}
