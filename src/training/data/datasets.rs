//! In-memory batch sources

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::BatchSource;
use crate::error::{Error, Result};

/// Batching options for [`TensorDataset`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLoaderConfig {
    /// Samples per batch
    pub batch_size: usize,
    /// Whether to shuffle before every pass
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
    /// Shuffle seed; OS-seeded when absent
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            seed: None,
        }
    }
}

impl DataLoaderConfig {
    /// Default options with the given batch size
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be > 0"));
        }
        Ok(())
    }
}

/// A `[N, C, H, W]` tensor served as shuffled batches
#[derive(Debug)]
pub struct TensorDataset {
    data: Tensor,
    config: DataLoaderConfig,
    rng: StdRng,
}

impl TensorDataset {
    /// Wrap a `[N, C, H, W]` tensor
    pub fn new(data: Tensor, config: DataLoaderConfig) -> Result<Self> {
        config.validate()?;
        if data.rank() != 4 {
            return Err(Error::data(format!(
                "Expected a [samples, channels, height, width] tensor, got shape {:?}",
                data.dims()
            )));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Ok(Self { data, config, rng })
    }

    /// Build from flat per-sample CHW values
    pub fn from_samples(
        samples: Vec<Vec<f32>>,
        dims: (usize, usize, usize),
        config: DataLoaderConfig,
        device: &Device,
    ) -> Result<Self> {
        let (channels, height, width) = dims;
        let count = samples.len();
        let per_sample = channels * height * width;
        if let Some(bad) = samples.iter().position(|s| s.len() != per_sample) {
            return Err(Error::data(format!(
                "Sample {} has {} values, expected {}",
                bad,
                samples[bad].len(),
                per_sample
            )));
        }
        let flat: Vec<f32> = samples.into_iter().flatten().collect();
        let data = Tensor::from_vec(flat, (count, channels, height, width), device)?;
        Self::new(data, config)
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.data.dims()[0]
    }

    /// Whether the dataset has no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying data tensor
    pub fn data(&self) -> &Tensor {
        &self.data
    }

    /// Batching options
    pub fn config(&self) -> &DataLoaderConfig {
        &self.config
    }

    fn create_batches(&self, indices: Vec<u32>) -> Vec<Vec<u32>> {
        indices
            .chunks(self.config.batch_size)
            .filter(|chunk| !self.config.drop_last || chunk.len() == self.config.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }
}

impl BatchSource for TensorDataset {
    fn batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<Tensor>> + '_>> {
        let mut indices: Vec<u32> = (0..self.len() as u32).collect();
        if self.config.shuffle {
            indices.shuffle(&mut self.rng);
            debug!("Shuffled {} indices", indices.len());
        }
        let batches = self.create_batches(indices);
        let data = &self.data;
        Ok(Box::new(batches.into_iter().map(move |batch| {
            let len = batch.len();
            let index = Tensor::from_vec(batch, len, data.device())?;
            Ok(data.index_select(&index, 0)?)
        })))
    }

    fn num_batches(&self) -> Option<usize> {
        let size = self.len();
        let batch_size = self.config.batch_size;
        Some(if self.config.drop_last {
            size / batch_size
        } else {
            size.div_ceil(batch_size)
        })
    }
}

/// Pre-batched tensors served in order
pub struct BatchList {
    batches: Vec<Tensor>,
    report_len: bool,
}

impl BatchList {
    /// Serve `batches` in order, reporting their count
    pub fn new(batches: Vec<Tensor>) -> Self {
        Self {
            batches,
            report_len: true,
        }
    }

    /// Serve `batches` in order without reporting how many there are
    pub fn without_len(batches: Vec<Tensor>) -> Self {
        Self {
            batches,
            report_len: false,
        }
    }
}

impl BatchSource for BatchList {
    fn batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<Tensor>> + '_>> {
        Ok(Box::new(self.batches.iter().cloned().map(Ok)))
    }

    fn num_batches(&self) -> Option<usize> {
        self.report_len.then_some(self.batches.len())
    }
}
