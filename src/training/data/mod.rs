//! Batch sources for training and sampling
//!
//! A [`BatchSource`] yields `[B, C, H, W]` image batches. Each call to
//! [`BatchSource::batches`] starts a new pass over the data, which is how
//! the training loops restart it every epoch.

pub mod datasets;
pub mod images;

pub use datasets::{BatchList, DataLoaderConfig, TensorDataset};
pub use images::ImageFolder;

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::models::ImageShape;

/// Lazy, restartable sequence of image batches
pub trait BatchSource {
    /// Start a new pass over the data
    fn batches(&mut self) -> Result<Box<dyn Iterator<Item = Result<Tensor>> + '_>>;

    /// Batches per pass, `None` when unknown
    fn num_batches(&self) -> Option<usize>;
}

/// Infer the per-sample image shape from the first batch of a source
pub fn infer_image_shape(source: &mut dyn BatchSource) -> Result<ImageShape> {
    match source.batches()?.next() {
        Some(batch) => ImageShape::from_batch(&batch?),
        None => Err(Error::data("Batch source yielded no batches")),
    }
}
