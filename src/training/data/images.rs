//! Loading a directory of images as a dataset
//!
//! Every decodable file in the directory is resized to the target shape,
//! converted to grayscale or RGB and scaled into the model's pixel range.
//! Files that fail to decode are skipped with a warning.

use std::path::{Path, PathBuf};

use candle_core::Device;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{info, instrument, warn};

use super::datasets::{DataLoaderConfig, TensorDataset};
use crate::error::{Error, Result};
use crate::models::ImageShape;
use crate::sampling::PixelRange;
use crate::utils::io::require_dir;

/// A directory of image files
#[derive(Debug, Clone)]
pub struct ImageFolder {
    dir: PathBuf,
    shape: ImageShape,
    range: PixelRange,
}

impl ImageFolder {
    /// Describe a folder whose images are loaded at `shape` into `range`
    pub fn new<P: AsRef<Path>>(dir: P, shape: ImageShape, range: PixelRange) -> Result<Self> {
        shape.validate()?;
        if shape.channels != 1 && shape.channels != 3 {
            return Err(Error::config(format!(
                "Image folders support 1 or 3 channels, got {}",
                shape.channels
            )));
        }
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            shape,
            range,
        })
    }

    /// Target sample shape
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Sorted list of regular files in the folder
    fn files(&self) -> Result<Vec<PathBuf>> {
        require_dir(&self.dir)?;
        let mut files = std::fs::read_dir(&self.dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        files.retain(|path| path.is_file());
        files.sort();
        Ok(files)
    }

    /// Convert one decoded image to CHW values in the target range
    fn to_chw(&self, img: DynamicImage) -> Vec<f32> {
        let (width, height) = (self.shape.width as u32, self.shape.height as u32);
        let resized = img.resize_exact(width, height, FilterType::Triangle);
        let (raw, channels) = if self.shape.channels == 1 {
            (resized.to_luma8().into_raw(), 1)
        } else {
            (resized.to_rgb8().into_raw(), 3)
        };
        let plane = self.shape.height * self.shape.width;
        let mut values = vec![0.0f32; plane * channels];
        for (i, pixel) in raw.chunks(channels).enumerate() {
            for (c, &value) in pixel.iter().enumerate() {
                values[c * plane + i] = self.range.from_u8(value);
            }
        }
        values
    }

    /// Decode every image into an in-memory dataset
    #[instrument(skip(self, config, device), fields(dir = %self.dir.display()))]
    pub fn load(&self, config: DataLoaderConfig, device: &Device) -> Result<TensorDataset> {
        let mut samples = Vec::new();
        for path in self.files()? {
            match image::open(&path) {
                Ok(img) => samples.push(self.to_chw(img)),
                Err(err) => warn!("Skipping {}: {}", path.display(), err),
            }
        }
        if samples.is_empty() {
            return Err(Error::data(format!(
                "No decodable images in {}",
                self.dir.display()
            )));
        }
        info!("Loaded {} images from {}", samples.len(), self.dir.display());
        TensorDataset::from_samples(samples, self.shape.dims(), config, device)
    }
}
