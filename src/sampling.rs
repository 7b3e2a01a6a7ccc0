//! Sample persistence and pixel range conversion
//!
//! Models produce samples as `[C, H, W]` tensors in the value range of
//! their output activation. This module maps them to 8-bit images and
//! writes them as `sample_{i}.jpg`, zero-based in draw order.

use std::path::{Path, PathBuf};

use candle_core::{DType, Tensor};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::training::data::BatchSource;
use crate::utils::io::require_dir;

/// Value range of image tensors
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelRange {
    /// `[0, 1]`, the autoencoders' sigmoid output and input scaling
    #[default]
    UnitInterval,
    /// `[-1, 1]`, the generator's tanh output and GAN input scaling
    Symmetric,
}

impl PixelRange {
    /// Map an 8-bit pixel value into this range
    pub fn from_u8(&self, value: u8) -> f32 {
        match self {
            PixelRange::UnitInterval => value as f32 / 255.0,
            PixelRange::Symmetric => (value as f32 - 127.5) / 127.5,
        }
    }

    /// Map a value in this range to an 8-bit pixel, clamping out-of-range input
    pub fn to_u8(&self, value: f32) -> u8 {
        let unit = match self {
            PixelRange::UnitInterval => value,
            PixelRange::Symmetric => (value + 1.0) / 2.0,
        };
        (unit.clamp(0.0, 1.0) * 255.0).round() as u8
    }
}

/// Split a `[N, C, H, W]` batch into `N` tensors of shape `[C, H, W]`
pub fn split_batch(batch: &Tensor) -> Result<Vec<Tensor>> {
    if batch.rank() != 4 {
        return Err(Error::data(format!(
            "Expected a [batch, channels, height, width] tensor, got shape {:?}",
            batch.dims()
        )));
    }
    Ok((0..batch.dims()[0])
        .map(|i| batch.get(i))
        .collect::<candle_core::Result<Vec<_>>>()?)
}

/// Convert one `[C, H, W]` sample with 1 or 3 channels into an encodable image
pub fn tensor_to_image(sample: &Tensor, range: PixelRange) -> Result<image::DynamicImage> {
    let (channels, height, width) = sample.dims3()?;
    // HWC order for the image buffer
    let values = sample
        .to_dtype(DType::F32)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let pixels: Vec<u8> = values.into_iter().map(|v| range.to_u8(v)).collect();
    let (w, h) = (width as u32, height as u32);
    let buffer_error = || Error::data("Pixel buffer does not match image dimensions");
    match channels {
        1 => Ok(GrayImage::from_raw(w, h, pixels).ok_or_else(buffer_error)?.into()),
        3 => Ok(RgbImage::from_raw(w, h, pixels).ok_or_else(buffer_error)?.into()),
        other => Err(Error::data(format!(
            "Cannot encode an image with {} channels (expected 1 or 3)",
            other
        ))),
    }
}

/// Write samples as `sample_{i}.jpg` into an existing directory
#[instrument(skip(samples), fields(count = samples.len()))]
pub fn save_samples<P: AsRef<Path> + std::fmt::Debug>(
    samples: &[Tensor],
    dir: P,
    range: PixelRange,
) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    require_dir(dir)?;
    let mut paths = Vec::with_capacity(samples.len());
    for (i, sample) in samples.iter().enumerate() {
        let path = dir.join(format!("sample_{}.jpg", i));
        tensor_to_image(sample, range)?.save(&path)?;
        paths.push(path);
    }
    debug!("Wrote {} samples to {}", paths.len(), dir.display());
    Ok(paths)
}

/// Take up to `n` raw samples from a batch source, in draw order
pub fn take_samples(source: &mut dyn BatchSource, n: usize) -> Result<Vec<Tensor>> {
    let mut samples = Vec::with_capacity(n);
    if n == 0 {
        return Ok(samples);
    }
    for batch in source.batches()? {
        for sample in split_batch(&batch?)? {
            samples.push(sample);
            if samples.len() == n {
                return Ok(samples);
            }
        }
    }
    if samples.is_empty() {
        return Err(Error::data("Batch source yielded no samples"));
    }
    Ok(samples)
}

/// Take up to `n` raw samples and optionally write them to `save_dir`
pub fn get_samples(
    source: &mut dyn BatchSource,
    n: usize,
    save_dir: Option<&Path>,
    range: PixelRange,
) -> Result<Vec<Tensor>> {
    if let Some(dir) = save_dir {
        require_dir(dir)?;
    }
    let samples = take_samples(source, n)?;
    if let Some(dir) = save_dir {
        save_samples(&samples, dir, range)?;
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::BatchList;
    use candle_core::Device;

    #[test]
    fn test_pixel_range_mapping() {
        assert_eq!(PixelRange::Symmetric.to_u8(-1.0), 0);
        assert_eq!(PixelRange::Symmetric.to_u8(1.0), 255);
        assert_eq!(PixelRange::UnitInterval.to_u8(0.5), 128);
        assert_eq!(PixelRange::UnitInterval.to_u8(7.0), 255);
        assert!((PixelRange::Symmetric.from_u8(0) + 1.0).abs() < 1e-6);
        assert_eq!(PixelRange::UnitInterval.from_u8(255), 1.0);
    }

    #[test]
    fn test_save_samples_writes_numbered_files() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let batch = Tensor::zeros((3, 3, 4, 4), DType::F32, &Device::Cpu)?;
        let samples = split_batch(&batch)?;
        let paths = save_samples(&samples, temp_dir.path(), PixelRange::Symmetric)?;
        assert_eq!(paths.len(), 3);
        for i in 0..3 {
            assert!(temp_dir.path().join(format!("sample_{}.jpg", i)).is_file());
        }
        Ok(())
    }

    #[test]
    fn test_save_samples_requires_existing_dir() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let sample = Tensor::zeros((1, 4, 4), DType::F32, &Device::Cpu)?;
        let err = save_samples(&[sample], temp_dir.path().join("missing"), PixelRange::UnitInterval)
            .unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn test_unsupported_channel_count() -> Result<()> {
        let sample = Tensor::zeros((2, 4, 4), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            tensor_to_image(&sample, PixelRange::UnitInterval),
            Err(Error::Data(_))
        ));
        Ok(())
    }

    #[test]
    fn test_take_samples_spans_batches() -> Result<()> {
        let device = Device::Cpu;
        let batches = vec![
            Tensor::zeros((2, 1, 4, 4), DType::F32, &device)?,
            Tensor::ones((2, 1, 4, 4), DType::F32, &device)?,
        ];
        let mut source = BatchList::new(batches);
        let samples = take_samples(&mut source, 3)?;
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].dims(), &[1, 4, 4]);
        assert_eq!(samples[2].flatten_all()?.to_vec1::<f32>()?[0], 1.0);

        // asking for more than available returns what exists
        assert_eq!(take_samples(&mut source, 10)?.len(), 4);
        Ok(())
    }
}
