//! End-to-end tests: image folder to trained model to sample files

use std::path::Path;

use image::{GrayImage, Luma};

use crate::config::{DataConfig, ModelSpec, RunConfig};
use crate::error::{Error, Result};
use crate::models::ImageShape;
use crate::sampling::{get_samples, PixelRange};
use crate::training::data::{DataLoaderConfig, ImageFolder};
use crate::{generate_from_checkpoint, run_training};

use super::test_utils::{
    built_autoencoder, built_dcgan, create_temp_dir, create_test_device, image_batches,
    quiet_fit, quiet_gan_fit, tiny_autoencoder_config, tiny_dcgan_config, tiny_vae_config,
    TEST_SHAPE,
};

fn write_gradients(dir: &Path, count: u8) -> Result<()> {
    for i in 0..count {
        let img = GrayImage::from_fn(12, 12, |x, y| Luma([(x * 20 + y * 2) as u8 + i]));
        img.save(dir.join(format!("digit_{}.png", i)))?;
    }
    Ok(())
}

fn sample_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<Vec<_>>>()?;
    names.sort();
    Ok(names)
}

#[test]
fn test_autoencoder_generates_requested_samples() -> Result<()> {
    let out = create_temp_dir()?;
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let mut source = image_batches(3, 2, TEST_SHAPE)?;

    let samples = model.generate_samples(&mut source, 5, Some(out.path()))?;
    assert_eq!(samples.len(), 5);
    assert!(samples.iter().all(|s| s.dims() == [1, 8, 8]));
    assert_eq!(
        sample_files(out.path())?,
        (0..5).map(|i| format!("sample_{}.jpg", i)).collect::<Vec<_>>()
    );
    Ok(())
}

#[test]
fn test_sampling_stops_at_source_size() -> Result<()> {
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let samples = model.generate_samples(&mut image_batches(1, 3, TEST_SHAPE)?, 10, None)?;
    assert_eq!(samples.len(), 3);
    assert!(model.generate_samples(&mut image_batches(1, 3, TEST_SHAPE)?, 0, None)?.is_empty());
    Ok(())
}

#[test]
fn test_dcgan_samples_written_in_order() -> Result<()> {
    let out = create_temp_dir()?;
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    model.fit(&mut image_batches(2, 2, TEST_SHAPE)?, &quiet_gan_fit(1))?;

    let samples = model.generate_samples(5, Some(out.path()))?;
    assert_eq!(samples.len(), 5);
    assert_eq!(sample_files(out.path())?.len(), 5);
    assert!(out.path().join("sample_4.jpg").is_file());
    Ok(())
}

#[test]
fn test_sampling_into_missing_dir_fails() -> Result<()> {
    let out = create_temp_dir()?;
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let err = model.generate_samples(2, Some(&out.path().join("missing"))).unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

#[test]
fn test_image_folder_training() -> Result<()> {
    let data = create_temp_dir()?;
    write_gradients(data.path(), 4)?;

    let folder = ImageFolder::new(data.path(), TEST_SHAPE, PixelRange::UnitInterval)?;
    let mut dataset = folder.load(DataLoaderConfig::with_batch_size(2), &create_test_device())?;
    let mut model = crate::models::Vae::new(tiny_vae_config())?;
    assert_eq!(model.build_from_source(&mut dataset)?, TEST_SHAPE);

    let history = model.fit(&mut dataset, &quiet_fit(2))?;
    assert_eq!(history.total_steps, 4);
    assert!(history.series("loss").iter().all(|loss| loss.is_finite()));

    let raw = get_samples(&mut dataset, 2, None, PixelRange::UnitInterval)?;
    assert_eq!(raw.len(), 2);
    Ok(())
}

#[test]
fn test_run_config_pipeline() -> Result<()> {
    let data = create_temp_dir()?;
    let out = create_temp_dir()?;
    write_gradients(data.path(), 4)?;

    let mut fit = quiet_gan_fit(1);
    fit.checkpoint_dir = Some(out.path().to_path_buf());
    let run = RunConfig {
        model: ModelSpec::Dcgan {
            config: tiny_dcgan_config(),
            fit,
        },
        data: DataConfig {
            dir: data.path().to_path_buf(),
            height: 8,
            width: 8,
            channels: 1,
            batch_size: 2,
            shuffle: true,
            seed: Some(3),
        },
        samples: 3,
        sample_dir: Some(out.path().join("samples")),
    };

    let report = run_training(&run, &create_test_device())?;
    assert_eq!(report.model, "dcgan");
    assert_eq!(report.history.total_steps, 2);
    assert_eq!(report.samples_written, 3);
    assert!(out.path().join("samples").join("sample_2.jpg").is_file());

    let again = create_temp_dir()?;
    let written = generate_from_checkpoint(
        &tiny_dcgan_config(),
        &out.path().join("generator_checkpoint"),
        ImageShape::new(8, 8, 1),
        4,
        again.path(),
        Some(9),
        &create_test_device(),
    )?;
    assert_eq!(written, 4);
    assert_eq!(sample_files(again.path())?.len(), 4);
    Ok(())
}

#[test]
fn test_empty_image_folder() -> Result<()> {
    let data = create_temp_dir()?;
    std::fs::write(data.path().join("readme.txt"), "no images here")?;
    let folder = ImageFolder::new(data.path(), TEST_SHAPE, PixelRange::Symmetric)?;
    let err = folder
        .load(DataLoaderConfig::default(), &create_test_device())
        .unwrap_err();
    assert!(matches!(err, Error::Data(_)));
    Ok(())
}
