//! Tests for the reconstruction and adversarial training loops

use approx::assert_relative_eq;
use mockall::Sequence;

use crate::error::{Error, Result};
use crate::models::{DcganConfig, Regularizer};
use crate::training::checkpoints::{checkpoint_path, CheckpointKind};
use crate::training::data::BatchList;
use crate::training::loss::{generator_loss, scalar};
use crate::training::metrics::{InMemorySink, MetricsSink, MockMetricsSink};
use crate::training::noise::NoiseSource;
use crate::training::optimizers::create_optimizer;
use crate::training::trainers::adversarial::{DISCRIMINATOR_LOSS, GENERATOR_LOSS};
use crate::training::trainers::reconstruction::TOTAL_LOSS;
use crate::training::trainers::{
    discriminator_step, generator_step, GanTrainer, ReconstructionTrainer, StopFlag,
};

use super::test_utils::{
    built_autoencoder, built_dcgan, built_vae, create_temp_dir, create_test_device, image_batches,
    quiet_fit, quiet_gan_fit, random_images, tiny_autoencoder_config, tiny_dcgan_config,
    tiny_vae_config, TEST_SHAPE,
};

/// Sets a stop flag once a given step has been recorded
struct StopAfter {
    flag: StopFlag,
    step: u64,
}

impl MetricsSink for StopAfter {
    fn name(&self) -> &str {
        "stop_after"
    }

    fn record(&mut self, _name: &str, _value: f64, step: u64) -> Result<()> {
        if step >= self.step {
            self.flag.stop();
        }
        Ok(())
    }
}

#[test]
fn test_reconstruction_update_count() -> Result<()> {
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let mut source = image_batches(3, 2, TEST_SHAPE)?;

    let mut trainer = ReconstructionTrainer::new(&model, quiet_fit(2))?;
    let history = trainer.fit(&mut source)?;

    assert_eq!(trainer.steps(), 6);
    assert_eq!(trainer.optimizer().step_count(), 6);
    assert_eq!(history.total_steps, 6);
    assert_eq!(history.epochs.len(), 2);
    assert!(history.epochs.iter().all(|epoch| epoch.steps == 3));
    Ok(())
}

#[test]
fn test_epoch_means_reset_every_epoch() -> Result<()> {
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let mut source = image_batches(3, 2, TEST_SHAPE)?;
    let sink = InMemorySink::new();

    let mut trainer =
        ReconstructionTrainer::new(&model, quiet_fit(2))?.with_sink(Box::new(sink.clone()));
    let history = trainer.fit(&mut source)?;

    let values = sink.values(TOTAL_LOSS);
    assert_eq!(values.len(), 6);
    for (epoch, record) in history.epochs.iter().enumerate() {
        let window = &values[epoch * 3..(epoch + 1) * 3];
        let expected = window.iter().sum::<f64>() / 3.0;
        assert_relative_eq!(record.loss(TOTAL_LOSS).unwrap(), expected, epsilon = 1e-9);
    }

    let steps: Vec<u64> = sink
        .records()
        .iter()
        .filter(|record| record.name == TOTAL_LOSS)
        .map(|record| record.step)
        .collect();
    assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);
    Ok(())
}

#[test]
fn test_regularized_autoencoder_reports_penalty() -> Result<()> {
    let config = crate::models::ConvAutoencoderConfig {
        kernel_regularizer: Some(Regularizer::L2(1e-3)),
        ..tiny_autoencoder_config()
    };
    let model = built_autoencoder(config, TEST_SHAPE)?;
    let mut trainer = ReconstructionTrainer::new(&model, quiet_fit(1))?;

    let values = trainer.train_step(&random_images(2, TEST_SHAPE)?)?;
    let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec![TOTAL_LOSS, "reconstruction_loss", "regularization_loss"]);
    assert_relative_eq!(values[0].1, values[1].1 + values[2].1, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_vae_step_total_is_reconstruction_plus_kl() -> Result<()> {
    let model = built_vae(tiny_vae_config(), TEST_SHAPE)?;
    let mut trainer = ReconstructionTrainer::new(&model, quiet_fit(1))?;

    let values = trainer.train_step(&random_images(4, TEST_SHAPE)?)?;
    let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec![TOTAL_LOSS, "reconstruction_loss", "kl_loss"]);
    assert_relative_eq!(values[0].1, values[1].1 + values[2].1, epsilon = 1e-5);
    Ok(())
}

#[test]
fn test_vae_history_has_every_term() -> Result<()> {
    let model = built_vae(tiny_vae_config(), TEST_SHAPE)?;
    let history = model.fit(&mut image_batches(2, 2, TEST_SHAPE)?, &quiet_fit(1))?;
    let last = history.last().unwrap();
    for name in [TOTAL_LOSS, "reconstruction_loss", "kl_loss"] {
        assert!(last.loss(name).is_some(), "missing {}", name);
    }
    assert_eq!(history.series("kl_loss").len(), 1);
    Ok(())
}

#[test]
fn test_gan_alternates_discriminator_then_generator() -> Result<()> {
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let mut source = image_batches(3, 2, TEST_SHAPE)?;

    let mut seq = Sequence::new();
    let mut sink = MockMetricsSink::new();
    for step in 1..=6u64 {
        sink.expect_record()
            .withf(move |name, _, s| name == DISCRIMINATOR_LOSS && *s == step)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        sink.expect_record()
            .withf(move |name, _, s| name == GENERATOR_LOSS && *s == step)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
    }
    sink.expect_flush().times(1).returning(|| Ok(()));

    let mut trainer = GanTrainer::new(&model, quiet_gan_fit(2))?.with_sink(Box::new(sink));
    let history = trainer.fit(&mut source)?;

    assert_eq!(trainer.steps(), 6);
    assert_eq!(trainer.disc_optimizer().step_count(), 6);
    assert_eq!(trainer.gen_optimizer().step_count(), 6);
    assert_eq!(history.epochs.len(), 2);
    assert!(history.last().unwrap().loss(GENERATOR_LOSS).is_some());
    assert!(history.last().unwrap().loss(DISCRIMINATOR_LOSS).is_some());
    Ok(())
}

#[test]
fn test_gan_phases_touch_only_their_network() -> Result<()> {
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let (generator, discriminator) = model.networks()?;
    let real = random_images(2, TEST_SHAPE)?.affine(2.0, -1.0)?;
    let mut noise = NoiseSource::seeded(11, &create_test_device());

    let d = discriminator_step(generator, discriminator, &real, &mut noise)?;
    for var in generator.var_map().all_vars() {
        assert!(d.grads.get(var.as_tensor()).is_none());
    }
    assert!(discriminator
        .var_map()
        .all_vars()
        .iter()
        .any(|var| d.grads.get(var.as_tensor()).is_some()));

    let g = generator_step(generator, discriminator, 2, &mut noise)?;
    for var in discriminator.var_map().all_vars() {
        assert!(g.grads.get(var.as_tensor()).is_none());
    }
    assert!(generator
        .var_map()
        .all_vars()
        .iter()
        .any(|var| g.grads.get(var.as_tensor()).is_some()));
    assert!(d.loss.is_finite() && g.loss.is_finite());
    Ok(())
}

#[test]
fn test_generator_phase_scores_with_updated_discriminator() -> Result<()> {
    // no dropout, so train-mode logits equal inference logits
    let config = DcganConfig {
        dropout_rate: 0.0,
        ..tiny_dcgan_config()
    };
    let model = built_dcgan(config, TEST_SHAPE)?;
    let (generator, discriminator) = model.networks()?;
    let device = create_test_device();
    let real = random_images(2, TEST_SHAPE)?.affine(2.0, -1.0)?;

    // replay the trainer's draws: first for phase D, second for phase G
    let mut replay = NoiseSource::seeded(13, &device);
    let z_disc = replay.sample((2, generator.noise_dim()))?;
    let z_gen = replay.sample((2, generator.noise_dim()))?;
    assert_ne!(
        z_disc.flatten_all()?.to_vec1::<f32>()?,
        z_gen.flatten_all()?.to_vec1::<f32>()?
    );
    let fake = generator.forward(&z_gen)?;
    let before = discriminator.forward_t(&fake, false)?.flatten_all()?.to_vec1::<f32>()?;

    let options = quiet_gan_fit(1);
    let mut disc_optimizer = create_optimizer(
        &options.disc_optimizer_config(),
        discriminator.var_map().all_vars(),
    )?;
    let mut noise = NoiseSource::seeded(13, &device);
    let d = discriminator_step(generator, discriminator, &real, &mut noise)?;
    disc_optimizer.step(&d.grads)?;

    let after_logits = discriminator.forward_t(&fake, false)?;
    let after = after_logits.flatten_all()?.to_vec1::<f32>()?;
    assert_ne!(before, after);

    let g = generator_step(generator, discriminator, 2, &mut noise)?;
    assert_eq!(noise.draws(), 2);
    assert_relative_eq!(g.loss, scalar(&generator_loss(&after_logits)?)?, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_stop_before_first_step() -> Result<()> {
    let dir = create_temp_dir()?;
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let mut options = quiet_fit(3);
    options.checkpoint_dir = Some(dir.path().to_path_buf());

    let flag = StopFlag::new();
    flag.stop();
    let mut trainer = ReconstructionTrainer::new(&model, options)?.with_stop_flag(flag);
    let err = trainer.fit(&mut image_batches(2, 2, TEST_SHAPE)?).unwrap_err();

    assert!(matches!(err, Error::Interrupted { steps: 0 }));
    let path = checkpoint_path(dir.path(), CheckpointKind::ConvolutionalAutoencoder)?;
    assert!(!path.exists());
    Ok(())
}

#[test]
fn test_stop_mid_training() -> Result<()> {
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let flag = StopFlag::new();
    let mut trainer = GanTrainer::new(&model, quiet_gan_fit(5))?
        .with_stop_flag(flag.clone())
        .with_sink(Box::new(StopAfter { flag, step: 4 }));

    let err = trainer.fit(&mut image_batches(3, 2, TEST_SHAPE)?).unwrap_err();
    assert!(matches!(err, Error::Interrupted { steps: 4 }));
    assert_eq!(trainer.disc_optimizer().step_count(), 4);
    Ok(())
}

#[test]
fn test_empty_source_is_data_error() -> Result<()> {
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let err = model.fit(&mut BatchList::new(Vec::new()), &quiet_fit(1)).unwrap_err();
    assert!(matches!(err, Error::Data(_)));

    let gan = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let err = gan.fit(&mut BatchList::new(Vec::new()), &quiet_gan_fit(1)).unwrap_err();
    assert!(matches!(err, Error::Data(_)));
    Ok(())
}

#[test]
fn test_mismatched_batch_is_data_error() -> Result<()> {
    let model = built_vae(tiny_vae_config(), TEST_SHAPE)?;
    let other = crate::models::ImageShape::new(4, 4, 1);
    let err = model.fit(&mut image_batches(1, 2, other)?, &quiet_fit(1)).unwrap_err();
    assert!(matches!(err, Error::Data(_)));
    Ok(())
}

#[test]
fn test_unknown_length_source_trains() -> Result<()> {
    let model = built_autoencoder(tiny_autoencoder_config(), TEST_SHAPE)?;
    let batches = (0..2)
        .map(|_| random_images(2, TEST_SHAPE))
        .collect::<Result<Vec<_>>>()?;
    let history = model.fit(&mut BatchList::without_len(batches), &quiet_fit(1))?;
    assert_eq!(history.total_steps, 2);
    Ok(())
}

#[test]
fn test_metrics_log_written() -> Result<()> {
    let dir = create_temp_dir()?;
    let log = dir.path().join("metrics.jsonl");
    let model = built_dcgan(tiny_dcgan_config(), TEST_SHAPE)?;
    let mut options = quiet_gan_fit(1);
    options.metrics_log = Some(log.clone());

    model.fit(&mut image_batches(2, 2, TEST_SHAPE)?, &options)?;

    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&log)?
        .lines()
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0]["name"], DISCRIMINATOR_LOSS);
    assert_eq!(lines[1]["name"], GENERATOR_LOSS);
    assert_eq!(lines[3]["step"], 2);
    Ok(())
}
