use crate::model::{
    architecture::{
        DiscriminatorModel, DiscriminatorModelConfig, GeneratorModel, GeneratorModelConfig,
        ModelConfig,
    },
    constants::{
        ADAM_BETA_1, ADAM_BETA_2, ADAM_EPSILON, BATCH_SIZE, L1_LAMBDA, LEARNING_RATE, NUM_EPOCHS,
    },
    data::{DehazeBatch, DehazeBatcher, DehazeDataset, to_model_range},
    inference::Dehazer,
    loss::{discriminator_loss, generator_loss},
};

use anyhow::{Context, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{ElementConversion, backend::AutodiffBackend},
};
use std::ops::AddAssign;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer_g: AdamConfig,
    pub optimizer_d: AdamConfig,

    #[config(default = "NUM_EPOCHS")]
    pub num_epochs: usize,

    #[config(default = "BATCH_SIZE")]
    pub batch_size: usize,

    #[config(default = 1)]
    pub num_workers: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = "LEARNING_RATE")]
    pub learning_rate: f64,

    /// Weight of the L1 reconstruction term in the generator loss.
    #[config(default = "L1_LAMBDA")]
    pub l1_lambda: f32,

    /// Steps between per-batch debug log lines.
    #[config(default = 10)]
    pub log_interval: usize,
}

pub fn pix2pix_adam() -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(ADAM_BETA_1)
        .with_beta_2(ADAM_BETA_2)
        .with_epsilon(ADAM_EPSILON)
}

impl TrainingConfig {
    pub fn pix2pix() -> Self {
        Self::new(
            ModelConfig::new(GeneratorModelConfig::new(), DiscriminatorModelConfig::new()),
            pix2pix_adam(),
            pix2pix_adam(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLosses {
    pub gen_total: f32,
    pub gen_gan: f32,
    pub gen_l1: f32,
    pub disc: f32,
}

impl StepLosses {
    fn scaled(self, factor: f32) -> Self {
        Self {
            gen_total: self.gen_total * factor,
            gen_gan: self.gen_gan * factor,
            gen_l1: self.gen_l1 * factor,
            disc: self.disc * factor,
        }
    }
}

impl AddAssign for StepLosses {
    fn add_assign(&mut self, rhs: Self) {
        self.gen_total += rhs.gen_total;
        self.gen_gan += rhs.gen_gan;
        self.gen_l1 += rhs.gen_l1;
        self.disc += rhs.disc;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpochSummary {
    pub steps: usize,
    pub mean: StepLosses,
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f32 {
    tensor.into_scalar().elem::<f32>()
}

/// Owns both networks and their optimizers for the lifetime of a run.
pub struct GanTrainer<B: AutodiffBackend, OG, OD> {
    generator: GeneratorModel<B>,
    discriminator: DiscriminatorModel<B>,
    optim_g: OG,
    optim_d: OD,
    learning_rate: f64,
    l1_lambda: f32,
    log_interval: usize,
    steps: usize,
    device: B::Device,
}

pub fn build_trainer<B: AutodiffBackend>(
    config: &TrainingConfig,
    device: &B::Device,
) -> GanTrainer<
    B,
    impl Optimizer<GeneratorModel<B>, B>,
    impl Optimizer<DiscriminatorModel<B>, B>,
> {
    GanTrainer {
        generator: config.model.init_generator(device),
        discriminator: config.model.init_discriminator(device),
        optim_g: config.optimizer_g.init::<B, GeneratorModel<B>>(),
        optim_d: config.optimizer_d.init::<B, DiscriminatorModel<B>>(),
        learning_rate: config.learning_rate,
        l1_lambda: config.l1_lambda,
        log_interval: config.log_interval.max(1),
        steps: 0,
        device: device.clone(),
    }
}

impl<B, OG, OD> GanTrainer<B, OG, OD>
where
    B: AutodiffBackend,
    OG: Optimizer<GeneratorModel<B>, B>,
    OD: Optimizer<DiscriminatorModel<B>, B>,
{
    /// One forward pass, one gradient per network, one update per network.
    pub fn train_step(&mut self, noisy: Tensor<B, 4>, clean: Tensor<B, 4>) -> StepLosses {
        let input = to_model_range(noisy.to_device(&self.device));
        let target = to_model_range(clean.to_device(&self.device));

        let generated = self.generator.forward(input.clone());

        // The discriminator's loss must not reach the generator's graph.
        let disc_real = self.discriminator.forward(input.clone(), target.clone());
        let disc_fake = self
            .discriminator
            .forward(input.clone(), generated.clone().detach());
        let loss_d = discriminator_loss(disc_real, disc_fake);

        let disc_generated = self.discriminator.forward(input, generated.clone());
        let loss_g = generator_loss(disc_generated, generated, target, self.l1_lambda);

        // Both gradients are taken before either network is updated.
        let grads_d = GradientsParams::from_grads(loss_d.backward(), &self.discriminator);
        let grads_g = GradientsParams::from_grads(loss_g.total.backward(), &self.generator);

        let losses = StepLosses {
            gen_total: scalar(loss_g.total),
            gen_gan: scalar(loss_g.gan),
            gen_l1: scalar(loss_g.l1),
            disc: scalar(loss_d),
        };

        self.generator = self
            .optim_g
            .step(self.learning_rate, self.generator.clone(), grads_g);
        self.discriminator = self
            .optim_d
            .step(self.learning_rate, self.discriminator.clone(), grads_d);
        self.steps += 1;

        losses
    }

    pub fn run_epoch<I>(&mut self, epoch: usize, num_epochs: usize, batches: I) -> EpochSummary
    where
        I: IntoIterator<Item = DehazeBatch<B>>,
    {
        let start = Instant::now();
        let mut sum = StepLosses::default();
        let mut steps = 0;

        for (iteration, batch) in batches.into_iter().enumerate() {
            let losses = self.train_step(batch.noisy, batch.clean);
            if iteration % self.log_interval == 0 {
                debug!(
                    "[Epoch {}/{} Iter {}] D Loss: {:.4}, G Loss: {:.4}, GAN: {:.4}, L1: {:.4}",
                    epoch,
                    num_epochs,
                    iteration,
                    losses.disc,
                    losses.gen_total,
                    losses.gen_gan,
                    losses.gen_l1,
                );
            }
            sum += losses;
            steps += 1;
        }

        let mean = if steps == 0 {
            sum
        } else {
            sum.scaled(1.0 / steps as f32)
        };
        info!(
            "Epoch {}/{}: {} steps in {:.1}s, D Loss: {:.4}, G Loss: {:.4}, L1: {:.4}",
            epoch,
            num_epochs,
            steps,
            start.elapsed().as_secs_f32(),
            mean.disc,
            mean.gen_total,
            mean.gen_l1,
        );
        EpochSummary { steps, mean }
    }

    pub fn generator(&self) -> &GeneratorModel<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &DiscriminatorModel<B> {
        &self.discriminator
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Drops the discriminator and optimizers, keeping the generator in inference mode.
    pub fn into_dehazer(self) -> Dehazer<B::InnerBackend> {
        Dehazer::new(self.generator.valid())
    }
}

/// Runs the full training schedule over `dataset`.
///
/// When `artifact_dir` is given, the config is written there up front and the
/// trained generator at the end; otherwise nothing touches the disk.
pub fn train<B: AutodiffBackend>(
    dataset: DehazeDataset,
    config: &TrainingConfig,
    artifact_dir: Option<&Path>,
    device: B::Device,
) -> Result<Dehazer<B::InnerBackend>> {
    if let Some(dir) = artifact_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        config
            .save(dir.join("config.json"))
            .with_context(|| format!("failed to save config to {}", dir.display()))?;
    }

    B::seed(config.seed);

    let dataloader = DataLoaderBuilder::new(DehazeBatcher::default())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(dataset);

    let mut trainer = build_trainer::<B>(config, &device);
    info!(
        "training for {} epochs, batch size {}, learning rate {}",
        config.num_epochs, config.batch_size, config.learning_rate
    );

    for epoch in 1..=config.num_epochs {
        trainer.run_epoch(epoch, config.num_epochs, dataloader.iter());
    }
    info!("training completed after {} steps", trainer.steps());

    let dehazer = trainer.into_dehazer();
    if let Some(dir) = artifact_dir {
        dehazer.save(dir)?;
    }
    Ok(dehazer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{constants::DOWN_STAGES, data::PairingMode};
    use burn::backend::{Autodiff, NdArray};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn small_config() -> TrainingConfig {
        TrainingConfig::new(
            ModelConfig::new(
                GeneratorModelConfig::new()
                    .with_base_filters(4)
                    .with_max_filters(16),
                DiscriminatorModelConfig::new().with_base_filters(4),
            ),
            pix2pix_adam(),
            pix2pix_adam(),
        )
        .with_num_epochs(1)
    }

    fn write_pairs(count: usize) -> (TempDir, TempDir) {
        let clean = tempfile::tempdir().unwrap();
        let noisy = tempfile::tempdir().unwrap();
        for i in 0..count {
            let shade = (i * 13 % 200) as u8;
            let name = format!("scene{i}.png");
            RgbImage::from_fn(256, 256, |x, y| Rgb([shade, (x % 256) as u8, (y % 256) as u8]))
                .save(clean.path().join(&name))
                .unwrap();
            RgbImage::from_fn(256, 256, |x, _| Rgb([shade / 2 + 100, 180, (x % 128) as u8 + 100]))
                .save(noisy.path().join(&name))
                .unwrap();
        }
        (clean, noisy)
    }

    fn total_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f32 {
        (a - b).abs().sum().into_scalar().elem::<f32>()
    }

    #[test]
    fn default_config_matches_pix2pix_settings() {
        let config = TrainingConfig::pix2pix();
        assert_eq!(config.num_epochs, 250);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.learning_rate, 2e-4);
        assert_eq!(config.l1_lambda, 100.0);
        assert_eq!(config.model.generator.base_filters, 64);
    }

    #[test]
    fn one_epoch_updates_both_networks_once_per_batch() {
        let (clean, noisy) = write_pairs(16);
        let dataset =
            DehazeDataset::from_dirs(clean.path(), noisy.path(), PairingMode::Strict).unwrap();
        let config = small_config();
        let device = Default::default();
        let dataloader = DataLoaderBuilder::new(DehazeBatcher::default())
            .batch_size(config.batch_size)
            .build(dataset);

        let mut trainer = build_trainer::<TestBackend>(&config, &device);
        let generator_before = trainer.generator().final_conv.weight.val();
        let outer_before = trainer.generator().down[0].conv.weight.val();
        let inner_before = trainer.generator().down[DOWN_STAGES - 1].conv.weight.val();
        let discriminator_before = trainer.discriminator().score.weight.val();

        let summary = trainer.run_epoch(1, 1, dataloader.iter());

        assert_eq!(summary.steps, 2);
        assert_eq!(trainer.steps(), 2);
        assert!(
            total_abs_diff(trainer.generator().final_conv.weight.val(), generator_before) > 0.0
        );
        assert!(total_abs_diff(trainer.generator().down[0].conv.weight.val(), outer_before) > 0.0);
        assert!(
            total_abs_diff(
                trainer.generator().down[DOWN_STAGES - 1].conv.weight.val(),
                inner_before
            ) > 0.0
        );
        assert!(
            total_abs_diff(trainer.discriminator().score.weight.val(), discriminator_before) > 0.0
        );

        let mean = summary.mean;
        assert!(mean.disc.is_finite() && mean.disc >= 0.0);
        assert!(mean.gen_gan >= 0.0);
        assert!(mean.gen_total >= config.l1_lambda * mean.gen_l1 - 1e-3);
    }

    #[test]
    fn train_saves_artifacts_when_asked() {
        let (clean, noisy) = write_pairs(8);
        let dataset =
            DehazeDataset::from_dirs(clean.path(), noisy.path(), PairingMode::ByOrder).unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let config = small_config();

        let dehazer =
            train::<TestBackend>(dataset, &config, Some(artifacts.path()), Default::default())
                .unwrap();

        assert!(artifacts.path().join("config.json").exists());
        let saved_generator = std::fs::read_dir(artifacts.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().starts_with("generator"));
        assert!(saved_generator);

        let restored = TrainingConfig::load(artifacts.path().join("config.json")).unwrap();
        assert_eq!(restored.model.generator.base_filters, 4);

        let probe = image::DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])));
        assert_eq!(dehazer.infer(&probe).unwrap().dimensions(), (256, 256));
    }
}
