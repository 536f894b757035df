use anyhow::{ensure, Result};
use burn::config::Config;

use crate::nn::discriminator::DiscriminatorConfig;
use crate::nn::generator::GeneratorConfig;
use crate::nn::model::Pix2PixModelConfig;

/// Edge length of the cubic training volume (voxels)
pub const VOLUME_EDGE: usize = 128;

/// Number of filters in the first layer of the generator and discriminator
pub const GENERATOR_FILTERS: usize = 64;
pub const DISCRIMINATOR_FILTERS: usize = 64;

/// Stride-2 stages in the generator encoder (128 -> 1)
pub const GENERATOR_DEPTH: usize = 7;

/// Training schedule
pub const EPOCHS: usize = 20000;
pub const BATCH_SIZE: usize = 1;
pub const SAMPLE_INTERVAL: usize = 200;

/// Adam settings shared by both optimization contexts
pub const LEARNING_RATE: f64 = 2e-4;
pub const ADAM_BETA_1: f32 = 0.5;

/// Combined-model loss weights (adversarial : reconstruction = 1 : 100)
pub const ADVERSARIAL_WEIGHT: f32 = 1.0;
pub const RECONSTRUCTION_WEIGHT: f32 = 100.0;

/// Seed for the training set shuffle
pub const SHUFFLE_SEED: u64 = 42;

/// Dataset root: template.nrrd, train/*.nrrd, validation/*.nrrd
pub const DATA_DIR: &str = "data/fly";

/// Where predictions, logs and model artifacts are written
pub const OUTPUT_DIR: &str = "output";

/// File stem shared by all persisted model artifacts
pub const ARTIFACT_NAME: &str = "gan_network";

/// Full training configuration.
///
/// Serialised next to the artifacts so a run can be reproduced from its
/// output directory alone.
#[derive(Config, Debug)]
pub struct Pix2PixConfig {
    pub model: Pix2PixModelConfig,
    pub output_dir: String,
    #[config(default = 1.0)]
    pub adversarial_weight: f32,
    #[config(default = 100.0)]
    pub reconstruction_weight: f32,
    #[config(default = 2e-4)]
    pub learning_rate: f64,
    #[config(default = 0.5)]
    pub beta_1: f32,
    #[config(default = 1)]
    pub batch_size: usize,
    #[config(default = 20000)]
    pub epochs: usize,
    #[config(default = 200)]
    pub sample_interval: usize,
    #[config(default = 42)]
    pub shuffle_seed: u64,
}

impl Pix2PixConfig {
    /// Spatial shape every training volume must have
    pub fn volume_dims(&self) -> [usize; 3] {
        let edge = self.model.generator.volume_edge;
        [edge, edge, edge]
    }

    /// Reject shapes the encoder/decoder stack cannot process.
    pub fn validate(&self) -> Result<()> {
        let generator = &self.model.generator;
        let discriminator = &self.model.discriminator;
        let edge = generator.volume_edge;

        ensure!(generator.depth >= 1, "generator needs at least one downsampling stage");
        ensure!(
            edge % (1 << generator.depth) == 0,
            "volume edge {} is not divisible by 2^{} (generator depth)",
            edge,
            generator.depth
        );
        ensure!(discriminator.stages >= 1, "discriminator needs at least one downsampling stage");
        ensure!(
            edge % (1 << discriminator.stages) == 0,
            "volume edge {} is not divisible by 2^{} (discriminator stages)",
            edge,
            discriminator.stages
        );
        ensure!(
            generator.filters > 0 && discriminator.filters > 0,
            "filter counts must be positive"
        );
        ensure!(
            generator.kernel_size >= 2 && discriminator.kernel_size >= 2,
            "kernel sizes below 2 cannot downsample with stride 2"
        );
        ensure!(
            generator.kernel_size % 2 == 0 && discriminator.kernel_size % 2 == 0,
            "stride-2 'same' convolutions need an even kernel size"
        );
        ensure!((0.0..1.0).contains(&generator.dropout), "dropout must lie in [0, 1)");
        ensure!(self.batch_size > 0, "batch size must be positive");
        ensure!(self.sample_interval > 0, "sample interval must be positive");
        ensure!(self.learning_rate > 0.0, "learning rate must be positive");
        Ok(())
    }
}

/// The fixed experiment the binary runs.
pub fn default_config() -> Pix2PixConfig {
    let model = Pix2PixModelConfig::new(
        GeneratorConfig::new(VOLUME_EDGE)
            .with_filters(GENERATOR_FILTERS)
            .with_depth(GENERATOR_DEPTH),
        DiscriminatorConfig::new().with_filters(DISCRIMINATOR_FILTERS),
    );

    Pix2PixConfig::new(model, OUTPUT_DIR.to_string())
        .with_adversarial_weight(ADVERSARIAL_WEIGHT)
        .with_reconstruction_weight(RECONSTRUCTION_WEIGHT)
        .with_learning_rate(LEARNING_RATE)
        .with_beta_1(ADAM_BETA_1)
        .with_batch_size(BATCH_SIZE)
        .with_epochs(EPOCHS)
        .with_sample_interval(SAMPLE_INTERVAL)
        .with_shuffle_seed(SHUFFLE_SEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(edge: usize, depth: usize) -> Pix2PixConfig {
        let model = Pix2PixModelConfig::new(
            GeneratorConfig::new(edge).with_depth(depth).with_filters(2),
            DiscriminatorConfig::new().with_filters(2),
        );
        Pix2PixConfig::new(model, "out".to_string())
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.volume_dims(), [128, 128, 128]);
        assert_eq!(config.reconstruction_weight / config.adversarial_weight, 100.0);
    }

    #[test]
    fn test_rejects_edge_not_divisible_by_depth() {
        // 48 = 16 * 3: fine for the discriminator, too shallow for 2^5
        assert!(tiny(48, 5).validate().is_err());
        assert!(tiny(48, 4).validate().is_ok());
    }

    #[test]
    fn test_rejects_edge_below_patch_resolution() {
        assert!(tiny(8, 3).validate().is_err(), "8 voxels cannot be halved four times");
    }

    #[test]
    fn test_rejects_zero_batch() {
        let config = tiny(16, 4).with_batch_size(0);
        assert!(config.validate().is_err());
    }
}
