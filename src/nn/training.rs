use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use burn::{
    backend::{Autodiff, NdArray, Wgpu},
    config::Config,
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, Tensor},
};
use sysinfo::System;

use crate::config::{self, Pix2PixConfig};
use crate::data::dataset::{PairSource, VolumeBatch, VolumePairSource};
use crate::data::models::{ComputeStats, ExportMetadata, StepMetrics};
use crate::data::nrrd::{self, Encoding};
use crate::nn::discriminator::Discriminator;
use crate::nn::generator::Generator;
use crate::nn::loss::{binary_accuracy, generator_losses, mse_loss, patch_labels, scalar, LossWeights};
use crate::nn::model::Pix2PixModel;
use crate::nn::persistence::{self, ArtifactPaths};
use crate::nn::sampling::{predict_tiled, TileGrid};
use crate::nn::scalar_log::ScalarLog;

/// GPU training backend: Wgpu with autodiff
pub type GpuBackend = Autodiff<Wgpu>;

/// CPU training backend: NdArray with autodiff
pub type CpuBackend = Autodiff<NdArray>;

/// Run the full training pipeline, selecting GPU or CPU backend.
pub fn train(config: &Pix2PixConfig) -> Result<()> {
    config.validate()?;

    match crate::nn::gpu::detect_nvidia_gpu() {
        Some(gpu) => {
            tracing::info!(
                "Starting GPU training with Wgpu backend on {} ({} MB free)",
                gpu,
                gpu.vram_free_mb()
            );
            let device = <Wgpu as burn::tensor::backend::Backend>::Device::default();
            train_impl::<GpuBackend>(device, config, format!("WGPU GPU: {}", gpu.name))
        }
        None => {
            tracing::info!("Starting CPU training with NdArray backend");
            let device = <NdArray as burn::tensor::backend::Backend>::Device::default();
            train_impl::<CpuBackend>(device, config, "NdArray (CPU) + Autodiff".to_string())
        }
    }
}

fn train_impl<B: AutodiffBackend>(device: B::Device, config: &Pix2PixConfig, backend_name: String) -> Result<()> {
    let mut source = VolumePairSource::<B>::from_dir(
        Path::new(config::DATA_DIR),
        config.volume_dims(),
        config.batch_size,
        config.shuffle_seed,
        device.clone(),
    )?;

    let mut session = start_session::<B>(config.clone(), device, backend_name)?;
    if let Some(epoch) = session.resume()? {
        tracing::info!("Resuming from the artifacts of epoch {}", epoch);
    }
    session.run(&mut source)
}

/// Owns everything one training run mutates: both networks, one optimizer
/// per network, the scalar log and resource counters.
///
/// The discriminator optimizer only ever receives discriminator gradients and
/// the generator optimizer only generator gradients, so no trainability flag
/// has to be toggled between the two updates.
pub struct TrainingSession<B, GO, DO>
where
    B: AutodiffBackend,
{
    config: Pix2PixConfig,
    device: B::Device,
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    generator_optim: GO,
    discriminator_optim: DO,
    scalar_log: ScalarLog,
    tiles: TileGrid,
    output_dir: PathBuf,
    first_epoch: usize,
    start: Instant,
    sys: System,
    stats: ComputeStats,
    last_step: StepMetrics,
}

/// Build fresh networks and Adam optimizers for `config`, and prepare the
/// output directory.
#[allow(clippy::type_complexity)]
pub fn start_session<B: AutodiffBackend>(
    config: Pix2PixConfig,
    device: B::Device,
    backend_name: String,
) -> Result<TrainingSession<B, impl Optimizer<Generator<B>, B>, impl Optimizer<Discriminator<B>, B>>> {
    config.validate()?;

    let output_dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(output_dir.join("generated"))
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    config
        .save(output_dir.join("config.json"))
        .context("Failed to save training config")?;

    let generator = config.model.generator.init::<B>(&device);
    let discriminator = config.model.discriminator.init::<B>(&device);

    let adam = AdamConfig::new().with_beta_1(config.beta_1);
    let generator_optim = adam.init::<B, Generator<B>>();
    let discriminator_optim = adam.init::<B, Discriminator<B>>();

    let scalar_log = ScalarLog::create(&output_dir.join("logs"))?;
    let tiles = TileGrid::half_overlap(config.model.generator.volume_edge)?;

    let mut sys = System::new_all();
    sys.refresh_all();
    let stats = ComputeStats {
        backend_name,
        memory_total_mb: sys.total_memory() / (1024 * 1024),
        generator_params: generator.num_params(),
        discriminator_params: discriminator.num_params(),
        ..Default::default()
    };

    tracing::info!(
        "Generator: {} parameters, discriminator: {} parameters, patch map {:?}",
        stats.generator_params,
        stats.discriminator_params,
        config.model.patch_dims()
    );

    Ok(TrainingSession {
        config,
        device,
        generator,
        discriminator,
        generator_optim,
        discriminator_optim,
        scalar_log,
        tiles,
        output_dir,
        first_epoch: 0,
        start: Instant::now(),
        sys,
        stats,
        last_step: StepMetrics::default(),
    })
}

impl<B, GO, DO> TrainingSession<B, GO, DO>
where
    B: AutodiffBackend,
    GO: Optimizer<Generator<B>, B>,
    DO: Optimizer<Discriminator<B>, B>,
{
    fn artifact_paths(&self) -> ArtifactPaths {
        ArtifactPaths::new(&self.output_dir, config::ARTIFACT_NAME)
    }

    /// Continue from the combined artifacts an earlier run left in the output
    /// directory, restarting the epoch they were exported in.
    ///
    /// Optimizer moments are not persisted and start fresh.
    pub fn resume(&mut self) -> Result<Option<usize>> {
        let paths = self.artifact_paths();
        if !paths.combined_weights.with_extension("mpk.gz").exists() {
            return Ok(None);
        }

        let model = persistence::load_combined::<B>(&paths, &self.device)?;
        ensure!(
            model.generator.num_params() == self.stats.generator_params
                && model.discriminator.num_params() == self.stats.discriminator_params,
            "artifacts in {} were written for a different architecture",
            self.output_dir.display()
        );
        let metadata = persistence::load_metadata(&paths)?;

        self.generator = model.generator;
        self.discriminator = model.discriminator;
        self.last_step = metadata.last_step;
        self.first_epoch = metadata.epoch;
        Ok(Some(metadata.epoch))
    }

    fn loss_weights(&self) -> LossWeights {
        LossWeights {
            adversarial: self.config.adversarial_weight,
            reconstruction: self.config.reconstruction_weight,
        }
    }

    /// Inference-mode translation: running normalisation statistics, no
    /// dropout, no autodiff graph.
    pub fn predict(&self, condition: Tensor<B, 5>) -> Tensor<B, 5> {
        let generator = self.generator.valid();
        Tensor::from_inner(generator.forward(condition.inner()))
    }

    /// One discriminator optimizer step towards `labels`.
    /// Returns (loss, patch accuracy) measured before the step.
    fn discriminator_step(
        &mut self,
        candidate: Tensor<B, 5>,
        condition: Tensor<B, 5>,
        labels: Tensor<B, 5>,
    ) -> (f64, f64) {
        let scores = self.discriminator.forward(candidate, condition);
        let accuracy = binary_accuracy(scores.clone(), labels.clone());
        let loss = mse_loss(scores, labels);
        let loss_value = scalar(loss.clone());

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.discriminator);
        self.discriminator = self
            .discriminator_optim
            .step(self.config.learning_rate, self.discriminator.clone(), grads);

        (loss_value, accuracy)
    }

    /// Alternating update on one batch: discriminator on a real and a fake
    /// pair, then the generator through the frozen discriminator.
    ///
    /// The source volume conditions the generator; the template is the
    /// target it should reproduce.
    pub fn train_step(&mut self, batch: VolumeBatch<B>) -> StepMetrics {
        let condition = batch.sources;
        let target = batch.templates;
        let [batch_size, ..] = condition.dims();
        let patch = self.config.model.patch_dims();
        let real = patch_labels::<B>(batch_size, patch, true, &self.device);
        let fake = patch_labels::<B>(batch_size, patch, false, &self.device);

        let candidate = self.predict(condition.clone());

        let (d_loss_real, acc_real) = self.discriminator_step(target.clone(), condition.clone(), real);
        let (d_loss_fake, acc_fake) = self.discriminator_step(candidate, condition.clone(), fake);
        let mut metrics = self.generator_step(condition, target);

        metrics.d_loss = 0.5 * (d_loss_real + d_loss_fake);
        metrics.d_accuracy = 0.5 * (acc_real + acc_fake);
        self.last_step = metrics;
        metrics
    }

    /// One generator optimizer step on the combined objective. Only the
    /// generator-side fields of the returned metrics are filled.
    fn generator_step(&mut self, condition: Tensor<B, 5>, target: Tensor<B, 5>) -> StepMetrics {
        // Discriminator parameters are constants for this pass.
        let combined = Pix2PixModel {
            generator: self.generator.clone(),
            discriminator: self.discriminator.clone().no_grad(),
        };
        let (validity, translated) = combined.forward(condition);
        let losses = generator_losses(validity, translated, target, self.loss_weights());

        let metrics = StepMetrics {
            g_loss: scalar(losses.total.clone()),
            adversarial_loss: scalar(losses.adversarial),
            reconstruction_loss: scalar(losses.reconstruction),
            ..Default::default()
        };

        let grads = losses.total.backward();
        let grads = GradientsParams::from_grads(grads, &self.generator);
        self.generator = self
            .generator_optim
            .step(self.config.learning_rate, self.generator.clone(), grads);

        metrics
    }

    /// Train for the configured number of epochs.
    ///
    /// A failed export or scalar write is logged and training continues;
    /// anything else aborts the run.
    pub fn run(&mut self, source: &mut impl PairSource<B>) -> Result<()> {
        ensure!(
            source.template().dims() == self.config.volume_dims(),
            "template is {:?}, network expects {:?}",
            source.template().dims(),
            self.config.volume_dims()
        );

        let epochs = self.config.epochs;
        let n_batches = source.n_batches();
        self.start = Instant::now();

        for epoch in self.first_epoch..epochs {
            let loader = source.loader();
            for (batch_index, batch) in loader.iter().enumerate() {
                let metrics = self.train_step(batch);
                if !metrics.is_finite() {
                    tracing::warn!("Non-finite losses at epoch {} batch {}: {:?}", epoch, batch_index, metrics);
                }

                tracing::info!(
                    "[Epoch {}/{}] [Batch {}/{}] [D loss: {:.6}, acc: {:3.0}%] [G loss: {:.6}] time: {:.1?}",
                    epoch,
                    epochs,
                    batch_index,
                    n_batches,
                    metrics.d_loss,
                    100.0 * metrics.d_accuracy,
                    metrics.g_loss,
                    self.start.elapsed()
                );

                self.record_scalars(epoch, batch_index, &metrics);

                if batch_index % self.config.sample_interval == 0 {
                    if let Err(e) = self.sample_and_export(source, epoch, batch_index) {
                        tracing::warn!("Sampling at epoch {} batch {} failed: {:#}", epoch, batch_index, e);
                    }
                }
            }
        }

        Ok(())
    }

    fn record_scalars(&mut self, epoch: usize, batch: usize, metrics: &StepMetrics) {
        let result = self
            .scalar_log
            .record(epoch, batch, "g_loss", metrics.g_loss)
            .and_then(|_| self.scalar_log.record(epoch, batch, "d_loss", metrics.d_loss));
        if let Err(e) = result {
            tracing::warn!("Failed to record scalars: {:#}", e);
        }
    }

    /// Translate the next validation volume tile by tile, write it as NRRD
    /// and persist both model artifact sets.
    pub fn sample_and_export(
        &mut self,
        source: &mut impl PairSource<B>,
        epoch: usize,
        batch: usize,
    ) -> Result<PathBuf> {
        let (validation_id, volume) = source.load_validation()?;

        let started = Instant::now();
        let generator = self.generator.valid();
        let prediction = predict_tiled(&generator, &volume, self.tiles, &self.device)?;
        tracing::info!(" --- Prediction time: {:.1?}", started.elapsed());

        let prediction_path = self
            .output_dir
            .join("generated")
            .join(format!("{}_{}_{}.nrrd", epoch, batch, validation_id));
        nrrd::write_volume(&prediction_path, &prediction, Encoding::Gzip)?;

        let model = Pix2PixModel {
            generator,
            discriminator: self.discriminator.valid(),
        };
        let metadata = ExportMetadata {
            exported_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            epoch,
            batch,
            validation_id,
            last_step: self.last_step,
            generator_params: self.stats.generator_params,
            discriminator_params: self.stats.discriminator_params,
        };
        persistence::save_artifacts(&model, &self.config.model, &self.artifact_paths(), &metadata)?;

        self.update_compute_stats();
        Ok(prediction_path)
    }

    /// Refresh CPU/memory figures (and GPU figures when nvidia-smi answers).
    fn update_compute_stats(&mut self) {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.stats.cpu_usage_percent = self.sys.global_cpu_usage();
        self.stats.memory_used_mb = self.sys.used_memory() / (1024 * 1024);

        self.stats.gpu = crate::nn::gpu::poll_gpu_stats();

        let gpu = self
            .stats
            .gpu
            .as_ref()
            .map_or_else(|| "none".to_string(), |g| g.to_string());
        tracing::info!(
            "{}: cpu {:.0}%, memory {}/{} MB, gpu {}",
            self.stats.backend_name,
            self.stats.cpu_usage_percent,
            self.stats.memory_used_mb,
            self.stats.memory_total_mb,
            gpu
        );
    }
}
