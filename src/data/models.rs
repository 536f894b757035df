use serde::{Deserialize, Serialize};

use crate::nn::gpu::GpuSnapshot;

/// Scalars produced by one discriminator + generator update
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Mean of the real-pair and fake-pair discriminator losses
    pub d_loss: f64,
    /// Binary patch accuracy over both pairs, in [0, 1]
    pub d_accuracy: f64,
    /// Weighted combined-model loss
    pub g_loss: f64,
    pub adversarial_loss: f64,
    pub reconstruction_loss: f64,
}

impl StepMetrics {
    pub fn is_finite(&self) -> bool {
        self.d_loss.is_finite() && self.g_loss.is_finite() && self.d_accuracy.is_finite()
    }
}

/// Compute/resource statistics sampled during training
#[derive(Debug, Clone, Default)]
pub struct ComputeStats {
    pub backend_name: String,
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub generator_params: usize,
    pub discriminator_params: usize,
    /// Training device, refreshed at each export
    pub gpu: Option<GpuSnapshot>,
}

/// Written next to the exported weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub exported_at: String,
    pub epoch: usize,
    pub batch: usize,
    pub validation_id: usize,
    pub last_step: StepMetrics,
    pub generator_params: usize,
    pub discriminator_params: usize,
}
