use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder},
    tensor::backend::Backend,
};

use crate::data::models::ExportMetadata;
use crate::nn::model::{Pix2PixModel, Pix2PixModelConfig};

/// File locations of one exported model set.
///
/// Weight paths carry no extension; the recorder appends `.mpk.gz`.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub combined_arch: PathBuf,
    pub combined_weights: PathBuf,
    pub generator_arch: PathBuf,
    pub generator_weights: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            combined_arch: dir.join(format!("{name}_arch.json")),
            combined_weights: dir.join(format!("{name}_weights")),
            generator_arch: dir.join(format!("{name}_gen_arch.json")),
            generator_weights: dir.join(format!("{name}_gen_weights")),
            metadata: dir.join(format!("{name}_metadata.json")),
        }
    }
}

fn recorder() -> NamedMpkGzFileRecorder<FullPrecisionSettings> {
    NamedMpkGzFileRecorder::<FullPrecisionSettings>::default()
}

/// Save architecture descriptors and weights for the combined model and for
/// the generator alone, plus run metadata.
pub fn save_artifacts<B: Backend>(
    model: &Pix2PixModel<B>,
    config: &Pix2PixModelConfig,
    paths: &ArtifactPaths,
    metadata: &ExportMetadata,
) -> Result<()> {
    config
        .save(&paths.combined_arch)
        .with_context(|| format!("Failed to write {}", paths.combined_arch.display()))?;
    model
        .clone()
        .save_file(&paths.combined_weights, &recorder())
        .with_context(|| format!("Failed to save combined weights to {}", paths.combined_weights.display()))?;

    config
        .generator
        .save(&paths.generator_arch)
        .with_context(|| format!("Failed to write {}", paths.generator_arch.display()))?;
    model
        .generator
        .clone()
        .save_file(&paths.generator_weights, &recorder())
        .with_context(|| format!("Failed to save generator weights to {}", paths.generator_weights.display()))?;

    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&paths.metadata, json)
        .with_context(|| format!("Failed to write {}", paths.metadata.display()))?;

    tracing::info!(
        "Saved combined network ({}) and generator ({}) with architecture descriptors",
        paths.combined_weights.with_extension("mpk.gz").display(),
        paths.generator_weights.with_extension("mpk.gz").display()
    );
    Ok(())
}

/// Rebuild the combined model from its descriptor and weights.
pub fn load_combined<B: Backend>(paths: &ArtifactPaths, device: &B::Device) -> Result<Pix2PixModel<B>> {
    let config = Pix2PixModelConfig::load(&paths.combined_arch)
        .with_context(|| format!("Failed to read {}", paths.combined_arch.display()))?;
    let model = config
        .init::<B>(device)
        .load_file(&paths.combined_weights, &recorder(), device)
        .with_context(|| format!("Failed to load {}", paths.combined_weights.display()))?;
    Ok(model)
}

pub fn load_metadata(paths: &ArtifactPaths) -> Result<ExportMetadata> {
    let text = std::fs::read_to_string(&paths.metadata)
        .with_context(|| format!("Failed to read {}", paths.metadata.display()))?;
    Ok(serde_json::from_str(&text)?)
}
