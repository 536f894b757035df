use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::data::nrrd;
use crate::data::volume::Volume;

/// A source volume and the template it should be registered onto
#[derive(Debug, Clone)]
pub struct VolumePair {
    pub source: Volume,
    pub template: Volume,
}

/// Check a pair before it reaches the network.
pub fn validate_pair(pair: &VolumePair, dims: [usize; 3]) -> Result<()> {
    ensure!(
        pair.source.dims() == dims,
        "source volume is {:?}, expected {:?}",
        pair.source.dims(),
        dims
    );
    ensure!(
        pair.template.dims() == dims,
        "template volume is {:?}, expected {:?}",
        pair.template.dims(),
        dims
    );
    ensure!(
        pair.source.is_finite() && pair.template.is_finite(),
        "volume pair contains non-finite intensities"
    );
    Ok(())
}

/// Training pairs, all validated against one shape
#[derive(Debug, Clone)]
pub struct VolumePairDataset {
    pairs: Vec<VolumePair>,
}

impl VolumePairDataset {
    pub fn new(pairs: Vec<VolumePair>, dims: [usize; 3]) -> Result<Self> {
        for (index, pair) in pairs.iter().enumerate() {
            validate_pair(pair, dims).with_context(|| format!("training pair {}", index))?;
        }
        Ok(Self { pairs })
    }
}

impl Dataset<VolumePair> for VolumePairDataset {
    fn get(&self, index: usize) -> Option<VolumePair> {
        self.pairs.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

/// Batcher that stacks volume pairs into network tensors
#[derive(Clone, Debug)]
pub struct VolumeBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> VolumeBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

/// Batched data for training
#[derive(Debug, Clone)]
pub struct VolumeBatch<B: Backend> {
    pub sources: Tensor<B, 5>,   // [batch_size, 1, depth, height, width]
    pub templates: Tensor<B, 5>, // [batch_size, 1, depth, height, width]
}

impl<B: Backend> Batcher<VolumePair, VolumeBatch<B>> for VolumeBatcher<B> {
    fn batch(&self, items: Vec<VolumePair>) -> VolumeBatch<B> {
        let batch_size = items.len();
        let [depth, height, width] = items.first().map(|p| p.source.dims()).unwrap_or([0; 3]);
        let voxels = depth * height * width;

        let mut sources = Vec::with_capacity(batch_size * voxels);
        let mut templates = Vec::with_capacity(batch_size * voxels);
        for pair in &items {
            sources.extend_from_slice(pair.source.data());
            templates.extend_from_slice(pair.template.data());
        }

        let shape = [batch_size, 1, depth, height, width];
        let sources = Tensor::<B, 1>::from_floats(sources.as_slice(), &self.device).reshape(shape);
        let templates = Tensor::<B, 1>::from_floats(templates.as_slice(), &self.device).reshape(shape);

        VolumeBatch { sources, templates }
    }
}

/// What the training loop needs from a data provider.
pub trait PairSource<B: Backend> {
    /// Loader over the training pairs; iterate it once per epoch.
    fn loader(&self) -> Arc<dyn DataLoader<VolumeBatch<B>>>;

    /// Batches per epoch
    fn n_batches(&self) -> usize;

    /// Next held-out volume as (sample id, full-size volume).
    fn load_validation(&mut self) -> Result<(usize, Volume)>;

    /// The fixed registration target
    fn template(&self) -> &Volume;
}

/// In-memory training pairs plus held-out validation volumes
pub struct VolumePairSource<B: Backend> {
    loader: Arc<dyn DataLoader<VolumeBatch<B>>>,
    n_pairs: usize,
    batch_size: usize,
    validation: Vec<Volume>,
    next_validation: usize,
    template: Volume,
}

impl<B: Backend> VolumePairSource<B> {
    /// Pair every source with `template` and build the shuffled loader.
    pub fn new(
        sources: Vec<Volume>,
        template: Volume,
        validation: Vec<Volume>,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Result<Self> {
        ensure!(!sources.is_empty(), "no training volumes");
        ensure!(batch_size > 0, "batch size must be positive");

        let dims = template.dims();
        let pairs = sources
            .into_iter()
            .map(|source| VolumePair {
                source,
                template: template.clone(),
            })
            .collect();
        let dataset = VolumePairDataset::new(pairs, dims)?;
        let n_pairs = dataset.len();

        let loader = DataLoaderBuilder::new(VolumeBatcher::<B>::new(device))
            .batch_size(batch_size)
            .shuffle(seed)
            .build(dataset);

        Ok(Self {
            loader,
            n_pairs,
            batch_size,
            validation,
            next_validation: 0,
            template,
        })
    }

    /// Load `<dir>/template.nrrd`, `<dir>/train/*.nrrd` and
    /// `<dir>/validation/*.nrrd`.
    ///
    /// Training volumes and the template are centre-cropped to `dims`; every
    /// volume is rescaled to [-1, 1].
    pub fn from_dir(
        dir: &Path,
        dims: [usize; 3],
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Result<Self> {
        let template = nrrd::read_volume(&dir.join("template.nrrd"))?
            .center_crop(dims)
            .context("template is smaller than the training volume")?
            .normalized();

        let mut sources = Vec::new();
        for path in list_volumes(&dir.join("train"))? {
            let volume = nrrd::read_volume(&path)?;
            match volume.center_crop(dims) {
                Ok(cropped) => sources.push(cropped.normalized()),
                Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
            }
        }

        let mut validation = Vec::new();
        for path in list_volumes(&dir.join("validation"))? {
            validation.push(nrrd::read_volume(&path)?.normalized());
        }

        tracing::info!(
            "Loaded {} training and {} validation volumes from {}",
            sources.len(),
            validation.len(),
            dir.display()
        );

        Self::new(sources, template, validation, batch_size, seed, device)
    }
}

/// `*.nrrd` files of `dir`, sorted so sample ids are stable across runs.
fn list_volumes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "nrrd"))
        .collect();
    paths.sort();
    Ok(paths)
}

impl<B: Backend> PairSource<B> for VolumePairSource<B> {
    fn loader(&self) -> Arc<dyn DataLoader<VolumeBatch<B>>> {
        self.loader.clone()
    }

    fn n_batches(&self) -> usize {
        self.n_pairs.div_ceil(self.batch_size)
    }

    fn load_validation(&mut self) -> Result<(usize, Volume)> {
        ensure!(!self.validation.is_empty(), "no validation volumes available");
        let id = self.next_validation;
        self.next_validation = (self.next_validation + 1) % self.validation.len();
        Ok((id, self.validation[id].clone()))
    }

    fn template(&self) -> &Volume {
        &self.template
    }
}
