use anyhow::{ensure, Result};
use burn::tensor::backend::Backend;

use crate::data::volume::Volume;
use crate::nn::generator::Generator;

/// Overlapping cubic tiling of a large volume.
///
/// Each tile contributes only its central `step` voxels per axis, offset by
/// `gap`, so seams land where the network saw context on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub tile: usize,
    pub step: usize,
}

impl TileGrid {
    pub fn new(tile: usize, step: usize) -> Result<Self> {
        ensure!(step > 0 && step <= tile, "tile step {} must lie in 1..={}", step, tile);
        ensure!((tile - step) % 2 == 0, "tile {} and step {} leave an uneven border", tile, step);
        Ok(Self { tile, step })
    }

    /// Half-overlapping tiles of edge `tile`.
    pub fn half_overlap(tile: usize) -> Result<Self> {
        Self::new(tile, tile / 2)
    }

    pub fn gap(&self) -> usize {
        (self.tile - self.step) / 2
    }

    /// Tile origins along one axis of length `len`. The last tile always
    /// ends flush with the volume, even when the steps do not line up.
    pub fn origins(&self, len: usize) -> Vec<usize> {
        if len < self.tile {
            return Vec::new();
        }
        let last = len - self.tile;
        let mut origins: Vec<usize> = (0..=last).step_by(self.step).collect();
        if origins.last() != Some(&last) {
            origins.push(last);
        }
        origins
    }
}

/// Predict a full volume tile by tile.
///
/// Every tile is cut from `volume`, translated on its own and its centre
/// written into a zero-initialised buffer of the same shape.
pub fn predict_tiled<B: Backend>(
    generator: &Generator<B>,
    volume: &Volume,
    grid: TileGrid,
    device: &B::Device,
) -> Result<Volume> {
    let dims = volume.dims();
    ensure!(
        dims.iter().all(|&d| d >= grid.tile),
        "volume {:?} is smaller than one {}-voxel tile",
        dims,
        grid.tile
    );

    let gap = grid.gap();
    let extent = [grid.tile; 3];
    let center = [grid.step; 3];
    let mut prediction = Volume::zeros(dims);

    for z in grid.origins(dims[0]) {
        for y in grid.origins(dims[1]) {
            for x in grid.origins(dims[2]) {
                let tile = volume.extract([z, y, x], extent)?;
                let translated = Volume::from_tensor(generator.forward(tile.to_tensor::<B>(device)))?;
                prediction.paste(&translated, [gap; 3], [z + gap, y + gap, x + gap], center)?;
            }
        }
    }

    Ok(prediction)
}
