use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::nn::generator::VOLUME_CHANNELS;
use crate::nn::layers::{DownBlock, SameConv3d};

/// PatchGAN discriminator.
///
/// Scores (candidate, condition) pairs per patch instead of pooling to one
/// scalar, so the adversarial signal stays local.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    blocks: Vec<DownBlock<B>>,
    head: SameConv3d<B>,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    #[config(default = 64)]
    pub filters: usize,
    #[config(default = 4)]
    pub stages: usize,
    #[config(default = 4)]
    pub kernel_size: usize,
}

impl DiscriminatorConfig {
    /// Spatial shape of the validity map for a cubic input of `volume_edge`.
    pub fn patch_dims(&self, volume_edge: usize) -> [usize; 3] {
        let edge = volume_edge >> self.stages;
        [edge, edge, edge]
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let mut blocks = Vec::with_capacity(self.stages);
        let mut channels = 2 * VOLUME_CHANNELS;
        for stage in 0..self.stages {
            let filters = self.filters << stage.min(3);
            blocks.push(DownBlock::new([channels, filters], self.kernel_size, stage > 0, device));
            channels = filters;
        }
        let head = SameConv3d::new([channels, 1], self.kernel_size, 1, device);

        Discriminator { blocks, head }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Input shapes: [batch_size, 1, d, h, w] each
    /// Output shape: [batch_size, 1, d / 2^stages, h / 2^stages, w / 2^stages],
    /// raw scores (least-squares GAN, no activation)
    pub fn forward(&self, candidate: Tensor<B, 5>, condition: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut x = Tensor::cat(vec![candidate, condition], 1);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }
}
