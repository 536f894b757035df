use burn::{
    config::Config,
    module::Module,
    tensor::{activation, backend::Backend, Tensor},
};

use crate::nn::layers::{upsample_nearest, DownBlock, SameConv3d, UpBlock};

/// Single intensity channel in and out
pub const VOLUME_CHANNELS: usize = 1;

/// U-Net generator: conditioning volume in, translated volume out.
///
/// Architecture: `depth` strided encoder stages, `depth - 1` decoder stages
/// with skip connections, then a final upsample + convolution + tanh.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    down: Vec<DownBlock<B>>,
    up: Vec<UpBlock<B>>,
    output: SameConv3d<B>,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    /// Edge length of the cubic input volume
    pub volume_edge: usize,
    #[config(default = 64)]
    pub filters: usize,
    #[config(default = 7)]
    pub depth: usize,
    #[config(default = 4)]
    pub kernel_size: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl GeneratorConfig {
    /// Filters of encoder stage `stage`, widening up to 8x the base count.
    pub fn stage_filters(&self, stage: usize) -> usize {
        self.filters << stage.min(3)
    }

    /// Edge length of the activation produced by encoder stage `stage`.
    pub fn stage_edge(&self, stage: usize) -> usize {
        self.volume_edge >> (stage + 1)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let mut down = Vec::with_capacity(self.depth);
        let mut channels = VOLUME_CHANNELS;
        for stage in 0..self.depth {
            let filters = self.stage_filters(stage);
            // Batch statistics over a single voxel are meaningless.
            let normalize = stage > 0 && self.stage_edge(stage) > 1;
            down.push(DownBlock::new([channels, filters], self.kernel_size, normalize, device));
            channels = filters;
        }

        let mut up = Vec::with_capacity(self.depth.saturating_sub(1));
        for skip_stage in (0..self.depth.saturating_sub(1)).rev() {
            let filters = self.stage_filters(skip_stage);
            up.push(UpBlock::new([channels, filters], self.kernel_size, self.dropout, device));
            channels = filters * 2;
        }

        let output = SameConv3d::new([channels, VOLUME_CHANNELS], self.kernel_size, 1, device);

        Generator { down, up, output }
    }
}

impl<B: Backend> Generator<B> {
    /// Forward pass
    ///
    /// Input shape: [batch_size, 1, depth, height, width]
    /// Output shape: [batch_size, 1, depth, height, width], values in [-1, 1]
    pub fn forward(&self, condition: Tensor<B, 5>) -> Tensor<B, 5> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = condition;
        for block in &self.down {
            x = block.forward(x);
            skips.push(x.clone());
        }
        // The innermost activation is `x` itself, not a skip.
        skips.pop();

        for (block, skip) in self.up.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x, skip);
        }

        let x = upsample_nearest(x);
        activation::tanh(self.output.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig::new(16).with_depth(4).with_filters(2)
    }

    #[test]
    fn test_output_matches_input_shape() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device);
        let input = Tensor::<TestBackend, 5>::random(
            [2, 1, 16, 16, 16],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        assert_eq!(generator.forward(input).dims(), [2, 1, 16, 16, 16]);
    }

    #[test]
    fn test_output_bounded_by_tanh() {
        let device = Default::default();
        let generator = small_config().init::<Autodiff<TestBackend>>(&device);
        let input = Tensor::<Autodiff<TestBackend>, 5>::random(
            [1, 1, 16, 16, 16],
            burn::tensor::Distribution::Uniform(-50.0, 50.0),
            &device,
        );
        let values = generator.forward(input).into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_single_voxel_stage_skips_normalization() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device);
        let normalized: Vec<bool> = generator.down.iter().map(|b| b.is_normalized()).collect();
        // 16 -> 8 (first stage, never normalised) -> 4 -> 2 -> 1
        assert_eq!(normalized, vec![false, true, true, false]);
    }

    #[test]
    fn test_filter_widths_cap_at_eight_times_base() {
        let config = GeneratorConfig::new(128).with_filters(64);
        let widths: Vec<usize> = (0..7).map(|s| config.stage_filters(s)).collect();
        assert_eq!(widths, vec![64, 128, 256, 512, 512, 512, 512]);
    }

    #[test]
    fn test_decoder_mirrors_encoder() {
        let device = Default::default();
        let generator = small_config().init::<TestBackend>(&device);
        assert_eq!(generator.down.len(), 4);
        assert_eq!(generator.up.len(), 3);
    }
}
