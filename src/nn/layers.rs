use burn::{
    module::Module,
    nn::{
        conv::{Conv3d, Conv3dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig3d,
    },
    tensor::{activation, backend::Backend, Tensor},
};

/// Slope of the leaky ReLU used on every downsampling stage
pub const LEAKY_SLOPE: f64 = 0.2;

/// Running statistics keep 80% of their previous value per update.
/// burn weights the *new* batch by `momentum`, hence 1 - 0.8.
const NORM_MOMENTUM: f64 = 0.2;
const NORM_EPSILON: f64 = 1e-3;

/// 3-D convolution with TensorFlow-style "same" padding.
///
/// The output has `ceil(input / stride)` voxels per axis. Even kernels need
/// one more voxel of padding after the input than before it; burn only pads
/// symmetrically, so the convolution is padded by the larger amount and the
/// surplus leading output is cropped away.
#[derive(Module, Debug)]
pub struct SameConv3d<B: Backend> {
    conv: Conv3d<B>,
    stride: usize,
    crop: usize,
}

impl<B: Backend> SameConv3d<B> {
    pub fn new(channels: [usize; 2], kernel_size: usize, stride: usize, device: &B::Device) -> Self {
        // Input edges are always multiples of the stride here, so the total
        // padding is simply kernel - stride.
        let total = kernel_size.saturating_sub(stride);
        let before = total / 2;
        let after = total - before;
        let crop = (after - before) / stride;

        let conv = Conv3dConfig::new(channels, [kernel_size; 3])
            .with_stride([stride; 3])
            .with_padding(PaddingConfig3d::Explicit(after, after, after))
            .init(device);

        Self { conv, stride, crop }
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let [_, _, depth, height, width] = input.dims();
        let output = self.conv.forward(input);
        if self.crop == 0 {
            return output;
        }

        let [batch, channels, ..] = output.dims();
        let start = self.crop;
        output.slice([
            0..batch,
            0..channels,
            start..start + depth.div_ceil(self.stride),
            start..start + height.div_ceil(self.stride),
            start..start + width.div_ceil(self.stride),
        ])
    }
}

/// Nearest-neighbour 2x upsampling along the three spatial axes.
///
/// One axis at a time, so no intermediate tensor exceeds rank 4.
pub fn upsample_nearest<B: Backend>(input: Tensor<B, 5>) -> Tensor<B, 5> {
    let [batch, channels, depth, height, width] = input.dims();
    let planes = batch * channels;

    input
        .reshape([planes, depth, 1, height * width])
        .repeat_dim(2, 2)
        .reshape([planes * depth * 2, height, 1, width])
        .repeat_dim(2, 2)
        .reshape([planes * depth * 2 * height * 2, width, 1])
        .repeat_dim(2, 2)
        .reshape([batch, channels, depth * 2, height * 2, width * 2])
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 3> {
    BatchNormConfig::new(channels)
        .with_momentum(NORM_MOMENTUM)
        .with_epsilon(NORM_EPSILON)
        .init(device)
}

/// Encoder stage: strided convolution, leaky ReLU, optional batch norm.
#[derive(Module, Debug)]
pub struct DownBlock<B: Backend> {
    conv: SameConv3d<B>,
    norm: Option<BatchNorm<B, 3>>,
}

impl<B: Backend> DownBlock<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        normalize: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: SameConv3d::new(channels, kernel_size, 2, device),
            norm: normalize.then(|| batch_norm(channels[1], device)),
        }
    }

    #[cfg(test)]
    pub fn is_normalized(&self) -> bool {
        self.norm.is_some()
    }

    pub fn forward(&self, input: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = self.conv.forward(input);
        let x = activation::leaky_relu(x, LEAKY_SLOPE);
        match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        }
    }
}

/// Decoder stage: upsample, convolution + ReLU, dropout, batch norm, then
/// concatenation with the mirrored encoder activation.
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    conv: SameConv3d<B>,
    dropout: Dropout,
    norm: BatchNorm<B, 3>,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(channels: [usize; 2], kernel_size: usize, dropout: f64, device: &B::Device) -> Self {
        Self {
            conv: SameConv3d::new(channels, kernel_size, 1, device),
            dropout: DropoutConfig::new(dropout).init(),
            norm: batch_norm(channels[1], device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 5>, skip: Tensor<B, 5>) -> Tensor<B, 5> {
        let x = upsample_nearest(input);
        let x = activation::relu(self.conv.forward(x));
        let x = self.dropout.forward(x);
        let x = self.norm.forward(x);
        Tensor::cat(vec![x, skip], 1)
    }
}
