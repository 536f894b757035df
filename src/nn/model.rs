use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use crate::nn::discriminator::{Discriminator, DiscriminatorConfig};
use crate::nn::generator::{Generator, GeneratorConfig};

/// Generator and discriminator persisted together as the "combined" model
///
/// Training keeps the two halves apart so each optimizer only ever sees its
/// own parameters; this struct exists for export and reload.
#[derive(Module, Debug)]
pub struct Pix2PixModel<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

/// Architecture descriptor of the combined model
#[derive(Config, Debug)]
pub struct Pix2PixModelConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
}

impl Pix2PixModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Pix2PixModel<B> {
        Pix2PixModel {
            generator: self.generator.init(device),
            discriminator: self.discriminator.init(device),
        }
    }

    /// Shape of the PatchGAN validity map for one sample
    pub fn patch_dims(&self) -> [usize; 3] {
        self.discriminator.patch_dims(self.generator.volume_edge)
    }
}

impl<B: Backend> Pix2PixModel<B> {
    /// Translate `condition` and score the result against it.
    ///
    /// Returns (validity, translated).
    pub fn forward(&self, condition: Tensor<B, 5>) -> (Tensor<B, 5>, Tensor<B, 5>) {
        let translated = self.generator.forward(condition.clone());
        let validity = self.discriminator.forward(translated.clone(), condition);
        (validity, translated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_combined_forward_shapes() {
        let device = Default::default();
        let config = Pix2PixModelConfig::new(
            GeneratorConfig::new(16).with_depth(4).with_filters(2),
            DiscriminatorConfig::new().with_filters(2),
        );
        let model = config.init::<TestBackend>(&device);

        let condition = Tensor::<TestBackend, 5>::zeros([1, 1, 16, 16, 16], &device);
        let (validity, translated) = model.forward(condition);

        assert_eq!(translated.dims(), [1, 1, 16, 16, 16]);
        assert_eq!(validity.dims(), [1, 1, 1, 1, 1]);
        assert_eq!(config.patch_dims(), [1, 1, 1]);
    }
}
