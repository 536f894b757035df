use burn::tensor::{backend::Backend, ElementConversion, Tensor};

/// Mean squared error
pub fn mse_loss<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    let diff = predictions - targets;
    let sq = diff.clone() * diff;
    sq.mean()
}

/// Mean absolute error
pub fn mae_loss<B: Backend, const D: usize>(
    predictions: Tensor<B, D>,
    targets: Tensor<B, D>,
) -> Tensor<B, 1> {
    (predictions - targets).abs().mean()
}

/// PatchGAN target map: every patch labelled real (1.0) or fake (0.0).
pub fn patch_labels<B: Backend>(
    batch_size: usize,
    patch: [usize; 3],
    real: bool,
    device: &B::Device,
) -> Tensor<B, 5> {
    let shape = [batch_size, 1, patch[0], patch[1], patch[2]];
    if real {
        Tensor::ones(shape, device)
    } else {
        Tensor::zeros(shape, device)
    }
}

/// Fraction of patches whose rounded score equals its label.
pub fn binary_accuracy<B: Backend>(scores: Tensor<B, 5>, labels: Tensor<B, 5>) -> f64 {
    let predicted = scores.greater_elem(0.5);
    let expected = labels.greater_elem(0.5);
    scalar(predicted.equal(expected).float().mean())
}

/// Read a one-element tensor back to the host.
pub fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Relative weights of the combined-model objective
#[derive(Debug, Clone, Copy)]
pub struct LossWeights {
    pub adversarial: f32,
    pub reconstruction: f32,
}

/// Generator objective split into its parts
#[derive(Debug, Clone)]
pub struct GeneratorLosses<B: Backend> {
    /// Squared error of the validity map against "real" labels
    pub adversarial: Tensor<B, 1>,
    /// Mean absolute error of the translation against the target volume
    pub reconstruction: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

pub fn generator_losses<B: Backend>(
    validity: Tensor<B, 5>,
    translated: Tensor<B, 5>,
    target: Tensor<B, 5>,
    weights: LossWeights,
) -> GeneratorLosses<B> {
    let real = Tensor::ones_like(&validity);
    let adversarial = mse_loss(validity, real);
    let reconstruction = mae_loss(translated, target);
    let total = adversarial.clone().mul_scalar(weights.adversarial)
        + reconstruction.clone().mul_scalar(weights.reconstruction);

    GeneratorLosses {
        adversarial,
        reconstruction,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn volume(values: &[f32], device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 5> {
        Tensor::<TestBackend, 1>::from_floats(values, device).reshape([1, 1, 1, 1, values.len()])
    }

    #[test]
    fn test_patch_labels_fill_discriminator_shape() {
        let device = Default::default();
        let real = patch_labels::<TestBackend>(2, [8, 8, 8], true, &device);
        let fake = patch_labels::<TestBackend>(2, [8, 8, 8], false, &device);

        assert_eq!(real.dims(), [2, 1, 8, 8, 8]);
        assert_eq!(fake.dims(), [2, 1, 8, 8, 8]);
        assert!(real.into_data().to_vec::<f32>().unwrap().iter().all(|&v| v == 1.0));
        assert!(fake.into_data().to_vec::<f32>().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_mse_and_mae() {
        let device = Default::default();
        let predictions = volume(&[1.0, -1.0, 3.0, 0.0], &device);
        let targets = volume(&[0.0, 0.0, 1.0, 0.0], &device);

        let mse = scalar(mse_loss(predictions.clone(), targets.clone()));
        let mae = scalar(mae_loss(predictions, targets));
        assert!((mse - 6.0 / 4.0).abs() < 1e-6, "got {}", mse);
        assert!((mae - 4.0 / 4.0).abs() < 1e-6, "got {}", mae);
    }

    #[test]
    fn test_generator_loss_decomposes_with_fixed_weights() {
        let device = Default::default();
        let validity = volume(&[0.5, 0.25], &device);
        let translated = volume(&[0.2, -0.4, 0.6], &device);
        let target = volume(&[0.0, 0.0, 0.0], &device);
        let weights = LossWeights {
            adversarial: 1.0,
            reconstruction: 100.0,
        };

        let losses = generator_losses(validity, translated, target, weights);
        let adversarial = scalar(losses.adversarial);
        let reconstruction = scalar(losses.reconstruction);
        let total = scalar(losses.total);

        assert!((adversarial - (0.25 + 0.5625) / 2.0).abs() < 1e-6);
        assert!((reconstruction - 0.4).abs() < 1e-6);
        assert!((total - (adversarial + 100.0 * reconstruction)).abs() < 1e-4);
    }

    #[test]
    fn test_binary_accuracy_rounds_scores() {
        let device = Default::default();
        let scores = volume(&[0.9, 0.2, 0.7, -0.3], &device);
        let real = volume(&[1.0, 1.0, 1.0, 1.0], &device);
        let fake = volume(&[0.0, 0.0, 0.0, 0.0], &device);

        assert!((binary_accuracy(scores.clone(), real) - 0.5).abs() < 1e-9);
        assert!((binary_accuracy(scores, fake) - 0.5).abs() < 1e-9);
    }
}
