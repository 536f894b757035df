use anyhow::{anyhow, ensure, Result};
use burn::tensor::{backend::Backend, Tensor};

/// Single-channel 3-D intensity volume stored z-major: voxel (z, y, x) lives
/// at `(z * height + y) * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    dims: [usize; 3],
    data: Vec<f32>,
}

impl Volume {
    pub fn new(dims: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        ensure!(
            data.len() == expected,
            "volume {:?} needs {} voxels, got {}",
            dims,
            expected,
            data.len()
        );
        Ok(Self { dims, data })
    }

    pub fn zeros(dims: [usize; 3]) -> Self {
        Self {
            dims,
            data: vec![0.0; dims.iter().product()],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn offset(&self, [z, y, x]: [usize; 3]) -> usize {
        (z * self.dims[1] + y) * self.dims[2] + x
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Copy the block of `extent` voxels starting at `origin`.
    pub fn extract(&self, origin: [usize; 3], extent: [usize; 3]) -> Result<Volume> {
        for axis in 0..3 {
            ensure!(
                origin[axis] + extent[axis] <= self.dims[axis],
                "block {:?}+{:?} exceeds volume {:?}",
                origin,
                extent,
                self.dims
            );
        }

        let mut data = Vec::with_capacity(extent.iter().product());
        for z in origin[0]..origin[0] + extent[0] {
            for y in origin[1]..origin[1] + extent[1] {
                let start = self.offset([z, y, origin[2]]);
                data.extend_from_slice(&self.data[start..start + extent[2]]);
            }
        }
        Volume::new(extent, data)
    }

    /// Write the `extent` block of `source` at `source_origin` into this
    /// volume at `origin`.
    pub fn paste(
        &mut self,
        source: &Volume,
        source_origin: [usize; 3],
        origin: [usize; 3],
        extent: [usize; 3],
    ) -> Result<()> {
        for axis in 0..3 {
            ensure!(
                source_origin[axis] + extent[axis] <= source.dims[axis]
                    && origin[axis] + extent[axis] <= self.dims[axis],
                "cannot paste {:?} voxels from {:?} into {:?}",
                extent,
                source.dims,
                self.dims
            );
        }

        for dz in 0..extent[0] {
            for dy in 0..extent[1] {
                let from = source.offset([source_origin[0] + dz, source_origin[1] + dy, source_origin[2]]);
                let to = self.offset([origin[0] + dz, origin[1] + dy, origin[2]]);
                self.data[to..to + extent[2]].copy_from_slice(&source.data[from..from + extent[2]]);
            }
        }
        Ok(())
    }

    /// Central block of `extent` voxels. Odd leftovers are dropped from the
    /// far side of each axis.
    pub fn center_crop(&self, extent: [usize; 3]) -> Result<Volume> {
        let mut origin = [0; 3];
        for axis in 0..3 {
            ensure!(
                extent[axis] <= self.dims[axis],
                "cannot crop {:?} out of {:?}",
                extent,
                self.dims
            );
            origin[axis] = (self.dims[axis] - extent[axis]) / 2;
        }
        self.extract(origin, extent)
    }

    /// Min-max rescale into [-1, 1]. A constant volume maps to all zeros.
    pub fn normalized(mut self) -> Volume {
        let (min, max) = self
            .data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        if !range.is_finite() || range <= 0.0 {
            self.data.iter_mut().for_each(|v| *v = 0.0);
            return self;
        }
        for v in self.data.iter_mut() {
            *v = 2.0 * (*v - min) / range - 1.0;
        }
        self
    }

    /// Shape [1, 1, depth, height, width]
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 5> {
        let [depth, height, width] = self.dims;
        Tensor::<B, 1>::from_floats(self.data.as_slice(), device).reshape([1, 1, depth, height, width])
    }

    /// Read back the first sample / first channel of a network output.
    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 5>) -> Result<Volume> {
        let [batch, channels, depth, height, width] = tensor.dims();
        let tensor = if batch > 1 || channels > 1 {
            tensor.slice([0..1, 0..1, 0..depth, 0..height, 0..width])
        } else {
            tensor
        };
        let data = tensor
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Failed to read volume tensor: {:?}", e))?;
        Volume::new([depth, height, width], data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn ramp(dims: [usize; 3]) -> Volume {
        let n: usize = dims.iter().product();
        Volume::new(dims, (0..n).map(|i| i as f32).collect()).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_voxel_count() {
        assert!(Volume::new([2, 2, 2], vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_extract_reads_z_major_block() {
        let volume = ramp([4, 4, 4]);
        let block = volume.extract([1, 2, 3], [2, 1, 1]).unwrap();
        assert_eq!(block.dims(), [2, 1, 1]);
        // (1, 2, 3) and (2, 2, 3)
        assert_eq!(block.data(), &[27.0, 43.0]);
        assert!(volume.extract([3, 0, 0], [2, 1, 1]).is_err());
    }

    #[test]
    fn test_paste_then_extract_returns_block() {
        let source = ramp([3, 3, 3]);
        let mut target = Volume::zeros([5, 5, 5]);
        target.paste(&source, [1, 1, 1], [2, 0, 3], [2, 2, 2]).unwrap();

        let pasted = target.extract([2, 0, 3], [2, 2, 2]).unwrap();
        assert_eq!(pasted, source.extract([1, 1, 1], [2, 2, 2]).unwrap());
        assert_eq!(target.data()[0], 0.0);
    }

    #[test]
    fn test_center_crop() {
        let volume = ramp([6, 6, 6]);
        let crop = volume.center_crop([2, 2, 2]).unwrap();
        // voxel (2, 2, 2) of a 6^3 ramp
        assert_eq!(crop.data()[0], 86.0);
        assert!(volume.center_crop([7, 2, 2]).is_err());
    }

    #[test]
    fn test_normalized_spans_unit_interval() {
        let volume = ramp([2, 2, 2]).normalized();
        let min = volume.data().iter().cloned().fold(f32::INFINITY, f32::min);
        let max = volume.data().iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(min, -1.0);
        assert_eq!(max, 1.0);

        let flat = Volume::new([1, 1, 2], vec![5.0, 5.0]).unwrap().normalized();
        assert_eq!(flat.data(), &[0.0, 0.0]);
    }

    #[test]
    fn test_tensor_round_trip_keeps_layout() {
        let device = Default::default();
        let volume = ramp([2, 3, 4]);
        let tensor = volume.to_tensor::<NdArray>(&device);
        assert_eq!(tensor.dims(), [1, 1, 2, 3, 4]);
        assert_eq!(Volume::from_tensor(tensor).unwrap(), volume);
    }
}
