//! Nearest-neighbour interpolation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use super::trait_::Interpolator;

/// Rounds to the nearest voxel. Used for label images such as brain masks,
/// where blending values would break the binary labelling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighborInterpolator;

impl NearestNeighborInterpolator {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Interpolator<B> for NearestNeighborInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [d0, d1, d2] = data.dims();

        let x = indices.clone().narrow(1, 0, 1).squeeze::<1>(1);
        let y = indices.clone().narrow(1, 1, 1).squeeze::<1>(1);
        let z = indices.narrow(1, 2, 1).squeeze::<1>(1);

        let x_i = x.round().clamp(0.0, (d2 - 1) as f64).int();
        let y_i = y.round().clamp(0.0, (d1 - 1) as f64).int();
        let z_i = z.round().clamp(0.0, (d0 - 1) as f64).int();

        let stride_z = (d1 * d2) as i32;
        let stride_y = d2 as i32;

        let idx = z_i * stride_z + y_i * stride_y + x_i;
        data.clone().reshape([d0 * d1 * d2]).gather(0, idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    #[test]
    fn test_nearest_keeps_labels_binary() {
        let device = Default::default();
        let mut values = vec![0.0f32; 27];
        values[13] = 1.0; // centre voxel
        let data = Tensor::<B, 3>::from_data(TensorData::new(values, [3, 3, 3]), &device);

        let indices = Tensor::<B, 2>::from_floats(
            [[1.2, 0.9, 1.4], [1.6, 1.0, 1.0], [-3.0, 0.0, 0.0]],
            &device,
        );
        let out: Vec<f32> = NearestNeighborInterpolator::new().interpolate(&data, indices).into_data().iter::<f32>().collect();
        assert_eq!(out, vec![1.0, 0.0, 0.0]);
    }
}
