//! Mean Squared Error metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use dwiprep_core::image::Image;
use dwiprep_core::interpolation::LinearInterpolator;
use dwiprep_core::transform::Transform;
use super::trait_::{sample_pair, Metric};

/// Mean Squared Error Metric.
///
/// MSE = (1/N) * sum((Fixed(x) - Moving(T(x)))^2)
#[derive(Debug, Clone, Default)]
pub struct MeanSquaredError {
    interpolator: LinearInterpolator,
}

impl MeanSquaredError {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric<B> for MeanSquaredError {
    fn forward(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, transform: &impl Transform<B, 3>) -> Tensor<B, 1> {
        let (fixed_values, moving_values) = sample_pair(fixed, moving, transform, &self.interpolator);
        (moving_values - fixed_values).powf_scalar(2.0).mean()
    }

    fn name(&self) -> &'static str {
        "MeanSquaredError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use dwiprep_core::spatial::{Direction3, Point3, Spacing3};
    use dwiprep_core::transform::RigidTransform;

    type B = NdArray<f32>;

    fn ramp(offset: f32) -> Image<B, 3> {
        let d = 5;
        let mut data = Vec::with_capacity(d * d * d);
        for z in 0..d {
            for y in 0..d {
                for x in 0..d {
                    data.push((x + y + z) as f32 + offset);
                }
            }
        }
        let device = Default::default();
        let tensor = Tensor::<B, 3>::from_data(TensorData::new(data, [d, d, d]), &device);
        Image::new(tensor, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    #[test]
    fn test_mse_identity() {
        let image = ramp(0.0);
        let transform = RigidTransform::<B>::identity(Point3::new(2.0, 2.0, 2.0), &Default::default());
        let loss: f32 = MeanSquaredError::new().forward(&image, &image, &transform).into_scalar();
        assert!(loss < 1e-5, "MSE should be 0 for identical images, got {}", loss);
    }

    #[test]
    fn test_mse_constant_offset() {
        let transform = RigidTransform::<B>::identity(Point3::origin(), &Default::default());
        let loss: f32 = MeanSquaredError::new()
            .forward(&ramp(0.0), &ramp(2.0), &transform)
            .into_scalar();
        assert!((loss - 4.0).abs() < 1e-4, "got {}", loss);
    }
}
