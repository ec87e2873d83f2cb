//! Metric trait for image similarity measurement.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use dwiprep_core::image::{generate_grid, Image};
use dwiprep_core::interpolation::Interpolator;
use dwiprep_core::transform::Transform;

/// Dissimilarity between a fixed volume and a moving volume seen through a
/// transform. Lower is better.
///
/// The transform maps fixed physical points into the moving image, so the
/// estimated module is the inverse of the forward moving → fixed mapping.
pub trait Metric<B: Backend> {
    /// Scalar loss tensor of shape `[1]`.
    fn forward(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, transform: &impl Transform<B, 3>) -> Tensor<B, 1>;

    fn name(&self) -> &'static str;
}

/// Keeps the per-dispatch point count bounded on large volumes.
const CHUNK_SIZE: usize = 32768;

/// Fixed intensities and moving intensities sampled at the transformed fixed
/// grid, both flattened to `[N]` in storage order.
pub(crate) fn sample_pair<B, I, T>(
    fixed: &Image<B, 3>,
    moving: &Image<B, 3>,
    transform: &T,
    interpolator: &I,
) -> (Tensor<B, 1>, Tensor<B, 1>)
where
    B: Backend,
    I: Interpolator<B>,
    T: Transform<B, 3>,
{
    let device = fixed.data().device();
    let fixed_indices = generate_grid::<B>(fixed.shape(), &device);
    let [n, _] = fixed_indices.dims();

    let sample = |indices: Tensor<B, 2>| {
        let fixed_points = fixed.index_to_world_tensor(indices);
        let moving_points = transform.transform_points(fixed_points);
        let moving_indices = moving.world_to_index_tensor(moving_points);
        interpolator.interpolate(moving.data(), moving_indices)
    };

    let moving_values = if n <= CHUNK_SIZE {
        sample(fixed_indices)
    } else {
        let chunks = (0..n)
            .step_by(CHUNK_SIZE)
            .map(|start| {
                let end = (start + CHUNK_SIZE).min(n);
                sample(fixed_indices.clone().slice([start..end]))
            })
            .collect();
        Tensor::cat(chunks, 0)
    };

    (fixed.data().clone().reshape([n]), moving_values)
}
