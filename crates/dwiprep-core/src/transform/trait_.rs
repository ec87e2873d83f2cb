//! Transform trait for spatial coordinate transformations.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Maps points from one physical space to another.
///
/// This trait does not require `burn::module::Module`, so trainable modules
/// and fixed matrix transforms both implement it.
pub trait Transform<B: Backend, const D: usize> {
    /// Apply the transform to a batch of points `[N, D]`, returning `[N, D]`.
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2>;
}
