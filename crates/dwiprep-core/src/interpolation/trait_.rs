//! Interpolator trait for sampling values at continuous coordinates.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

/// Samples a `[Z, Y, X]` volume at continuous indices.
///
/// Indices are rows `(x, y, z)` of a `[N, 3]` tensor. Coordinates outside the
/// grid are clamped to the border; callers that need a fill value outside the
/// field of view mask the result themselves.
pub trait Interpolator<B: Backend> {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1>;
}
