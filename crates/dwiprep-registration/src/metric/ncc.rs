//! Normalized Cross Correlation (NCC) metric implementation.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use dwiprep_core::image::Image;
use dwiprep_core::interpolation::LinearInterpolator;
use dwiprep_core::transform::Transform;
use super::trait_::{sample_pair, Metric};

/// Normalized Cross Correlation Metric.
///
/// NCC = sum((F - mean(F)) * (M - mean(M))) / sqrt(sum((F - mean(F))^2) * sum((M - mean(M))^2))
///
/// Returns `-NCC` as the loss, so `-1` is a perfect linear match. Insensitive
/// to global gain and offset, which suits b0 volumes from different sessions.
#[derive(Debug, Clone, Default)]
pub struct NormalizedCrossCorrelation {
    interpolator: LinearInterpolator,
}

impl NormalizedCrossCorrelation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend> Metric<B> for NormalizedCrossCorrelation {
    fn forward(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, transform: &impl Transform<B, 3>) -> Tensor<B, 1> {
        let (fixed_values, moving_values) = sample_pair(fixed, moving, transform, &self.interpolator);

        let f_centered = fixed_values.clone() - fixed_values.mean();
        let m_centered = moving_values.clone() - moving_values.mean();

        let numerator = (f_centered.clone() * m_centered.clone()).sum();
        let denom_f = f_centered.powf_scalar(2.0).sum();
        let denom_m = m_centered.powf_scalar(2.0).sum();

        let epsilon = 1e-10;
        let denominator = (denom_f * denom_m).sqrt() + epsilon;
        (numerator / denominator).neg()
    }

    fn name(&self) -> &'static str {
        "NormalizedCrossCorrelation"
    }
}
