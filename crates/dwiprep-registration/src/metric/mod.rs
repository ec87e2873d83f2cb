//! Similarity metrics for the native registration backend.

pub mod trait_;
pub mod mse;
pub mod ncc;

pub use trait_::Metric;
pub use mse::MeanSquaredError;
pub use ncc::NormalizedCrossCorrelation;
