//! Optimizers for the native registration backend.

pub mod trait_;
pub mod adam;

pub use trait_::Optimizer;
pub use adam::AdamOptimizer;
