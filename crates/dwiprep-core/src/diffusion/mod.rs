//! Diffusion gradient tables.

pub mod gradient;

pub use gradient::{b0_indices, GradientTable, TableLengthMismatch, DEFAULT_B0_THRESHOLD};
