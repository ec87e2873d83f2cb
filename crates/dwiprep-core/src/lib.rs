//! Core primitives for diffusion MRI preprocessing.
//!
//! Volumes carry their physical geometry alongside burn tensors, transforms
//! map physical points between image spaces, and the gradient table keeps
//! per-volume strengths and directions co-indexed with the image series.

pub mod spatial;
pub mod image;
pub mod transform;
pub mod interpolation;
pub mod filter;
pub mod diffusion;

pub use image::{Image, ImageSeries};
pub use spatial::{Point, Vector, Spacing, Direction};
pub use diffusion::{GradientTable, b0_indices};
