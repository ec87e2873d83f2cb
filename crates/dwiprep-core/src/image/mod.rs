//! Image types.
//!
//! `Image` is a single volume with physical metadata; `ImageSeries` is the
//! 4-D diffusion acquisition as an ordered list of volumes on one grid.

pub mod image;
pub mod grid;
pub mod series;

pub use image::Image;
pub use grid::generate_grid;
pub use series::{ImageSeries, SeriesError};
