//! Ordered 4-D image series.

use burn::tensor::backend::Backend;
use thiserror::Error;
use super::image::Image;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SeriesError {
    #[error("image series has no volumes")]
    Empty,

    #[error("volume {index} has shape {actual:?}, series shape is {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("volume index {index} out of range for a series of {len}")]
    OutOfRange { index: usize, len: usize },
}

/// A diffusion acquisition: volumes in acquisition order, all on one grid.
///
/// The volume axis is the gradient axis. Position `k` in the series is
/// position `k` in the run's strength and direction tables, and every
/// operation here preserves that order.
#[derive(Debug, Clone)]
pub struct ImageSeries<B: Backend> {
    volumes: Vec<Image<B, 3>>,
}

impl<B: Backend> ImageSeries<B> {
    /// Build a series, rejecting empty input and volumes of differing shape.
    pub fn new(volumes: Vec<Image<B, 3>>) -> Result<Self, SeriesError> {
        let expected = volumes.first().ok_or(SeriesError::Empty)?.shape();
        for (index, volume) in volumes.iter().enumerate() {
            let actual = volume.shape();
            if actual != expected {
                return Err(SeriesError::ShapeMismatch { index, expected, actual });
            }
        }
        Ok(Self { volumes })
    }

    pub fn from_volume(volume: Image<B, 3>) -> Self {
        Self { volumes: vec![volume] }
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Always false; a series holds at least one volume.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Spatial shape shared by all volumes, `[Z, Y, X]`.
    pub fn shape(&self) -> [usize; 3] {
        self.reference().shape()
    }

    /// The first volume; its geometry describes the series grid.
    pub fn reference(&self) -> &Image<B, 3> {
        &self.volumes[0]
    }

    pub fn volume(&self, index: usize) -> Option<&Image<B, 3>> {
        self.volumes.get(index)
    }

    pub fn volumes(&self) -> &[Image<B, 3>] {
        &self.volumes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Image<B, 3>> {
        self.volumes.iter()
    }

    pub fn into_volumes(self) -> Vec<Image<B, 3>> {
        self.volumes
    }

    /// Select volumes by index, in the order given.
    pub fn select(&self, indices: &[usize]) -> Result<Self, SeriesError> {
        let len = self.len();
        let volumes = indices
            .iter()
            .map(|&index| {
                self.volumes
                    .get(index)
                    .cloned()
                    .ok_or(SeriesError::OutOfRange { index, len })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(volumes)
    }

    /// Append `other` after `self` along the volume axis.
    pub fn concat(mut self, other: Self) -> Result<Self, SeriesError> {
        self.volumes.extend(other.volumes);
        Self::new(self.volumes)
    }

    /// Apply `f` to every volume, keeping order.
    pub fn map_volumes<F>(&self, f: F) -> Result<Self, SeriesError>
    where
        F: FnMut(&Image<B, 3>) -> Image<B, 3>,
    {
        Self::new(self.volumes.iter().map(f).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use crate::spatial::{Point3, Spacing3, Direction3};

    type Backend = NdArray<f32>;

    fn constant_volume(value: f32, shape: [usize; 3]) -> Image<Backend, 3> {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::ones(shape, &device) * value;
        Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    fn markers(series: &ImageSeries<Backend>) -> Vec<f32> {
        series.iter().map(|v| v.values()[0]).collect()
    }

    #[test]
    fn test_empty_series_rejected() {
        assert_eq!(ImageSeries::<Backend>::new(vec![]).unwrap_err(), SeriesError::Empty);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = ImageSeries::new(vec![
            constant_volume(0.0, [2, 2, 2]),
            constant_volume(1.0, [2, 2, 3]),
        ])
        .unwrap_err();
        assert!(matches!(err, SeriesError::ShapeMismatch { index: 1, .. }));
    }

    #[test]
    fn test_select_and_concat_keep_order() {
        let series = ImageSeries::new((0..4).map(|i| constant_volume(i as f32, [2, 2, 2])).collect()).unwrap();
        let picked = series.select(&[3, 0]).unwrap();
        assert_eq!(markers(&picked), vec![3.0, 0.0]);

        let joined = picked.concat(series.select(&[1]).unwrap()).unwrap();
        assert_eq!(markers(&joined), vec![3.0, 0.0, 1.0]);
    }

    #[test]
    fn test_select_out_of_range() {
        let series = ImageSeries::from_volume(constant_volume(0.0, [2, 2, 2]));
        assert_eq!(
            series.select(&[1]).unwrap_err(),
            SeriesError::OutOfRange { index: 1, len: 1 }
        );
    }
}
