use burn::tensor::{Int, Tensor};
use burn::tensor::backend::Backend;
use crate::image::Image;

/// Downsample filter.
///
/// Keeps every `factor`-th voxel along each axis and scales the spacing to
/// match. The first voxel keeps its position, so the origin is unchanged.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleFilter {
    factor: usize,
}

impl DownsampleFilter {
    /// `factor` of 0 or 1 leaves the image unchanged.
    pub fn new(factor: usize) -> Self {
        Self { factor: factor.max(1) }
    }

    pub fn apply<B: Backend>(&self, image: &Image<B, 3>) -> Image<B, 3> {
        if self.factor == 1 {
            return image.clone();
        }
        let mut data = image.data().clone();
        let device = data.device();
        let dims = data.dims();

        for (d, &size) in dims.iter().enumerate() {
            let keep: Vec<i32> = (0..size).step_by(self.factor).map(|i| i as i32).collect();
            let indices = Tensor::<B, 1, Int>::from_ints(keep.as_slice(), &device);
            data = data.select(d, indices);
        }

        // Tensor axes are [Z, Y, X]; spacing is (x, y, z), and every axis is scaled alike.
        let spacing = *image.spacing() * self.factor as f64;
        Image::new(data, *image.origin(), spacing, *image.direction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use crate::spatial::{Point3, Spacing3, Direction3};

    #[test]
    fn test_downsample_shape_and_spacing() {
        let device = Default::default();
        let image = Image::new(
            Tensor::<NdArray<f32>, 3>::zeros([9, 10, 11], &device),
            Point3::new(1.0, 2.0, 3.0),
            Spacing3::new(1.0, 2.0, 3.0),
            Direction3::identity(),
        );
        let small = DownsampleFilter::new(2).apply(&image);
        assert_eq!(small.shape(), [5, 5, 6]);
        assert_eq!(small.spacing(), &Spacing3::new(2.0, 4.0, 6.0));
        assert_eq!(small.origin(), image.origin());
    }
}
