//! Resample image filter.
//!
//! Resamples an image onto a target grid through a transform and an
//! interpolator.

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use crate::image::{generate_grid, Image};
use crate::spatial::{Direction, Point, Spacing};
use crate::transform::Transform;
use crate::interpolation::Interpolator;

/// Half a voxel of slack so border voxels survive nearest-neighbour rounding.
const FOV_MARGIN: f64 = 0.5;

/// Resample image filter.
///
/// The transform maps output physical space to input physical space, which
/// is the inverse of a forward moving → fixed registration matrix. Output
/// voxels whose source lies outside the input grid take the default value.
pub struct ResampleImageFilter<T, I> {
    size: [usize; 3],
    origin: Point<3>,
    spacing: Spacing<3>,
    direction: Direction<3>,
    transform: T,
    interpolator: I,
    default_pixel_value: f64,
}

impl<T, I> ResampleImageFilter<T, I> {
    /// Create a filter producing an image of the given size and geometry.
    pub fn new(
        size: [usize; 3],
        origin: Point<3>,
        spacing: Spacing<3>,
        direction: Direction<3>,
        transform: T,
        interpolator: I,
    ) -> Self {
        Self {
            size,
            origin,
            spacing,
            direction,
            transform,
            interpolator,
            default_pixel_value: 0.0,
        }
    }

    /// Create a filter on the grid of `reference`.
    pub fn new_from_reference<B: Backend>(reference: &Image<B, 3>, transform: T, interpolator: I) -> Self {
        Self::new(
            reference.shape(),
            *reference.origin(),
            *reference.spacing(),
            *reference.direction(),
            transform,
            interpolator,
        )
    }

    /// Set the value used outside the input field of view.
    pub fn with_default_pixel_value(mut self, value: f64) -> Self {
        self.default_pixel_value = value;
        self
    }

    /// Apply the filter to an input image.
    pub fn apply<B>(&self, input: &Image<B, 3>) -> Image<B, 3>
    where
        B: Backend,
        T: Transform<B, 3>,
        I: Interpolator<B>,
    {
        let device = input.data().device();
        let reference = Image::new(
            Tensor::<B, 3>::zeros([1, 1, 1], &device),
            self.origin,
            self.spacing,
            self.direction,
        );

        let output_indices = generate_grid::<B>(self.size, &device);
        let output_points = reference.index_to_world_tensor(output_indices);
        let input_points = self.transform.transform_points(output_points);
        let input_indices = input.world_to_index_tensor(input_points);

        let inside = inside_mask(&input_indices, input.shape());
        let values = self.interpolator.interpolate(input.data(), input_indices);
        let outside = inside.clone().neg().add_scalar(1.0);
        let filled = values * inside + outside.mul_scalar(self.default_pixel_value);

        Image::new(
            filled.reshape(self.size),
            self.origin,
            self.spacing,
            self.direction,
        )
    }
}

/// 1.0 where the `(x, y, z)` index falls inside a `[Z, Y, X]` grid, else 0.0.
fn inside_mask<B: Backend>(indices: &Tensor<B, 2>, shape: [usize; 3]) -> Tensor<B, 1> {
    let n = indices.dims()[0];
    let mut mask = Tensor::<B, 1>::ones([n], &indices.device());
    for axis in 0..3 {
        let extent = shape[2 - axis] as f64;
        let coord = indices.clone().narrow(1, axis, 1).squeeze::<1>(1);
        let above = coord.clone().greater_equal_elem(-FOV_MARGIN).float();
        let below = coord.lower_equal_elem(extent - 1.0 + FOV_MARGIN).float();
        mask = mask * above * below;
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use crate::interpolation::{LinearInterpolator, NearestNeighborInterpolator};
    use crate::spatial::{Matrix4, Point3, Spacing3, Direction3};
    use crate::transform::MatrixTransform;

    type TestBackend = NdArray<f32>;

    fn cube_image() -> Image<TestBackend, 3> {
        let device = Default::default();
        let mut data = vec![0.0f32; 10 * 10 * 10];
        for z in 4..6 {
            for y in 4..6 {
                for x in 4..6 {
                    data[z * 100 + y * 10 + x] = 1.0;
                }
            }
        }
        let tensor = Tensor::<TestBackend, 3>::from_data(TensorData::new(data, [10, 10, 10]), &device);
        Image::new(tensor, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    fn shift(x: f64, y: f64, z: f64) -> Matrix4 {
        let mut m = Matrix4::identity();
        m[(0, 3)] = x;
        m[(1, 3)] = y;
        m[(2, 3)] = z;
        m
    }

    #[test]
    fn test_resample_translation() {
        let image = cube_image();
        let device = Default::default();
        // Output point p samples input at p - (2, 1, 0): content moves by +2 in x, +1 in y.
        let transform = MatrixTransform::<TestBackend>::new(&shift(-2.0, -1.0, 0.0), &device);
        let filter = ResampleImageFilter::new_from_reference(&image, transform, LinearInterpolator::new());

        let values = filter.apply(&image).values();
        assert!(values[4 * 100 + 5 * 10 + 6] > 0.9);
        assert!(values[5 * 100 + 6 * 10 + 7] > 0.9);
        assert!(values[4 * 100 + 4 * 10 + 4] < 0.1);
    }

    #[test]
    fn test_outside_field_of_view_uses_default() {
        let image = cube_image().with_data(Tensor::ones([10, 10, 10], &Default::default()));
        let device = Default::default();
        let transform = MatrixTransform::<TestBackend>::new(&shift(5.0, 0.0, 0.0), &device);
        let filter = ResampleImageFilter::new_from_reference(&image, transform, NearestNeighborInterpolator::new())
            .with_default_pixel_value(-1.0);

        let values = filter.apply(&image).values();
        // x = 0 samples input x = 5; x = 9 samples x = 14, outside.
        assert_eq!(values[0], 1.0);
        assert_eq!(values[9], -1.0);
    }
}
