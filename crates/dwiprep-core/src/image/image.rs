//! Image type with physical metadata and coordinate transformations.
//!
//! An image pairs tensor data with the geometry (origin, spacing, direction)
//! that maps voxel indices into scanner space.

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::spatial::{Point, Spacing, Direction, Vector, Matrix4};

/// Medical image with physical metadata.
///
/// Data is stored with the slowest axis first, so a 3-D volume is `[Z, Y, X]`.
/// Continuous indices and physical points are always ordered `(x, y, z)`.
///
/// # Examples
/// ```rust
/// use dwiprep_core::Image;
/// use dwiprep_core::spatial::{Point3, Spacing3, Direction3};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let origin = Point3::new(0.0, 0.0, 0.0);
/// let spacing = Spacing3::new(1.0, 1.0, 1.0);
/// let image = Image::new(data, origin, spacing, Direction3::identity());
/// assert_eq!(image.shape(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Image<B: Backend, const D: usize> {
    /// The voxel data.
    data: Tensor<B, D>,
    /// Physical coordinate of the first voxel (index 0,0,0).
    origin: Point<D>,
    /// Physical distance between voxels along each axis.
    spacing: Spacing<D>,
    /// Orientation of the image axes.
    direction: Direction<D>,
}

impl<B: Backend, const D: usize> Image<B, D> {
    /// Create a new image with the given data and metadata.
    pub fn new(
        data: Tensor<B, D>,
        origin: Point<D>,
        spacing: Spacing<D>,
        direction: Direction<D>,
    ) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Replace the voxel data while keeping the geometry.
    pub fn with_data(&self, data: Tensor<B, D>) -> Self {
        Self::new(data, self.origin, self.spacing, self.direction)
    }

    pub fn data(&self) -> &Tensor<B, D> {
        &self.data
    }

    pub fn into_data(self) -> Tensor<B, D> {
        self.data
    }

    pub fn origin(&self) -> &Point<D> {
        &self.origin
    }

    pub fn spacing(&self) -> &Spacing<D> {
        &self.spacing
    }

    pub fn direction(&self) -> &Direction<D> {
        &self.direction
    }

    /// Image shape in storage order (`[Z, Y, X]` for volumes).
    pub fn shape(&self) -> [usize; D] {
        self.data.dims()
    }

    /// Number of voxels.
    pub fn num_voxels(&self) -> usize {
        self.shape().iter().product()
    }

    /// Physical volume of a single voxel.
    pub fn voxel_volume(&self) -> f64 {
        self.spacing.iter().product()
    }

    /// True when both images sample the same voxel grid.
    pub fn same_grid(&self, other: &Self) -> bool {
        const TOL: f64 = 1e-4;
        self.shape() == other.shape()
            && (self.origin - other.origin).norm() < TOL
            && (self.spacing - other.spacing).norm() < TOL
            && (self.direction - other.direction).norm() < TOL
    }

    /// Voxel values in storage order.
    pub fn values(&self) -> Vec<f32> {
        self.data.to_data().iter::<f32>().collect()
    }

    // Direction cosines are orthonormal for any image read from disk, so the
    // transpose stands in when the numeric inverse is unavailable.
    fn inverse_direction(&self) -> Direction<D> {
        self.direction
            .try_inverse()
            .unwrap_or_else(|| self.direction.transpose())
    }

    /// Convert a physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn transform_physical_point_to_continuous_index(&self, point: &Point<D>) -> Point<D> {
        let rotated = self.inverse_direction() * (*point - self.origin);
        let mut index = Point::<D>::origin();
        for i in 0..D {
            index[i] = rotated[i] / self.spacing[i];
        }
        index
    }

    /// Convert a continuous index to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn transform_continuous_index_to_physical_point(&self, index: &Point<D>) -> Point<D> {
        let mut scaled_index = Vector::<D>::zeros();
        for i in 0..D {
            scaled_index[i] = index[i] * self.spacing[i];
        }
        self.origin + self.direction * scaled_index
    }

    fn origin_tensor(&self, device: &B::Device) -> Tensor<B, 2> {
        let origin_vec: Vec<f32> = (0..D).map(|i| self.origin[i] as f32).collect();
        Tensor::<B, 1>::from_data(TensorData::new(origin_vec, [D]), device).reshape([1, D])
    }

    /// Batch transform physical points `[N, D]` to continuous indices `[N, D]`.
    pub fn world_to_index_tensor(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = points.device();
        let origin_tensor = self.origin_tensor(&device);

        // I = (P - O) @ T with T_rc = (D^-1)_cr / S_c
        let inv_dir = self.inverse_direction();
        let mut t_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                t_data.push((inv_dir[(c, r)] / self.spacing[c]) as f32);
            }
        }
        let t_tensor = Tensor::<B, 2>::from_data(TensorData::new(t_data, [D, D]), &device);

        (points - origin_tensor).matmul(t_tensor)
    }

    /// Batch transform continuous indices `[N, D]` to physical points `[N, D]`.
    pub fn index_to_world_tensor(&self, indices: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = indices.device();
        let origin_tensor = self.origin_tensor(&device);

        // P = O + I @ M with M_rc = S_r * D_cr
        let mut m_data = Vec::with_capacity(D * D);
        for r in 0..D {
            for c in 0..D {
                m_data.push((self.spacing[r] * self.direction[(c, r)]) as f32);
            }
        }
        let m_tensor = Tensor::<B, 2>::from_data(TensorData::new(m_data, [D, D]), &device);

        indices.matmul(m_tensor) + origin_tensor
    }
}

impl<B: Backend> Image<B, 3> {
    /// Homogeneous voxel-to-world matrix, `[Direction * diag(spacing) | origin]`.
    pub fn affine(&self) -> Matrix4 {
        let mut affine = Matrix4::identity();
        for r in 0..3 {
            for c in 0..3 {
                affine[(r, c)] = self.direction[(r, c)] * self.spacing[c];
            }
            affine[(r, 3)] = self.origin[r];
        }
        affine
    }

    /// Physical coordinate of the voxel grid centre.
    pub fn physical_center(&self) -> Point<3> {
        let [nz, ny, nx] = self.shape();
        let center_index = Point::<3>::new(
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        );
        self.transform_continuous_index_to_physical_point(&center_index)
    }
}
