//! Affine transform (linear map + translation).

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::module::{Module, Param};
use crate::spatial::{Matrix4, Point3};
use super::rigid::{affine_from_parts, tensor_to_matrix3, tensor_to_vec};
use super::trait_::Transform;

/// Affine 3-D transform with a fixed centre.
///
/// `T(x) = A(x - c) + c + t`, twelve degrees of freedom (rotation, scale,
/// shear and translation).
#[derive(Module, Debug)]
pub struct AffineTransform<B: Backend> {
    matrix: Param<Tensor<B, 2>>,
    translation: Param<Tensor<B, 1>>,
    center: Tensor<B, 1>,
}

impl<B: Backend> AffineTransform<B> {
    pub fn new(matrix: Tensor<B, 2>, translation: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        Self {
            matrix: Param::from_tensor(matrix),
            translation: Param::from_tensor(translation),
            center,
        }
    }

    /// Identity transform about `center`.
    pub fn identity(center: Point3, device: &B::Device) -> Self {
        let center = Tensor::<B, 1>::from_floats(
            [center.x as f32, center.y as f32, center.z as f32],
            device,
        );
        Self::new(
            Tensor::<B, 2>::eye(3, device),
            Tensor::<B, 1>::zeros([3], device),
            center,
        )
    }

    pub fn matrix(&self) -> Tensor<B, 2> {
        self.matrix.val()
    }

    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }

    /// The current parameters as a homogeneous matrix.
    pub fn to_matrix(&self) -> Matrix4 {
        let linear = tensor_to_matrix3(self.matrix.val());
        let t = tensor_to_vec(self.translation.val());
        let c = tensor_to_vec(self.center.clone());
        affine_from_parts(&linear, &c, &t)
    }
}

impl<B: Backend> Transform<B, 3> for AffineTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // Row vectors: y = (x - c) @ A^T + c + t
        let c = self.center.clone().reshape([1, 3]);
        let t = self.translation.val().reshape([1, 3]);
        let a = self.matrix.val();

        (points - c.clone()).matmul(a.transpose()) + c + t
    }
}
