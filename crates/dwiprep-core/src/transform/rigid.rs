//! Rigid transform (rotation + translation).

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::module::{Module, Param};
use crate::spatial::{Matrix3, Matrix4, Point3};
use super::trait_::Transform;

/// Rigid 3-D transform with a fixed centre of rotation.
///
/// `T(x) = R(x - c) + c + t` where `R = Rz(gamma) * Ry(beta) * Rx(alpha)` is
/// built from three Euler angles in radians. Six degrees of freedom.
#[derive(Module, Debug)]
pub struct RigidTransform<B: Backend> {
    translation: Param<Tensor<B, 1>>,
    rotation: Param<Tensor<B, 1>>,
    center: Tensor<B, 1>,
}

impl<B: Backend> RigidTransform<B> {
    pub fn new(translation: Tensor<B, 1>, rotation: Tensor<B, 1>, center: Tensor<B, 1>) -> Self {
        Self {
            translation: Param::from_tensor(translation),
            rotation: Param::from_tensor(rotation),
            center,
        }
    }

    /// Identity transform rotating about `center`.
    pub fn identity(center: Point3, device: &B::Device) -> Self {
        let center = Tensor::<B, 1>::from_floats(
            [center.x as f32, center.y as f32, center.z as f32],
            device,
        );
        Self::new(
            Tensor::<B, 1>::zeros([3], device),
            Tensor::<B, 1>::zeros([3], device),
            center,
        )
    }

    pub fn translation(&self) -> Tensor<B, 1> {
        self.translation.val()
    }

    pub fn rotation(&self) -> Tensor<B, 1> {
        self.rotation.val()
    }

    pub fn center(&self) -> Tensor<B, 1> {
        self.center.clone()
    }

    /// Rotation matrix from the Euler angles, as a `[3, 3]` tensor.
    fn build_rotation_matrix(&self) -> Tensor<B, 2> {
        let r = self.rotation.val();
        let alpha = r.clone().slice([0..1]);
        let beta = r.clone().slice([1..2]);
        let gamma = r.slice([2..3]);

        let cx = alpha.clone().cos();
        let sx = alpha.sin();
        let cy = beta.clone().cos();
        let sy = beta.sin();
        let cz = gamma.clone().cos();
        let sz = gamma.sin();

        let r11 = cz.clone().mul(cy.clone());
        let r12 = cz.clone().mul(sy.clone()).mul(sx.clone()).sub(sz.clone().mul(cx.clone()));
        let r13 = cz.clone().mul(sy.clone()).mul(cx.clone()).add(sz.clone().mul(sx.clone()));

        let r21 = sz.clone().mul(cy.clone());
        let r22 = sz.clone().mul(sy.clone()).mul(sx.clone()).add(cz.clone().mul(cx.clone()));
        let r23 = sz.mul(sy.clone()).mul(cx.clone()).sub(cz.mul(sx.clone()));

        let r31 = sy.neg();
        let r32 = cy.clone().mul(sx);
        let r33 = cy.mul(cx);

        let row1 = Tensor::cat(vec![r11, r12, r13], 0).reshape([1, 3]);
        let row2 = Tensor::cat(vec![r21, r22, r23], 0).reshape([1, 3]);
        let row3 = Tensor::cat(vec![r31, r32, r33], 0).reshape([1, 3]);

        Tensor::cat(vec![row1, row2, row3], 0)
    }

    /// The current parameters as a homogeneous matrix: `x -> R x + (c + t - R c)`.
    pub fn to_matrix(&self) -> Matrix4 {
        let rotation = tensor_to_matrix3(self.build_rotation_matrix());
        let t = tensor_to_vec(self.translation.val());
        let c = tensor_to_vec(self.center.clone());
        affine_from_parts(&rotation, &c, &t)
    }
}

impl<B: Backend> Transform<B, 3> for RigidTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        // Row vectors: y = (x - c) @ R^T + c + t
        let r = self.build_rotation_matrix();
        let t = self.translation.val().reshape([1, 3]);
        let c = self.center.clone().reshape([1, 3]);

        (points - c.clone()).matmul(r.transpose()) + c + t
    }
}

pub(crate) fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    tensor.into_data().iter::<f64>().collect()
}

pub(crate) fn tensor_to_matrix3<B: Backend>(tensor: Tensor<B, 2>) -> Matrix3 {
    let values: Vec<f64> = tensor.into_data().iter::<f64>().collect();
    Matrix3::from_row_slice(&values)
}

/// `x -> A (x - c) + c + t` as a homogeneous matrix.
pub(crate) fn affine_from_parts(linear: &Matrix3, center: &[f64], translation: &[f64]) -> Matrix4 {
    let c = nalgebra::Vector3::new(center[0], center[1], center[2]);
    let t = nalgebra::Vector3::new(translation[0], translation[1], translation[2]);
    let offset = c + t - linear * c;

    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(linear);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(&offset);
    m
}
