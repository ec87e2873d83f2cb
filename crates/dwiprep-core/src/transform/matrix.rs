//! Fixed homogeneous-matrix transform.

use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;
use crate::spatial::Matrix4;
use super::trait_::Transform;

/// Applies a fixed 4×4 homogeneous matrix to physical points.
///
/// Not trainable; used to resample with an already estimated transform.
#[derive(Debug, Clone)]
pub struct MatrixTransform<B: Backend> {
    linear_t: Tensor<B, 2>,
    offset: Tensor<B, 2>,
}

impl<B: Backend> MatrixTransform<B> {
    pub fn new(matrix: &Matrix4, device: &B::Device) -> Self {
        // Stored transposed so row vectors multiply on the left.
        let mut linear_t = Vec::with_capacity(9);
        for r in 0..3 {
            for c in 0..3 {
                linear_t.push(matrix[(c, r)] as f32);
            }
        }
        let offset: Vec<f32> = (0..3).map(|r| matrix[(r, 3)] as f32).collect();

        Self {
            linear_t: Tensor::from_data(TensorData::new(linear_t, [3, 3]), device),
            offset: Tensor::from_data(TensorData::new(offset, [1, 3]), device),
        }
    }
}

impl<B: Backend> Transform<B, 3> for MatrixTransform<B> {
    fn transform_points(&self, points: Tensor<B, 2>) -> Tensor<B, 2> {
        points.matmul(self.linear_t.clone()) + self.offset.clone()
    }
}
