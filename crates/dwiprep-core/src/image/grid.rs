use burn::tensor::{Tensor, TensorData};
use burn::tensor::backend::Backend;

/// Generate the continuous indices of every voxel in a `[Z, Y, X]` volume.
///
/// Returns a tensor of shape `[N, 3]` with rows `(x, y, z)` in storage order,
/// so row `k` addresses the `k`-th element of the flattened volume.
pub fn generate_grid<B: Backend>(shape: [usize; 3], device: &B::Device) -> Tensor<B, 2> {
    let [d, h, w] = shape;
    let total = d * h * w;

    let mut grid = Vec::with_capacity(total * 3);
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                grid.push(x as f32);
                grid.push(y as f32);
                grid.push(z as f32);
            }
        }
    }

    Tensor::<B, 1>::from_data(TensorData::new(grid, [total * 3]), device).reshape([total, 3])
}
