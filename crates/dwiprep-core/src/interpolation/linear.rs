//! Trilinear interpolation.

use burn::tensor::{Tensor, Int};
use burn::tensor::backend::Backend;
use serde::{Serialize, Deserialize};
use super::trait_::Interpolator;

/// Trilinear interpolator, used for intensity images.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinearInterpolator;

impl LinearInterpolator {
    pub fn new() -> Self {
        Self
    }
}

/// Lower and upper neighbour along one axis, clamped to the grid, plus the
/// fractional distance from the lower one.
struct AxisNeighbours<B: Backend> {
    lower: Tensor<B, 1, Int>,
    upper: Tensor<B, 1, Int>,
    frac: Tensor<B, 1>,
}

impl<B: Backend> AxisNeighbours<B> {
    fn new(coords: Tensor<B, 1>, size: usize) -> Self {
        let last = (size - 1) as f64;
        let floor = coords.clone().floor();
        Self {
            lower: floor.clone().clamp(0.0, last).int(),
            upper: (floor.clone() + 1.0).clamp(0.0, last).int(),
            frac: coords - floor,
        }
    }

    fn pick(&self, upper: bool) -> (Tensor<B, 1, Int>, Tensor<B, 1>) {
        if upper {
            (self.upper.clone(), self.frac.clone())
        } else {
            (self.lower.clone(), self.frac.clone().neg() + 1.0)
        }
    }
}

impl<B: Backend> Interpolator<B> for LinearInterpolator {
    fn interpolate(&self, data: &Tensor<B, 3>, indices: Tensor<B, 2>) -> Tensor<B, 1> {
        let [nz, ny, nx] = data.dims();
        let column = |c: usize| indices.clone().narrow(1, c, 1).squeeze::<1>(1);
        let xs = AxisNeighbours::new(column(0), nx);
        let ys = AxisNeighbours::new(column(1), ny);
        let zs = AxisNeighbours::new(column(2), nz);

        let flat = data.clone().reshape([nz * ny * nx]);
        let row = nx as i32;
        let slice = (ny * nx) as i32;

        // Sum of the eight corner values, each weighted by the volume of the
        // opposite sub-cell.
        let mut result = Tensor::<B, 1>::zeros([indices.dims()[0]], &indices.device());
        for corner in 0..8u8 {
            let (xi, wx) = xs.pick(corner & 1 != 0);
            let (yi, wy) = ys.pick(corner & 2 != 0);
            let (zi, wz) = zs.pick(corner & 4 != 0);
            let offset = zi * slice + yi * row + xi;
            result = result + flat.clone().gather(0, offset) * wx * wy * wz;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray<f32>;

    fn ramp(device: &<B as Backend>::Device) -> Tensor<B, 3> {
        // value = x + 10 y + 100 z on a 3x3x3 grid
        let mut values = Vec::new();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    values.push((x + 10 * y + 100 * z) as f32);
                }
            }
        }
        Tensor::from_data(TensorData::new(values, [3, 3, 3]), device)
    }

    #[test]
    fn test_linear_exact_at_grid_points() {
        let device = Default::default();
        let data = ramp(&device);
        let indices = Tensor::<B, 2>::from_floats([[1.0, 2.0, 0.0], [2.0, 0.0, 1.0]], &device);
        let out: Vec<f32> = LinearInterpolator::new().interpolate(&data, indices).into_data().iter::<f32>().collect();
        assert_eq!(out, vec![21.0, 102.0]);
    }

    #[test]
    fn test_linear_reproduces_ramp_between_points() {
        let device = Default::default();
        let data = ramp(&device);
        let indices = Tensor::<B, 2>::from_floats([[0.5, 1.25, 1.5]], &device);
        let out: Vec<f32> = LinearInterpolator::new().interpolate(&data, indices).into_data().iter::<f32>().collect();
        assert!((out[0] - 163.0).abs() < 1e-3);
    }
}
