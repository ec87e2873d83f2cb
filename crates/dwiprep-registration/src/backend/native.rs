//! In-process estimation and application on burn tensors.

use super::{Aligner, Interpolation, Resampler};
use crate::error::{RegistrationError, Result};
use crate::metric::{MeanSquaredError, Metric, NormalizedCrossCorrelation};
use crate::multires::{MultiResolutionRegistration, RegistrationSchedule};
use crate::optimizer::AdamOptimizer;
use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use dwiprep_core::filter::ResampleImageFilter;
use dwiprep_core::image::{Image, ImageSeries};
use dwiprep_core::interpolation::{Interpolator, LinearInterpolator, NearestNeighborInterpolator};
use dwiprep_core::spatial::{Matrix3, Matrix4};
use dwiprep_core::transform::{
    AffineTransform, Dof, ImageSpace, MatrixConvention, MatrixTransform, RigidTransform, SpatialTransform, Transform,
};
use dwiprep_io::{read_nifti_series, read_reference_volume, read_transform, write_nifti, write_nifti_series, write_transform};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Mse,
    Ncc,
}

/// Optimisation settings for the native aligner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeSettings {
    pub iterations: usize,
    pub learning_rate: f64,
    pub pyramid_levels: usize,
    pub metric: MetricKind,
}

impl Default for NativeSettings {
    fn default() -> Self {
        Self {
            iterations: 200,
            learning_rate: 0.05,
            pyramid_levels: 3,
            metric: MetricKind::Ncc,
        }
    }
}

/// Gradient-descent aligner. Matrices are written in world millimetres
/// with a JSON sidecar.
#[derive(Debug, Clone)]
pub struct NativeAligner<B: AutodiffBackend> {
    settings: NativeSettings,
    device: B::Device,
}

impl<B: AutodiffBackend> NativeAligner<B> {
    pub fn new(settings: NativeSettings, device: B::Device) -> Self {
        Self { settings, device }
    }

    fn schedule(&self) -> RegistrationSchedule {
        RegistrationSchedule::new(self.settings.pyramid_levels, self.settings.iterations, self.settings.learning_rate)
    }

    fn optimize<T>(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, transform: T) -> Result<T>
    where
        T: Transform<B, 3> + AutodiffModule<B>,
    {
        match self.settings.metric {
            MetricKind::Mse => self.optimize_with(MeanSquaredError::new(), fixed, moving, transform),
            MetricKind::Ncc => self.optimize_with(NormalizedCrossCorrelation::new(), fixed, moving, transform),
        }
    }

    fn optimize_with<M, T>(&self, metric: M, fixed: &Image<B, 3>, moving: &Image<B, 3>, transform: T) -> Result<T>
    where
        M: Metric<B> + Clone,
        T: Transform<B, 3> + AutodiffModule<B>,
    {
        MultiResolutionRegistration::new(metric).execute(fixed, moving, transform, AdamOptimizer::new, &self.schedule())
    }

    /// Estimate the fixed → moving sampling transform as a matrix.
    ///
    /// Starts from the translation that lines up the two grid centres.
    pub fn estimate(&self, fixed: &Image<B, 3>, moving: &Image<B, 3>, dof: Dof) -> Result<Matrix4> {
        let center = fixed.physical_center();
        let offset = moving.physical_center() - center;
        let to_tensor = |v: [f64; 3]| Tensor::<B, 1>::from_floats([v[0] as f32, v[1] as f32, v[2] as f32], &self.device);
        let center_t = to_tensor([center.x, center.y, center.z]);
        let offset_t = to_tensor([offset.x, offset.y, offset.z]);

        let matrix = match dof {
            Dof::Rigid => {
                let initial = RigidTransform::new(offset_t, Tensor::zeros([3], &self.device), center_t);
                self.optimize(fixed, moving, initial)?.to_matrix()
            }
            Dof::Affine => {
                let initial = AffineTransform::new(Tensor::eye(3, &self.device), offset_t, center_t);
                self.optimize(fixed, moving, initial)?.to_matrix()
            }
        };
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::numerical_instability("estimated parameters are not finite"));
        }
        Ok(matrix)
    }
}

impl<B: AutodiffBackend> Aligner for NativeAligner<B>
where
    B::Device: Send + Sync,
{
    fn align(
        &self,
        moving: &Path,
        fixed: &Path,
        dof: Dof,
        matrix_out: &Path,
        image_out: &Path,
    ) -> Result<SpatialTransform> {
        let fixed_image = read_reference_volume::<B, _>(fixed, &self.device)?;
        let moving_image = read_reference_volume::<B, _>(moving, &self.device)?;
        tracing::info!(
            "Estimating {:?} transform {} -> {}",
            dof,
            moving.display(),
            fixed.display()
        );

        let sampling = self.estimate(&fixed_image, &moving_image, dof)?;
        let forward = sampling.try_inverse().ok_or_else(|| {
            RegistrationError::registration_failed(
                moving.display().to_string(),
                format!("singular estimate (det {:e})", sampling.fixed_view::<3, 3>(0, 0).determinant()),
            )
        })?;
        let transform = SpatialTransform::new(
            forward,
            dof,
            MatrixConvention::World,
            ImageSpace::of(&moving_image),
            ImageSpace::of(&fixed_image),
        )?;
        log_parameters(&transform);
        write_transform(matrix_out, &transform)?;

        let registered = resample_volume(&moving_image, &fixed_image, &transform, Interpolation::Linear)?;
        write_nifti(image_out, &registered)?;
        Ok(transform)
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

fn log_parameters(transform: &SpatialTransform) {
    let t = transform.translation();
    let scale: Matrix3 = transform.linear();
    tracing::debug!(
        "Forward translation ({:.3}, {:.3}, {:.3}) mm, det {:.4}",
        t.x,
        t.y,
        t.z,
        scale.determinant()
    );
}

/// Applies world-convention matrices with the resample filter.
#[derive(Debug, Clone)]
pub struct NativeResampler<B: Backend> {
    device: B::Device,
}

impl<B: Backend> NativeResampler<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Resampler for NativeResampler<B>
where
    B::Device: Send + Sync,
{
    fn apply(
        &self,
        input: &Path,
        reference: &Path,
        matrix: &Path,
        interpolation: Interpolation,
        output: &Path,
    ) -> Result<()> {
        let transform = read_transform(matrix)?;
        if transform.convention() != MatrixConvention::World {
            return Err(RegistrationError::invalid_configuration(format!(
                "{} is a FLIRT matrix; apply it with the fsl backend",
                matrix.display()
            )));
        }
        let reference = read_reference_volume::<B, _>(reference, &self.device)?;
        let series = read_nifti_series::<B, _>(input, &self.device)?;
        let resampled = resample_series(&series, &reference, &transform, interpolation)?;
        write_nifti_series(output, &resampled)?;
        Ok(())
    }
}

/// Resample one volume onto `reference`'s grid through a forward transform.
pub fn resample_volume<B: Backend>(
    volume: &Image<B, 3>,
    reference: &Image<B, 3>,
    transform: &SpatialTransform,
    interpolation: Interpolation,
) -> Result<Image<B, 3>> {
    let series = resample_series(&ImageSeries::from_volume(volume.clone()), reference, transform, interpolation)?;
    Ok(series.reference().clone())
}

/// Resample every volume of `series`, keeping volume order.
pub fn resample_series<B: Backend>(
    series: &ImageSeries<B>,
    reference: &Image<B, 3>,
    transform: &SpatialTransform,
    interpolation: Interpolation,
) -> Result<ImageSeries<B>> {
    // The filter maps output points back into the input, so it needs the inverse.
    let inverse = transform.inverse()?;
    let device = reference.data().device();
    let sampling = MatrixTransform::<B>::new(inverse.matrix(), &device);
    match interpolation {
        Interpolation::Linear => apply_filter(series, reference, sampling, LinearInterpolator::new()),
        Interpolation::NearestNeighbour => apply_filter(series, reference, sampling, NearestNeighborInterpolator::new()),
    }
}

fn apply_filter<B, I>(
    series: &ImageSeries<B>,
    reference: &Image<B, 3>,
    sampling: MatrixTransform<B>,
    interpolator: I,
) -> Result<ImageSeries<B>>
where
    B: Backend,
    I: Interpolator<B>,
{
    let filter = ResampleImageFilter::new_from_reference(reference, sampling, interpolator);
    Ok(series.map_volumes(|volume| filter.apply(volume))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use dwiprep_core::spatial::{Direction3, Point3, Spacing3};

    type B = NdArray<f32>;

    fn marker_volume(shape: [usize; 3]) -> Image<B, 3> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|i| (i % 7) as f32).collect();
        let data = Tensor::<B, 3>::from_data(TensorData::new(values, shape), &Default::default());
        Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    fn shift_x(dx: f64, image: &Image<B, 3>) -> SpatialTransform {
        let mut m = Matrix4::identity();
        m[(0, 3)] = dx;
        let space = ImageSpace::of(image);
        SpatialTransform::new(m, Dof::Rigid, MatrixConvention::World, space.clone(), space).unwrap()
    }

    #[test]
    fn test_forward_shift_moves_content() {
        let volume = marker_volume([2, 2, 6]);
        let moved = resample_volume(&volume, &volume, &shift_x(1.0, &volume), Interpolation::NearestNeighbour).unwrap();

        let src = volume.values();
        let dst = moved.values();
        // Output voxel x samples input voxel x - 1; x = 0 falls outside and is zero.
        assert_eq!(dst[0], 0.0);
        for x in 1..6 {
            assert_eq!(dst[x], src[x - 1]);
        }
    }

    #[test]
    fn test_series_order_preserved() {
        let device = Default::default();
        let volumes = (0..3)
            .map(|t| {
                let data = Tensor::<B, 3>::ones([2, 2, 2], &device) * (t as f32 + 1.0);
                Image::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
            })
            .collect();
        let series = ImageSeries::new(volumes).unwrap();
        let reference = series.reference().clone();
        let out = resample_series(&series, &reference, &shift_x(0.0, &reference), Interpolation::Linear).unwrap();
        let markers: Vec<f32> = out.iter().map(|v| v.values()[3]).collect();
        assert_eq!(markers, vec![1.0, 2.0, 3.0]);
    }
}
