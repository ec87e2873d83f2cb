//! Gradient-descent alignment of synthetic ellipsoids.

mod common;

use burn::backend::Autodiff;
use burn_ndarray::NdArray;
use common::{ellipsoid, write_volume};
use dwiprep_core::transform::{Dof, MatrixConvention};
use dwiprep_io::read_transform;
use dwiprep_registration::backend::{MetricKind, NativeAligner, NativeResampler, NativeSettings};
use dwiprep_registration::quality::measure_overlap_files;
use dwiprep_registration::{Aligner, Interpolation, QcStatus, QcThresholds, Resampler};
use tempfile::tempdir;

type B = NdArray<f32>;
type AB = Autodiff<B>;

fn settings() -> NativeSettings {
    NativeSettings {
        iterations: 200,
        learning_rate: 0.05,
        pyramid_levels: 2,
        metric: MetricKind::Mse,
    }
}

#[test]
fn recovers_translation_between_ellipsoids() {
    let dir = tempdir().unwrap();
    let device = Default::default();
    let shape = [20, 20, 20];
    let radii = [3.0, 2.5, 2.0];
    let fixed = write_volume(&dir.path().join("fixed.nii.gz"), &ellipsoid::<B>(shape, [9.5, 9.5, 9.5], radii, &device));
    let moving = write_volume(&dir.path().join("moving.nii.gz"), &ellipsoid::<B>(shape, [11.5, 9.5, 9.5], radii, &device));
    let matrix = dir.path().join("moving_to_fixed.mat");
    let registered = dir.path().join("moving_reg.nii.gz");

    let aligner = NativeAligner::<AB>::new(settings(), device);
    let transform = aligner.align(&moving, &fixed, Dof::Rigid, &matrix, &registered).unwrap();

    // Content sits 2 mm further along x in the moving image.
    let t = transform.translation();
    assert!((t.x + 2.0).abs() < 0.5, "translation {t:?}");
    assert!(t.y.abs() < 0.5 && t.z.abs() < 0.5, "translation {t:?}");
    assert_eq!(transform.convention(), MatrixConvention::World);

    let stored = read_transform(&matrix).unwrap();
    assert_eq!(stored.matrix(), transform.matrix());
    assert_eq!(stored.dof(), Dof::Rigid);

    let report = measure_overlap_files::<B>(&registered, &fixed, &QcThresholds::default(), &device).unwrap();
    assert_eq!(report.status, QcStatus::Pass, "{report:?}");

    // Applying the stored matrix reproduces the aligner's own output.
    let applied = dir.path().join("applied.nii.gz");
    NativeResampler::<B>::new(device)
        .apply(&moving, &fixed, &matrix, Interpolation::Linear, &applied)
        .unwrap();
    let report = measure_overlap_files::<B>(&applied, &registered, &QcThresholds::default(), &device).unwrap();
    assert!(report.dice.unwrap() > 0.99, "{report:?}");
}

#[test]
fn native_resampler_rejects_flirt_matrices() {
    let dir = tempdir().unwrap();
    let device = Default::default();
    let volume = write_volume(&dir.path().join("v.nii.gz"), &ellipsoid::<B>([4, 4, 4], [1.5, 1.5, 1.5], [1.0, 1.0, 1.0], &device));
    let matrix = dir.path().join("flirt.mat");
    let space = dwiprep_io::read_image_space(&volume).unwrap();
    let transform = dwiprep_core::transform::SpatialTransform::new(
        dwiprep_core::spatial::Matrix4::identity(),
        Dof::Rigid,
        MatrixConvention::FslScaled,
        space.clone(),
        space,
    )
    .unwrap();
    dwiprep_io::write_transform(&matrix, &transform).unwrap();

    let err = NativeResampler::<B>::new(device)
        .apply(&volume, &volume, &matrix, Interpolation::Linear, &dir.path().join("out.nii.gz"))
        .unwrap_err();
    assert_eq!(err.kind(), dwiprep_registration::ErrorKind::Configuration);
}
