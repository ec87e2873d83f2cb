//! Overlap-based registration QC.
//!
//! Both volumes are thresholded into brain masks and compared with the Dice
//! coefficient, alongside the distance between the mask centroids. When the
//! grids differ in shape, or either mask is too sparse to trust, the
//! distance between the two affine origins is reported instead and the
//! measurement is marked degraded.

use crate::error::Result;
use burn::tensor::backend::Backend;
use dwiprep_core::image::Image;
use dwiprep_core::spatial::{Matrix4, Vector3};
use dwiprep_io::read_reference_volume;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QcStatus {
    Pass,
    Warning,
    Fail,
    Skip,
    Error,
}

impl QcStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QcStatus::Pass => "PASS",
            QcStatus::Warning => "WARNING",
            QcStatus::Fail => "FAIL",
            QcStatus::Skip => "SKIP",
            QcStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for QcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a measurement is a true voxel overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Normal,
    /// Grids differ in shape or a mask is near-empty; only the origin
    /// offset was compared.
    Degraded,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Normal => "normal",
            Confidence::Degraded => "degraded",
        })
    }
}

/// Dice cut-offs and adaptive mask parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QcThresholds {
    pub pass: f64,
    pub warning: f64,
    /// Mask is `value > mean * mask_fraction` ...
    pub mask_fraction: f64,
    /// ... or `value > max * fallback_fraction` when too few voxels survive.
    pub fallback_fraction: f64,
    pub min_voxels: usize,
    /// Masks this small or smaller give no usable overlap.
    pub min_overlap_voxels: usize,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            pass: 0.8,
            warning: 0.7,
            mask_fraction: 0.1,
            fallback_fraction: 0.01,
            min_voxels: 1000,
            min_overlap_voxels: 100,
        }
    }
}

impl QcThresholds {
    pub fn classify(&self, dice: f64) -> QcStatus {
        if dice >= self.pass {
            QcStatus::Pass
        } else if dice >= self.warning {
            QcStatus::Warning
        } else {
            QcStatus::Fail
        }
    }
}

/// `2|A ∩ B| / (|A| + |B|)`, or 0 when both masks are empty.
pub fn dice(a: &[bool], b: &[bool]) -> f64 {
    let (mut both, mut total) = (0usize, 0usize);
    for (&x, &y) in a.iter().zip(b) {
        both += usize::from(x && y);
        total += usize::from(x) + usize::from(y);
    }
    if total == 0 {
        return 0.0;
    }
    2.0 * both as f64 / total as f64
}

/// Intensity threshold mask with a lower fallback for sparse images.
pub fn adaptive_mask(values: &[f32], thresholds: &QcThresholds) -> Vec<bool> {
    if values.is_empty() {
        return Vec::new();
    }
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
    let mask: Vec<bool> = values.iter().map(|&v| v as f64 > mean * thresholds.mask_fraction).collect();
    if mask.iter().filter(|&&m| m).count() >= thresholds.min_voxels {
        return mask;
    }
    let max = values.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v as f64));
    values.iter().map(|&v| v as f64 > max * thresholds.fallback_fraction).collect()
}

/// One overlap measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlapReport {
    pub status: QcStatus,
    /// Absent for degraded measurements.
    pub dice: Option<f64>,
    /// Mask centroid distance in mm, or the origin distance when degraded.
    pub offset_mm: Option<f64>,
    pub confidence: Confidence,
}

impl OverlapReport {
    /// A degraded measurement never passes outright.
    fn degraded(offset_mm: f64) -> Self {
        Self {
            status: QcStatus::Warning,
            dice: None,
            offset_mm: Some(offset_mm),
            confidence: Confidence::Degraded,
        }
    }
}

fn origin_offset(a: &Matrix4, b: &Matrix4) -> f64 {
    (a.fixed_view::<3, 1>(0, 3) - b.fixed_view::<3, 1>(0, 3)).norm()
}

/// World position of the mean voxel of `mask` on a `[z, y, x]` grid.
fn mask_centroid(mask: &[bool], shape: [usize; 3], affine: &Matrix4) -> Option<Vector3> {
    let [_, ny, nx] = shape;
    let (mut sum, mut count) = (Vector3::zeros(), 0usize);
    for (i, &inside) in mask.iter().enumerate() {
        if !inside {
            continue;
        }
        let (z, rest) = (i / (ny * nx), i % (ny * nx));
        sum += Vector3::new((rest % nx) as f64, (rest / nx) as f64, z as f64);
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let index = (sum / count as f64).push(1.0);
    Some((affine * index).xyz())
}

/// Compare a registered volume with its target.
pub fn measure_overlap<B: Backend>(
    registered: &Image<B, 3>,
    target: &Image<B, 3>,
    thresholds: &QcThresholds,
) -> OverlapReport {
    let (affine_a, affine_b) = (registered.affine(), target.affine());
    if registered.shape() != target.shape() {
        let offset = origin_offset(&affine_a, &affine_b);
        tracing::warn!(
            "Shape mismatch {:?} vs {:?}; comparing origins instead ({:.2} mm apart)",
            registered.shape(),
            target.shape(),
            offset
        );
        return OverlapReport::degraded(offset);
    }

    let a = adaptive_mask(&registered.values(), thresholds);
    let b = adaptive_mask(&target.values(), thresholds);
    let (count_a, count_b) = (a.iter().filter(|&&m| m).count(), b.iter().filter(|&&m| m).count());
    if count_a.min(count_b) <= thresholds.min_overlap_voxels {
        let offset = origin_offset(&affine_a, &affine_b);
        tracing::warn!(
            "Masks too sparse ({} and {} voxels); comparing origins instead ({:.2} mm apart)",
            count_a,
            count_b,
            offset
        );
        return OverlapReport::degraded(offset);
    }

    let score = dice(&a, &b);
    let shape = registered.shape();
    let offset_mm = mask_centroid(&a, shape, &affine_a)
        .zip(mask_centroid(&b, shape, &affine_b))
        .map(|(ca, cb)| (ca - cb).norm());
    OverlapReport {
        status: thresholds.classify(score),
        dice: Some(score),
        offset_mm,
        confidence: Confidence::Normal,
    }
}

/// [`measure_overlap`] on the first volume of each file.
pub fn measure_overlap_files<B: Backend>(
    registered: &Path,
    target: &Path,
    thresholds: &QcThresholds,
    device: &B::Device,
) -> Result<OverlapReport> {
    let registered = read_reference_volume::<B, _>(registered, device)?;
    let target = read_reference_volume::<B, _>(target, device)?;
    Ok(measure_overlap(&registered, &target, thresholds))
}

/// Any ERROR or FAIL fails, else any WARNING warns, else PASS. SKIP is ignored.
pub fn overall_status<I: IntoIterator<Item = QcStatus>>(statuses: I) -> QcStatus {
    let mut overall = QcStatus::Pass;
    for status in statuses {
        match status {
            QcStatus::Error | QcStatus::Fail => return QcStatus::Fail,
            QcStatus::Warning => overall = QcStatus::Warning,
            QcStatus::Pass | QcStatus::Skip => {}
        }
    }
    overall
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::{Tensor, TensorData};
    use burn_ndarray::NdArray;
    use dwiprep_core::spatial::{Direction3, Point3, Spacing3};
    use proptest::prelude::*;

    type B = NdArray<f32>;

    fn image(values: Vec<f32>, shape: [usize; 3], origin: Point3) -> Image<B, 3> {
        let data = Tensor::<B, 3>::from_data(TensorData::new(values, shape), &Default::default());
        Image::new(data, origin, Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    #[test]
    fn test_classification_boundaries() {
        let t = QcThresholds::default();
        assert_eq!(t.classify(0.8), QcStatus::Pass);
        assert_eq!(t.classify(0.79), QcStatus::Warning);
        assert_eq!(t.classify(0.7), QcStatus::Warning);
        assert_eq!(t.classify(0.69), QcStatus::Fail);
    }

    #[test]
    fn test_full_overlap_passes() {
        let a = image(vec![1.0; 1000], [10, 10, 10], Point3::origin());
        let report = measure_overlap(&a, &a.clone(), &QcThresholds::default());
        assert_eq!(report.dice, Some(1.0));
        assert_eq!(report.status, QcStatus::Pass);
        assert_eq!(report.confidence, Confidence::Normal);
        assert_eq!(report.offset_mm, Some(0.0));
    }

    #[test]
    fn test_disjoint_masks_fail() {
        // Lower and upper halves along z, centroids 5 mm apart.
        let lower: Vec<f32> = (0..1000).map(|i| if i < 500 { 1.0 } else { 0.0 }).collect();
        let upper: Vec<f32> = (0..1000).map(|i| if i < 500 { 0.0 } else { 1.0 }).collect();
        let report = measure_overlap(
            &image(lower, [10, 10, 10], Point3::origin()),
            &image(upper, [10, 10, 10], Point3::origin()),
            &QcThresholds::default(),
        );
        assert_eq!(report.dice, Some(0.0));
        assert_eq!(report.status, QcStatus::Fail);
        assert!((report.offset_mm.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_masks_are_degraded() {
        // 50 bright voxels each on a 10³ grid: too few for a voxel overlap.
        let sparse = |start: usize| -> Vec<f32> {
            (0..1000).map(|i| if (start..start + 50).contains(&i) { 100.0 } else { 0.0 }).collect()
        };
        let report = measure_overlap(
            &image(sparse(0), [10, 10, 10], Point3::new(0.0, 0.0, 2.0)),
            &image(sparse(25), [10, 10, 10], Point3::origin()),
            &QcThresholds::default(),
        );
        assert_eq!(report.confidence, Confidence::Degraded);
        assert_eq!(report.status, QcStatus::Warning);
        assert!(report.dice.is_none());
        assert!((report.offset_mm.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_shape_mismatch_is_degraded() {
        let a = image(vec![1.0; 8], [2, 2, 2], Point3::new(3.0, 4.0, 0.0));
        let b = image(vec![1.0; 12], [3, 2, 2], Point3::origin());
        let report = measure_overlap(&a, &b, &QcThresholds::default());
        assert_eq!(report.confidence, Confidence::Degraded);
        assert_eq!(report.status, QcStatus::Warning);
        assert!(report.dice.is_none());
        assert!((report.offset_mm.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_adaptive_mask_falls_back() {
        let t = QcThresholds::default();
        // Half bright, half faint: mean * 0.1 keeps the bright half only.
        let values: Vec<f32> = (0..100).map(|i| if i < 50 { 1.0 } else { 0.03 }).collect();

        let lenient = QcThresholds { min_voxels: 10, ..t.clone() };
        assert_eq!(adaptive_mask(&values, &lenient).iter().filter(|&&m| m).count(), 50);

        // Too few voxels for the default minimum, so max * 0.01 takes over.
        assert!(adaptive_mask(&values, &t).iter().all(|&m| m));
    }

    #[test]
    fn test_empty_masks() {
        assert_eq!(dice(&[false, false], &[false, false]), 0.0);
    }

    #[test]
    fn test_overall_status() {
        use QcStatus::*;
        assert_eq!(overall_status([Pass, Skip, Pass]), Pass);
        assert_eq!(overall_status([Pass, Warning]), Warning);
        assert_eq!(overall_status([Warning, Error]), Fail);
        assert_eq!(overall_status([Skip]), Pass);
    }

    proptest! {
        #[test]
        fn prop_dice_symmetric(pairs in proptest::collection::vec((any::<bool>(), any::<bool>()), 0..200)) {
            let (a, b): (Vec<bool>, Vec<bool>) = pairs.into_iter().unzip();
            prop_assert_eq!(dice(&a, &b), dice(&b, &a));
            let d = dice(&a, &b);
            prop_assert!((0.0..=1.0).contains(&d));
        }
    }
}
