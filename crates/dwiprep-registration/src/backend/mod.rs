//! Registration backends.
//!
//! An [`Aligner`] estimates a transform between two volumes on disk and
//! writes the matrix plus the moving volume resampled onto the fixed grid.
//! A [`Resampler`] applies a stored matrix to a 3-D or 4-D image. Both
//! operate on files because the FSL tools do, and stages hand artifacts to
//! each other through the filesystem.

pub mod fsl;
pub mod native;

use crate::error::Result;
use dwiprep_core::transform::{Dof, SpatialTransform};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use fsl::{FlirtAligner, FlirtResampler, FslTools};
pub use native::{MetricKind, NativeAligner, NativeResampler, NativeSettings};

/// Sampling scheme used when applying a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolation {
    /// Intensity images.
    Linear,
    /// Label images such as brain masks.
    NearestNeighbour,
}

impl Interpolation {
    /// Name FLIRT expects after `-interp`.
    pub fn flirt_name(self) -> &'static str {
        match self {
            Interpolation::Linear => "trilinear",
            Interpolation::NearestNeighbour => "nearestneighbour",
        }
    }
}

pub trait Aligner: Send + Sync {
    /// Estimate the forward transform taking `moving` onto `fixed`.
    ///
    /// Writes the matrix to `matrix_out` and the resampled moving volume to
    /// `image_out`. Never returns an identity stand-in on failure.
    fn align(
        &self,
        moving: &Path,
        fixed: &Path,
        dof: Dof,
        matrix_out: &Path,
        image_out: &Path,
    ) -> Result<SpatialTransform>;

    fn name(&self) -> &'static str;
}

pub trait Resampler: Send + Sync {
    /// Resample every volume of `input` onto the grid of `reference` through
    /// the matrix stored at `matrix`.
    fn apply(
        &self,
        input: &Path,
        reference: &Path,
        matrix: &Path,
        interpolation: Interpolation,
        output: &Path,
    ) -> Result<()>;
}

/// The estimation and application halves of one backend.
pub struct RegistrationBackend {
    pub aligner: Box<dyn Aligner>,
    pub resampler: Box<dyn Resampler>,
}

impl RegistrationBackend {
    pub fn new(aligner: impl Aligner + 'static, resampler: impl Resampler + 'static) -> Self {
        Self {
            aligner: Box::new(aligner),
            resampler: Box::new(resampler),
        }
    }
}
