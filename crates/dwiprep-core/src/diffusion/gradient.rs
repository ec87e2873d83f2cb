//! Gradient strengths (bvals) and directions (bvecs), co-indexed per volume.

use thiserror::Error;
use crate::spatial::{Matrix3, Vector3};

/// Strength below which a volume counts as a b0 reference.
///
/// This is a protocol choice, not physics; pipelines expose it as configuration.
pub const DEFAULT_B0_THRESHOLD: f64 = 50.0;

/// Directions with a norm below this are left unscaled by renormalisation.
const ZERO_NORM: f64 = 1e-6;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("gradient table has {strengths} strengths but {directions} directions")]
pub struct TableLengthMismatch {
    pub strengths: usize,
    pub directions: usize,
}

/// Indices of every volume whose strength is strictly below `threshold`.
pub fn b0_indices(bvals: &[f64], threshold: f64) -> Vec<usize> {
    bvals
        .iter()
        .enumerate()
        .filter(|(_, b)| **b < threshold)
        .map(|(i, _)| i)
        .collect()
}

/// Per-volume strengths and directions of one acquisition.
///
/// Entry `k` describes volume `k` of the matching image series. Every
/// operation that reorders or filters entries does so on both columns at once.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    bvals: Vec<f64>,
    bvecs: Vec<Vector3>,
}

impl GradientTable {
    pub fn new(bvals: Vec<f64>, bvecs: Vec<Vector3>) -> Result<Self, TableLengthMismatch> {
        if bvals.len() != bvecs.len() {
            return Err(TableLengthMismatch {
                strengths: bvals.len(),
                directions: bvecs.len(),
            });
        }
        Ok(Self { bvals, bvecs })
    }

    pub fn len(&self) -> usize {
        self.bvals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bvals.is_empty()
    }

    pub fn bvals(&self) -> &[f64] {
        &self.bvals
    }

    pub fn bvecs(&self) -> &[Vector3] {
        &self.bvecs
    }

    pub fn b0_indices(&self, threshold: f64) -> Vec<usize> {
        b0_indices(&self.bvals, threshold)
    }

    /// Entries at `indices`, in the order given. `None` if any is out of range.
    pub fn select(&self, indices: &[usize]) -> Option<Self> {
        let mut bvals = Vec::with_capacity(indices.len());
        let mut bvecs = Vec::with_capacity(indices.len());
        for &i in indices {
            bvals.push(*self.bvals.get(i)?);
            bvecs.push(*self.bvecs.get(i)?);
        }
        Some(Self { bvals, bvecs })
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &Self) -> Self {
        let mut bvals = self.bvals.clone();
        let mut bvecs = self.bvecs.clone();
        bvals.extend_from_slice(&other.bvals);
        bvecs.extend_from_slice(&other.bvecs);
        Self { bvals, bvecs }
    }

    /// Rotate every direction and renormalise to unit length.
    ///
    /// Strengths are rotation invariant and copied unchanged. Zero or
    /// near-zero directions (b0 volumes) are divided by one rather than their
    /// norm, so they stay near zero.
    pub fn rotated(&self, rotation: &Matrix3) -> Self {
        let bvecs = self
            .bvecs
            .iter()
            .map(|v| {
                let r = rotation * v;
                let norm = r.norm();
                if norm < ZERO_NORM { r } else { r / norm }
            })
            .collect();
        Self {
            bvals: self.bvals.clone(),
            bvecs,
        }
    }
}
