//! Direction-table rotation through estimated transforms.

use crate::error::{RegistrationError, Result};
use dwiprep_core::diffusion::GradientTable;
use dwiprep_core::transform::SpatialTransform;
use dwiprep_io::{read_gradient_table, write_bvecs};
use std::path::Path;

/// Rotate `table` by the rotation part of `transform`.
///
/// Scale and shear are removed by polar decomposition first, so an affine
/// estimate still applies a pure rotation. Directions are taken to be in
/// FSL's voxel frame of the moving image. Strengths are untouched.
pub fn rotate_table(table: &GradientTable, transform: &SpatialTransform) -> Result<GradientTable> {
    let rotation = transform.direction_rotation()?;
    Ok(table.rotated(&rotation))
}

/// Read a bval/bvec pair, rotate the directions and write them to `bvec_out`.
///
/// Returns the rotated table.
pub fn rotate_bvec_file(
    bval: &Path,
    bvec: &Path,
    transform: &SpatialTransform,
    bvec_out: &Path,
) -> Result<GradientTable> {
    let table = read_gradient_table(bval, bvec)?;
    let rotated = rotate_table(&table, transform)?;
    write_bvecs(bvec_out, rotated.bvecs())?;
    tracing::debug!("Rotated {} directions into {}", rotated.len(), bvec_out.display());
    Ok(rotated)
}

/// Check the three per-volume counts of a dataset agree.
pub fn check_counts(images: usize, table: &GradientTable) -> Result<()> {
    if images != table.len() {
        return Err(RegistrationError::IndexMismatch {
            images,
            directions: table.bvecs().len(),
            strengths: table.bvals().len(),
        });
    }
    Ok(())
}
