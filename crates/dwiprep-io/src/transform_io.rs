//! 4×4 transform matrix files.
//!
//! The matrix is plain text, four rows of four numbers, the layout FLIRT
//! reads and writes. Values are printed with Rust's shortest round-trip
//! formatting, so reading back yields the identical `f64`. Transforms
//! estimated here also get a JSON sidecar with the degrees of freedom,
//! matrix convention and both image spaces.

use anyhow::{bail, Context, Result};
use dwiprep_core::spatial::Matrix4;
use dwiprep_core::transform::{Dof, ImageSpace, MatrixConvention, SpatialTransform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct TransformSidecar {
    dof: Dof,
    convention: MatrixConvention,
    moving: ImageSpace,
    fixed: ImageSpace,
}

/// Path of the sidecar for a matrix file: `x.mat` → `x.json`.
pub fn sidecar_path(matrix_path: &Path) -> PathBuf {
    matrix_path.with_extension("json")
}

pub fn write_matrix<P: AsRef<Path>>(path: P, matrix: &Matrix4) -> Result<()> {
    let path = path.as_ref();
    let mut text = String::new();
    for r in 0..4 {
        let row: Vec<String> = (0..4).map(|c| format!("{}", matrix[(r, c)])).collect();
        text.push_str(&row.join("  "));
        text.push('\n');
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_matrix<P: AsRef<Path>>(path: P) -> Result<Matrix4> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let values = text
        .split_whitespace()
        .map(|t| t.parse::<f64>().with_context(|| format!("Invalid number {:?} in {}", t, path.display())))
        .collect::<Result<Vec<_>>>()?;
    if values.len() != 16 {
        bail!("{} holds {} values, expected 16", path.display(), values.len());
    }
    Ok(Matrix4::from_row_slice(&values))
}

/// Write the matrix and its sidecar.
pub fn write_transform<P: AsRef<Path>>(path: P, transform: &SpatialTransform) -> Result<()> {
    let path = path.as_ref();
    write_matrix(path, transform.matrix())?;

    let sidecar = TransformSidecar {
        dof: transform.dof(),
        convention: transform.convention(),
        moving: transform.moving().clone(),
        fixed: transform.fixed().clone(),
    };
    let json_path = sidecar_path(path);
    let json = serde_json::to_string_pretty(&sidecar)?;
    std::fs::write(&json_path, json).with_context(|| format!("Failed to write {}", json_path.display()))
}

/// Read a matrix written by [`write_transform`].
pub fn read_transform<P: AsRef<Path>>(path: P) -> Result<SpatialTransform> {
    let path = path.as_ref();
    let matrix = read_matrix(path)?;
    let json_path = sidecar_path(path);
    let json = std::fs::read_to_string(&json_path)
        .with_context(|| format!("Failed to read transform sidecar {}", json_path.display()))?;
    let sidecar: TransformSidecar = serde_json::from_str(&json)
        .with_context(|| format!("Invalid transform sidecar {}", json_path.display()))?;

    SpatialTransform::new(matrix, sidecar.dof, sidecar.convention, sidecar.moving, sidecar.fixed)
        .with_context(|| format!("Degenerate transform in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn awkward_matrix() -> Matrix4 {
        let rotation = nalgebra::Rotation3::from_euler_angles(0.123456789, -0.0314159, 1.0 / 3.0);
        let mut m = rotation.to_homogeneous();
        m[(0, 0)] *= 1.0000001;
        m[(0, 3)] = -12.345678901234;
        m[(1, 3)] = 1e-17;
        m[(2, 3)] = 7.0 / 9.0;
        m
    }

    #[test]
    fn test_matrix_round_trip_is_exact() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("m.mat");
        let m = awkward_matrix();
        write_matrix(&path, &m)?;
        assert_eq!(read_matrix(&path)?, m);
        Ok(())
    }

    #[test]
    fn test_reads_flirt_layout() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("flirt.mat");
        std::fs::write(
            &path,
            "1.0000000000  0.0000000000  0.0000000000  2.5000000000  \n\
             0.0000000000  1.0000000000  0.0000000000  0.0000000000  \n\
             0.0000000000  0.0000000000  1.0000000000  -1.0000000000  \n\
             0  0  0  1  \n",
        )?;
        let m = read_matrix(&path)?;
        assert_eq!(m[(0, 3)], 2.5);
        assert_eq!(m[(2, 3)], -1.0);
        Ok(())
    }

    #[test]
    fn test_transform_with_sidecar() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("transf_1_to_0.mat");
        let space = ImageSpace { dims: [4, 5, 6], affine: Matrix4::identity() };
        let t = SpatialTransform::new(awkward_matrix(), Dof::Rigid, MatrixConvention::World, space.clone(), space)?;
        write_transform(&path, &t)?;

        assert!(sidecar_path(&path).exists());
        assert_eq!(read_transform(&path)?, t);
        Ok(())
    }

    #[test]
    fn test_short_matrix_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("short.mat");
        std::fs::write(&path, "1 0 0\n0 1 0\n0 0 1\n")?;
        assert!(read_matrix(&path).is_err());
        Ok(())
    }
}
