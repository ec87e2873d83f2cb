//! Estimated spatial transforms as immutable values.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use burn::tensor::backend::Backend;
use crate::image::Image;
use crate::spatial::{Matrix3, Matrix4, Vector3};
use super::polar::polar_rotation;

const SINGULAR_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformError {
    #[error("transform matrix contains non-finite entries")]
    NonFinite,

    #[error("transform matrix is not homogeneous (last row {0:?})")]
    NotHomogeneous([f64; 4]),

    #[error("transform matrix is singular (det {0:e})")]
    Singular(f64),

    #[error("cannot compose a {first:?} matrix with a {second:?} matrix")]
    ConventionMismatch {
        first: MatrixConvention,
        second: MatrixConvention,
    },
}

/// Degrees of freedom of an estimated transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dof {
    /// Rotation and translation.
    Rigid,
    /// Rigid plus scale and shear.
    Affine,
}

impl Dof {
    pub fn degrees(self) -> u8 {
        match self {
            Dof::Rigid => 6,
            Dof::Affine => 12,
        }
    }
}

/// Coordinate frame the stored matrix operates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatrixConvention {
    /// Scanner-space millimetres, moving world point to fixed world point.
    World,
    /// FLIRT's scaled-voxel frame as written by `-omat`.
    FslScaled,
}

/// Voxel grid of one side of a transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSpace {
    /// Grid size as `(nx, ny, nz)`.
    pub dims: [usize; 3],
    /// Voxel-to-world matrix.
    pub affine: Matrix4,
}

impl ImageSpace {
    pub fn of<B: Backend>(image: &Image<B, 3>) -> Self {
        let [nz, ny, nx] = image.shape();
        Self {
            dims: [nx, ny, nz],
            affine: image.affine(),
        }
    }

    /// Axes of FSL's voxel frame expressed in world coordinates.
    ///
    /// Columns are the unit voxel directions. When the voxel-to-world
    /// matrix has a positive determinant FSL flips the x axis, so the
    /// first column is negated. Gradient directions live in this frame.
    pub fn fsl_axes(&self) -> Result<Matrix3, TransformError> {
        let linear: Matrix3 = self.affine.fixed_view::<3, 3>(0, 0).into_owned();
        let det = linear.determinant();
        if det.abs() < SINGULAR_TOLERANCE {
            return Err(TransformError::Singular(det));
        }
        let mut axes = linear;
        for mut column in axes.column_iter_mut() {
            let norm = column.norm();
            column /= norm;
        }
        if det > 0.0 {
            let flipped = -axes.column(0);
            axes.set_column(0, &flipped);
        }
        Ok(axes)
    }
}

/// An estimated transform: forward matrix from the moving image's space
/// to the fixed image's space, plus the two spaces it relates.
///
/// Values are never mutated; inversion and composition return new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialTransform {
    matrix: Matrix4,
    dof: Dof,
    convention: MatrixConvention,
    moving: ImageSpace,
    fixed: ImageSpace,
}

impl SpatialTransform {
    pub fn new(
        matrix: Matrix4,
        dof: Dof,
        convention: MatrixConvention,
        moving: ImageSpace,
        fixed: ImageSpace,
    ) -> Result<Self, TransformError> {
        validate_matrix(&matrix)?;
        Ok(Self { matrix, dof, convention, moving, fixed })
    }

    pub fn matrix(&self) -> &Matrix4 {
        &self.matrix
    }

    pub fn dof(&self) -> Dof {
        self.dof
    }

    pub fn convention(&self) -> MatrixConvention {
        self.convention
    }

    pub fn moving(&self) -> &ImageSpace {
        &self.moving
    }

    pub fn fixed(&self) -> &ImageSpace {
        &self.fixed
    }

    /// Upper-left 3×3 block.
    pub fn linear(&self) -> Matrix3 {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    pub fn translation(&self) -> Vector3 {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Pure rotation component, with any scale or shear factored out.
    pub fn rotation(&self) -> Result<Matrix3, TransformError> {
        let linear = self.linear();
        polar_rotation(&linear).ok_or(TransformError::Singular(linear.determinant()))
    }

    /// Rotation to apply to gradient directions stored in the moving
    /// image's FSL voxel frame, giving directions in the fixed image's frame.
    ///
    /// FLIRT matrices already act in that frame. World matrices are
    /// conjugated with the axes of both spaces: `F_fixedᵀ · R · F_moving`.
    pub fn direction_rotation(&self) -> Result<Matrix3, TransformError> {
        let rotation = self.rotation()?;
        match self.convention {
            MatrixConvention::FslScaled => Ok(rotation),
            MatrixConvention::World => {
                let moving = self.moving.fsl_axes()?;
                let fixed = self.fixed.fsl_axes()?;
                Ok(fixed.transpose() * rotation * moving)
            }
        }
    }

    /// Transform from the fixed space back to the moving space.
    pub fn inverse(&self) -> Result<Self, TransformError> {
        let inverse = self
            .matrix
            .try_inverse()
            .ok_or(TransformError::Singular(self.linear().determinant()))?;
        Self::new(inverse, self.dof, self.convention, self.fixed.clone(), self.moving.clone())
    }

    /// `self` followed by `next`, as one matrix `next · self`.
    ///
    /// Order matters: `a.then(&b)` differs from `b.then(&a)`.
    pub fn then(&self, next: &Self) -> Result<Self, TransformError> {
        if self.convention != next.convention {
            return Err(TransformError::ConventionMismatch {
                first: self.convention,
                second: next.convention,
            });
        }
        Self::new(
            next.matrix * self.matrix,
            self.dof.max(next.dof),
            self.convention,
            self.moving.clone(),
            next.fixed.clone(),
        )
    }
}

fn validate_matrix(matrix: &Matrix4) -> Result<(), TransformError> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(TransformError::NonFinite);
    }
    let last = [matrix[(3, 0)], matrix[(3, 1)], matrix[(3, 2)], matrix[(3, 3)]];
    if last[0].abs() > 1e-9 || last[1].abs() > 1e-9 || last[2].abs() > 1e-9 || (last[3] - 1.0).abs() > 1e-9 {
        return Err(TransformError::NotHomogeneous(last));
    }
    let det = matrix.fixed_view::<3, 3>(0, 0).determinant();
    if det.abs() < SINGULAR_TOLERANCE {
        return Err(TransformError::Singular(det));
    }
    Ok(())
}
