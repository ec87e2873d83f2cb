//! Spatial transforms.
//!
//! Trainable transforms (`RigidTransform`, `AffineTransform`) are burn modules
//! whose parameters are estimated by gradient descent. `MatrixTransform`
//! applies a fixed homogeneous matrix. `SpatialTransform` is the immutable
//! estimated result that gets stored, inverted, composed and used to rotate
//! gradient directions.

pub mod trait_;
pub mod rigid;
pub mod affine;
pub mod matrix;
pub mod polar;
pub mod spatial;

pub use trait_::Transform;
pub use rigid::RigidTransform;
pub use affine::AffineTransform;
pub use matrix::MatrixTransform;
pub use polar::polar_rotation;
pub use spatial::{Dof, ImageSpace, MatrixConvention, SpatialTransform, TransformError};
