//! Rotation extraction by polar decomposition.

use crate::spatial::Matrix3;

/// Relative singular-value floor below which a matrix counts as rank deficient.
const RANK_TOLERANCE: f64 = 1e-10;

/// Unitary factor `R` of the polar decomposition `M = R P`.
///
/// `R = U Vᵀ` from the SVD `M = U Σ Vᵀ`, the orthogonal matrix closest to `M`.
/// Scale and shear end up in `P`. A reflection (`det M < 0`) is kept as is.
/// Returns `None` for non-finite or rank-deficient input.
pub fn polar_rotation(m: &Matrix3) -> Option<Matrix3> {
    if m.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let svd = m.svd(true, true);
    let largest = svd.singular_values.max();
    if largest == 0.0 || svd.singular_values.min() <= RANK_TOLERANCE * largest {
        return None;
    }
    Some(svd.u? * svd.v_t?)
}
