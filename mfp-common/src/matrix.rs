//! Correction-matrix normalization

use ndarray::Array2;

use crate::{Error, Result};

/// Normalize a matrix by its maximum value.
///
/// For a non-constant, non-negative input the result has maximum 1.0 and
/// the operation is idempotent up to floating-point tolerance. A matrix
/// with a non-positive or non-finite maximum cannot be normalized.
pub fn normalize_matrix(matrix: &Array2<f32>) -> Result<Array2<f32>> {
    let max = matrix.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() || max <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "matrix maximum {} is not normalizable",
            max
        )));
    }
    Ok(matrix.mapv(|v| v / max))
}
