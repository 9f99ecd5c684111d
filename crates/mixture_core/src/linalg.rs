//! Small dense helpers the glam types do not provide.

use crate::space::{Real, Space};

/// Lower Cholesky factor `L` with `L Lᵀ = a`.
///
/// Diagonal pivots are clamped to `epsilon` so nearly singular covariances still
/// yield a usable factor. Returns `None` when a pivot is not finite.
pub fn cholesky<S: Space>(a: S::Matrix, epsilon: S::Real) -> Option<S::Matrix> {
    let n = S::DIMS;
    let mut l = vec![S::Real::ZERO; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = S::matrix_element(a, i, j);
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                l[i * n + j] = sum.max(epsilon).sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
            if !l[i * n + j].is_finite() {
                return None;
            }
        }
    }
    // `l` is row-major; glam wants columns.
    let mut columns = vec![S::Real::ZERO; n * n];
    for row in 0..n {
        for col in 0..n {
            columns[col * n + row] = l[row * n + col];
        }
    }
    S::matrix_from_slice(&columns)
}

/// Symmetrised copy `(a + aᵀ) / 2`; keeps accumulated covariances exactly symmetric.
pub fn symmetrize<S: Space>(a: S::Matrix) -> S::Matrix {
    let n = S::DIMS;
    let mut columns = vec![S::Real::ZERO; n * n];
    for row in 0..n {
        for col in 0..n {
            columns[col * n + row] =
                (S::matrix_element(a, row, col) + S::matrix_element(a, col, row)) * S::Real::HALF;
        }
    }
    S::matrix_from_slice(&columns).unwrap_or(a)
}
