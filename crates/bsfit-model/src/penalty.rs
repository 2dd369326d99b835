//! Roughness penalty matrices for penalized fits.
//!
//! Per-dimension operators are small and dense. Tensor penalties are assembled
//! as sparse CSC matrices from their band entries.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Finite difference operator `D` of the given order, shape `(n - order) x n`.
///
/// Returns an empty `0 x n` matrix when `order >= n`.
pub fn difference_matrix(n: usize, order: usize) -> DMatrix<f64> {
    if order >= n {
        return DMatrix::zeros(0, n);
    }
    let mut d = DMatrix::<f64>::identity(n, n);
    for _ in 0..order {
        let rows = d.nrows();
        d = d.rows(1, rows - 1) - d.rows(0, rows - 1);
    }
    d
}

/// Penalty `S = D^T D` on squared `order`-th coefficient differences, shape `n x n`.
pub fn difference_penalty(n: usize, order: usize) -> DMatrix<f64> {
    let d = difference_matrix(n, order);
    d.transpose() * d
}

/// Sum over dimensions of `I ⊗ S_i ⊗ I`, matching the row-major flattening of tensor
/// coefficients. Dimensions with at most `order` basis functions contribute nothing.
pub fn tensor_difference_penalty(counts: &[usize], order: usize) -> CscMatrix<f64> {
    let total: usize = counts.iter().product();
    let mut coo = CooMatrix::new(total, total);

    for (dim, &n) in counts.iter().enumerate() {
        if n <= order {
            continue;
        }
        let before: usize = counts[..dim].iter().product();
        let after: usize = counts[dim + 1..].iter().product();
        let s = difference_penalty(n, order);

        for i in 0..n {
            // S is banded with half-width `order`
            for j in i.saturating_sub(order)..(i + order + 1).min(n) {
                let v = s[(i, j)];
                if v == 0.0 {
                    continue;
                }
                for a in 0..before {
                    for b in 0..after {
                        coo.push((a * n + i) * after + b, (a * n + j) * after + b, v);
                    }
                }
            }
        }
    }

    CscMatrix::from(&coo)
}

/// Ridge penalty `I`, shape `n x n`.
pub fn ridge_penalty(n: usize) -> CscMatrix<f64> {
    CscMatrix::identity(n)
}

/// Basis of the null space of [`tensor_difference_penalty`] as dense columns.
///
/// Along a dimension with more than `order` functions the null space holds the
/// polynomials of degree below `order` in the coefficient index; shorter dimensions
/// are unpenalized and keep every unit vector.
pub fn difference_null_space(counts: &[usize], order: usize) -> DMatrix<f64> {
    let factors: Vec<DMatrix<f64>> = counts
        .iter()
        .map(|&n| {
            if n <= order {
                DMatrix::identity(n, n)
            } else {
                DMatrix::from_fn(n, order, |i, k| (i as f64).powi(k as i32))
            }
        })
        .collect();
    factors
        .iter()
        .fold(DMatrix::from_element(1, 1, 1.0), |acc, f| acc.kronecker(f))
}

/// `A x` for a sparse square or rectangular `A`.
pub fn sparse_mul(a: &CscMatrix<f64>, x: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.nrows()];
    for (i, j, v) in a.triplet_iter() {
        out[i] += v * x[j];
    }
    out
}

/// `x^T A x`.
pub fn quadratic_form(a: &CscMatrix<f64>, x: &[f64]) -> f64 {
    a.triplet_iter().map(|(i, j, v)| x[i] * v * x[j]).sum()
}
