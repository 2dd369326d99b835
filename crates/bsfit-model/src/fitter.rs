//! Least-squares and penalized fitting of B-spline coefficients.
//!
//! Both paths assemble the sparse normal equations `B^T B (+ lambda R)` and factor
//! them with a sparse Cholesky decomposition. Unpenalized systems that are
//! underdetermined or ill-conditioned fall back to a dense SVD over the basis
//! functions the samples actually touch.

use bsfit_basis::{BasisEvaluator, BasisVector};
use bsfit_core::{BsfitError, Result, Tolerance};
use nalgebra::{DMatrix, DVector, SVD};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bspline::BSpline;
use crate::penalty::{difference_null_space, ridge_penalty, sparse_mul, tensor_difference_penalty};
use crate::samples::SampleTable;

/// Order of the coefficient differences penalized by [`SmoothingPolicy::PSpline`].
pub const PSPLINE_DIFFERENCE_ORDER: usize = 2;

/// Smoothing term added to the least-squares objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingPolicy {
    /// Ordinary least squares.
    #[default]
    None,
    /// `lambda * |c|^2` (ridge).
    Regularization,
    /// `lambda * c^T R c` with `R` the tensor sum of second-order difference penalties.
    PSpline,
}

/// How the unpenalized solve treats rank-deficient systems.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankPolicy {
    /// Return the minimum-norm least-squares coefficients.
    #[default]
    MinimumNorm,
    /// Fail with `RankDeficient` unless every active basis function is determined by the data.
    Strict,
}

/// Penalty matrix `R` of a smoothing policy for a tensor basis with the given counts.
///
/// Returns `None` for [`SmoothingPolicy::None`].
pub fn penalty_matrix(smoothing: SmoothingPolicy, counts: &[usize]) -> Option<CscMatrix<f64>> {
    match smoothing {
        SmoothingPolicy::None => None,
        SmoothingPolicy::Regularization => Some(ridge_penalty(counts.iter().product())),
        SmoothingPolicy::PSpline => Some(tensor_difference_penalty(
            counts,
            PSPLINE_DIFFERENCE_ORDER,
        )),
    }
}

/// Solves for B-spline coefficients given samples and a basis.
///
/// The result depends only on the inputs and these settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BSplineFitter {
    pub smoothing: SmoothingPolicy,
    pub lambda: f64,
    pub rank_policy: RankPolicy,
    pub tolerance: Tolerance,
}

impl BSplineFitter {
    pub fn new(smoothing: SmoothingPolicy, lambda: f64) -> Self {
        Self {
            smoothing,
            lambda,
            ..Self::default()
        }
    }

    pub fn with_rank_policy(mut self, rank_policy: RankPolicy) -> Self {
        self.rank_policy = rank_policy;
        self
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fit coefficients over `basis` to the samples in `table`.
    pub fn fit(&self, table: &SampleTable<'_>, basis: BasisEvaluator) -> Result<BSpline> {
        if table.is_empty() {
            return Err(BsfitError::InsufficientSamples("No samples to fit".into()));
        }
        if table.num_variables() != basis.num_variables() {
            return Err(BsfitError::DimensionMismatch {
                expected: basis.num_variables(),
                found: table.num_variables(),
            });
        }
        if !self.lambda.is_finite() || self.lambda < 0.0 {
            return Err(BsfitError::Configuration(format!(
                "lambda must be finite and non-negative, got {}",
                self.lambda
            )));
        }
        if !self.tolerance.is_valid() {
            return Err(BsfitError::Configuration(format!(
                "Invalid tolerance {:?}",
                self.tolerance
            )));
        }

        let rows = assemble_rows(table, &basis)?;
        let num_basis = basis.num_basis_functions();
        let counts = basis.basis_counts();
        log::debug!(
            "Fitting {} basis functions to {} samples ({:?}, lambda = {})",
            num_basis,
            table.num_samples(),
            self.smoothing,
            self.lambda
        );

        let penalty = if self.lambda == 0.0 {
            None
        } else {
            penalty_matrix(self.smoothing, &counts)
        };
        let coefficients = match penalty {
            Some(r) if r.nnz() > 0 => {
                if self.smoothing == SmoothingPolicy::PSpline {
                    let null_space = difference_null_space(&counts, PSPLINE_DIFFERENCE_ORDER);
                    self.check_null_space(&rows, &null_space)?;
                }
                self.penalized(&rows, table.y(), &r)?
            }
            Some(_) => {
                log::warn!("Smoothing penalty vanishes for this basis; fitting without it");
                self.least_squares(&rows, table.y(), num_basis)?
            }
            None => self.least_squares(&rows, table.y(), num_basis)?,
        };

        log::info!(
            "Fitted B-spline with {} coefficients to {} samples",
            num_basis,
            table.num_samples()
        );
        BSpline::new(basis, coefficients)
    }

    /// Least squares over the basis functions that are non-zero at some sample.
    fn least_squares(&self, rows: &[BasisVector], y: &[f64], num_basis: usize) -> Result<Vec<f64>> {
        let active = ActiveColumns::new(rows, num_basis);
        if active.is_empty() {
            return Err(BsfitError::InsufficientSamples(
                "No basis function is supported by the samples".into(),
            ));
        }

        let mut solution = None;
        if rows.len() >= active.len() {
            solution = self.solve_normal_equations(rows, y, &active);
            if solution.is_none() {
                log::debug!(
                    "Normal equations for {} active basis functions are ill-conditioned, using SVD",
                    active.len()
                );
            }
        }
        let solution = match solution {
            Some(solution) => solution,
            None => self.solve_svd(rows, y, &active)?,
        };
        Ok(active.scatter(&solution, num_basis))
    }

    /// Sparse Cholesky solve of `B^T B c = B^T y` over the active columns.
    ///
    /// Returns `None` when the factorization fails or its pivots spread further than
    /// the rank tolerance allows, leaving the decision to the SVD.
    fn solve_normal_equations(
        &self,
        rows: &[BasisVector],
        y: &[f64],
        active: &ActiveColumns,
    ) -> Option<Vec<f64>> {
        let n = active.len();
        let mut gram = CooMatrix::new(n, n);
        let mut rhs = vec![0.0; n];
        for (row, &yi) in rows.iter().zip(y) {
            for (i, vi) in active.entries(row) {
                rhs[i] += vi * yi;
                for (j, vj) in active.entries(row) {
                    gram.push(i, j, vi * vj);
                }
            }
        }
        let system = CscMatrix::from(&gram);
        let cholesky = CscCholesky::factor(&system).ok()?;

        let (min_pivot, max_pivot) = pivot_range(&cholesky);
        if min_pivot * min_pivot <= self.tolerance.rank_cutoff(max_pivot * max_pivot) {
            return None;
        }
        self.checked_solve(&cholesky, &system, &rhs)
    }

    /// Dense SVD of the active part of `B`, applying the rank policy.
    fn solve_svd(&self, rows: &[BasisVector], y: &[f64], active: &ActiveColumns) -> Result<Vec<f64>> {
        let mut b = DMatrix::<f64>::zeros(rows.len(), active.len());
        for (r, row) in rows.iter().enumerate() {
            for (col, v) in active.entries(row) {
                b[(r, col)] = v;
            }
        }
        let rhs = DVector::from_column_slice(y);

        let svd = SVD::new(b, true, true);
        let sigma_max = svd.singular_values.max();
        let eps = self.tolerance.rank_cutoff(sigma_max);
        let rank = svd.rank(eps);

        if rank < active.len() {
            match self.rank_policy {
                RankPolicy::Strict => {
                    return Err(BsfitError::RankDeficient {
                        rank,
                        required: active.len(),
                    });
                }
                RankPolicy::MinimumNorm => log::warn!(
                    "Underdetermined fit: rank {} for {} active basis functions, using minimum-norm coefficients",
                    rank,
                    active.len()
                ),
            }
        }

        let solution = svd
            .solve(&rhs, eps)
            .map_err(|e| BsfitError::Numerical(e.to_string()))?;
        Ok(solution.iter().copied().collect())
    }

    /// Fail with `RankDeficient` when some non-zero coefficient vector is invisible to
    /// both the samples and the penalty, i.e. `B N` loses rank for the penalty null space `N`.
    fn check_null_space(&self, rows: &[BasisVector], null_space: &DMatrix<f64>) -> Result<()> {
        let (n, k) = null_space.shape();
        if k == 0 {
            return Ok(());
        }
        let mut projected = DMatrix::<f64>::zeros(rows.len(), k);
        for (r, row) in rows.iter().enumerate() {
            for (i, v) in row.iter() {
                for c in 0..k {
                    projected[(r, c)] += v * null_space[(i, c)];
                }
            }
        }
        let singular_values = projected.singular_values();
        let cutoff = self.tolerance.rank_cutoff(singular_values.max());
        let determined = singular_values.iter().filter(|&&s| s > cutoff).count();
        if determined < k {
            return Err(BsfitError::RankDeficient {
                rank: n - (k - determined),
                required: n,
            });
        }
        Ok(())
    }

    /// Solve `(B^T B + lambda R) c = B^T y` by sparse Cholesky factorization.
    fn penalized(&self, rows: &[BasisVector], y: &[f64], penalty: &CscMatrix<f64>) -> Result<Vec<f64>> {
        let n = penalty.nrows();
        let mut coo = CooMatrix::new(n, n);
        for (i, j, &v) in penalty.triplet_iter() {
            coo.push(i, j, self.lambda * v);
        }
        let mut rhs = vec![0.0; n];
        for (row, &yi) in rows.iter().zip(y) {
            for (i, vi) in row.iter() {
                rhs[i] += vi * yi;
                for (j, vj) in row.iter() {
                    coo.push(i, j, vi * vj);
                }
            }
        }
        let system = CscMatrix::from(&coo);

        let cholesky = CscCholesky::factor(&system).map_err(|e| {
            BsfitError::Numerical(format!("Penalized system could not be factored: {e:?}"))
        })?;
        self.checked_solve(&cholesky, &system, &rhs).ok_or_else(|| {
            BsfitError::Numerical("Penalized solve exceeds the residual tolerance".into())
        })
    }

    /// Solve with a factorization of `system` and accept the result only if its
    /// backward error `|A c - b| / (|A| |c| + |b|)` is within the residual tolerance.
    fn checked_solve(
        &self,
        cholesky: &CscCholesky<f64>,
        system: &CscMatrix<f64>,
        rhs: &[f64],
    ) -> Option<Vec<f64>> {
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs);
        let solution: Vec<f64> = cholesky.solve(&b).iter().copied().collect();

        let residual = norm(
            &sparse_mul(system, &solution)
                .iter()
                .zip(rhs)
                .map(|(a, b)| a - b)
                .collect::<Vec<_>>(),
        );
        let system_norm = norm(system.values());
        let reference = system_norm * norm(&solution) + norm(rhs);
        if self.tolerance.residual_ok(residual, reference) {
            Some(solution)
        } else {
            log::warn!("Normal equation residual {residual:e} exceeds tolerance (scale {reference:e})");
            None
        }
    }
}

/// Basis functions that are non-zero at some sample, numbered consecutively.
struct ActiveColumns {
    indices: Vec<usize>,
    column_of: Vec<Option<usize>>,
}

impl ActiveColumns {
    fn new(rows: &[BasisVector], num_basis: usize) -> Self {
        let mut is_active = vec![false; num_basis];
        for row in rows {
            for (i, v) in row.iter() {
                if v != 0.0 {
                    is_active[i] = true;
                }
            }
        }
        let indices: Vec<usize> = (0..num_basis).filter(|&i| is_active[i]).collect();
        let mut column_of = vec![None; num_basis];
        for (col, &i) in indices.iter().enumerate() {
            column_of[i] = Some(col);
        }
        Self { indices, column_of }
    }

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Non-zero entries of `row` keyed by active column.
    fn entries<'r>(&'r self, row: &'r BasisVector) -> impl Iterator<Item = (usize, f64)> + 'r {
        row.iter()
            .filter(|&(_, v)| v != 0.0)
            .filter_map(|(i, v)| self.column_of[i].map(|col| (col, v)))
    }

    /// Full coefficient vector with zeros at inactive basis functions.
    fn scatter(&self, solution: &[f64], num_basis: usize) -> Vec<f64> {
        let mut coefficients = vec![0.0; num_basis];
        for (&i, &c) in self.indices.iter().zip(solution) {
            coefficients[i] = c;
        }
        coefficients
    }
}

fn pivot_range(cholesky: &CscCholesky<f64>) -> (f64, f64) {
    cholesky
        .l()
        .triplet_iter()
        .filter(|(i, j, _)| i == j)
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), (_, _, &v)| {
            (lo.min(v.abs()), hi.max(v.abs()))
        })
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Joint basis values at every sample: the rows of the basis matrix `B`.
pub fn assemble_rows(table: &SampleTable<'_>, basis: &BasisEvaluator) -> Result<Vec<BasisVector>> {
    table.par_rows().map(|x| basis.evaluate(x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::SampleStore;
    use approx::assert_abs_diff_eq;
    use bsfit_basis::{Degree, KnotVector};

    fn line_store() -> SampleStore {
        SampleStore::from_samples((0..11).map(|i| {
            let x = i as f64 / 10.0;
            ([x], 3.0 * x - 1.0)
        }))
        .unwrap()
    }

    fn curve_store(n: usize) -> SampleStore {
        SampleStore::from_samples((0..n).map(|i| {
            let x = i as f64 / (n - 1) as f64;
            ([x], (3.0 * x).sin() + 0.2 * (17.0 * x).cos())
        }))
        .unwrap()
    }

    fn cubic_basis(num_basis: usize) -> BasisEvaluator {
        let kv = KnotVector::clamped_uniform(0.0, 1.0, 3, num_basis).unwrap();
        BasisEvaluator::from_parts(&[Degree::Cubic], vec![kv]).unwrap()
    }

    fn linear_basis(num_basis: usize) -> BasisEvaluator {
        let kv = KnotVector::clamped_uniform(0.0, 1.0, 1, num_basis).unwrap();
        BasisEvaluator::from_parts(&[Degree::Linear], vec![kv]).unwrap()
    }

    #[test]
    fn test_least_squares_reproduces_line() {
        let store = line_store();
        let spline = BSplineFitter::default()
            .fit(&store.finalize(), cubic_basis(6))
            .unwrap();
        for s in store.iter() {
            assert_abs_diff_eq!(spline.eval(s.x).unwrap(), s.y, epsilon = 1e-10);
        }
        assert_abs_diff_eq!(spline.eval(&[0.55]).unwrap(), 0.65, epsilon = 1e-10);
    }

    #[test]
    fn test_normal_equations_agree_with_svd() {
        let store = curve_store(40);
        let table = store.finalize();
        let basis = cubic_basis(9);
        let rows = assemble_rows(&table, &basis).unwrap();
        let active = ActiveColumns::new(&rows, 9);
        let fitter = BSplineFitter::default();

        let sparse = fitter.solve_normal_equations(&rows, table.y(), &active).unwrap();
        let dense = fitter.solve_svd(&rows, table.y(), &active).unwrap();
        for (a, b) in sparse.iter().zip(&dense) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_many_basis_functions() {
        // Two samples per knot span: the sparse path handles thousands of columns
        let store = curve_store(4000);
        let spline = BSplineFitter::default()
            .fit(&store.finalize(), cubic_basis(2000))
            .unwrap();
        for s in store.iter().step_by(97) {
            assert_abs_diff_eq!(spline.eval(s.x).unwrap(), s.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_inactive_basis_functions_get_zero() {
        let store = SampleStore::from_samples((0..20).map(|i| {
            let x = i as f64 / 40.0;
            ([x], 1.0 + x)
        }))
        .unwrap();
        let spline = BSplineFitter::default()
            .fit(&store.finalize(), linear_basis(11))
            .unwrap();
        // Samples stop at x = 0.475, before the support of the last five functions
        assert!(spline.coefficients()[6..].iter().all(|&c| c == 0.0));
        assert_abs_diff_eq!(spline.eval(&[0.3]).unwrap(), 1.3, epsilon = 1e-10);
    }

    #[test]
    fn test_strict_rank_policy() {
        // Three samples cannot determine six cubic basis functions
        let store = SampleStore::from_samples(vec![([0.0], 1.0), ([0.5], 2.0), ([1.0], 0.0)]).unwrap();
        let fitter = BSplineFitter::default().with_rank_policy(RankPolicy::Strict);
        let err = fitter.fit(&store.finalize(), cubic_basis(6)).unwrap_err();
        assert!(matches!(err, BsfitError::RankDeficient { rank: 3, .. }));

        let spline = BSplineFitter::default()
            .fit(&store.finalize(), cubic_basis(6))
            .unwrap();
        assert_abs_diff_eq!(spline.eval(&[0.5]).unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_strict_policy_with_repeated_sites() {
        // More rows than columns, but only three distinct sites
        let store = SampleStore::from_samples(
            [0.0, 0.5, 1.0, 0.0, 0.5, 1.0, 0.5].map(|x| ([x], x * x)),
        )
        .unwrap();
        let err = BSplineFitter::default()
            .with_rank_policy(RankPolicy::Strict)
            .fit(&store.finalize(), cubic_basis(6))
            .unwrap_err();
        assert!(matches!(err, BsfitError::RankDeficient { rank: 3, required: 6 }));
    }

    #[test]
    fn test_zero_lambda_matches_least_squares() {
        let store = line_store();
        let table = store.finalize();
        let plain = BSplineFitter::default().fit(&table, cubic_basis(5)).unwrap();
        let ridge = BSplineFitter::new(SmoothingPolicy::Regularization, 0.0)
            .fit(&table, cubic_basis(5))
            .unwrap();
        assert_eq!(plain.coefficients(), ridge.coefficients());
    }

    #[test]
    fn test_pspline_keeps_linear_data() {
        // Uniform linear knots put the coefficients of a line on a line, where the
        // second-difference penalty vanishes
        let store = line_store();
        let spline = BSplineFitter::new(SmoothingPolicy::PSpline, 100.0)
            .fit(&store.finalize(), linear_basis(6))
            .unwrap();
        for s in store.iter() {
            assert_abs_diff_eq!(spline.eval(s.x).unwrap(), s.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let store = line_store();
        let table = store.finalize();
        let plain = BSplineFitter::default().fit(&table, cubic_basis(5)).unwrap();
        let ridge = BSplineFitter::new(SmoothingPolicy::Regularization, 10.0)
            .fit(&table, cubic_basis(5))
            .unwrap();
        let norm = |c: &[f64]| c.iter().map(|v| v * v).sum::<f64>();
        assert!(norm(ridge.coefficients()) < norm(plain.coefficients()));
    }

    #[test]
    fn test_tiny_ridge_on_underdetermined_basis() {
        // Ten samples, thirty functions: any positive lambda makes the system definite
        let store = curve_store(10);
        let table = store.finalize();
        for lambda in [1e-12, 1e-8, 1e-4] {
            let spline = BSplineFitter::new(SmoothingPolicy::Regularization, lambda)
                .fit(&table, cubic_basis(30))
                .unwrap();
            let tolerance = if lambda > 1e-6 { 1e-2 } else { 1e-6 };
            for s in store.iter() {
                assert_abs_diff_eq!(spline.eval(s.x).unwrap(), s.y, epsilon = tolerance);
            }
        }
    }

    #[test]
    fn test_large_lambda_approaches_regression_line() {
        let n = 50;
        let store = SampleStore::from_samples((0..n).map(|i| {
            let x = i as f64 / (n - 1) as f64;
            ([x], 2.0 * x + 0.3 * (7.0 * x).sin())
        }))
        .unwrap();

        // Closed-form least-squares line through the samples
        let (xs, ys) = (store.column(0), store.finalize().y().to_vec());
        let mean_x = xs.iter().sum::<f64>() / n as f64;
        let mean_y = ys.iter().sum::<f64>() / n as f64;
        let sxy: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
        let sxx: f64 = xs.iter().map(|x| (x - mean_x) * (x - mean_x)).sum();
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        for lambda in [1e8, 1e10] {
            let spline = BSplineFitter::new(SmoothingPolicy::PSpline, lambda)
                .fit(&store.finalize(), linear_basis(30))
                .unwrap();
            for &x in &xs {
                assert_abs_diff_eq!(spline.eval(&[x]).unwrap(), intercept + slope * x, epsilon = 5e-3);
            }
        }
    }

    #[test]
    fn test_pspline_two_samples_fit_line() {
        let store = SampleStore::from_samples(vec![([0.2], 1.0), ([0.8], -0.5)]).unwrap();
        let spline = BSplineFitter::new(SmoothingPolicy::PSpline, 1.0)
            .fit(&store.finalize(), cubic_basis(6))
            .unwrap();
        assert_abs_diff_eq!(spline.eval(&[0.2]).unwrap(), 1.0, epsilon = 1e-8);
        assert_abs_diff_eq!(spline.eval(&[0.8]).unwrap(), -0.5, epsilon = 1e-8);
    }

    #[test]
    fn test_pspline_underdetermined_fails() {
        // One sample cannot pin down the linear null space of the difference penalty
        let store = SampleStore::from_samples(vec![([0.5], 1.0)]).unwrap();
        let err = BSplineFitter::new(SmoothingPolicy::PSpline, 1.0)
            .fit(&store.finalize(), cubic_basis(6))
            .unwrap_err();
        assert!(matches!(err, BsfitError::RankDeficient { rank: 5, required: 6 }));
    }

    #[test]
    fn test_invalid_lambda() {
        let store = line_store();
        for lambda in [-1.0, f64::NAN, f64::INFINITY] {
            let err = BSplineFitter::new(SmoothingPolicy::Regularization, lambda)
                .fit(&store.finalize(), cubic_basis(5))
                .unwrap_err();
            assert!(matches!(err, BsfitError::Configuration(_)));
        }
    }

    #[test]
    fn test_sample_outside_basis_domain() {
        let store = SampleStore::from_samples(vec![([0.5], 1.0), ([1.5], 2.0)]).unwrap();
        let err = BSplineFitter::default()
            .fit(&store.finalize(), cubic_basis(4))
            .unwrap_err();
        assert!(matches!(err, BsfitError::OutOfDomain { .. }));
    }

    #[test]
    fn test_empty_table() {
        let store = SampleStore::new();
        let err = BSplineFitter::default()
            .fit(&store.finalize(), cubic_basis(4))
            .unwrap_err();
        assert!(matches!(err, BsfitError::InsufficientSamples(_)));
    }
}
