//! Knot insertion and support reduction as linear maps on coefficients.
//!
//! Each operation returns the new knot vector together with a [`CoefficientMap`]
//! taking the old coefficients of one dimension to the new ones. Applied along
//! one axis of a tensor coefficient array, the map leaves the spline unchanged.

use bsfit_core::{BsfitError, Result};

use crate::knot_vector::KnotVector;

/// Row-sparse matrix mapping coefficients over one knot vector to coefficients over another.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientMap {
    num_cols: usize,
    rows: Vec<Vec<(usize, f64)>>,
}

impl CoefficientMap {
    pub fn identity(n: usize) -> Self {
        Self {
            num_cols: n,
            rows: (0..n).map(|i| vec![(i, 1.0)]).collect(),
        }
    }

    /// Keep the coefficients `range`, dropping all others.
    pub fn selection(n: usize, range: std::ops::Range<usize>) -> Self {
        Self {
            num_cols: n,
            rows: range.map(|i| vec![(i, 1.0)]).collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Non-zero `(column, weight)` entries of row `i`.
    pub fn row(&self, i: usize) -> &[(usize, f64)] {
        &self.rows[i]
    }

    /// `self * inner`: apply `inner` first.
    pub fn compose(&self, inner: &CoefficientMap) -> CoefficientMap {
        debug_assert_eq!(self.num_cols, inner.rows.len());
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut merged: Vec<(usize, f64)> = Vec::new();
                for &(k, w) in row {
                    for &(j, v) in &inner.rows[k] {
                        match merged.iter_mut().find(|(c, _)| *c == j) {
                            Some(entry) => entry.1 += w * v,
                            None => merged.push((j, w * v)),
                        }
                    }
                }
                merged.sort_by_key(|&(c, _)| c);
                merged
            })
            .collect();
        CoefficientMap {
            num_cols: inner.num_cols,
            rows,
        }
    }

    /// Apply along axis `dim` of a row-major tensor with extents `counts`.
    ///
    /// `counts[dim]` must equal [`num_cols`](Self::num_cols); the result has
    /// [`num_rows`](Self::num_rows) entries along that axis.
    pub fn apply_along(&self, coefficients: &[f64], counts: &[usize], dim: usize) -> Vec<f64> {
        debug_assert_eq!(counts[dim], self.num_cols);
        let before: usize = counts[..dim].iter().product();
        let after: usize = counts[dim + 1..].iter().product();
        let n_in = self.num_cols;
        let n_out = self.rows.len();

        let mut out = vec![0.0; before * n_out * after];
        for a in 0..before {
            for (r, row) in self.rows.iter().enumerate() {
                let dst = (a * n_out + r) * after;
                for &(c, w) in row {
                    let src = (a * n_in + c) * after;
                    for b in 0..after {
                        out[dst + b] += w * coefficients[src + b];
                    }
                }
            }
        }
        out
    }
}

/// Insert `tau` once into `knots` (Boehm's algorithm).
///
/// `tau` must lie in the closed domain and end up with multiplicity at most `degree + 1`.
pub fn insert_knot(degree: usize, knots: &KnotVector, tau: f64) -> Result<(KnotVector, CoefficientMap)> {
    let (lo, hi) = knots.domain(degree);
    if !(lo..=hi).contains(&tau) {
        return Err(BsfitError::Configuration(format!(
            "Cannot insert knot {tau} outside the domain [{lo}, {hi}]"
        )));
    }
    if knots.multiplicity(tau) + 1 > degree + 1 {
        return Err(BsfitError::Configuration(format!(
            "Knot {tau} already has multiplicity {}, at most {} allowed",
            knots.multiplicity(tau),
            degree + 1
        )));
    }

    let t = knots.as_slice();
    let n = knots.num_basis_functions(degree);
    // Last knot at or below tau
    let k = t.partition_point(|&x| x <= tau) - 1;

    let rows = (0..=n)
        .map(|i| {
            if i + degree <= k {
                vec![(i, 1.0)]
            } else if i > k {
                vec![(i - 1, 1.0)]
            } else {
                let alpha = (tau - t[i]) / (t[i + degree] - t[i]);
                vec![(i - 1, 1.0 - alpha), (i, alpha)]
            }
        })
        .collect();

    let mut refined = t.to_vec();
    refined.insert(k + 1, tau);
    Ok((
        KnotVector::new(refined)?,
        CoefficientMap { num_cols: n, rows },
    ))
}

/// Insert `tau` `multiplicity` times.
pub fn insert_knots(
    degree: usize,
    knots: &KnotVector,
    tau: f64,
    multiplicity: usize,
) -> Result<(KnotVector, CoefficientMap)> {
    let mut current = knots.clone();
    let mut map = CoefficientMap::identity(knots.num_basis_functions(degree));
    for _ in 0..multiplicity {
        let (next, step) = insert_knot(degree, &current, tau)?;
        map = step.compose(&map);
        current = next;
    }
    Ok((current, map))
}

/// Raise every distinct knot in the domain to multiplicity `degree + 1`, splitting the
/// basis into independent polynomial (Bezier) pieces.
pub fn bezier_knots(degree: usize, knots: &KnotVector) -> Result<(KnotVector, CoefficientMap)> {
    let (lo, hi) = knots.domain(degree);
    let mut distinct: Vec<f64> = knots
        .as_slice()
        .iter()
        .copied()
        .filter(|t| (lo..=hi).contains(t))
        .collect();
    distinct.dedup();

    let mut current = knots.clone();
    let mut map = CoefficientMap::identity(knots.num_basis_functions(degree));
    for tau in distinct {
        let missing = (degree + 1).saturating_sub(current.multiplicity(tau));
        let (next, step) = insert_knots(degree, &current, tau, missing)?;
        map = step.compose(&map);
        current = next;
    }
    Ok((current, map))
}

/// Drop the basis functions whose support misses the open interval `(lower, upper)`.
pub fn restrict_support(
    degree: usize,
    knots: &KnotVector,
    lower: f64,
    upper: f64,
) -> Result<(KnotVector, CoefficientMap)> {
    let t = knots.as_slice();
    let n = knots.num_basis_functions(degree);
    let supported = |i: usize| t[i] < upper && t[i + degree + 1] > lower;

    let first = (0..n).find(|&i| supported(i));
    let last = (0..n).rev().find(|&i| supported(i));
    let (Some(first), Some(last)) = (first, last) else {
        return Err(BsfitError::Configuration(format!(
            "No basis function is supported on [{lower}, {upper}]"
        )));
    };

    let restricted = KnotVector::new(t[first..=last + degree + 1].to_vec())?;
    restricted.validate_for_degree(degree)?;
    Ok((restricted, CoefficientMap::selection(n, first..last + 1)))
}
