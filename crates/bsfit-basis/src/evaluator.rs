//! Tensor-product B-spline basis evaluation.
//!
//! Basis functions are indexed row-major over the per-dimension indices
//! `(i_0, ..., i_{d-1})`, with the last dimension varying fastest:
//! `flat = sum_j i_j * prod_{l > j} p_l`.

use bsfit_core::{BsfitError, Domain, Result, Validate};
use serde::{Deserialize, Serialize};

use crate::degree::Degree;
use crate::knot::{self, basis_function_derivatives, basis_functions, find_span};
use crate::knot_vector::KnotVector;

/// What to do with evaluation points outside the knot domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainPolicy {
    /// Reject coordinates outside the closed domain with `OutOfDomain`.
    #[default]
    Strict,
    /// Move coordinates outside the domain to the nearest domain end.
    Clamp,
}

/// Basis of one input dimension: a degree and a knot vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnivariateBasis {
    degree: Degree,
    knots: KnotVector,
}

impl UnivariateBasis {
    pub fn new(degree: Degree, knots: KnotVector) -> Result<Self> {
        knots.validate_for_degree(degree.value())?;
        Ok(Self { degree, knots })
    }

    pub fn degree(&self) -> Degree {
        self.degree
    }

    pub fn knots(&self) -> &KnotVector {
        &self.knots
    }

    pub fn num_basis_functions(&self) -> usize {
        self.knots.num_basis_functions(self.degree.value())
    }

    pub fn domain(&self) -> (f64, f64) {
        self.knots.domain(self.degree.value())
    }

    /// Index of the first non-vanishing basis function at `t` and the `degree + 1` values from there.
    pub fn values(&self, t: f64) -> (usize, Vec<f64>) {
        let p = self.degree.value();
        let knots = self.knots.as_slice();
        let span = find_span(p, knots, t);
        (span - p, basis_functions(p, knots, span, t))
    }

    /// Like [`values`](Self::values), for the `order`-th derivative.
    pub fn derivatives(&self, t: f64, order: usize) -> (usize, Vec<f64>) {
        if order == 0 {
            return self.values(t);
        }
        let p = self.degree.value();
        let knots = self.knots.as_slice();
        let span = find_span(p, knots, t);
        let mut ders = basis_function_derivatives(p, knots, span, t, order);
        (span - p, ders.swap_remove(order))
    }

    pub fn greville_abscissae(&self) -> Vec<f64> {
        knot::greville_abscissae(self.degree.value(), self.knots.as_slice())
    }
}

/// Sparse joint basis values at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct BasisVector {
    len: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl BasisVector {
    /// Total number of basis functions (dense length).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Flat basis indices of the stored entries, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Inner product with a dense coefficient vector of length [`len`](Self::len).
    pub fn dot(&self, coefficients: &[f64]) -> f64 {
        debug_assert_eq!(coefficients.len(), self.len);
        self.iter().map(|(i, v)| v * coefficients[i]).sum()
    }

    pub fn to_dense(&self) -> Vec<f64> {
        let mut dense = vec![0.0; self.len];
        for (i, v) in self.iter() {
            dense[i] = v;
        }
        dense
    }
}

/// Tensor-product basis over all input dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisEvaluator {
    bases: Vec<UnivariateBasis>,
    #[serde(default)]
    policy: DomainPolicy,
}

impl BasisEvaluator {
    pub fn new(bases: Vec<UnivariateBasis>) -> Result<Self> {
        let evaluator = Self {
            bases,
            policy: DomainPolicy::default(),
        };
        evaluator.validate()?;
        Ok(evaluator)
    }

    pub fn from_parts(degrees: &[Degree], knot_vectors: Vec<KnotVector>) -> Result<Self> {
        if degrees.len() != knot_vectors.len() {
            return Err(BsfitError::DimensionMismatch {
                expected: degrees.len(),
                found: knot_vectors.len(),
            });
        }
        let bases = degrees
            .iter()
            .zip(knot_vectors)
            .map(|(&degree, knots)| UnivariateBasis::new(degree, knots))
            .collect::<Result<Vec<_>>>()?;
        Self::new(bases)
    }

    pub fn with_policy(mut self, policy: DomainPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> DomainPolicy {
        self.policy
    }

    pub fn bases(&self) -> &[UnivariateBasis] {
        &self.bases
    }

    pub fn num_variables(&self) -> usize {
        self.bases.len()
    }

    pub fn degrees(&self) -> Vec<Degree> {
        self.bases.iter().map(UnivariateBasis::degree).collect()
    }

    /// Basis function count per dimension.
    pub fn basis_counts(&self) -> Vec<usize> {
        self.bases
            .iter()
            .map(UnivariateBasis::num_basis_functions)
            .collect()
    }

    /// Total number of tensor-product basis functions.
    pub fn num_basis_functions(&self) -> usize {
        self.basis_counts().iter().product()
    }

    /// Row-major strides of the flat basis index.
    pub fn strides(&self) -> Vec<usize> {
        let counts = self.basis_counts();
        let mut strides = vec![1; counts.len()];
        for i in (0..counts.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * counts[i + 1];
        }
        strides
    }

    /// Evaluate all non-vanishing joint basis functions at `point`.
    pub fn evaluate(&self, point: &[f64]) -> Result<BasisVector> {
        let coords = self.locate(point)?;
        let locals = self
            .bases
            .iter()
            .zip(&coords)
            .map(|(basis, &t)| basis.values(t))
            .collect();
        Ok(self.tensor(locals))
    }

    /// Evaluate joint basis partial derivatives with `orders[i]` derivatives in dimension `i`.
    pub fn evaluate_derivative(&self, point: &[f64], orders: &[usize]) -> Result<BasisVector> {
        if orders.len() != self.bases.len() {
            return Err(BsfitError::DimensionMismatch {
                expected: self.bases.len(),
                found: orders.len(),
            });
        }
        let coords = self.locate(point)?;
        let locals = self
            .bases
            .iter()
            .zip(coords.iter().zip(orders))
            .map(|(basis, (&t, &order))| basis.derivatives(t, order))
            .collect();
        Ok(self.tensor(locals))
    }

    /// Check the point against the domain and apply the domain policy.
    fn locate(&self, point: &[f64]) -> Result<Vec<f64>> {
        if point.len() != self.bases.len() {
            return Err(BsfitError::DimensionMismatch {
                expected: self.bases.len(),
                found: point.len(),
            });
        }
        point
            .iter()
            .zip(&self.bases)
            .enumerate()
            .map(|(dimension, (&t, basis))| {
                let (lower, upper) = basis.domain();
                let inside = lower <= t && t <= upper;
                if inside {
                    return Ok(t);
                }
                match self.policy {
                    DomainPolicy::Clamp if !t.is_nan() => Ok(t.clamp(lower, upper)),
                    _ => Err(BsfitError::OutOfDomain {
                        dimension,
                        value: t,
                        lower,
                        upper,
                    }),
                }
            })
            .collect()
    }

    /// Outer product of per-dimension local values.
    fn tensor(&self, locals: Vec<(usize, Vec<f64>)>) -> BasisVector {
        let strides = self.strides();
        let total: usize = locals.iter().map(|(_, v)| v.len()).product();
        let mut indices = Vec::with_capacity(total);
        let mut values = Vec::with_capacity(total);
        let mut digits = vec![0usize; locals.len()];

        for _ in 0..total {
            let mut index = 0;
            let mut value = 1.0;
            for (dim, (first, local)) in locals.iter().enumerate() {
                index += (first + digits[dim]) * strides[dim];
                value *= local[digits[dim]];
            }
            indices.push(index);
            values.push(value);

            // Last dimension varies fastest
            for dim in (0..locals.len()).rev() {
                digits[dim] += 1;
                if digits[dim] < locals[dim].1.len() {
                    break;
                }
                digits[dim] = 0;
            }
        }

        BasisVector {
            len: self.num_basis_functions(),
            indices,
            values,
        }
    }
}

impl Validate for BasisEvaluator {
    fn validate(&self) -> Result<()> {
        if self.bases.is_empty() {
            return Err(BsfitError::Configuration(
                "A basis needs at least one dimension".into(),
            ));
        }
        for basis in &self.bases {
            basis.knots.validate_for_degree(basis.degree.value())?;
        }
        self.basis_counts()
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .ok_or_else(|| {
                BsfitError::Configuration("Tensor basis size overflows usize".into())
            })?;
        Ok(())
    }
}

impl Domain for BasisEvaluator {
    fn bounds(&self) -> Vec<(f64, f64)> {
        self.bases.iter().map(UnivariateBasis::domain).collect()
    }
}
