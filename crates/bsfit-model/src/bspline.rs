//! Fitted tensor-product B-spline model.

use std::fmt;
use std::path::Path;

use bsfit_basis::refine::{self, CoefficientMap};
use bsfit_basis::{BasisEvaluator, Degree, DomainPolicy, KnotVector};
use bsfit_core::{BsfitError, Domain, Result, Validate};
use nalgebra::DMatrix;
use rayon::prelude::*;

use crate::persist::{self, ModelFormat};
use crate::samples::SampleTable;

/// A tensor-product B-spline: a basis and one coefficient per basis function.
///
/// Coefficients are flattened row-major over the per-dimension basis indices,
/// last dimension fastest (see [`BasisEvaluator::strides`]).
#[derive(Debug, Clone, PartialEq)]
pub struct BSpline {
    basis: BasisEvaluator,
    coefficients: Vec<f64>,
}

impl BSpline {
    pub fn new(basis: BasisEvaluator, coefficients: Vec<f64>) -> Result<Self> {
        let spline = Self {
            basis,
            coefficients,
        };
        spline.validate()?;
        Ok(spline)
    }

    /// Build a model directly from degrees, knot vectors and coefficients.
    pub fn from_knots(
        degrees: &[Degree],
        knot_vectors: Vec<KnotVector>,
        coefficients: Vec<f64>,
    ) -> Result<Self> {
        Self::new(
            BasisEvaluator::from_parts(degrees, knot_vectors)?,
            coefficients,
        )
    }

    /// Same model with a different policy for points outside the knot domain.
    pub fn with_domain_policy(mut self, policy: DomainPolicy) -> Self {
        self.basis = self.basis.with_policy(policy);
        self
    }

    pub fn basis(&self) -> &BasisEvaluator {
        &self.basis
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn num_variables(&self) -> usize {
        self.basis.num_variables()
    }

    pub fn degrees(&self) -> Vec<Degree> {
        self.basis.degrees()
    }

    pub fn knot_vectors(&self) -> Vec<&KnotVector> {
        self.basis.bases().iter().map(|b| b.knots()).collect()
    }

    pub fn basis_counts(&self) -> Vec<usize> {
        self.basis.basis_counts()
    }

    pub fn num_basis_functions(&self) -> usize {
        self.coefficients.len()
    }

    pub fn domain_policy(&self) -> DomainPolicy {
        self.basis.policy()
    }

    /// Value of the spline at `point`.
    pub fn eval(&self, point: &[f64]) -> Result<f64> {
        Ok(self.basis.evaluate(point)?.dot(&self.coefficients))
    }

    /// Partial derivative with `orders[i]` derivatives taken in dimension `i`.
    pub fn eval_derivative(&self, point: &[f64], orders: &[usize]) -> Result<f64> {
        Ok(self
            .basis
            .evaluate_derivative(point, orders)?
            .dot(&self.coefficients))
    }

    /// Gradient as a `1 x d` matrix.
    pub fn eval_jacobian(&self, point: &[f64]) -> Result<DMatrix<f64>> {
        let d = self.num_variables();
        let mut jacobian = DMatrix::zeros(1, d);
        let mut orders = vec![0; d];
        for j in 0..d {
            orders[j] = 1;
            jacobian[(0, j)] = self.eval_derivative(point, &orders)?;
            orders[j] = 0;
        }
        Ok(jacobian)
    }

    /// Second partial derivatives as a symmetric `d x d` matrix.
    pub fn eval_hessian(&self, point: &[f64]) -> Result<DMatrix<f64>> {
        let d = self.num_variables();
        let mut hessian = DMatrix::zeros(d, d);
        let mut orders = vec![0; d];
        for i in 0..d {
            for j in i..d {
                orders[i] += 1;
                orders[j] += 1;
                let value = self.eval_derivative(point, &orders)?;
                hessian[(i, j)] = value;
                hessian[(j, i)] = value;
                orders[i] = 0;
                orders[j] = 0;
            }
        }
        Ok(hessian)
    }

    /// Evaluate many points in parallel. Fails on the first invalid point.
    pub fn eval_many<P>(&self, points: &[P]) -> Result<Vec<f64>>
    where
        P: AsRef<[f64]> + Sync,
    {
        points.par_iter().map(|p| self.eval(p.as_ref())).collect()
    }

    /// Sum of squared differences between the model and the observed values.
    pub fn residual_sum_of_squares(&self, table: &SampleTable<'_>) -> Result<f64> {
        table.iter().try_fold(0.0, |acc, sample| {
            let r = self.eval(sample.x)? - sample.y;
            Ok(acc + r * r)
        })
    }

    /// Control points as columns of a `(d + 1) x n` matrix: the Greville abscissa of each
    /// basis function in rows `0..d`, its coefficient in row `d`.
    pub fn control_points(&self) -> DMatrix<f64> {
        let d = self.num_variables();
        let n = self.coefficients.len();
        let abscissae: Vec<Vec<f64>> = self
            .basis
            .bases()
            .iter()
            .map(|b| b.greville_abscissae())
            .collect();
        let counts = self.basis_counts();
        let strides = self.basis.strides();

        let mut points = DMatrix::zeros(d + 1, n);
        for (k, &c) in self.coefficients.iter().enumerate() {
            for dim in 0..d {
                let i = (k / strides[dim]) % counts[dim];
                points[(dim, k)] = abscissae[dim][i];
            }
            points[(d, k)] = c;
        }
        points
    }

    /// Save in the encoding named by the file extension: `.json` is JSON, anything else binary.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        persist::save(self, path, ModelFormat::from_path(path))
    }

    pub fn save_as(&self, path: impl AsRef<Path>, format: ModelFormat) -> Result<()> {
        persist::save(self, path.as_ref(), format)
    }

    /// The same function over a refined basis with `tau` inserted `multiplicity` times
    /// into the knot vector of dimension `dim`.
    pub fn insert_knots(&self, tau: f64, dim: usize, multiplicity: usize) -> Result<BSpline> {
        self.check_dimension(dim)?;
        self.refine(|d, degree, knots| {
            if d == dim {
                refine::insert_knots(degree, knots, tau, multiplicity).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    /// The same function with every domain knot at full multiplicity, so each knot
    /// span carries an independent polynomial piece in Bezier form.
    pub fn decompose_to_bezier(&self) -> Result<BSpline> {
        self.refine(|_, degree, knots| refine::bezier_knots(degree, knots).map(Some))
    }

    /// Restrict the model to the box `[lower, upper]`, dropping basis functions that
    /// vanish on it. The box must lie inside the current domain.
    ///
    /// With `regularize`, knots are first inserted at the box ends up to full
    /// multiplicity so the new domain is exactly the box. Without it the new domain
    /// may extend past the box to the nearest knots.
    pub fn reduce_domain(&self, lower: &[f64], upper: &[f64], regularize: bool) -> Result<BSpline> {
        let d = self.num_variables();
        for found in [lower.len(), upper.len()] {
            if found != d {
                return Err(BsfitError::DimensionMismatch { expected: d, found });
            }
        }
        for (dim, (lo, hi)) in self.bounds().into_iter().enumerate() {
            let (a, b) = (lower[dim], upper[dim]);
            if !(a < b) {
                return Err(BsfitError::Configuration(format!(
                    "Empty reduced domain [{a}, {b}] in dimension {dim}"
                )));
            }
            if a < lo || b > hi {
                return Err(BsfitError::Configuration(format!(
                    "Reduced domain [{a}, {b}] leaves the domain [{lo}, {hi}] of dimension {dim}"
                )));
            }
        }

        self.refine(|dim, degree, knots| {
            let (a, b) = (lower[dim], upper[dim]);
            let mut current = knots.clone();
            let mut map = CoefficientMap::identity(knots.num_basis_functions(degree));
            if regularize {
                for end in [a, b] {
                    let missing = (degree + 1).saturating_sub(current.multiplicity(end));
                    let (next, step) = refine::insert_knots(degree, &current, end, missing)?;
                    map = step.compose(&map);
                    current = next;
                }
            }
            let (restricted, select) = refine::restrict_support(degree, &current, a, b)?;
            Ok(Some((restricted, select.compose(&map))))
        })
    }

    fn check_dimension(&self, dim: usize) -> Result<()> {
        if dim >= self.num_variables() {
            return Err(BsfitError::Configuration(format!(
                "Dimension {dim} out of range for a {}-variate B-spline",
                self.num_variables()
            )));
        }
        Ok(())
    }

    /// Rebuild the model with new knots per dimension, mapping the coefficient tensor
    /// along each changed axis. `f` returns `None` to leave a dimension as it is.
    fn refine<F>(&self, mut f: F) -> Result<BSpline>
    where
        F: FnMut(usize, usize, &KnotVector) -> Result<Option<(KnotVector, CoefficientMap)>>,
    {
        let degrees = self.degrees();
        let mut counts = self.basis_counts();
        let mut knot_vectors: Vec<KnotVector> = self.knot_vectors().into_iter().cloned().collect();
        let mut coefficients = self.coefficients.clone();

        for dim in 0..degrees.len() {
            let Some((knots, map)) = f(dim, degrees[dim].value(), &knot_vectors[dim])? else {
                continue;
            };
            coefficients = map.apply_along(&coefficients, &counts, dim);
            counts[dim] = map.num_rows();
            knot_vectors[dim] = knots;
        }

        log::debug!("Refined B-spline to basis counts {:?}", counts);
        Ok(BSpline::from_knots(&degrees, knot_vectors, coefficients)?
            .with_domain_policy(self.domain_policy()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        persist::load(path.as_ref())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        persist::encode(self, ModelFormat::Binary)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        persist::decode(bytes)
    }

    pub fn to_json(&self) -> Result<String> {
        let bytes = persist::encode(self, ModelFormat::Json)?;
        String::from_utf8(bytes).map_err(|e| BsfitError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        persist::decode(json.as_bytes())
    }
}

impl Validate for BSpline {
    fn validate(&self) -> Result<()> {
        self.basis.validate()?;
        let expected = self.basis.num_basis_functions();
        if self.coefficients.len() != expected {
            return Err(BsfitError::DimensionMismatch {
                expected,
                found: self.coefficients.len(),
            });
        }
        if let Some(c) = self.coefficients.iter().find(|c| !c.is_finite()) {
            return Err(BsfitError::Configuration(format!(
                "Coefficients must be finite, found {c}"
            )));
        }
        Ok(())
    }
}

impl Domain for BSpline {
    fn bounds(&self) -> Vec<(f64, f64)> {
        self.basis.bounds()
    }
}

impl fmt::Display for BSpline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let degrees = self.degrees();
        match degrees.split_first() {
            Some((first, rest)) if rest.iter().all(|d| d == first) => {
                write!(f, "BSpline of degree {first}")
            }
            _ => {
                let list: Vec<String> = degrees.iter().map(Degree::to_string).collect();
                write!(f, "BSpline of degrees ({})", list.join(", "))
            }
        }
    }
}
