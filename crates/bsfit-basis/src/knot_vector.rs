//! Validated knot vectors and knot placement from sample values.

use bsfit_core::{BsfitError, Result, Validate};
use serde::{Deserialize, Serialize};

use crate::degree::Degree;
use crate::knot;

/// A non-decreasing sequence of finite knots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnotVector(Vec<f64>);

impl KnotVector {
    pub fn new(knots: Vec<f64>) -> Result<Self> {
        let kv = Self(knots);
        kv.validate()?;
        Ok(kv)
    }

    /// Open uniform knot vector on `[lower, upper]` with `degree + 1` clamped knots at each end.
    pub fn clamped_uniform(lower: f64, upper: f64, degree: usize, num_basis: usize) -> Result<Self> {
        if num_basis < degree + 1 {
            return Err(BsfitError::Configuration(format!(
                "{num_basis} basis functions cannot carry degree {degree}"
            )));
        }
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(BsfitError::Configuration(format!(
                "Empty knot domain [{lower}, {upper}]"
            )));
        }
        let interior = num_basis - degree - 1;
        let step = (upper - lower) / (interior + 1) as f64;
        Self::new(clamp_ends(
            lower,
            upper,
            degree,
            (1..interior + 1).map(|j| lower + step * j as f64),
        ))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of knots equal to `t`.
    pub fn multiplicity(&self, t: f64) -> usize {
        self.0.iter().filter(|&&k| k == t).count()
    }

    pub fn num_basis_functions(&self, degree: usize) -> usize {
        knot::num_basis_functions(degree, &self.0)
    }

    /// Closed parameter domain `[t_degree, t_n]` supported by a full set of basis functions.
    pub fn domain(&self, degree: usize) -> (f64, f64) {
        let n = self.num_basis_functions(degree);
        (self.0[degree], self.0[n])
    }

    /// Whether both ends carry exactly `degree + 1` repeated knots.
    pub fn is_clamped(&self, degree: usize) -> bool {
        let (lo, hi) = self.domain(degree);
        self.0[..=degree].iter().all(|&k| k == lo)
            && self.0[self.0.len() - degree - 1..].iter().all(|&k| k == hi)
    }

    /// Check that this knot vector can carry a basis of the given degree.
    pub fn validate_for_degree(&self, degree: usize) -> Result<()> {
        self.validate()?;
        let order = degree + 1;
        if self.0.len() < 2 * order {
            return Err(BsfitError::Configuration(format!(
                "Knot vector of length {} is too short for degree {degree}",
                self.0.len()
            )));
        }
        let (lo, hi) = self.domain(degree);
        if lo >= hi {
            return Err(BsfitError::Configuration(format!(
                "Knot vector domain [{lo}, {hi}] is empty"
            )));
        }
        let mut run = 1;
        for w in self.0.windows(2) {
            run = if w[0] == w[1] { run + 1 } else { 1 };
            if run > order {
                return Err(BsfitError::Configuration(format!(
                    "Knot {} has multiplicity above {order}",
                    w[1]
                )));
            }
        }
        Ok(())
    }
}

impl Validate for KnotVector {
    fn validate(&self) -> Result<()> {
        if let Some(k) = self.0.iter().find(|k| !k.is_finite()) {
            return Err(BsfitError::Configuration(format!("Non-finite knot {k}")));
        }
        if let Some(w) = self.0.windows(2).find(|w| w[0] > w[1]) {
            return Err(BsfitError::Configuration(format!(
                "Knot vector is decreasing at {} > {}",
                w[0], w[1]
            )));
        }
        Ok(())
    }
}

impl AsRef<[f64]> for KnotVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Interior knot placement policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnotSpacing {
    /// Uniformly spaced interior knots between the smallest and largest sample value.
    #[default]
    Equidistant,
    /// Interior knots at quantiles of the distinct sample values, following sample density.
    Sample,
}

/// Places one clamped knot vector per input dimension from sample values.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnotVectorGenerator {
    pub spacing: KnotSpacing,
}

impl KnotVectorGenerator {
    pub fn new(spacing: KnotSpacing) -> Self {
        Self { spacing }
    }

    /// Generate a knot vector of length `num_basis + degree + 1` covering `values`.
    pub fn generate(&self, values: &[f64], degree: Degree, num_basis: usize) -> Result<KnotVector> {
        let k = degree.value();
        if num_basis < degree.order() {
            return Err(BsfitError::Configuration(format!(
                "{num_basis} basis functions cannot carry degree {k} (at least {} required)",
                degree.order()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BsfitError::Configuration(
                "Sample values must be finite".into(),
            ));
        }

        let distinct = distinct_sorted(values);
        let required = degree.order().max(2);
        if distinct.len() < required {
            return Err(BsfitError::InsufficientSamples(format!(
                "{} distinct values, degree {k} requires at least {required}",
                distinct.len()
            )));
        }

        let lower = distinct[0];
        let upper = distinct[distinct.len() - 1];
        let interior = num_basis - degree.order();

        let knots = match self.spacing {
            KnotSpacing::Equidistant => {
                KnotVector::clamped_uniform(lower, upper, k, num_basis)?.into_inner()
            }
            KnotSpacing::Sample => clamp_ends(
                lower,
                upper,
                k,
                (1..interior + 1).map(|j| quantile(&distinct, j as f64 / (interior + 1) as f64)),
            ),
        };

        log::debug!(
            "Generated {} knots ({:?}) on [{lower}, {upper}] for degree {k}",
            knots.len(),
            self.spacing
        );
        KnotVector::new(knots)
    }
}

/// Sorted distinct values of `values`.
pub fn distinct_sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted
}

fn clamp_ends(
    lower: f64,
    upper: f64,
    degree: usize,
    interior: impl ExactSizeIterator<Item = f64>,
) -> Vec<f64> {
    let mut knots = Vec::with_capacity(2 * (degree + 1) + interior.len());
    knots.extend(std::iter::repeat(lower).take(degree + 1));
    knots.extend(interior);
    knots.extend(std::iter::repeat(upper).take(degree + 1));
    knots
}

/// Linear interpolation between order statistics of sorted `data` at `q` in `[0, 1]`.
fn quantile(data: &[f64], q: f64) -> f64 {
    let pos = q * (data.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        data[lower]
    } else {
        let fraction = pos - lower as f64;
        data[lower] * (1.0 - fraction) + data[upper] * fraction
    }
}
