//! Sample accumulation and the bulk view handed to the fitter.

use bsfit_basis::distinct_sorted;
use bsfit_core::{BsfitError, Domain, Result, Validate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// One observation: input coordinates and the observed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub x: &'a [f64],
    pub y: f64,
}

/// Append-only store of samples sharing one input dimension.
///
/// Inputs are buffered row-major in a single flat vector so the whole set can be
/// handed to the fitter without copying. Deserialized stores are validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SampleRecord")]
pub struct SampleStore {
    num_variables: Option<usize>,
    x: Vec<f64>,
    y: Vec<f64>,
}

#[derive(Deserialize)]
struct SampleRecord {
    num_variables: Option<usize>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl TryFrom<SampleRecord> for SampleStore {
    type Error = BsfitError;

    fn try_from(record: SampleRecord) -> Result<Self> {
        let store = Self {
            num_variables: record.num_variables,
            x: record.x,
            y: record.y,
        };
        store.validate()?;
        Ok(store)
    }
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(x, y)` pairs, failing on the first inconsistent sample.
    pub fn from_samples<I, X>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (X, f64)>,
        X: AsRef<[f64]>,
    {
        let mut store = Self::new();
        for (x, y) in samples {
            store.add_sample(x.as_ref(), y)?;
        }
        Ok(store)
    }

    /// Append a sample. The first sample fixes the input dimension.
    pub fn add_sample(&mut self, x: &[f64], y: f64) -> Result<()> {
        let expected = self.num_variables.unwrap_or(x.len().max(1));
        if x.len() != expected {
            return Err(BsfitError::DimensionMismatch {
                expected,
                found: x.len(),
            });
        }
        if !y.is_finite() || x.iter().any(|v| !v.is_finite()) {
            return Err(BsfitError::Configuration(format!(
                "Sample values must be finite: x = {x:?}, y = {y}"
            )));
        }

        self.num_variables = Some(expected);
        self.x.extend_from_slice(x);
        self.y.push(y);
        Ok(())
    }

    /// Append a sample with a scalar input.
    pub fn add_scalar_sample(&mut self, x: f64, y: f64) -> Result<()> {
        self.add_sample(&[x], y)
    }

    /// Read-only bulk view of all samples. Calling this repeatedly yields the same data.
    pub fn finalize(&self) -> SampleTable<'_> {
        SampleTable {
            num_variables: self.num_variables.unwrap_or(0),
            x: &self.x,
            y: &self.y,
        }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Input dimension, or 0 before the first sample.
    pub fn num_variables(&self) -> usize {
        self.num_variables.unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample<'_>> {
        self.finalize().iter()
    }

    /// All values of input dimension `dim`, in insertion order.
    pub fn column(&self, dim: usize) -> Vec<f64> {
        self.finalize().column(dim)
    }

    /// Sorted distinct values of input dimension `dim`.
    pub fn distinct_values(&self, dim: usize) -> Vec<f64> {
        distinct_sorted(&self.column(dim))
    }
}

impl Validate for SampleStore {
    fn validate(&self) -> Result<()> {
        if self.num_variables == Some(0) {
            return Err(BsfitError::Configuration(
                "Samples need at least one input dimension".into(),
            ));
        }
        let dim = self.num_variables.unwrap_or(0);
        if self.x.len() != dim * self.y.len() || (dim == 0 && !self.y.is_empty()) {
            return Err(BsfitError::DimensionMismatch {
                expected: dim * self.y.len(),
                found: self.x.len(),
            });
        }
        if self.x.iter().chain(&self.y).any(|v| !v.is_finite()) {
            return Err(BsfitError::Configuration("Sample values must be finite".into()));
        }
        Ok(())
    }
}

impl Domain for SampleStore {
    fn bounds(&self) -> Vec<(f64, f64)> {
        (0..self.num_variables())
            .map(|dim| {
                self.column(dim)
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                        (lo.min(v), hi.max(v))
                    })
            })
            .collect()
    }
}

/// Borrowed row-major view over a [`SampleStore`].
#[derive(Debug, Clone, Copy)]
pub struct SampleTable<'a> {
    num_variables: usize,
    x: &'a [f64],
    y: &'a [f64],
}

impl<'a> SampleTable<'a> {
    pub fn num_samples(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    /// Row-major inputs: sample `i` occupies `x[i * d..(i + 1) * d]`.
    pub fn x(&self) -> &'a [f64] {
        self.x
    }

    pub fn y(&self) -> &'a [f64] {
        self.y
    }

    pub fn row(&self, i: usize) -> &'a [f64] {
        &self.x[i * self.num_variables..(i + 1) * self.num_variables]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'a, f64> {
        self.x.chunks_exact(self.num_variables.max(1))
    }

    pub fn par_rows(&self) -> rayon::slice::ChunksExact<'a, f64> {
        self.x.par_chunks_exact(self.num_variables.max(1))
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample<'a>> {
        let y = self.y;
        self.rows()
            .zip(y.iter().copied())
            .map(|(x, y)| Sample { x, y })
    }

    pub fn column(&self, dim: usize) -> Vec<f64> {
        self.rows().map(|row| row[dim]).collect()
    }
}
