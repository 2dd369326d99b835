//! Fluent construction of fitted B-splines from a sample store.

use std::fs;
use std::path::Path;

use bsfit_basis::{BasisEvaluator, Degree, DomainPolicy, KnotSpacing, KnotVectorGenerator};
use bsfit_core::{BsfitError, Result, Tolerance, Validate};
use serde::{Deserialize, Serialize};

use crate::bspline::BSpline;
use crate::fitter::{BSplineFitter, RankPolicy, SmoothingPolicy};
use crate::samples::SampleStore;

/// An option given once for every dimension or as one value per dimension.
///
/// Deserializes from either a bare value or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerDimension<T> {
    All(T),
    Each(Vec<T>),
}

impl<T: Clone> PerDimension<T> {
    /// One value per dimension. A list must have exactly `num_variables` entries.
    pub fn resolve(&self, num_variables: usize, name: &str) -> Result<Vec<T>> {
        match self {
            PerDimension::All(value) => Ok(vec![value.clone(); num_variables]),
            PerDimension::Each(values) if values.len() == num_variables => Ok(values.clone()),
            PerDimension::Each(values) => Err(BsfitError::Configuration(format!(
                "{} {name} given for {num_variables} input dimensions",
                values.len()
            ))),
        }
    }
}

/// Every option of a [`BSplineBuilder`]. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub degrees: PerDimension<Degree>,
    /// Basis functions per dimension; the number of distinct sample values when unset.
    pub num_basis_functions: Option<PerDimension<usize>>,
    pub knot_spacing: KnotSpacing,
    pub smoothing: SmoothingPolicy,
    pub lambda: f64,
    pub rank_policy: RankPolicy,
    pub domain_policy: DomainPolicy,
    pub tolerance: Tolerance,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            degrees: PerDimension::All(Degree::default()),
            num_basis_functions: None,
            knot_spacing: KnotSpacing::default(),
            smoothing: SmoothingPolicy::default(),
            lambda: 0.0,
            rank_policy: RankPolicy::default(),
            domain_policy: DomainPolicy::default(),
            tolerance: Tolerance::default(),
        }
    }
}

impl BuilderConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BsfitError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| BsfitError::Serialization(e.to_string()))
    }

    fn fitter(&self) -> BSplineFitter {
        BSplineFitter::new(self.smoothing, self.lambda)
            .with_rank_policy(self.rank_policy)
            .with_tolerance(self.tolerance)
    }
}

impl Validate for BuilderConfig {
    fn validate(&self) -> Result<()> {
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
        if matches!(&self.degrees, PerDimension::Each(d) if d.is_empty()) {
            return Err(BsfitError::Configuration("Empty degree list".into()));
        }
        match &self.num_basis_functions {
            Some(PerDimension::Each(counts)) if counts.is_empty() => Err(
                BsfitError::Configuration("Empty basis function count list".into()),
            ),
            Some(PerDimension::All(0)) => Err(BsfitError::Configuration(
                "Basis function counts must be positive".into(),
            )),
            Some(PerDimension::Each(counts)) if counts.contains(&0) => Err(
                BsfitError::Configuration("Basis function counts must be positive".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Builds a [`BSpline`] from the samples of a store.
///
/// Setters consume and return the builder; [`build`](Self::build) can be called any
/// number of times and always starts from the store's current contents.
#[derive(Debug, Clone)]
pub struct BSplineBuilder<'a> {
    store: &'a SampleStore,
    config: BuilderConfig,
}

impl<'a> BSplineBuilder<'a> {
    pub fn new(store: &'a SampleStore) -> Self {
        Self::with_config(store, BuilderConfig::default())
    }

    pub fn with_config(store: &'a SampleStore, config: BuilderConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Same degree in every dimension.
    pub fn degree(mut self, degree: Degree) -> Self {
        self.config.degrees = PerDimension::All(degree);
        self
    }

    pub fn degrees(mut self, degrees: Vec<Degree>) -> Self {
        self.config.degrees = PerDimension::Each(degrees);
        self
    }

    pub fn num_basis_functions(mut self, counts: Vec<usize>) -> Self {
        self.config.num_basis_functions = Some(PerDimension::Each(counts));
        self
    }

    pub fn knot_spacing(mut self, spacing: KnotSpacing) -> Self {
        self.config.knot_spacing = spacing;
        self
    }

    pub fn smoothing(mut self, smoothing: SmoothingPolicy) -> Self {
        self.config.smoothing = smoothing;
        self
    }

    pub fn lambda(mut self, lambda: f64) -> Self {
        self.config.lambda = lambda;
        self
    }

    pub fn rank_policy(mut self, policy: RankPolicy) -> Self {
        self.config.rank_policy = policy;
        self
    }

    pub fn domain_policy(mut self, policy: DomainPolicy) -> Self {
        self.config.domain_policy = policy;
        self
    }

    pub fn tolerance(mut self, tolerance: Tolerance) -> Self {
        self.config.tolerance = tolerance;
        self
    }

    /// Validate the configuration, place knots, and fit.
    pub fn build(&self) -> Result<BSpline> {
        if self.store.is_empty() {
            return Err(BsfitError::InsufficientSamples(
                "Cannot build a B-spline without samples".into(),
            ));
        }
        self.config.validate()?;

        let d = self.store.num_variables();
        let degrees = self.config.degrees.resolve(d, "degrees")?;
        let distinct: Vec<Vec<f64>> = (0..d).map(|dim| self.store.distinct_values(dim)).collect();
        let counts = match &self.config.num_basis_functions {
            Some(counts) => counts.resolve(d, "basis function counts")?,
            None => distinct
                .iter()
                .zip(&degrees)
                .map(|(values, degree)| values.len().max(degree.order()))
                .collect(),
        };

        let generator = KnotVectorGenerator::new(self.config.knot_spacing);
        let knot_vectors = degrees
            .iter()
            .zip(&counts)
            .zip(&distinct)
            .map(|((&degree, &count), values)| generator.generate(values, degree, count))
            .collect::<Result<Vec<_>>>()?;

        let basis = BasisEvaluator::from_parts(&degrees, knot_vectors)?
            .with_policy(self.config.domain_policy);
        log::debug!(
            "Building B-spline: degrees {:?}, basis counts {:?}, {:?} knots",
            degrees,
            counts,
            self.config.knot_spacing
        );
        self.config.fitter().fit(&self.store.finalize(), basis)
    }
}
