//! BSFit model: sample storage, coefficient fitting, and fitted B-splines.

pub mod bspline;
pub mod builder;
pub mod fitter;
pub mod penalty;
pub mod persist;
pub mod samples;

pub use bspline::BSpline;
pub use builder::{BSplineBuilder, BuilderConfig, PerDimension};
pub use fitter::{
    assemble_rows, penalty_matrix, BSplineFitter, RankPolicy, SmoothingPolicy,
    PSPLINE_DIFFERENCE_ORDER,
};
pub use penalty::quadratic_form;
pub use persist::{ModelFormat, FORMAT_VERSION};
pub use samples::{Sample, SampleStore, SampleTable};
