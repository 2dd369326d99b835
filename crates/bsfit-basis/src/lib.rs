//! BSFit basis: knot vectors, Cox-de Boor evaluation, and tensor-product bases.

pub mod degree;
pub mod evaluator;
pub mod knot;
pub mod knot_vector;
pub mod refine;

pub use degree::Degree;
pub use evaluator::{BasisEvaluator, BasisVector, DomainPolicy, UnivariateBasis};
pub use knot::{basis_function_derivatives, basis_functions, find_span};
pub use knot_vector::{distinct_sorted, KnotSpacing, KnotVector, KnotVectorGenerator};
pub use refine::{bezier_knots, insert_knots, restrict_support, CoefficientMap};
