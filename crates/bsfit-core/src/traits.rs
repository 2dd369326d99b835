use crate::error::Result;

/// Validate structural integrity of a knot vector, model, or configuration.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Per-dimension closed interval covered by a sample set or a basis.
pub trait Domain {
    /// `(lower, upper)` for each input dimension.
    fn bounds(&self) -> Vec<(f64, f64)>;

    /// Whether every coordinate of `point` lies inside its closed interval.
    fn contains(&self, point: &[f64]) -> bool {
        let bounds = self.bounds();
        point.len() == bounds.len()
            && point
                .iter()
                .zip(&bounds)
                .all(|(&x, &(lo, hi))| lo <= x && x <= hi)
    }
}
