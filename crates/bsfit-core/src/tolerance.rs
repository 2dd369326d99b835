/// Numerical tolerances used by the fitting engine.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Tolerance {
    /// Relative singular value cutoff: values below `rank * sigma_max` count as zero
    pub rank: f64,
    /// Accepted backward error of the normal equations after a Cholesky solve
    pub residual: f64,
}

impl Tolerance {
    pub const DEFAULT_RANK: f64 = 1e-10;
    pub const DEFAULT_RESIDUAL: f64 = 1e-6;

    pub fn new(rank: f64, residual: f64) -> Self {
        Self { rank, residual }
    }

    pub fn default_precision() -> Self {
        Self {
            rank: Self::DEFAULT_RANK,
            residual: Self::DEFAULT_RESIDUAL,
        }
    }

    /// Absolute singular value threshold for a matrix whose largest singular value is `sigma_max`.
    pub fn rank_cutoff(self, sigma_max: f64) -> f64 {
        self.rank * sigma_max
    }

    /// Check whether `residual_norm` is acceptable relative to `reference_norm`.
    pub fn residual_ok(self, residual_norm: f64, reference_norm: f64) -> bool {
        if reference_norm == 0.0 {
            return residual_norm == 0.0;
        }
        residual_norm <= self.residual * reference_norm
    }

    pub fn is_valid(self) -> bool {
        self.rank.is_finite() && self.rank >= 0.0 && self.residual.is_finite() && self.residual >= 0.0
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::default_precision()
    }
}
