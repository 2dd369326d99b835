use std::fmt;

use bsfit_core::{BsfitError, Result};
use serde::{Deserialize, Serialize};

/// Polynomial degree of the basis functions in one input dimension.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Degree {
    Constant,
    Linear,
    Quadratic,
    #[default]
    Cubic,
    Quartic,
}

impl Degree {
    pub const ALL: [Degree; 5] = [
        Degree::Constant,
        Degree::Linear,
        Degree::Quadratic,
        Degree::Cubic,
        Degree::Quartic,
    ];

    pub fn value(self) -> usize {
        match self {
            Degree::Constant => 0,
            Degree::Linear => 1,
            Degree::Quadratic => 2,
            Degree::Cubic => 3,
            Degree::Quartic => 4,
        }
    }

    /// Polynomial order, `degree + 1`: the boundary knot multiplicity of a clamped vector.
    pub fn order(self) -> usize {
        self.value() + 1
    }
}

impl TryFrom<usize> for Degree {
    type Error = BsfitError;

    fn try_from(value: usize) -> Result<Self> {
        Degree::ALL.get(value).copied().ok_or_else(|| {
            BsfitError::Configuration(format!("Unsupported degree {value}, expected 0..=4"))
        })
    }
}

impl From<Degree> for usize {
    fn from(degree: Degree) -> usize {
        degree.value()
    }
}

impl fmt::Display for Degree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_from_round_trip() {
        for d in Degree::ALL {
            assert_eq!(Degree::try_from(d.value()).unwrap(), d);
        }
        assert!(matches!(
            Degree::try_from(5),
            Err(BsfitError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_is_cubic() {
        assert_eq!(Degree::default(), Degree::Cubic);
        assert_eq!(Degree::Cubic.order(), 4);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Degree::Quartic).unwrap();
        assert_eq!(json, "\"quartic\"");
        let d: Degree = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(d, Degree::Linear);
    }
}
