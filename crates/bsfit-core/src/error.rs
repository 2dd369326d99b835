use thiserror::Error;

#[derive(Debug, Error)]
pub enum BsfitError {
    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rank deficient system: numerical rank {rank}, {required} required")]
    RankDeficient { rank: usize, required: usize },

    #[error("Point outside domain in dimension {dimension}: {value} not in [{lower}, {upper}]")]
    OutOfDomain {
        dimension: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    #[error("Unsupported format version {found} (supported: {supported})")]
    UnsupportedFormatVersion { found: u32, supported: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Numerical error: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, BsfitError>;
