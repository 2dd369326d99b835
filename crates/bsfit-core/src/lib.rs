pub mod error;
pub mod tolerance;
pub mod traits;

pub use error::{BsfitError, Result};
pub use tolerance::Tolerance;
pub use traits::{Domain, Validate};
