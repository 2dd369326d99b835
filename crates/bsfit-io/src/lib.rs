//! BSFit I/O: sample ingestion from delimited text files.

pub mod delimited;

pub use delimited::{load_samples, read_delimited, save_samples, write_delimited, DelimitedOptions};
