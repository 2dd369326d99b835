//! Versioned on-disk format for fitted models.
//!
//! Two encodings carry the same record:
//! - binary: `BSFT` magic, little-endian `u32` format version, bincode payload
//! - JSON: a single object with a `format_version` field
//!
//! The version is checked before the payload is parsed.

use std::fs;
use std::path::Path;

use bincode::Options;
use bsfit_basis::{Degree, DomainPolicy, KnotVector};
use bsfit_core::{BsfitError, Result};
use serde::{Deserialize, Serialize};

use crate::bspline::BSpline;

/// Current version of the persisted model format.
pub const FORMAT_VERSION: u32 = 1;

/// Leading bytes of the binary encoding.
pub const MAGIC: [u8; 4] = *b"BSFT";

const HEADER_LEN: usize = MAGIC.len() + 4;

/// Encoding of a persisted model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    #[default]
    Binary,
    Json,
}

impl ModelFormat {
    /// Guess the format from a file extension: `.json` is JSON, anything else binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ModelFormat::Json,
            _ => ModelFormat::Binary,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelRecord {
    format_version: u32,
    num_variables: usize,
    degrees: Vec<Degree>,
    knot_vectors: Vec<KnotVector>,
    coefficients: Vec<f64>,
    #[serde(default)]
    domain_policy: DomainPolicy,
}

#[derive(Deserialize)]
struct VersionHeader {
    format_version: u32,
}

impl ModelRecord {
    fn from_model(spline: &BSpline) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            num_variables: spline.num_variables(),
            degrees: spline.degrees(),
            knot_vectors: spline.knot_vectors().into_iter().cloned().collect(),
            coefficients: spline.coefficients().to_vec(),
            domain_policy: spline.domain_policy(),
        }
    }

    fn into_model(self) -> Result<BSpline> {
        check_version(self.format_version)?;
        if self.degrees.len() != self.num_variables {
            return Err(BsfitError::DimensionMismatch {
                expected: self.num_variables,
                found: self.degrees.len(),
            });
        }
        Ok(BSpline::from_knots(&self.degrees, self.knot_vectors, self.coefficients)?
            .with_domain_policy(self.domain_policy))
    }
}

/// Fixed-width integers, as `bincode::serialize` writes them.
fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

fn check_version(found: u32) -> Result<()> {
    if found != FORMAT_VERSION {
        return Err(BsfitError::UnsupportedFormatVersion {
            found,
            supported: FORMAT_VERSION,
        });
    }
    Ok(())
}

/// Serialize a model into the given encoding.
pub fn encode(spline: &BSpline, format: ModelFormat) -> Result<Vec<u8>> {
    let record = ModelRecord::from_model(spline);
    match format {
        ModelFormat::Json => serde_json::to_vec_pretty(&record)
            .map_err(|e| BsfitError::Serialization(e.to_string())),
        ModelFormat::Binary => {
            let payload = bincode_options()
                .serialize(&record)
                .map_err(|e| BsfitError::Serialization(e.to_string()))?;
            let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
            bytes.extend_from_slice(&MAGIC);
            bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
            bytes.extend_from_slice(&payload);
            Ok(bytes)
        }
    }
}

/// Deserialize and validate a model, detecting the encoding from the leading bytes.
pub fn decode(bytes: &[u8]) -> Result<BSpline> {
    let record: ModelRecord = if bytes.starts_with(&MAGIC) {
        if bytes.len() < HEADER_LEN {
            return Err(BsfitError::Serialization(
                "Truncated binary model header".into(),
            ));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
        check_version(u32::from_le_bytes(version))?;
        // A payload never decodes to more than its own size
        let payload = &bytes[HEADER_LEN..];
        bincode_options()
            .with_limit(payload.len() as u64)
            .deserialize(payload)
            .map_err(|e| BsfitError::Serialization(e.to_string()))?
    } else {
        let header: VersionHeader = serde_json::from_slice(bytes)
            .map_err(|e| BsfitError::Serialization(e.to_string()))?;
        check_version(header.format_version)?;
        serde_json::from_slice(bytes).map_err(|e| BsfitError::Serialization(e.to_string()))?
    };
    record.into_model()
}

pub fn save(spline: &BSpline, path: &Path, format: ModelFormat) -> Result<()> {
    let bytes = encode(spline, format)?;
    fs::write(path, bytes)?;
    log::debug!("Saved {} to {} ({:?})", spline, path.display(), format);
    Ok(())
}

pub fn load(path: &Path) -> Result<BSpline> {
    let bytes = fs::read(path)?;
    let spline = decode(&bytes)?;
    log::debug!("Loaded {} from {}", spline, path.display());
    Ok(spline)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic() -> BSpline {
        let kv = KnotVector::new(vec![0.0, 0.0, 0.0, 0.5, 1.0, 1.0, 1.0]).unwrap();
        BSpline::from_knots(&[Degree::Quadratic], vec![kv], vec![1.0, -0.25, 0.1, 3.0]).unwrap()
    }

    #[test]
    fn test_binary_header() {
        let bytes = encode(&quadratic(), ModelFormat::Binary).unwrap();
        assert_eq!(&bytes[..4], b"BSFT");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(decode(&bytes).unwrap(), quadratic());
    }

    #[test]
    fn test_json_fields() {
        let bytes = encode(&quadratic(), ModelFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["format_version"], 1);
        assert_eq!(value["num_variables"], 1);
        assert_eq!(value["degrees"][0], "quadratic");
        assert_eq!(value["coefficients"].as_array().unwrap().len(), 4);
        assert_eq!(decode(&bytes).unwrap(), quadratic());
    }

    #[test]
    fn test_unknown_binary_version() {
        let mut bytes = encode(&quadratic(), ModelFormat::Binary).unwrap();
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(BsfitError::UnsupportedFormatVersion {
                found: 7,
                supported: 1
            })
        ));
    }

    #[test]
    fn test_unknown_json_version_checked_first() {
        // The payload is not a valid model; the version error wins
        let json = r#"{"format_version": 2, "coefficients": "garbage"}"#;
        assert!(matches!(
            decode(json.as_bytes()),
            Err(BsfitError::UnsupportedFormatVersion { found: 2, .. })
        ));
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(decode(b"BSF"), Err(BsfitError::Serialization(_))));
        assert!(matches!(decode(b"BSFT\x01\x00"), Err(BsfitError::Serialization(_))));
        assert!(matches!(decode(b"not a model"), Err(BsfitError::Serialization(_))));
    }

    #[test]
    fn test_loaded_model_is_validated() {
        let json = r#"{
            "format_version": 1,
            "num_variables": 1,
            "degrees": ["linear"],
            "knot_vectors": [[0.0, 0.0, 1.0, 1.0]],
            "coefficients": [1.0, 2.0, 3.0]
        }"#;
        assert!(matches!(
            decode(json.as_bytes()),
            Err(BsfitError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }

    #[test]
    fn test_forged_length_prefix() {
        let mut bytes = encode(&quadratic(), ModelFormat::Binary).unwrap();
        // format_version (u32) and num_variables (u64) precede the degree list length
        let at = HEADER_LEN + 4 + 8;
        assert_eq!(&bytes[at..at + 8], &1u64.to_le_bytes());
        bytes[at..at + 8].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
        assert!(matches!(decode(&bytes), Err(BsfitError::Serialization(_))));

        let mut bytes = encode(&quadratic(), ModelFormat::Binary).unwrap();
        let len = bytes.len();
        bytes.truncate(len - 3);
        assert!(matches!(decode(&bytes), Err(BsfitError::Serialization(_))));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ModelFormat::from_path(Path::new("m.JSON")), ModelFormat::Json);
        assert_eq!(ModelFormat::from_path(Path::new("m.bsft")), ModelFormat::Binary);
        assert_eq!(ModelFormat::from_path(Path::new("model")), ModelFormat::Binary);
    }
}
