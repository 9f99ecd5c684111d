//! Versioned snapshot format for mixtures.
//!
//! Each snapshot is a tagged record `{type, version, ...}`. Loading checks the
//! tag, the version and the dimensionality before any array is trusted.

use std::{fs, path::Path};

use anyhow::{Context, Result as AnyResult};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::error::{MixtureError, Result};
use crate::mixture::Mixture;
use crate::space::{Real, Space};

pub const RECORD_TYPE: &str = "gm.Mixture";
pub const RECORD_VERSION: u32 = 3;

/// Serialised form of a [`Mixture`]. Arrays are flattened in
/// `(batch, layer, component)` order; covariances are column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixtureRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub version: u32,
    pub dims: usize,
    pub n_batch: usize,
    pub n_layers: usize,
    pub n_components: usize,
    pub weights: Vec<f64>,
    pub positions: Vec<Vec<f64>>,
    pub covariances: Vec<Vec<f64>>,
}

impl<S: Space> Mixture<S> {
    pub fn to_record(&self) -> MixtureRecord {
        let (n_batch, n_layers, n_components) = self.shape();
        MixtureRecord {
            record_type: RECORD_TYPE.to_string(),
            version: RECORD_VERSION,
            dims: S::DIMS,
            n_batch,
            n_layers,
            n_components,
            weights: self.weights().iter().map(|w| w.to_f64()).collect(),
            positions: self.positions().iter().map(|p| S::vector_to_f64(*p)).collect(),
            covariances: self.covariances().iter().map(|c| S::matrix_to_f64(*c)).collect(),
        }
    }

    pub fn from_record(record: &MixtureRecord) -> Result<Self> {
        if record.record_type != RECORD_TYPE {
            return Err(MixtureError::InvalidRecord {
                found: record.record_type.clone(),
            });
        }
        if record.version != RECORD_VERSION {
            return Err(MixtureError::UnsupportedVersion {
                found: record.version,
                expected: RECORD_VERSION,
            });
        }
        if record.dims != S::DIMS {
            return Err(MixtureError::DimensionMismatch {
                expected: S::DIMS,
                found: record.dims,
            });
        }
        let shape = (record.n_batch, record.n_layers, record.n_components);
        let count = shape.0 * shape.1 * shape.2;
        if record.weights.len() != count
            || record.positions.len() != count
            || record.covariances.len() != count
        {
            return Err(MixtureError::invalid(format!(
                "record declares {count} components but holds {} weights, {} positions, {} covariances",
                record.weights.len(),
                record.positions.len(),
                record.covariances.len()
            )));
        }

        let weights: Vec<S::Real> = record.weights.iter().map(|w| S::Real::from_f64(*w)).collect();
        let positions = record
            .positions
            .iter()
            .map(|p| {
                S::vector_from_f64(p).ok_or_else(|| {
                    MixtureError::invalid(format!("position with {} values in a {}-D record", p.len(), S::DIMS))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let covariances = record
            .covariances
            .iter()
            .map(|c| {
                S::matrix_from_f64(c).ok_or_else(|| {
                    MixtureError::invalid(format!("covariance with {} values in a {}-D record", c.len(), S::DIMS))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let reshape = |e: ndarray::ShapeError| MixtureError::invalid(e.to_string());
        Mixture::new(
            Array3::from_shape_vec(shape, weights).map_err(reshape)?,
            Array3::from_shape_vec(shape, positions).map_err(reshape)?,
            Array3::from_shape_vec(shape, covariances).map_err(reshape)?,
        )
    }
}

/// Writes a mixture snapshot as JSON.
pub fn save_mixture<S: Space>(mixture: &Mixture<S>, path: impl AsRef<Path>) -> AnyResult<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(&mixture.to_record()).context("failed to encode mixture record")?;
    fs::write(path, json).with_context(|| format!("failed to write mixture to {}", path.display()))?;
    tracing::debug!(path = %path.display(), shape = ?mixture.shape(), "saved mixture");
    Ok(())
}

/// Reads a JSON snapshot. Typed failures stay reachable via
/// `err.downcast_ref::<MixtureError>()`.
pub fn load_mixture<S: Space>(path: impl AsRef<Path>) -> AnyResult<Mixture<S>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).with_context(|| format!("failed to open {}", path.display()))?;
    let record: MixtureRecord =
        serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    let mixture = Mixture::from_record(&record)?;
    Ok(mixture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{F64x2, F64x3};
    use crate::Gaussian;
    use glam::{DMat2, DVec2};

    fn sample() -> Mixture<F64x2> {
        Mixture::from_gaussians(&[
            Gaussian::new(0.7, DVec2::new(1.0, 2.0), DMat2::from_cols_array(&[2.0, 0.3, 0.3, 1.0])),
            Gaussian::standard(),
        ])
        .unwrap()
    }

    #[test]
    fn record_round_trip_preserves_components() {
        let m = sample();
        let restored = Mixture::<F64x2>::from_record(&m.to_record()).unwrap();
        assert_eq!(restored.gaussians(), m.gaussians());
    }

    #[test]
    fn version_mismatch_is_reported() {
        let mut record = sample().to_record();
        record.version = 2;
        let err = Mixture::<F64x2>::from_record(&record).unwrap_err();
        assert_eq!(err, MixtureError::UnsupportedVersion { found: 2, expected: RECORD_VERSION });
    }

    #[test]
    fn foreign_type_and_dimension_are_rejected() {
        let mut record = sample().to_record();
        record.record_type = "gm.Other".into();
        assert!(matches!(
            Mixture::<F64x2>::from_record(&record),
            Err(MixtureError::InvalidRecord { .. })
        ));
        let record = sample().to_record();
        assert!(matches!(
            Mixture::<F64x3>::from_record(&record),
            Err(MixtureError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn record_uses_tagged_json_layout() {
        let json = serde_json::to_value(sample().to_record()).unwrap();
        assert_eq!(json["type"], "gm.Mixture");
        assert_eq!(json["version"], RECORD_VERSION);
        assert_eq!(json["positions"][0][1], 2.0);
    }
}
