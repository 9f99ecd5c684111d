//! Error taxonomy for the mixture data model.

/// Failures raised while building, validating, evaluating or loading mixtures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MixtureError {
    /// Shape mismatch between weights, positions and covariances, a
    /// non-finite value, or a covariance that is not positive definite.
    #[error("invalid mixture: {reason}")]
    InvalidMixture { reason: String },

    /// Query points whose batch/layer shape cannot be broadcast against the mixture.
    #[error("invalid query points: {reason}")]
    InvalidQuery { reason: String },

    #[error("unsupported mixture record version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("record of type '{found}' is not a Gaussian mixture record")]
    InvalidRecord { found: String },

    #[error("{what} index {index} is out of range (len {len})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

impl MixtureError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidMixture {
            reason: reason.into(),
        }
    }

    pub(crate) fn query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = MixtureError> = std::result::Result<T, E>;
