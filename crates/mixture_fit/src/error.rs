//! Failure modes of a fitting run.

use mixture_core::MixtureError;

/// Structural failures (bad input, unsupported requests) are distinguished
/// from numerical ones, which carry the level, iteration and cluster where
/// the degenerate value surfaced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    #[error("batch size {found} is not supported; fit one point cloud per run")]
    UnsupportedBatchSize { found: usize },

    #[error("warm-starting from an existing mixture is not supported; fits always start from scratch")]
    UnsupportedWarmStart,

    #[error("numerical instability at level {level}, iteration {iteration}, cluster {cluster:?}: {detail}")]
    NumericalInstability {
        level: usize,
        iteration: usize,
        cluster: Option<usize>,
        detail: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid point cloud: {0}")]
    InvalidPointCloud(String),

    #[error("inconsistent hierarchy: {0}")]
    InvalidHierarchy(String),

    #[error(transparent)]
    Mixture(#[from] MixtureError),
}

impl FitError {
    /// `true` for failures caused by ill-conditioned data rather than bad input.
    pub fn is_numerical(&self) -> bool {
        matches!(self, Self::NumericalInstability { .. })
    }
}

pub type Result<T, E = FitError> = std::result::Result<T, E>;
