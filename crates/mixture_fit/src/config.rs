//! Fitting configuration.

use serde::{Deserialize, Serialize};

use crate::error::{FitError, Result};
use crate::termination::{MaxIterations, RelativeChange, TerminationCriterion};

/// Iteration budget used by the reference behaviour.
pub const DEFAULT_ITERATIONS_PER_LEVEL: usize = 20;

/// Arithmetic precision of a fitting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Single,
    Double,
}

/// Serializable description of the per-level stopping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminationKind {
    MaxIterations { iterations: usize },
    RelativeChange { threshold: f64, max_iterations: usize },
}

impl Default for TerminationKind {
    fn default() -> Self {
        Self::MaxIterations {
            iterations: DEFAULT_ITERATIONS_PER_LEVEL,
        }
    }
}

impl TerminationKind {
    pub fn build(&self) -> Box<dyn TerminationCriterion> {
        match *self {
            Self::MaxIterations { iterations } => Box::new(MaxIterations::new(iterations)),
            Self::RelativeChange {
                threshold,
                max_iterations,
            } => Box::new(RelativeChange::new(threshold, max_iterations)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Fanout `K`: children spawned per parent cluster at every level.
    pub gaussians_per_node: usize,
    pub n_levels: usize,
    pub precision: Precision,
    /// Covariance regulariser added as `epsilon * I` in the normalised space.
    pub epsilon: f64,
    pub termination: TerminationKind,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            gaussians_per_node: 8,
            n_levels: 3,
            precision: Precision::Single,
            epsilon: 1e-6,
            termination: TerminationKind::default(),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.gaussians_per_node == 0 {
            return Err(FitError::InvalidConfig("gaussians_per_node must be at least 1".into()));
        }
        if self.n_levels == 0 {
            return Err(FitError::InvalidConfig("n_levels must be at least 1".into()));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        match self.termination {
            TerminationKind::MaxIterations { iterations } if iterations == 0 => Err(FitError::InvalidConfig(
                "termination needs at least one iteration".into(),
            )),
            TerminationKind::RelativeChange {
                threshold,
                max_iterations,
            } if !(threshold.is_finite() && threshold >= 0.0) || max_iterations == 0 => {
                Err(FitError::InvalidConfig(format!(
                    "relative-change termination needs a finite threshold >= 0 and an iteration cap, got {threshold} / {max_iterations}"
                )))
            }
            _ => Ok(()),
        }
    }
}
