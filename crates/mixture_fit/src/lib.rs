//! Hierarchical expectation-maximization for Gaussian mixtures.
//!
//! A point cloud is split top-down: the root cluster spawns
//! `gaussians_per_node` children, each child with enough points spawns its
//! own children at the next level, and so on. Every level runs a short EM
//! loop in a per-parent unit-cube frame. The leaves of the resulting tree form
//! the fitted mixture.
//!
//! - [`hierarchy`]: the driver ([`HierarchicalEm`]) and the cluster tree
//! - [`em`]: E-step, M-step and hard assignment for one level
//! - [`scaler`]: per-parent normalisation
//! - [`tree`]: flattening into amplitude- and prior-weighted mixtures
//! - [`parallel`]: precision dispatch and multi-cloud fitting

pub mod config;
pub mod em;
pub mod error;
pub mod hierarchy;
pub mod logger;
pub mod parallel;
pub mod partition;
pub mod scaler;
pub mod state;
pub mod termination;
pub mod tree;

pub use config::{FitConfig, Precision, TerminationKind, DEFAULT_ITERATIONS_PER_LEVEL};
pub use error::{FitError, Result};
pub use hierarchy::{FitResult, HierarchicalEm, Hierarchy};
pub use logger::{FitLogger, LossEntry, LossHistory, NullLogger, TracingLogger};
pub use parallel::{fit_clouds_parallel, fit_point_cloud, PrecisionFit};
pub use partition::LevelPartition;
pub use scaler::LevelScaler;
pub use state::{ClusterNode, LevelState, Weighting};
pub use termination::{MaxIterations, RelativeChange, TerminationCriterion};
