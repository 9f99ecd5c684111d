//! Gaussian mixture data model shared by fitting, evaluation and rendering code.
//!
//! - [`space`]: scalar/vector/matrix bindings for 2-D and 3-D at f32 or f64
//! - [`mixture`]: dense `(batch, layer, component)` mixtures with density
//!   evaluation, integration and packing
//! - [`generate`]: deterministic random mixtures and point sampling
//! - [`persist`]: versioned JSON snapshots

pub mod error;
pub mod gaussian;
pub mod generate;
pub mod gpu;
pub mod linalg;
pub mod metrics;
pub mod mixture;
pub mod persist;
pub mod space;

pub use error::{MixtureError, Result};
pub use gaussian::{amplitude_from_prior, prior_from_amplitude, Gaussian};
pub use generate::{generate_random_mixture, sample_points, RandomMixtureSettings};
pub use gpu::{records_as_bytes, PackedGaussian3};
pub use mixture::{packed_row_len, Mixture};
pub use persist::{load_mixture, save_mixture, MixtureRecord, RECORD_TYPE, RECORD_VERSION};
pub use space::{Real, Space, F32x2, F32x3, F64x2, F64x3};
