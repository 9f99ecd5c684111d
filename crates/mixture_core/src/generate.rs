//! Deterministic random mixtures and point sampling.

use ndarray::Array3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MixtureError, Result};
use crate::linalg;
use crate::mixture::Mixture;
use crate::space::{Real, Space};

const DEFAULT_SEED: u64 = 0x5EED5EED5EED5EED;
const MIN_UNIFORM: f64 = f64::MIN_POSITIVE;

/// Parameters for [`generate_random_mixture`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomMixtureSettings {
    pub n_batch: usize,
    pub n_layers: usize,
    pub n_components: usize,
    /// Positions are uniform in `[-position_radius, position_radius]^D`.
    pub position_radius: f64,
    pub covariance_scale: f64,
    pub weight_min: f64,
    pub weight_max: f64,
    pub seed: Option<u64>,
}

impl Default for RandomMixtureSettings {
    fn default() -> Self {
        Self {
            n_batch: 1,
            n_layers: 1,
            n_components: 8,
            position_radius: 10.0,
            covariance_scale: 1.0,
            weight_min: 0.0,
            weight_max: 1.0,
            seed: None,
        }
    }
}

/// Generates a reproducible mixture with SPD covariances. Returns the seed used.
pub fn generate_random_mixture<S: Space>(settings: &RandomMixtureSettings) -> Result<(Mixture<S>, u64)> {
    if !(settings.weight_min < settings.weight_max) {
        return Err(MixtureError::invalid(format!(
            "weight range [{}, {}) is empty",
            settings.weight_min, settings.weight_max
        )));
    }
    let seed = settings.seed.unwrap_or(DEFAULT_SEED);
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let shape = (settings.n_batch, settings.n_layers, settings.n_components);
    let radius = settings.position_radius.abs();

    let mut weights = Array3::from_elem(shape, S::Real::ZERO);
    let mut positions = Array3::from_elem(shape, S::zero_vector());
    let mut covariances = Array3::from_elem(shape, S::identity());
    for ((b, l, c), weight) in weights.indexed_iter_mut() {
        *weight = S::Real::from_f64(rng.gen_range(settings.weight_min..settings.weight_max));
        positions[[b, l, c]] = random_vector::<S, _>(&mut rng, radius);
        covariances[[b, l, c]] = random_spd_matrix::<S, _>(&mut rng, settings.covariance_scale);
    }
    tracing::debug!(seed, ?shape, space = S::NAME, "generated random mixture");
    Ok((Mixture::new(weights, positions, covariances)?, seed))
}

/// Draws `count` points from the `(batch, layer)` entry of a prior-weighted mixture.
pub fn sample_points<S: Space>(
    mixture: &Mixture<S>,
    batch: usize,
    layer: usize,
    count: usize,
    seed: u64,
) -> Result<Vec<S::Vector>> {
    let entry = mixture.layer(batch, layer)?;
    let weights: Vec<f64> = entry.weights().iter().map(|w| w.to_f64()).collect();
    if weights.iter().any(|w| *w < 0.0) {
        return Err(MixtureError::invalid("cannot sample from negative weights"));
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return Err(MixtureError::invalid("cannot sample from a mixture without mass"));
    }

    let factors = entry
        .covariances()
        .iter()
        .map(|cov| linalg::cholesky::<S>(*cov, S::Real::ZERO))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| MixtureError::invalid("covariance has no Cholesky factor"))?;

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(count);
    for _ in 0..count {
        let mut pick = rng.gen::<f64>() * total;
        let mut component = weights.len() - 1;
        for (c, w) in weights.iter().enumerate() {
            if pick < *w {
                component = c;
                break;
            }
            pick -= w;
        }
        let z: Vec<f64> = (0..S::DIMS).map(|_| random_normal(&mut rng, 0.0, 1.0)).collect();
        let z = S::vector_from_f64(&z).ok_or_else(|| MixtureError::invalid("sample has the wrong length"))?;
        points.push(entry.positions()[[0, 0, component]] + factors[component] * z);
    }
    Ok(points)
}

fn random_vector<S: Space, R: Rng + ?Sized>(rng: &mut R, radius: f64) -> S::Vector {
    let values: Vec<S::Real> = (0..S::DIMS)
        .map(|_| S::Real::from_f64(if radius > 0.0 { rng.gen_range(-radius..=radius) } else { 0.0 }))
        .collect();
    S::vector_from_slice(&values).unwrap_or_else(S::zero_vector)
}

/// `(AᵀA + ½I) * scale` with `A` uniform in `[-1, 1]`; `AᵀA` is the sum of the
/// outer products of the rows of `A`.
fn random_spd_matrix<S: Space, R: Rng + ?Sized>(rng: &mut R, scale: f64) -> S::Matrix {
    let mut c = S::zero_matrix();
    for _ in 0..S::DIMS {
        let row = random_vector::<S, _>(rng, 1.0);
        c += S::outer(row, row);
    }
    let adjusted_scale = S::Real::from_f64(scale.max(1e-4));
    (c + S::identity() * S::Real::HALF) * adjusted_scale
}

fn random_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1 = rng.gen::<f64>().max(MIN_UNIFORM);
    let u2 = rng.gen::<f64>();
    let radius = (-2.0 * u1.ln()).sqrt();
    let theta = 2.0 * std::f64::consts::PI * u2;
    mean + std_dev * radius * theta.cos()
}
