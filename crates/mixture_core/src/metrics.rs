//! Likelihood metrics for comparing fitted mixtures against point data.

use crate::error::{MixtureError, Result};
use crate::gaussian;
use crate::mixture::Mixture;
use crate::space::{Real, Space};

/// Average log-density of `points` under the `(batch, layer)` entry of a
/// prior-weighted mixture, accumulated in log-space.
pub fn mean_log_likelihood<S: Space>(
    mixture: &Mixture<S>,
    batch: usize,
    layer: usize,
    points: &[S::Vector],
) -> Result<f64> {
    if points.is_empty() {
        return Err(MixtureError::query("no points to score"));
    }
    let entry = mixture.layer(batch, layer)?;
    let log_amplitudes: Vec<f64> = entry
        .weights()
        .iter()
        .zip(entry.covariances().iter())
        .map(|(w, cov)| gaussian::amplitude_from_prior::<S>(*w, *cov).to_f64().ln())
        .collect();

    let mut total = 0.0;
    let mut terms = vec![f64::NEG_INFINITY; log_amplitudes.len()];
    for point in points {
        for (c, term) in terms.iter_mut().enumerate() {
            let delta = *point - entry.positions()[[0, 0, c]];
            let m = S::mahalanobis(entry.inverse_covariances()[[0, 0, c]], delta).to_f64();
            *term = log_amplitudes[c] - 0.5 * m;
        }
        total += log_sum_exp(&terms);
    }
    Ok(total / points.len() as f64)
}

/// Numerically stable `ln Σ exp(v)`; `-∞` for an empty or all `-∞` input.
pub fn log_sum_exp<R: Real>(values: &[R]) -> R {
    let max = values.iter().copied().fold(R::NEG_INFINITY, R::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (*v - max).exp()).sum::<R>().ln()
}
