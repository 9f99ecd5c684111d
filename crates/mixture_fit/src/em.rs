//! One level's expectation and maximization steps in the normalised frame.
//!
//! All work is restricted to the parent/child adjacency of a
//! [`LevelPartition`]: a point only ever competes between the `fanout`
//! children of the parent it was assigned to.

use ndarray::Array2;

use mixture_core::linalg::symmetrize;
use mixture_core::metrics::log_sum_exp;
use mixture_core::{Real, Space};

use crate::error::{FitError, Result};
use crate::partition::LevelPartition;
use crate::state::LevelState;

/// Corner templates for the initial child positions, tiled when the fanout
/// exceeds the table.
const CORNERS_3D: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 1.0, 1.0],
    [0.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 0.0, 1.0],
];

const CORNERS_2D: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 0.0, 0.0],
];

/// Where in the loop a step ran; attached to numerical errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    pub level: usize,
    pub iteration: usize,
}

impl IterationContext {
    fn instability(self, cluster: Option<usize>, detail: String) -> FitError {
        FitError::NumericalInstability {
            level: self.level,
            iteration: self.iteration,
            cluster,
            detail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expectation<S: Space> {
    /// `(active point, child within its parent)`; every row sums to one.
    pub responsibilities: Array2<S::Real>,
    /// Mixture log-likelihood of each active point under its parent's children.
    pub log_likelihoods: Vec<S::Real>,
    /// Mean negative log-likelihood per parent slot.
    pub losses: Vec<S::Real>,
}

impl<S: Space> Expectation<S> {
    pub fn total_loss(&self) -> S::Real {
        self.losses.iter().copied().sum()
    }
}

/// Template position for the `k`-th child of a parent.
pub fn template_position<S: Space>(k: usize) -> S::Vector {
    let corner = if S::DIMS == 2 {
        CORNERS_2D[k % CORNERS_2D.len()]
    } else {
        CORNERS_3D[k % CORNERS_3D.len()]
    };
    S::vector_from_f64(&corner[..S::DIMS]).unwrap_or_else(S::zero_vector)
}

/// Children at the corner templates with identity covariance and uniform
/// priors, numbered from `first_global_index`.
pub fn initial_state<S: Space>(partition: &LevelPartition, first_global_index: usize) -> LevelState<S> {
    let fanout = partition.fanout();
    let n = partition.n_children();
    let prior = S::Real::ONE / S::Real::from_usize(fanout.max(1));
    LevelState::from_parameters(
        fanout,
        (0..n).map(|j| partition.parents()[partition.slot_of_child(j)]).collect(),
        first_global_index,
        (0..n).map(|j| template_position::<S>(j % fanout)).collect(),
        vec![S::identity(); n],
        vec![prior; n],
    )
}

/// Log-space responsibilities. The per-child term is
/// `ln(amplitude) - ½ (x-μ)ᵀ Σ⁻¹ (x-μ)`, i.e. the log prior plus the full
/// Gaussian normalisation.
pub fn expectation<S: Space>(
    points: &[S::Vector],
    partition: &LevelPartition,
    state: &LevelState<S>,
    context: IterationContext,
) -> Result<Expectation<S>> {
    let fanout = partition.fanout();
    let n_points = partition.n_active_points();
    let mut responsibilities = Array2::from_elem((n_points, fanout), S::Real::ZERO);
    let mut log_likelihoods = Vec::with_capacity(n_points);
    let mut losses = vec![S::Real::ZERO; partition.n_slots()];
    let mut row = vec![S::Real::ZERO; fanout];

    for (i, (&point, &slot)) in points.iter().zip(partition.point_slots()).enumerate() {
        for (k, child) in partition.children_of_slot(slot).enumerate() {
            let delta = point - state.positions()[child];
            let distance = S::mahalanobis(state.inverse_covariances()[child], delta);
            row[k] = state.amplitudes()[child].ln() - S::Real::HALF * distance;
        }
        let total = log_sum_exp(&row);
        if !total.is_finite() {
            return Err(context.instability(
                partition.parents()[slot],
                format!("log-likelihood of point {} is {total}", partition.point_indices()[i]),
            ));
        }
        for (k, value) in row.iter().enumerate() {
            let r = (*value - total).exp();
            if r.is_nan() {
                return Err(context.instability(
                    Some(state.global_indices()[slot * fanout + k]),
                    format!("responsibility of point {} is NaN", partition.point_indices()[i]),
                ));
            }
            responsibilities[[i, k]] = r;
        }
        log_likelihoods.push(total);
        losses[slot] -= total;
    }

    for (loss, &count) in losses.iter_mut().zip(partition.points_per_slot()) {
        if count > 0 {
            *loss /= S::Real::from_usize(count);
        }
    }

    Ok(Expectation {
        responsibilities,
        log_likelihoods,
        losses,
    })
}

/// Moment-matching update, accumulated in the wide space with the covariance
/// taken around the mean. Children without responsibility mass (zero, or
/// below the square of machine epsilon) are reset to a zero prior at the
/// origin with `epsilon * I` covariance.
pub fn maximization<S: Space>(
    points: &[S::Vector],
    partition: &LevelPartition,
    expectation: &Expectation<S>,
    state: &LevelState<S>,
    epsilon: S::Real,
    context: IterationContext,
) -> Result<LevelState<S>> {
    let n = partition.n_children();
    let fanout = partition.fanout();
    let wide: Vec<_> = points.iter().map(|p| S::widen_vector(*p)).collect();
    // Below this the moments are subnormal and their ratios meaningless.
    let negligible = (S::Real::EPSILON * S::Real::EPSILON).to_f64();
    let moments = weighted_moments::<S::Wide>(
        &wide,
        partition,
        |i, k| expectation.responsibilities[[i, k]].to_f64(),
        negligible,
    );

    let regulariser = S::identity() * epsilon;
    let wide_regulariser = <S::Wide as Space>::identity() * epsilon.to_f64();
    let mut positions = Vec::with_capacity(n);
    let mut covariances = Vec::with_capacity(n);
    let mut priors = Vec::with_capacity(n);
    let mut dead = 0usize;

    for (child, moment) in moments.into_iter().enumerate() {
        let Some(moment) = moment else {
            dead += 1;
            positions.push(S::zero_vector());
            covariances.push(regulariser);
            priors.push(S::Real::ZERO);
            continue;
        };
        let mean = S::narrow_vector(moment.mean);
        let covariance = S::narrow_matrix(symmetrize::<S::Wide>(moment.scatter) + wide_regulariser);
        let determinant = S::determinant(covariance);
        let cluster = Some(state.global_indices()[child]);
        if !S::vector_is_finite(mean) || !S::matrix_is_finite(covariance) {
            return Err(context.instability(cluster, "non-finite mean or covariance".into()));
        }
        if !(determinant > S::Real::ZERO) {
            return Err(context.instability(
                cluster,
                format!("covariance is not positive definite (det = {determinant})"),
            ));
        }
        let parent_points = partition.points_per_slot()[child / fanout];
        positions.push(mean);
        covariances.push(covariance);
        priors.push(S::Real::from_f64(moment.mass / parent_points as f64));
    }

    if dead > 0 {
        tracing::debug!(
            level = context.level,
            iteration = context.iteration,
            dead,
            "clusters without responsibility mass were reset"
        );
    }
    Ok(state.with_parameters(positions, covariances, priors))
}

struct Moments<W: Space> {
    mass: f64,
    mean: W::Vector,
    /// `Σ r (x-μ)(x-μ)ᵀ / mass`; positive semi-definite by construction.
    scatter: W::Matrix,
}

/// Responsibility-weighted moments per child in double precision. The
/// scatter is taken around the mean in a second pass; `mass` and `mean` come
/// from the first. Children whose mass does not exceed `negligible` get `None`.
fn weighted_moments<W: Space<Real = f64>>(
    points: &[W::Vector],
    partition: &LevelPartition,
    responsibility: impl Fn(usize, usize) -> f64,
    negligible: f64,
) -> Vec<Option<Moments<W>>> {
    let n = partition.n_children();
    let mut mass = vec![0.0; n];
    let mut first = vec![W::zero_vector(); n];
    for (i, (&point, &slot)) in points.iter().zip(partition.point_slots()).enumerate() {
        for (k, child) in partition.children_of_slot(slot).enumerate() {
            let r = responsibility(i, k);
            mass[child] += r;
            first[child] += point * r;
        }
    }

    let means: Vec<Option<W::Vector>> = mass
        .iter()
        .zip(&first)
        .map(|(m, f)| (*m > negligible).then(|| *f * (1.0 / *m)))
        .collect();

    let mut scatter = vec![W::zero_matrix(); n];
    for (i, (&point, &slot)) in points.iter().zip(partition.point_slots()).enumerate() {
        for (k, child) in partition.children_of_slot(slot).enumerate() {
            if let Some(mean) = means[child] {
                let delta = point - mean;
                scatter[child] += W::outer(delta, delta) * responsibility(i, k);
            }
        }
    }

    means
        .into_iter()
        .zip(mass.into_iter().zip(scatter))
        .map(|(mean, (mass, scatter))| {
            mean.map(|mean| Moments {
                mass,
                mean,
                scatter: scatter * (1.0 / mass),
            })
        })
        .collect()
}

/// Local index of the most responsible child for every active point. Ties go
/// to the lower index.
pub fn hard_assign<S: Space>(expectation: &Expectation<S>, partition: &LevelPartition) -> Vec<usize> {
    expectation
        .responsibilities
        .outer_iter()
        .zip(partition.point_slots())
        .map(|(row, &slot)| {
            let mut best = 0;
            for (k, r) in row.iter().enumerate() {
                if *r > row[best] {
                    best = k;
                }
            }
            slot * partition.fanout() + best
        })
        .collect()
}
