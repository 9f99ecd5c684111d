//! Flattening a fitted hierarchy into leaf mixtures.

use mixture_core::{amplitude_from_prior, Gaussian, Mixture, Real, Space};

use crate::error::{FitError, Result};
use crate::hierarchy::Hierarchy;

/// Returns `(amplitude mixture, prior mixture)` over the leaves.
///
/// A leaf's weight is the product of the priors along its path from the root.
/// Leaves are clusters that were not split at the following level; leaves
/// with a zero cumulative prior are dropped.
pub fn flatten<S: Space>(hierarchy: &Hierarchy<S>) -> Result<(Mixture<S>, Mixture<S>)> {
    let levels = hierarchy.levels();
    let mut cumulative: Vec<Vec<S::Real>> = Vec::with_capacity(levels.len());
    for (depth, state) in levels.iter().enumerate() {
        let mut weights = Vec::with_capacity(state.len());
        for (prior, parent) in state.priors().iter().zip(state.parents()) {
            let factor = match (*parent, depth.checked_sub(1)) {
                (None, _) => S::Real::ONE,
                (Some(parent), Some(up)) => {
                    let local = levels[up].local_index(parent).ok_or_else(|| {
                        FitError::InvalidHierarchy(format!(
                            "parent {parent} of a level {depth} cluster is not on level {up}"
                        ))
                    })?;
                    cumulative[up][local]
                }
                (Some(parent), None) => {
                    return Err(FitError::InvalidHierarchy(format!(
                        "root level cluster claims parent {parent}"
                    )))
                }
            };
            weights.push(factor * *prior);
        }
        cumulative.push(weights);
    }

    let mut priors = Vec::new();
    let mut amplitudes = Vec::new();
    for (depth, state) in levels.iter().enumerate() {
        let mut expanded = vec![false; state.len()];
        if let Some(next) = levels.get(depth + 1) {
            for parent in next.parents().iter().flatten() {
                if let Some(local) = state.local_index(*parent) {
                    expanded[local] = true;
                }
            }
        }
        for (local, node) in state.nodes().enumerate() {
            let weight = cumulative[depth][local];
            if expanded[local] || weight == S::Real::ZERO {
                continue;
            }
            priors.push(Gaussian::new(weight, node.position, node.covariance));
            amplitudes.push(Gaussian::new(
                amplitude_from_prior::<S>(weight, node.covariance),
                node.position,
                node.covariance,
            ));
        }
    }

    Ok((Mixture::from_gaussians(&amplitudes)?, Mixture::from_gaussians(&priors)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LevelState;
    use glam::{DMat3, DVec3};
    use mixture_core::F64x3;

    fn level(parents: Vec<Option<usize>>, first: usize, priors: Vec<f64>) -> LevelState<F64x3> {
        let n = priors.len();
        LevelState::from_parameters(
            2,
            parents,
            first,
            (0..n).map(|i| DVec3::splat(i as f64)).collect(),
            vec![DMat3::IDENTITY * 0.5; n],
            priors,
        )
    }

    #[test]
    fn leaf_weights_multiply_down_the_path() {
        // Root level: 0 (split), 1 (leaf). Level 1: children 2, 3 of node 0.
        let root = level(vec![None, None], 0, vec![0.6, 0.4]);
        let children = level(vec![Some(0), Some(0)], 2, vec![0.25, 0.75]);
        let hierarchy = Hierarchy::new(vec![root, children], vec![2, 3, 1]);
        let (amplitudes, priors) = flatten(&hierarchy).unwrap();

        let weights: Vec<f64> = priors.weights().iter().copied().collect();
        assert_eq!(weights.len(), 3);
        assert!((weights[0] - 0.4).abs() < 1e-12);
        assert!((weights[1] - 0.15).abs() < 1e-12);
        assert!((weights[2] - 0.45).abs() < 1e-12);
        assert!((amplitudes.integrate()[[0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn every_split_node_is_replaced_by_its_children() {
        // Nodes 0 and 2 split, 1 stays a leaf; level 1 holds 3..7.
        let root = level(vec![None, None, None], 0, vec![0.5, 0.2, 0.3]);
        let children = level(
            vec![Some(0), Some(0), Some(2), Some(2)],
            3,
            vec![0.5, 0.5, 0.1, 0.9],
        );
        let hierarchy = Hierarchy::new(vec![root, children], vec![3, 4, 1, 5, 6]);
        let (_, priors) = flatten(&hierarchy).unwrap();

        let weights: Vec<f64> = priors.weights().iter().copied().collect();
        let expected = [0.2, 0.25, 0.25, 0.03, 0.27];
        assert_eq!(weights.len(), expected.len());
        for (w, e) in weights.iter().zip(expected) {
            assert!((w - e).abs() < 1e-12);
        }
    }

    #[test]
    fn dead_leaves_are_dropped() {
        let root = level(vec![None, None], 0, vec![1.0, 0.0]);
        let hierarchy = Hierarchy::new(vec![root], vec![0]);
        let (amplitudes, priors) = flatten(&hierarchy).unwrap();
        assert_eq!(priors.n_components(), 1);
        assert_eq!(amplitudes.n_components(), 1);
    }

    #[test]
    fn dangling_parents_are_reported() {
        let root = level(vec![None, None], 0, vec![0.5, 0.5]);
        let orphans = level(vec![Some(9), Some(9)], 2, vec![0.5, 0.5]);
        let hierarchy = Hierarchy::new(vec![root, orphans], vec![2, 3]);
        assert!(matches!(flatten(&hierarchy), Err(FitError::InvalidHierarchy(_))));
    }
}
