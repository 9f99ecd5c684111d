//! Parameters and bookkeeping of every cluster fitted at one level.

use mixture_core::{amplitude_from_prior, Gaussian, Mixture, Real, Space};

use crate::error::Result;

/// Which weight a flattened or exported mixture carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Probability mass; weights of a complete model sum to one.
    Prior,
    /// Peak density, `prior / (sqrt(det Σ) * (2π)^(D/2))`.
    Amplitude,
}

/// Struct-of-arrays storage for the `n_slots * fanout` clusters of a level.
///
/// Instances are replaced wholesale after each M-step rather than mutated in
/// place, so inverse covariances and amplitudes always match the covariances.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelState<S: Space> {
    fanout: usize,
    positions: Vec<S::Vector>,
    covariances: Vec<S::Matrix>,
    inverse_covariances: Vec<S::Matrix>,
    priors: Vec<S::Real>,
    amplitudes: Vec<S::Real>,
    parents: Vec<Option<usize>>,
    global_indices: Vec<usize>,
    has_children: Vec<bool>,
    point_counts: Vec<usize>,
}

/// Read-only view of one cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterNode<S: Space> {
    pub global_index: usize,
    pub parent: Option<usize>,
    pub prior: S::Real,
    pub amplitude: S::Real,
    pub position: S::Vector,
    pub covariance: S::Matrix,
    pub point_count: usize,
    pub has_children: bool,
    pub fanout: usize,
}

impl<S: Space> ClusterNode<S> {
    pub fn gaussian(&self, weighting: Weighting) -> Gaussian<S> {
        let weight = match weighting {
            Weighting::Prior => self.prior,
            Weighting::Amplitude => self.amplitude,
        };
        Gaussian::new(weight, self.position, self.covariance)
    }
}

impl<S: Space> LevelState<S> {
    /// `parents[j]` is the parent of cluster `j`; global indices are assigned
    /// consecutively from `first_global_index`.
    pub(crate) fn from_parameters(
        fanout: usize,
        parents: Vec<Option<usize>>,
        first_global_index: usize,
        positions: Vec<S::Vector>,
        covariances: Vec<S::Matrix>,
        priors: Vec<S::Real>,
    ) -> Self {
        let n = positions.len();
        debug_assert_eq!(parents.len(), n);
        debug_assert_eq!(covariances.len(), n);
        debug_assert_eq!(priors.len(), n);
        let mut state = Self {
            fanout,
            positions: Vec::new(),
            covariances: Vec::new(),
            inverse_covariances: Vec::new(),
            priors: Vec::new(),
            amplitudes: Vec::new(),
            parents,
            global_indices: (first_global_index..first_global_index + n).collect(),
            has_children: vec![false; n],
            point_counts: vec![0; n],
        };
        state.set_parameters(positions, covariances, priors);
        state
    }

    /// Same clusters and bookkeeping with new parameters.
    pub fn with_parameters(
        &self,
        positions: Vec<S::Vector>,
        covariances: Vec<S::Matrix>,
        priors: Vec<S::Real>,
    ) -> Self {
        let mut state = Self {
            fanout: self.fanout,
            positions: Vec::new(),
            covariances: Vec::new(),
            inverse_covariances: Vec::new(),
            priors: Vec::new(),
            amplitudes: Vec::new(),
            parents: self.parents.clone(),
            global_indices: self.global_indices.clone(),
            has_children: self.has_children.clone(),
            point_counts: self.point_counts.clone(),
        };
        state.set_parameters(positions, covariances, priors);
        state
    }

    /// Records the hard-assignment counts; clusters holding at least two
    /// points are refined at the next level.
    pub(crate) fn with_point_counts(mut self, counts: Vec<usize>) -> Self {
        self.has_children = counts.iter().map(|&c| c >= 2).collect();
        self.point_counts = counts;
        self
    }

    fn set_parameters(&mut self, positions: Vec<S::Vector>, covariances: Vec<S::Matrix>, priors: Vec<S::Real>) {
        self.inverse_covariances = covariances.iter().map(|c| S::inverse(*c)).collect();
        self.amplitudes = priors
            .iter()
            .zip(&covariances)
            .map(|(p, c)| amplitude_from_prior::<S>(*p, *c))
            .collect();
        self.positions = positions;
        self.covariances = covariances;
        self.priors = priors;
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn positions(&self) -> &[S::Vector] {
        &self.positions
    }

    pub fn covariances(&self) -> &[S::Matrix] {
        &self.covariances
    }

    pub fn inverse_covariances(&self) -> &[S::Matrix] {
        &self.inverse_covariances
    }

    pub fn priors(&self) -> &[S::Real] {
        &self.priors
    }

    pub fn amplitudes(&self) -> &[S::Real] {
        &self.amplitudes
    }

    pub fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    pub fn global_indices(&self) -> &[usize] {
        &self.global_indices
    }

    pub fn has_children(&self) -> &[bool] {
        &self.has_children
    }

    pub fn point_counts(&self) -> &[usize] {
        &self.point_counts
    }

    /// Local index of the cluster with the given global index, if it lives here.
    pub fn local_index(&self, global_index: usize) -> Option<usize> {
        let first = *self.global_indices.first()?;
        let local = global_index.checked_sub(first)?;
        (local < self.len()).then_some(local)
    }

    pub fn node(&self, index: usize) -> Option<ClusterNode<S>> {
        (index < self.len()).then(|| ClusterNode {
            global_index: self.global_indices[index],
            parent: self.parents[index],
            prior: self.priors[index],
            amplitude: self.amplitudes[index],
            position: self.positions[index],
            covariance: self.covariances[index],
            point_count: self.point_counts[index],
            has_children: self.has_children[index],
            fanout: self.fanout,
        })
    }

    pub fn nodes(&self) -> impl Iterator<Item = ClusterNode<S>> + '_ {
        (0..self.len()).filter_map(|i| self.node(i))
    }

    /// Clusters whose prior collapsed to zero.
    pub fn dead_clusters(&self) -> usize {
        self.priors.iter().filter(|p| **p == S::Real::ZERO).count()
    }

    /// This level alone as a mixture. Priors are relative to each parent, so
    /// a level with several parents does not integrate to one.
    pub fn to_mixture(&self, weighting: Weighting) -> Result<Mixture<S>> {
        let gaussians: Vec<Gaussian<S>> = self.nodes().map(|n| n.gaussian(weighting)).collect();
        Ok(Mixture::from_gaussians(&gaussians)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DMat3, DVec3};
    use mixture_core::F64x3;

    fn two_clusters() -> LevelState<F64x3> {
        LevelState::from_parameters(
            2,
            vec![Some(4), Some(4)],
            10,
            vec![DVec3::ZERO, DVec3::ONE],
            vec![DMat3::IDENTITY, DMat3::from_diagonal(DVec3::splat(4.0))],
            vec![0.25, 0.75],
        )
    }

    #[test]
    fn derived_quantities_follow_parameters() {
        let state = two_clusters();
        let c = F64x3::normal_factor();
        assert!((state.amplitudes()[0] - 0.25 / c).abs() < 1e-12);
        assert!((state.amplitudes()[1] - 0.75 / (8.0 * c)).abs() < 1e-12);
        assert_eq!(state.inverse_covariances()[1], DMat3::from_diagonal(DVec3::splat(0.25)));
        assert_eq!(state.global_indices(), &[10, 11]);
    }

    #[test]
    fn with_parameters_keeps_bookkeeping() {
        let state = two_clusters().with_point_counts(vec![1, 5]);
        let next = state.with_parameters(
            vec![DVec3::X, DVec3::Y],
            vec![DMat3::IDENTITY; 2],
            vec![0.5, 0.5],
        );
        assert_eq!(next.parents(), state.parents());
        assert_eq!(next.has_children(), &[false, true]);
        assert_eq!(next.point_counts(), &[1, 5]);
        assert_eq!(next.positions()[1], DVec3::Y);
    }

    #[test]
    fn local_index_is_bounded() {
        let state = two_clusters();
        assert_eq!(state.local_index(11), Some(1));
        assert_eq!(state.local_index(9), None);
        assert_eq!(state.local_index(12), None);
    }

    #[test]
    fn level_exports_as_mixture() {
        let state = two_clusters();
        let priors = state.to_mixture(Weighting::Prior).unwrap();
        assert_eq!(priors.shape(), (1, 1, 2));
        assert_eq!(priors.weights()[[0, 0, 1]], 0.75);
        let amplitudes = state.to_mixture(Weighting::Amplitude).unwrap();
        assert!((amplitudes.integrate()[[0, 0]] - 1.0).abs() < 1e-12);
    }
}
