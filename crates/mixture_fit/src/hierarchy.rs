//! The hierarchical EM driver and the cluster tree it produces.

use std::marker::PhantomData;

use ndarray::ArrayView2;
use tracing::{debug, info, warn};

use mixture_core::{Mixture, Real, Space};

use crate::config::FitConfig;
use crate::em::{self, IterationContext};
use crate::error::{FitError, Result};
use crate::logger::{FitLogger, TracingLogger};
use crate::partition::LevelPartition;
use crate::scaler::LevelScaler;
use crate::state::{ClusterNode, LevelState};
use crate::termination::TerminationCriterion;
use crate::tree;

/// Every fitted level in world space, root level first.
///
/// Global indices are contiguous across levels, so a node's parent always
/// lives in the previous level.
#[derive(Debug, Clone, PartialEq)]
pub struct Hierarchy<S: Space> {
    levels: Vec<LevelState<S>>,
    point_assignment: Vec<usize>,
}

impl<S: Space> Hierarchy<S> {
    pub(crate) fn new(levels: Vec<LevelState<S>>, point_assignment: Vec<usize>) -> Self {
        Self {
            levels,
            point_assignment,
        }
    }

    pub fn levels(&self) -> &[LevelState<S>] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> Option<&LevelState<S>> {
        self.levels.get(level)
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn total_clusters(&self) -> usize {
        self.levels.iter().map(LevelState::len).sum()
    }

    /// Deepest cluster each input point was hard-assigned to.
    pub fn point_assignment(&self) -> &[usize] {
        &self.point_assignment
    }

    /// `(level, local index)` of a global index.
    pub fn locate(&self, global_index: usize) -> Option<(usize, usize)> {
        self.levels
            .iter()
            .enumerate()
            .find_map(|(level, state)| state.local_index(global_index).map(|local| (level, local)))
    }

    pub fn node(&self, global_index: usize) -> Option<ClusterNode<S>> {
        let (level, local) = self.locate(global_index)?;
        self.levels[level].node(local)
    }

    pub fn children(&self, global_index: usize) -> Vec<ClusterNode<S>> {
        let Some((level, _)) = self.locate(global_index) else {
            return Vec::new();
        };
        self.levels
            .get(level + 1)
            .map(|next| next.nodes().filter(|n| n.parent == Some(global_index)).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct FitResult<S: Space> {
    /// Leaves weighted by amplitude (peak density); integrates to one.
    pub mixture: Mixture<S>,
    /// The same leaves weighted by their cumulative prior; weights sum to one.
    pub mixture_model: Mixture<S>,
    pub hierarchy: Hierarchy<S>,
}

/// Fits a mixture to a point cloud by recursively splitting clusters into
/// `gaussians_per_node` children, running a short EM loop per level.
pub struct HierarchicalEm<S: Space> {
    config: FitConfig,
    termination: Box<dyn TerminationCriterion>,
    logger: Box<dyn FitLogger>,
    _space: PhantomData<S>,
}

impl<S: Space> HierarchicalEm<S> {
    pub fn new(config: FitConfig) -> Result<Self> {
        config.validate()?;
        let termination = config.termination.build();
        Ok(Self {
            config,
            termination,
            logger: Box::new(TracingLogger),
            _space: PhantomData,
        })
    }

    pub fn with_logger(mut self, logger: impl FitLogger + 'static) -> Self {
        self.logger = Box::new(logger);
        self
    }

    /// Replaces the criterion built from the configuration.
    pub fn with_termination(mut self, termination: impl TerminationCriterion + 'static) -> Self {
        self.termination = Box::new(termination);
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Fits `points` of shape `(batch, n_points)`. Only a batch of one is
    /// supported, and fits never start from an existing mixture.
    pub fn fit(
        &mut self,
        points: ArrayView2<'_, S::Vector>,
        warm_start: Option<&Mixture<S>>,
    ) -> Result<FitResult<S>> {
        if warm_start.is_some() {
            return Err(FitError::UnsupportedWarmStart);
        }
        let (n_batch, _) = points.dim();
        if n_batch != 1 {
            return Err(FitError::UnsupportedBatchSize { found: n_batch });
        }
        let cloud = points.row(0).to_vec();
        self.fit_cloud(&cloud)
    }

    pub fn fit_cloud(&mut self, cloud: &[S::Vector]) -> Result<FitResult<S>> {
        if cloud.is_empty() {
            return Err(FitError::InvalidPointCloud("no points".into()));
        }
        if let Some(index) = cloud.iter().position(|p| !S::vector_is_finite(*p)) {
            return Err(FitError::InvalidPointCloud(format!("point {index} is not finite")));
        }

        let fanout = self.config.gaussians_per_node;
        let epsilon = S::Real::from_f64(self.config.epsilon);
        let mut assignment: Vec<Option<usize>> = vec![None; cloud.len()];
        let mut levels: Vec<LevelState<S>> = Vec::with_capacity(self.config.n_levels);
        let mut next_global_index = 0;

        info!(
            space = S::NAME,
            points = cloud.len(),
            fanout,
            levels = self.config.n_levels,
            "starting hierarchical fit"
        );

        for level in 0..self.config.n_levels {
            let partition = match levels.last() {
                None => LevelPartition::root(cloud.len(), fanout),
                Some(previous) => LevelPartition::from_assignment(&assignment, fanout, |global| {
                    previous
                        .local_index(global)
                        .is_some_and(|local| previous.has_children()[local])
                }),
            };
            if partition.is_empty() {
                info!(level, "no cluster holds enough points to split; stopping early");
                break;
            }

            let state = self.fit_level(cloud, &partition, level, next_global_index, epsilon, &mut assignment)?;
            info!(
                level,
                parents = partition.n_slots(),
                clusters = state.len(),
                dead = state.dead_clusters(),
                "level fitted"
            );
            if state.dead_clusters() > 0 {
                warn!(level, dead = state.dead_clusters(), "clusters ended the level without any mass");
            }
            next_global_index += state.len();
            levels.push(state);
        }

        let point_assignment = assignment
            .into_iter()
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| FitError::InvalidHierarchy("a point was never assigned".into()))?;
        let hierarchy = Hierarchy::new(levels, point_assignment);
        let (mixture, mixture_model) = tree::flatten(&hierarchy)?;
        Ok(FitResult {
            mixture,
            mixture_model,
            hierarchy,
        })
    }

    /// Init, E/M loop, hard assignment and scale-up for one level. Updates
    /// `assignment` for every active point.
    fn fit_level(
        &mut self,
        cloud: &[S::Vector],
        partition: &LevelPartition,
        level: usize,
        first_global_index: usize,
        epsilon: S::Real,
        assignment: &mut [Option<usize>],
    ) -> Result<LevelState<S>> {
        let active = partition.gather(cloud);
        let scaler = LevelScaler::<S>::fit(&active, partition.point_slots(), partition.n_slots());
        let points = scaler.scale_down(&active, partition.point_slots());
        let mut state = em::initial_state::<S>(partition, first_global_index);

        self.termination.reset();
        let mut iteration = 0;
        let expectation = loop {
            iteration += 1;
            let context = IterationContext { level, iteration };
            let expectation = em::expectation(&points, partition, &state, context)?;
            let losses: Vec<f64> = expectation.losses.iter().map(|l| l.to_f64()).collect();
            self.logger.log(level, iteration, losses.iter().sum());
            if self.termination.may_stop(iteration, &losses) {
                break expectation;
            }
            state = em::maximization(&points, partition, &expectation, &state, epsilon, context)?;
        };
        debug!(level, iterations = iteration, "em loop finished");

        let mut counts = vec![0; state.len()];
        for (i, child) in em::hard_assign(&expectation, partition).into_iter().enumerate() {
            counts[child] += 1;
            assignment[partition.point_indices()[i]] = Some(state.global_indices()[child]);
        }
        Ok(scaler.scale_up_state(&state).with_point_counts(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminationKind;
    use crate::logger::{LossHistory, NullLogger};
    use glam::DVec3;
    use mixture_core::F64x3;
    use ndarray::Array2;

    fn two_blobs() -> Vec<DVec3> {
        let mut points = Vec::new();
        for i in 0..30 {
            let t = i as f64 * 0.37;
            let jitter = DVec3::new(t.sin(), (1.7 * t).cos(), (0.3 * t).sin()) * 0.2;
            points.push(DVec3::new(-5.0, 0.0, 0.0) + jitter);
            points.push(DVec3::new(5.0, 1.0, 2.0) - jitter);
        }
        points
    }

    fn config(levels: usize, fanout: usize) -> FitConfig {
        FitConfig {
            gaussians_per_node: fanout,
            n_levels: levels,
            ..Default::default()
        }
    }

    #[test]
    fn warm_start_is_rejected() {
        let points = Array2::from_elem((1, 4), DVec3::ZERO);
        let warm = Mixture::<F64x3>::from_gaussians(&[]).unwrap();
        let mut fitter = HierarchicalEm::<F64x3>::new(config(1, 2)).unwrap();
        let err = fitter.fit(points.view(), Some(&warm)).unwrap_err();
        assert_eq!(err, FitError::UnsupportedWarmStart);
    }

    #[test]
    fn batches_are_rejected() {
        let points = Array2::from_elem((2, 4), DVec3::ZERO);
        let mut fitter = HierarchicalEm::<F64x3>::new(config(1, 2)).unwrap();
        let err = fitter.fit(points.view(), None).unwrap_err();
        assert_eq!(err, FitError::UnsupportedBatchSize { found: 2 });
    }

    #[test]
    fn invalid_clouds_are_rejected() {
        let mut fitter = HierarchicalEm::<F64x3>::new(config(1, 2)).unwrap();
        assert!(matches!(fitter.fit_cloud(&[]), Err(FitError::InvalidPointCloud(_))));
        let err = fitter.fit_cloud(&[DVec3::ZERO, DVec3::splat(f64::INFINITY)]).unwrap_err();
        assert_eq!(err, FitError::InvalidPointCloud("point 1 is not finite".into()));
    }

    #[test]
    fn two_blobs_split_at_the_first_level() {
        let points = two_blobs();
        let mut fitter = HierarchicalEm::<F64x3>::new(config(1, 2))
            .unwrap()
            .with_logger(NullLogger);
        let result = fitter.fit_cloud(&points).unwrap();
        let level = &result.hierarchy.levels()[0];
        assert_eq!(level.point_counts(), &[30, 30]);

        let mut means: Vec<DVec3> = level.positions().to_vec();
        means.sort_by(|a, b| a.x.total_cmp(&b.x));
        assert!((means[0] - DVec3::new(-5.0, 0.0, 0.0)).length() < 0.2);
        assert!((means[1] - DVec3::new(5.0, 1.0, 2.0)).length() < 0.2);
        for prior in level.priors() {
            assert!((prior - 0.5).abs() < 1e-9);
        }
    }

    #[test]
    fn point_counts_are_conserved_through_the_tree() {
        let points = two_blobs();
        let mut fitter = HierarchicalEm::<F64x3>::new(config(3, 3)).unwrap();
        let result = fitter.fit_cloud(&points).unwrap();
        let hierarchy = &result.hierarchy;

        let root_total: usize = hierarchy.levels()[0].point_counts().iter().sum();
        assert_eq!(root_total, points.len());
        for level in hierarchy.levels().iter().take(hierarchy.n_levels() - 1) {
            for node in level.nodes().filter(|n| n.has_children) {
                let children = hierarchy.children(node.global_index);
                assert_eq!(children.len(), 3);
                let total: usize = children.iter().map(|c| c.point_count).sum();
                assert_eq!(total, node.point_count);
            }
        }
        assert_eq!(hierarchy.point_assignment().len(), points.len());
    }

    #[test]
    fn global_indices_are_contiguous() {
        let points = two_blobs();
        let mut fitter = HierarchicalEm::<F64x3>::new(config(2, 2)).unwrap();
        let result = fitter.fit_cloud(&points).unwrap();
        let all: Vec<usize> = result
            .hierarchy
            .levels()
            .iter()
            .flat_map(|l| l.global_indices().iter().copied())
            .collect();
        assert_eq!(all, (0..result.hierarchy.total_clusters()).collect::<Vec<_>>());
        for node in result.hierarchy.levels()[1].nodes() {
            let parent = node.parent.unwrap();
            assert_eq!(result.hierarchy.locate(parent).map(|(level, _)| level), Some(0));
        }
    }

    #[test]
    fn logger_sees_every_iteration() {
        let history = LossHistory::new();
        let mut fitter = HierarchicalEm::<F64x3>::new(FitConfig {
            termination: TerminationKind::MaxIterations { iterations: 5 },
            ..config(2, 2)
        })
        .unwrap()
        .with_logger(history.clone());
        fitter.fit_cloud(&two_blobs()).unwrap();
        assert_eq!(history.for_level(0).len(), 5);
        assert_eq!(history.for_level(1).len(), 5);
        let iterations: Vec<usize> = history.for_level(1).iter().map(|e| e.iteration).collect();
        assert_eq!(iterations, vec![1, 2, 3, 4, 5]);
    }
}
