//! Per-parent normalisation into the unit cube.
//!
//! Each active parent gets its own translation and isotropic scale so the
//! points it owns span `[0, 1]` along their widest axis. The corner templates
//! and the fixed `epsilon` regulariser are only meaningful in that frame.

use mixture_core::{Real, Space};

use crate::state::LevelState;

#[derive(Debug, Clone, PartialEq)]
pub struct LevelScaler<S: Space> {
    translations: Vec<S::Vector>,
    scales: Vec<S::Real>,
}

impl<S: Space> LevelScaler<S> {
    /// Scaler that leaves every slot untouched.
    pub fn identity(n_slots: usize) -> Self {
        Self {
            translations: vec![S::zero_vector(); n_slots],
            scales: vec![S::Real::ONE; n_slots],
        }
    }

    /// Bounding box of the points per slot. `slots[i]` is the slot of `points[i]`.
    ///
    /// A slot whose points all coincide keeps a scale of one; a slot without
    /// points keeps the identity transform.
    pub fn fit(points: &[S::Vector], slots: &[usize], n_slots: usize) -> Self {
        let mut lower = vec![S::splat(S::Real::INFINITY); n_slots];
        let mut upper = vec![S::splat(S::Real::NEG_INFINITY); n_slots];
        for (point, &slot) in points.iter().zip(slots) {
            lower[slot] = S::min_elements(lower[slot], *point);
            upper[slot] = S::max_elements(upper[slot], *point);
        }

        let mut scaler = Self::identity(n_slots);
        for slot in 0..n_slots {
            if !S::vector_is_finite(lower[slot]) {
                continue;
            }
            let extent = S::max_element(upper[slot] - lower[slot]);
            scaler.translations[slot] = -lower[slot];
            if extent > S::Real::ZERO && extent.is_finite() {
                scaler.scales[slot] = S::Real::ONE / extent;
            }
        }
        scaler
    }

    pub fn n_slots(&self) -> usize {
        self.scales.len()
    }

    pub fn translation(&self, slot: usize) -> S::Vector {
        self.translations[slot]
    }

    pub fn scale(&self, slot: usize) -> S::Real {
        self.scales[slot]
    }

    #[inline]
    pub fn scale_down_point(&self, point: S::Vector, slot: usize) -> S::Vector {
        (point + self.translations[slot]) * self.scales[slot]
    }

    #[inline]
    pub fn scale_up_point(&self, point: S::Vector, slot: usize) -> S::Vector {
        point * (S::Real::ONE / self.scales[slot]) - self.translations[slot]
    }

    pub fn scale_down(&self, points: &[S::Vector], slots: &[usize]) -> Vec<S::Vector> {
        points
            .iter()
            .zip(slots)
            .map(|(p, &slot)| self.scale_down_point(*p, slot))
            .collect()
    }

    /// World-space parameters into the normalised frame of `slot`. Priors are
    /// scale-free.
    pub fn scale_down_parameters(
        &self,
        slot: usize,
        position: S::Vector,
        covariance: S::Matrix,
    ) -> (S::Vector, S::Matrix) {
        let s = self.scales[slot];
        (self.scale_down_point(position, slot), covariance * (s * s))
    }

    pub fn scale_up_parameters(
        &self,
        slot: usize,
        position: S::Vector,
        covariance: S::Matrix,
    ) -> (S::Vector, S::Matrix) {
        let s = self.scales[slot];
        (self.scale_up_point(position, slot), covariance * (S::Real::ONE / (s * s)))
    }

    /// Maps a fitted level back to world space. Child `j` belongs to slot
    /// `j / fanout`; amplitudes are recomputed from the rescaled covariances.
    /// Dead clusters (zero prior) keep their inert origin / `epsilon * I` form.
    pub fn scale_up_state(&self, state: &LevelState<S>) -> LevelState<S> {
        let fanout = state.fanout().max(1);
        let (positions, covariances): (Vec<_>, Vec<_>) = state
            .positions()
            .iter()
            .zip(state.covariances())
            .zip(state.priors())
            .enumerate()
            .map(|(j, ((p, c), prior))| {
                if *prior == S::Real::ZERO {
                    (*p, *c)
                } else {
                    self.scale_up_parameters(j / fanout, *p, *c)
                }
            })
            .unzip();
        state.with_parameters(positions, covariances, state.priors().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{DMat3, DVec3};
    use mixture_core::F64x3;

    #[test]
    fn points_land_in_the_unit_cube() {
        let points = [
            DVec3::new(2.0, -1.0, 5.0),
            DVec3::new(6.0, 1.0, 5.5),
            DVec3::new(10.0, 0.0, 0.0),
            DVec3::new(10.0, 0.0, 1.0),
        ];
        let slots = [0, 0, 1, 1];
        let scaler = LevelScaler::<F64x3>::fit(&points, &slots, 2);
        assert!((scaler.scale(0) - 0.25).abs() < 1e-12);
        assert!((scaler.scale(1) - 1.0).abs() < 1e-12);

        let scaled = scaler.scale_down(&points, &slots);
        for p in &scaled {
            assert!(p.min_element() >= 0.0 && p.max_element() <= 1.0 + 1e-12);
        }
        assert!((scaled[1] - DVec3::new(1.0, 0.5, 0.125)).length() < 1e-12);
    }

    #[test]
    fn coincident_points_keep_unit_scale() {
        let points = [DVec3::splat(3.0); 4];
        let scaler = LevelScaler::<F64x3>::fit(&points, &[0; 4], 1);
        assert_eq!(scaler.scale(0), 1.0);
        assert_eq!(scaler.scale_down_point(points[0], 0), DVec3::ZERO);
    }

    #[test]
    fn dead_clusters_stay_inert_in_world_space() {
        let points = [DVec3::new(100.0, 200.0, 300.0), DVec3::new(110.0, 205.0, 300.0)];
        let scaler = LevelScaler::<F64x3>::fit(&points, &[0, 0], 1);
        let epsilon = DMat3::IDENTITY * 1e-6;
        let state = LevelState::from_parameters(
            2,
            vec![None, None],
            0,
            vec![DVec3::new(0.5, 0.25, 0.0), DVec3::ZERO],
            vec![DMat3::IDENTITY * 0.01, epsilon],
            vec![1.0, 0.0],
        );
        let world = scaler.scale_up_state(&state);

        assert_eq!(world.positions()[1], DVec3::ZERO);
        assert_eq!(world.covariances()[1], epsilon);
        assert_eq!(world.amplitudes()[1], 0.0);
        assert!((world.positions()[0] - DVec3::new(105.0, 202.5, 300.0)).length() < 1e-9);
        assert!((world.covariances()[0].x_axis.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parameters_round_trip() {
        let points = [DVec3::new(-4.0, 2.0, 1.0), DVec3::new(4.0, 3.0, 2.0)];
        let scaler = LevelScaler::<F64x3>::fit(&points, &[0, 0], 1);
        let position = DVec3::new(1.0, 2.5, 1.5);
        let covariance = DMat3::from_cols(
            DVec3::new(2.0, 0.3, 0.0),
            DVec3::new(0.3, 1.0, 0.1),
            DVec3::new(0.0, 0.1, 0.5),
        );
        let (p, c) = scaler.scale_down_parameters(0, position, covariance);
        let (p2, c2) = scaler.scale_up_parameters(0, p, c);
        assert!((p2 - position).length() < 1e-12);
        assert!(c2.abs_diff_eq(covariance, 1e-12));
        assert!((c.determinant() - covariance.determinant() / 8.0f64.powi(6)).abs() < 1e-12);
    }
}
