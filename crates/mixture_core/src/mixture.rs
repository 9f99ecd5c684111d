//! Dense batched Gaussian mixtures and their density primitives.
//!
//! A mixture is laid out as `(batch, layer, component)`. Weights, positions
//! and covariances share that shape; inverse covariances are derived once at
//! construction. Every transform produces a new mixture, so callers can keep
//! a frozen snapshot next to a working copy.

use ndarray::{s, Array2, Array3, Array4};

use crate::error::{MixtureError, Result};
use crate::gaussian::{self, Gaussian};
use crate::space::{Real, Space};

#[derive(Debug, Clone)]
pub struct Mixture<S: Space> {
    weights: Array3<S::Real>,
    positions: Array3<S::Vector>,
    covariances: Array3<S::Matrix>,
    inverse_covariances: Array3<S::Matrix>,
}

impl<S: Space> Mixture<S> {
    /// Builds a mixture, rejecting mismatched shapes, non-finite values and
    /// covariances whose determinant is not strictly positive.
    pub fn new(
        weights: Array3<S::Real>,
        positions: Array3<S::Vector>,
        covariances: Array3<S::Matrix>,
    ) -> Result<Self> {
        if weights.dim() != positions.dim() || weights.dim() != covariances.dim() {
            return Err(MixtureError::invalid(format!(
                "component counts differ: weights {:?}, positions {:?}, covariances {:?}",
                weights.dim(),
                positions.dim(),
                covariances.dim()
            )));
        }
        validate::<S>(&weights, &positions, &covariances)?;
        let inverse_covariances = covariances.mapv(S::inverse);
        Ok(Self {
            weights,
            positions,
            covariances,
            inverse_covariances,
        })
    }

    /// Single-batch, single-layer mixture from a component list.
    pub fn from_gaussians(components: &[Gaussian<S>]) -> Result<Self> {
        Self::from_components((1, 1, components.len()), components)
    }

    /// Mixture of the given `(batch, layer, component)` shape from components
    /// listed in row-major order.
    pub fn from_components(shape: (usize, usize, usize), components: &[Gaussian<S>]) -> Result<Self> {
        let expected = shape.0 * shape.1 * shape.2;
        if components.len() != expected {
            return Err(MixtureError::invalid(format!(
                "shape {shape:?} needs {expected} components, got {}",
                components.len()
            )));
        }
        let weights = Array3::from_shape_fn(shape, |(b, l, c)| components[flat(shape, b, l, c)].weight);
        let positions = Array3::from_shape_fn(shape, |(b, l, c)| components[flat(shape, b, l, c)].position);
        let covariances =
            Array3::from_shape_fn(shape, |(b, l, c)| components[flat(shape, b, l, c)].covariance);
        Self::new(weights, positions, covariances)
    }

    /// `(n_batch, n_layers, n_components)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        self.weights.dim()
    }

    pub fn n_batch(&self) -> usize {
        self.shape().0
    }

    pub fn n_layers(&self) -> usize {
        self.shape().1
    }

    pub fn n_components(&self) -> usize {
        self.shape().2
    }

    pub fn n_dimensions(&self) -> usize {
        S::DIMS
    }

    pub fn weights(&self) -> &Array3<S::Real> {
        &self.weights
    }

    pub fn positions(&self) -> &Array3<S::Vector> {
        &self.positions
    }

    pub fn covariances(&self) -> &Array3<S::Matrix> {
        &self.covariances
    }

    pub fn inverse_covariances(&self) -> &Array3<S::Matrix> {
        &self.inverse_covariances
    }

    pub fn component(&self, batch: usize, layer: usize, component: usize) -> Option<Gaussian<S>> {
        let index = [batch, layer, component];
        Some(Gaussian::new(
            *self.weights.get(index)?,
            *self.positions.get(index)?,
            *self.covariances.get(index)?,
        ))
    }

    /// All components in `(batch, layer, component)` order.
    pub fn gaussians(&self) -> Vec<Gaussian<S>> {
        self.weights
            .indexed_iter()
            .map(|((b, l, c), &w)| Gaussian::new(w, self.positions[[b, l, c]], self.covariances[[b, l, c]]))
            .collect()
    }

    /// Re-runs the construction checks; mixtures are immutable so this only
    /// fails if the type invariants were bypassed.
    pub fn check(&self) -> Result<()> {
        validate::<S>(&self.weights, &self.positions, &self.covariances)
    }

    /// Weighted component densities for every query point, shape
    /// `(batch, layer, component, n_xes)`.
    ///
    /// `xes` has shape `(batch_xes, layers_xes, n_xes)` where `batch_xes` is 1 or
    /// `n_batch` and `layers_xes` is 1 or `n_layers`.
    pub fn evaluate_per_component(&self, xes: &Array3<S::Vector>) -> Result<Array4<S::Real>> {
        self.check()?;
        let (n_batch, n_layers, n_components) = self.shape();
        let n_xes = self.check_query(xes)?;
        let mut values = Array4::from_elem((n_batch, n_layers, n_components, n_xes), S::Real::ZERO);
        for ((b, l, c, i), value) in values.indexed_iter_mut() {
            let x = xes[[query_index(xes.dim().0, b), query_index(xes.dim().1, l), i]];
            *value = self.density(b, l, c, x);
        }
        Ok(values)
    }

    /// Mixture density per `(batch, layer, query point)`.
    pub fn evaluate(&self, xes: &Array3<S::Vector>) -> Result<Array3<S::Real>> {
        self.check()?;
        let (n_batch, n_layers, n_components) = self.shape();
        let n_xes = self.check_query(xes)?;
        let mut values = Array3::from_elem((n_batch, n_layers, n_xes), S::Real::ZERO);
        for ((b, l, i), value) in values.indexed_iter_mut() {
            let x = xes[[query_index(xes.dim().0, b), query_index(xes.dim().1, l), i]];
            *value = (0..n_components).map(|c| self.density(b, l, c, x)).sum();
        }
        Ok(values)
    }

    /// Index of the component with the largest weighted density per query point.
    pub fn max_component(&self, xes: &Array3<S::Vector>) -> Result<Array3<usize>> {
        self.check()?;
        let (n_batch, n_layers, n_components) = self.shape();
        if n_components == 0 {
            return Err(MixtureError::query("max_component needs at least one component"));
        }
        let n_xes = self.check_query(xes)?;
        let mut selected = Array3::from_elem((n_batch, n_layers, n_xes), 0usize);
        for ((b, l, i), slot) in selected.indexed_iter_mut() {
            let x = xes[[query_index(xes.dim().0, b), query_index(xes.dim().1, l), i]];
            let mut best = S::Real::NEG_INFINITY;
            for c in 0..n_components {
                let value = self.density(b, l, c, x);
                if value > best {
                    best = value;
                    *slot = c;
                }
            }
        }
        Ok(selected)
    }

    /// Total mass per `(batch, layer)`: `Σ weight * (2π)^(D/2) * sqrt(det Σ)`.
    pub fn integrate(&self) -> Array2<S::Real> {
        let (n_batch, n_layers, n_components) = self.shape();
        let normal = S::normal_factor();
        Array2::from_shape_fn((n_batch, n_layers), |(b, l)| {
            (0..n_components)
                .map(|c| {
                    self.weights[[b, l, c]] * normal * S::determinant(self.covariances[[b, l, c]]).sqrt()
                })
                .sum()
        })
    }

    pub fn with_weights(&self, weights: Array3<S::Real>) -> Result<Self> {
        Self::new(weights, self.positions.clone(), self.covariances.clone())
    }

    pub fn scale_weights(&self, factor: S::Real) -> Result<Self> {
        self.with_weights(self.weights.mapv(|w| w * factor))
    }

    /// Weights rescaled to sum to one per `(batch, layer)`; a layer whose
    /// weights sum to zero becomes uniform.
    pub fn normalized(&self) -> Result<Self> {
        let (n_batch, n_layers, n_components) = self.shape();
        let mut weights = self.weights.clone();
        for b in 0..n_batch {
            for l in 0..n_layers {
                let mut row = weights.slice_mut(s![b, l, ..]);
                let total: S::Real = row.iter().copied().sum();
                if total != S::Real::ZERO {
                    row.mapv_inplace(|w| w / total);
                } else if n_components > 0 {
                    row.fill(S::Real::ONE / S::Real::from_usize(n_components));
                }
            }
        }
        self.with_weights(weights)
    }

    /// Interprets the weights as priors and converts them to amplitudes.
    pub fn to_amplitudes(&self) -> Result<Self> {
        let weights = Array3::from_shape_fn(self.shape(), |idx| {
            gaussian::amplitude_from_prior::<S>(self.weights[idx], self.covariances[idx])
        });
        self.with_weights(weights)
    }

    /// Interprets the weights as amplitudes and converts them to priors.
    pub fn to_priors(&self) -> Result<Self> {
        let weights = Array3::from_shape_fn(self.shape(), |idx| {
            gaussian::prior_from_amplitude::<S>(self.weights[idx], self.covariances[idx])
        });
        self.with_weights(weights)
    }

    /// Copy of one batch entry (keeps a batch dimension of 1).
    pub fn batch(&self, batch: usize) -> Result<Self> {
        if batch >= self.n_batch() {
            return Err(MixtureError::OutOfRange {
                what: "batch",
                index: batch,
                len: self.n_batch(),
            });
        }
        Self::new(
            self.weights.slice(s![batch..batch + 1, .., ..]).to_owned(),
            self.positions.slice(s![batch..batch + 1, .., ..]).to_owned(),
            self.covariances.slice(s![batch..batch + 1, .., ..]).to_owned(),
        )
    }

    /// Copy of one `(batch, layer)` entry as a `(1, 1, n_components)` mixture.
    pub fn layer(&self, batch: usize, layer: usize) -> Result<Self> {
        let single = self.batch(batch)?;
        if layer >= single.n_layers() {
            return Err(MixtureError::OutOfRange {
                what: "layer",
                index: layer,
                len: single.n_layers(),
            });
        }
        Self::new(
            single.weights.slice(s![.., layer..layer + 1, ..]).to_owned(),
            single.positions.slice(s![.., layer..layer + 1, ..]).to_owned(),
            single.covariances.slice(s![.., layer..layer + 1, ..]).to_owned(),
        )
    }

    /// Same mixture in another space of equal dimensionality (precision change).
    pub fn convert<T: Space>(&self) -> Result<Mixture<T>> {
        if T::DIMS != S::DIMS {
            return Err(MixtureError::DimensionMismatch {
                expected: S::DIMS,
                found: T::DIMS,
            });
        }
        let weights = self.weights.mapv(|w| T::Real::from_f64(w.to_f64()));
        let positions = convert_all(&self.positions, S::vector_to_f64, T::vector_from_f64)?;
        let covariances = convert_all(&self.covariances, S::matrix_to_f64, T::matrix_from_f64)?;
        Mixture::new(weights, positions, covariances)
    }

    /// Packs every component into a row of `1 + D + D²` reals: weight,
    /// position, column-major covariance. Shape `(batch, layer, component, row)`.
    pub fn pack(&self) -> Array4<S::Real> {
        let (n_batch, n_layers, n_components) = self.shape();
        let row_len = packed_row_len::<S>();
        let mut packed = Array4::from_elem((n_batch, n_layers, n_components, row_len), S::Real::ZERO);
        for ((b, l, c), &w) in self.weights.indexed_iter() {
            let row: Vec<S::Real> = std::iter::once(w)
                .chain(S::vector_to_vec(self.positions[[b, l, c]]))
                .chain(S::matrix_to_vec(self.covariances[[b, l, c]]))
                .collect();
            for (k, value) in row.into_iter().enumerate() {
                packed[[b, l, c, k]] = value;
            }
        }
        packed
    }

    /// Inverse of [`Mixture::pack`]; rows of any other length are rejected.
    pub fn from_packed(packed: &Array4<S::Real>) -> Result<Self> {
        let (n_batch, n_layers, n_components, row_len) = packed.dim();
        if row_len != packed_row_len::<S>() {
            return Err(MixtureError::invalid(format!(
                "packed rows of length {row_len} do not describe {}-D Gaussians (expected {})",
                S::DIMS,
                packed_row_len::<S>()
            )));
        }
        let shape = (n_batch, n_layers, n_components);
        let d = S::DIMS;
        let weights = Array3::from_shape_fn(shape, |(b, l, c)| packed[[b, l, c, 0]]);
        let mut positions = Array3::from_elem(shape, S::zero_vector());
        let mut covariances = Array3::from_elem(shape, S::zero_matrix());
        for ((b, l, c), position) in positions.indexed_iter_mut() {
            let row = packed.slice(s![b, l, c, ..]).to_vec();
            *position = S::vector_from_slice(&row[1..1 + d])
                .ok_or_else(|| MixtureError::invalid("packed position has the wrong length"))?;
            covariances[[b, l, c]] = S::matrix_from_slice(&row[1 + d..])
                .ok_or_else(|| MixtureError::invalid("packed covariance has the wrong length"))?;
        }
        Self::new(weights, positions, covariances)
    }

    #[inline]
    fn density(&self, b: usize, l: usize, c: usize, x: S::Vector) -> S::Real {
        gaussian::weighted_density::<S>(
            self.weights[[b, l, c]],
            self.positions[[b, l, c]],
            self.inverse_covariances[[b, l, c]],
            x,
        )
    }

    fn check_query(&self, xes: &Array3<S::Vector>) -> Result<usize> {
        let (batch_xes, layers_xes, n_xes) = xes.dim();
        if batch_xes != 1 && batch_xes != self.n_batch() {
            return Err(MixtureError::query(format!(
                "batch dimension {batch_xes} must be 1 or {}",
                self.n_batch()
            )));
        }
        if layers_xes != 1 && layers_xes != self.n_layers() {
            return Err(MixtureError::query(format!(
                "layer dimension {layers_xes} must be 1 or {}",
                self.n_layers()
            )));
        }
        Ok(n_xes)
    }
}

/// Row length of the packed layout: 7 in 2-D, 13 in 3-D.
pub const fn packed_row_len<S: Space>() -> usize {
    1 + S::DIMS + S::DIMS * S::DIMS
}

#[inline]
fn flat(shape: (usize, usize, usize), b: usize, l: usize, c: usize) -> usize {
    (b * shape.1 + l) * shape.2 + c
}

#[inline]
fn query_index(extent: usize, index: usize) -> usize {
    if extent == 1 {
        0
    } else {
        index
    }
}

fn convert_all<A: Copy, B: Clone>(
    values: &Array3<A>,
    to_f64: fn(A) -> Vec<f64>,
    from_f64: fn(&[f64]) -> Option<B>,
) -> Result<Array3<B>> {
    let converted = values
        .iter()
        .map(|v| from_f64(&to_f64(*v)).ok_or_else(|| MixtureError::invalid("conversion changed the element size")))
        .collect::<Result<Vec<B>>>()?;
    Array3::from_shape_vec(values.dim(), converted).map_err(|e| MixtureError::invalid(e.to_string()))
}

fn validate<S: Space>(
    weights: &Array3<S::Real>,
    positions: &Array3<S::Vector>,
    covariances: &Array3<S::Matrix>,
) -> Result<()> {
    for ((b, l, c), weight) in weights.indexed_iter() {
        if !weight.is_finite() {
            return Err(MixtureError::invalid(format!(
                "weight of component ({b}, {l}, {c}) is not finite"
            )));
        }
        if !S::vector_is_finite(positions[[b, l, c]]) {
            return Err(MixtureError::invalid(format!(
                "position of component ({b}, {l}, {c}) is not finite"
            )));
        }
        let covariance = covariances[[b, l, c]];
        if !S::matrix_is_finite(covariance) {
            return Err(MixtureError::invalid(format!(
                "covariance of component ({b}, {l}, {c}) is not finite"
            )));
        }
        let det = S::determinant(covariance);
        if !(det > S::Real::ZERO) {
            return Err(MixtureError::invalid(format!(
                "covariance of component ({b}, {l}, {c}) is not positive definite (det = {det})"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{F32x3, F64x2, F64x3};
    use glam::{DMat2, DMat3, DVec2, DVec3};

    fn planar_pair() -> Mixture<F64x2> {
        Mixture::from_gaussians(&[
            Gaussian::new(1.0, DVec2::ZERO, DMat2::IDENTITY),
            Gaussian::new(0.5, DVec2::new(3.0, -1.0), DMat2::from_diagonal(DVec2::new(2.0, 0.5))),
        ])
        .unwrap()
    }

    #[test]
    fn unit_gaussian_evaluates_to_its_weight_at_the_mean() {
        let m = Mixture::<F64x2>::from_gaussians(&[Gaussian::standard()]).unwrap();
        let xes = Array3::from_elem((1, 1, 1), DVec2::ZERO);
        let values = m.evaluate(&xes).unwrap();
        assert!((values[[0, 0, 0]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn planar_normal_density_peak_is_one_over_two_pi() {
        let m = Mixture::<F64x2>::from_gaussians(&[Gaussian::standard()])
            .unwrap()
            .to_amplitudes()
            .unwrap();
        let values = m.evaluate(&Array3::from_elem((1, 1, 1), DVec2::ZERO)).unwrap();
        assert!((values[[0, 0, 0]] - 1.0 / (2.0 * std::f64::consts::PI)).abs() < 1e-6);
    }

    #[test]
    fn evaluate_sums_the_per_component_values() {
        let m = planar_pair();
        let xes = Array3::from_shape_vec(
            (1, 1, 3),
            vec![DVec2::new(0.5, 0.5), DVec2::new(3.0, -1.0), DVec2::new(-2.0, 4.0)],
        )
        .unwrap();
        let summed = m.evaluate(&xes).unwrap();
        let per_component = m.evaluate_per_component(&xes).unwrap();
        assert_eq!(per_component.dim(), (1, 1, 2, 3));
        for i in 0..3 {
            let manual = per_component[[0, 0, 0, i]] + per_component[[0, 0, 1, i]];
            assert!((summed[[0, 0, i]] - manual).abs() < 1e-12);
        }
        assert!((per_component[[0, 0, 1, 1]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn max_component_picks_the_closest_peak() {
        let m = planar_pair();
        let xes = Array3::from_shape_vec((1, 1, 2), vec![DVec2::new(0.1, 0.0), DVec2::new(3.0, -1.2)]).unwrap();
        let selected = m.max_component(&xes).unwrap();
        assert_eq!(selected[[0, 0, 0]], 0);
        assert_eq!(selected[[0, 0, 1]], 1);
    }

    #[test]
    fn integrate_matches_closed_form() {
        let m = planar_pair();
        let mass = m.integrate();
        let two_pi = 2.0 * std::f64::consts::PI;
        let expected = two_pi + 0.5 * two_pi * 1.0f64.sqrt();
        assert!((mass[[0, 0]] - expected).abs() < 1e-10);

        let normalized_density = m.normalized().unwrap().to_amplitudes().unwrap();
        assert!((normalized_density.integrate()[[0, 0]] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn construction_rejects_non_positive_definite_covariances() {
        let singular = DMat3::from_diagonal(DVec3::new(1.0, 1.0, 0.0));
        let err = Mixture::<F64x3>::from_gaussians(&[Gaussian::new(1.0, DVec3::ZERO, singular)]).unwrap_err();
        assert!(matches!(err, MixtureError::InvalidMixture { .. }));

        let negative = DMat3::from_diagonal(DVec3::new(-1.0, 1.0, 1.0));
        assert!(Mixture::<F64x3>::from_gaussians(&[Gaussian::new(1.0, DVec3::ZERO, negative)]).is_err());
    }

    #[test]
    fn construction_rejects_mismatched_component_counts() {
        let err = Mixture::<F64x3>::new(
            Array3::from_elem((1, 1, 2), 1.0),
            Array3::from_elem((1, 1, 3), DVec3::ZERO),
            Array3::from_elem((1, 1, 2), DMat3::IDENTITY),
        )
        .unwrap_err();
        assert!(matches!(err, MixtureError::InvalidMixture { .. }));
    }

    #[test]
    fn query_shapes_broadcast_or_fail() {
        let components = vec![Gaussian::<F64x2>::standard(); 2 * 3 * 2];
        let m = Mixture::from_components((2, 3, 2), &components).unwrap();
        assert!(m.evaluate(&Array3::from_elem((1, 1, 4), DVec2::ZERO)).is_ok());
        assert!(m.evaluate(&Array3::from_elem((2, 3, 4), DVec2::ZERO)).is_ok());
        let err = m.evaluate(&Array3::from_elem((3, 1, 4), DVec2::ZERO)).unwrap_err();
        assert!(matches!(err, MixtureError::InvalidQuery { .. }));
        assert!(m.evaluate(&Array3::from_elem((1, 2, 4), DVec2::ZERO)).is_err());
    }

    #[test]
    fn transforms_leave_the_source_untouched() {
        let m = planar_pair();
        let scaled = m.scale_weights(2.0).unwrap();
        assert_eq!(m.weights()[[0, 0, 0]], 1.0);
        assert_eq!(scaled.weights()[[0, 0, 0]], 2.0);
    }

    #[test]
    fn pack_round_trips_through_thirteen_value_rows() {
        let m = Mixture::<F64x3>::from_gaussians(&[
            Gaussian::new(0.25, DVec3::new(1.0, 2.0, 3.0), DMat3::from_diagonal(DVec3::new(1.0, 2.0, 3.0))),
            Gaussian::standard(),
        ])
        .unwrap();
        let packed = m.pack();
        assert_eq!(packed.dim(), (1, 1, 2, 13));
        assert_eq!(packed[[0, 0, 0, 0]], 0.25);
        assert_eq!(packed[[0, 0, 0, 3]], 3.0);
        let restored = Mixture::<F64x3>::from_packed(&packed).unwrap();
        assert_eq!(restored.gaussians(), m.gaussians());

        let wrong = Array4::from_elem((1, 1, 1, 7), 1.0);
        assert!(Mixture::<F64x3>::from_packed(&wrong).is_err());
    }

    #[test]
    fn convert_changes_precision() {
        let m = Mixture::<F64x3>::from_gaussians(&[Gaussian::standard()]).unwrap();
        let single: Mixture<F32x3> = m.convert().unwrap();
        assert_eq!(single.weights()[[0, 0, 0]], 1.0f32);
        let err = m.convert::<F64x2>().unwrap_err();
        assert_eq!(err, MixtureError::DimensionMismatch { expected: 3, found: 2 });
    }

    #[test]
    fn batch_and_layer_slices() {
        let mut components = Vec::new();
        for i in 0..(2 * 2 * 1) {
            components.push(Gaussian::<F64x2>::new(i as f64 + 1.0, DVec2::ZERO, DMat2::IDENTITY));
        }
        let m = Mixture::from_components((2, 2, 1), &components).unwrap();
        let layer = m.layer(1, 0).unwrap();
        assert_eq!(layer.shape(), (1, 1, 1));
        assert_eq!(layer.weights()[[0, 0, 0]], 3.0);
        assert!(matches!(m.batch(2), Err(MixtureError::OutOfRange { .. })));
    }
}
