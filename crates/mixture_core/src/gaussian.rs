//! Single Gaussian components and prior/amplitude conversions.

use crate::space::{Real, Space};

/// One weighted Gaussian. Whether `weight` is a prior (probability mass) or an
/// amplitude (peak density) depends on the mixture it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaussian<S: Space> {
    pub weight: S::Real,
    pub position: S::Vector,
    pub covariance: S::Matrix,
}

impl<S: Space> Gaussian<S> {
    pub fn new(weight: S::Real, position: S::Vector, covariance: S::Matrix) -> Self {
        Self {
            weight,
            position,
            covariance,
        }
    }

    /// Unit-weight Gaussian at the origin with identity covariance.
    pub fn standard() -> Self {
        Self::new(S::Real::ONE, S::zero_vector(), S::identity())
    }

    /// `true` when every value is finite and the covariance determinant is positive.
    pub fn is_valid(&self) -> bool {
        self.weight.is_finite()
            && S::vector_is_finite(self.position)
            && S::matrix_is_finite(self.covariance)
            && S::determinant(self.covariance) > S::Real::ZERO
    }

    /// `weight * exp(-0.5 * (x-μ)ᵀ Σ⁻¹ (x-μ))`.
    pub fn evaluate(&self, x: S::Vector) -> S::Real {
        let inverse = S::inverse(self.covariance);
        weighted_density::<S>(self.weight, self.position, inverse, x)
    }

    /// Closed-form integral `weight * (2π)^(D/2) * sqrt(det Σ)`.
    pub fn integral(&self) -> S::Real {
        self.weight * S::normal_factor() * S::determinant(self.covariance).sqrt()
    }
}

#[inline]
pub(crate) fn weighted_density<S: Space>(
    weight: S::Real,
    position: S::Vector,
    inverse_covariance: S::Matrix,
    x: S::Vector,
) -> S::Real {
    let delta = x - position;
    weight * (-S::Real::HALF * S::mahalanobis(inverse_covariance, delta)).exp()
}

/// Peak density of a Gaussian carrying probability mass `prior`.
#[inline]
pub fn amplitude_from_prior<S: Space>(prior: S::Real, covariance: S::Matrix) -> S::Real {
    prior / (S::determinant(covariance).sqrt() * S::normal_factor())
}

/// Probability mass of a Gaussian whose peak density is `amplitude`.
#[inline]
pub fn prior_from_amplitude<S: Space>(amplitude: S::Real, covariance: S::Matrix) -> S::Real {
    amplitude * S::determinant(covariance).sqrt() * S::normal_factor()
}
