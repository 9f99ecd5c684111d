//! Scalar and fixed-size linear algebra abstractions over glam.
//!
//! Mixtures exist in 2-D and 3-D at single or double precision. Rather than
//! threading a global "device/precision" switch through the code, every type
//! is generic over a [`Space`] that pins the scalar, vector and matrix types.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Div, DivAssign, Index, Mul, MulAssign, Neg, Sub, SubAssign};

use glam::{DMat2, DMat3, DVec2, DVec3, Mat2, Mat3, Vec2, Vec3};

/// Floating point scalar used by a [`Space`].
pub trait Real:
    Copy
    + Default
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Sum
{
    const ZERO: Self;
    const ONE: Self;
    const HALF: Self;
    const TAU: Self;
    const INFINITY: Self;
    const NEG_INFINITY: Self;
    /// Machine epsilon of the underlying type.
    const EPSILON: Self;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn powi(self, n: i32) -> Self;
    fn abs(self) -> Self;
    fn max(self, other: Self) -> Self;
    fn min(self, other: Self) -> Self;
    fn is_finite(self) -> bool;
    fn is_nan(self) -> bool;

    fn from_usize(value: usize) -> Self {
        Self::from_f64(value as f64)
    }
}

macro_rules! impl_real {
    ($t:ident) => {
        impl Real for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const HALF: Self = 0.5;
            const TAU: Self = core::$t::consts::TAU;
            const INFINITY: Self = $t::INFINITY;
            const NEG_INFINITY: Self = $t::NEG_INFINITY;
            const EPSILON: Self = $t::EPSILON;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn exp(self) -> Self {
                $t::exp(self)
            }

            #[inline]
            fn ln(self) -> Self {
                $t::ln(self)
            }

            #[inline]
            fn sqrt(self) -> Self {
                $t::sqrt(self)
            }

            #[inline]
            fn powi(self, n: i32) -> Self {
                $t::powi(self, n)
            }

            #[inline]
            fn abs(self) -> Self {
                $t::abs(self)
            }

            #[inline]
            fn max(self, other: Self) -> Self {
                $t::max(self, other)
            }

            #[inline]
            fn min(self, other: Self) -> Self {
                $t::min(self, other)
            }

            #[inline]
            fn is_finite(self) -> bool {
                $t::is_finite(self)
            }

            #[inline]
            fn is_nan(self) -> bool {
                $t::is_nan(self)
            }
        }
    };
}

impl_real!(f32);
impl_real!(f64);

/// Dimension + precision binding for Gaussian components.
///
/// Matrices are column-major (glam convention). Covariances are symmetric, so
/// the distinction only matters for the packed and persisted layouts.
pub trait Space: Copy + Default + fmt::Debug + PartialEq + Send + Sync + 'static {
    type Real: Real;
    type Vector: Copy
        + Default
        + PartialEq
        + fmt::Debug
        + Send
        + Sync
        + Add<Output = Self::Vector>
        + Sub<Output = Self::Vector>
        + Neg<Output = Self::Vector>
        + Mul<Self::Real, Output = Self::Vector>
        + AddAssign
        + Index<usize, Output = Self::Real>;
    type Matrix: Copy
        + Default
        + PartialEq
        + fmt::Debug
        + Send
        + Sync
        + Add<Output = Self::Matrix>
        + Sub<Output = Self::Matrix>
        + Mul<Self::Real, Output = Self::Matrix>
        + Mul<Self::Vector, Output = Self::Vector>
        + AddAssign;

    /// Double-precision space of the same dimensionality. Determinants,
    /// inverses and moment accumulation run there.
    type Wide: Space<Real = f64>;

    /// Spatial dimensionality `D`.
    const DIMS: usize;
    /// Short label used in diagnostics.
    const NAME: &'static str;

    fn vector_from_slice(values: &[Self::Real]) -> Option<Self::Vector>;
    fn vector_to_vec(vector: Self::Vector) -> Vec<Self::Real>;
    fn splat(value: Self::Real) -> Self::Vector;
    fn dot(lhs: Self::Vector, rhs: Self::Vector) -> Self::Real;
    fn min_elements(lhs: Self::Vector, rhs: Self::Vector) -> Self::Vector;
    fn max_elements(lhs: Self::Vector, rhs: Self::Vector) -> Self::Vector;
    fn max_element(vector: Self::Vector) -> Self::Real;
    fn vector_is_finite(vector: Self::Vector) -> bool;

    fn identity() -> Self::Matrix;
    fn zero_matrix() -> Self::Matrix;
    /// `lhs * rhsᵀ`.
    fn outer(lhs: Self::Vector, rhs: Self::Vector) -> Self::Matrix;
    fn determinant(matrix: Self::Matrix) -> Self::Real;
    fn inverse(matrix: Self::Matrix) -> Self::Matrix;
    /// Builds a matrix from `D * D` column-major values.
    fn matrix_from_slice(values: &[Self::Real]) -> Option<Self::Matrix>;
    fn matrix_to_vec(matrix: Self::Matrix) -> Vec<Self::Real>;
    fn matrix_element(matrix: Self::Matrix, row: usize, col: usize) -> Self::Real;
    fn matrix_is_finite(matrix: Self::Matrix) -> bool;

    fn widen_vector(vector: Self::Vector) -> <Self::Wide as Space>::Vector;
    fn widen_matrix(matrix: Self::Matrix) -> <Self::Wide as Space>::Matrix;
    fn narrow_vector(vector: <Self::Wide as Space>::Vector) -> Self::Vector;
    fn narrow_matrix(matrix: <Self::Wide as Space>::Matrix) -> Self::Matrix;

    #[inline]
    fn zero_vector() -> Self::Vector {
        Self::splat(Self::Real::ZERO)
    }

    /// Squared Mahalanobis distance `dᵀ Σ⁻¹ d` given the inverse covariance.
    #[inline]
    fn mahalanobis(inverse_covariance: Self::Matrix, delta: Self::Vector) -> Self::Real {
        Self::dot(delta, inverse_covariance * delta)
    }

    /// `(2π)^(D/2)`, the normalisation constant of a unit-determinant Gaussian.
    #[inline]
    fn normal_factor() -> Self::Real {
        Self::Real::TAU.powi(Self::DIMS as i32).sqrt()
    }

    /// Converts a vector of another space with the same dimensionality.
    fn vector_from_f64(values: &[f64]) -> Option<Self::Vector> {
        let converted: Vec<Self::Real> = values.iter().map(|v| Self::Real::from_f64(*v)).collect();
        Self::vector_from_slice(&converted)
    }

    fn matrix_from_f64(values: &[f64]) -> Option<Self::Matrix> {
        let converted: Vec<Self::Real> = values.iter().map(|v| Self::Real::from_f64(*v)).collect();
        Self::matrix_from_slice(&converted)
    }

    fn vector_to_f64(vector: Self::Vector) -> Vec<f64> {
        Self::vector_to_vec(vector).into_iter().map(Real::to_f64).collect()
    }

    fn matrix_to_f64(matrix: Self::Matrix) -> Vec<f64> {
        Self::matrix_to_vec(matrix).into_iter().map(Real::to_f64).collect()
    }
}

macro_rules! impl_space {
    (
        $(#[$meta:meta])* $name:ident, $real:ty, $vector:ty, $matrix:ty, $dims:literal, [$($axis:literal),+],
        wide: $wide:ident, $wide_vector:ty, $wide_matrix:ty,
        widen: $widen_v:expr, $widen_m:expr,
        narrow: $narrow_v:expr, $narrow_m:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name;

        impl Space for $name {
            type Real = $real;
            type Vector = $vector;
            type Matrix = $matrix;
            type Wide = $wide;

            const DIMS: usize = $dims;
            const NAME: &'static str = stringify!($name);

            #[inline]
            fn vector_from_slice(values: &[$real]) -> Option<$vector> {
                (values.len() == $dims).then(|| <$vector>::from_slice(values))
            }

            #[inline]
            fn vector_to_vec(vector: $vector) -> Vec<$real> {
                vector.to_array().to_vec()
            }

            #[inline]
            fn splat(value: $real) -> $vector {
                <$vector>::splat(value)
            }

            #[inline]
            fn dot(lhs: $vector, rhs: $vector) -> $real {
                lhs.dot(rhs)
            }

            #[inline]
            fn min_elements(lhs: $vector, rhs: $vector) -> $vector {
                lhs.min(rhs)
            }

            #[inline]
            fn max_elements(lhs: $vector, rhs: $vector) -> $vector {
                lhs.max(rhs)
            }

            #[inline]
            fn max_element(vector: $vector) -> $real {
                vector.max_element()
            }

            #[inline]
            fn vector_is_finite(vector: $vector) -> bool {
                vector.is_finite()
            }

            #[inline]
            fn identity() -> $matrix {
                <$matrix>::IDENTITY
            }

            #[inline]
            fn zero_matrix() -> $matrix {
                <$matrix>::ZERO
            }

            #[inline]
            fn outer(lhs: $vector, rhs: $vector) -> $matrix {
                <$matrix>::from_cols($(lhs * rhs[$axis]),+)
            }

            // Near-singular covariances lose their sign in single-precision
            // cofactor expansion, so both go through the wide matrix.
            #[inline]
            fn determinant(matrix: $matrix) -> $real {
                Self::widen_matrix(matrix).determinant() as $real
            }

            #[inline]
            fn inverse(matrix: $matrix) -> $matrix {
                Self::narrow_matrix(Self::widen_matrix(matrix).inverse())
            }

            #[inline]
            fn matrix_from_slice(values: &[$real]) -> Option<$matrix> {
                (values.len() == $dims * $dims).then(|| <$matrix>::from_cols_slice(values))
            }

            #[inline]
            fn matrix_to_vec(matrix: $matrix) -> Vec<$real> {
                matrix.to_cols_array().to_vec()
            }

            #[inline]
            fn matrix_element(matrix: $matrix, row: usize, col: usize) -> $real {
                matrix.col(col)[row]
            }

            #[inline]
            fn matrix_is_finite(matrix: $matrix) -> bool {
                matrix.is_finite()
            }

            #[inline]
            fn widen_vector(vector: $vector) -> $wide_vector {
                ($widen_v)(vector)
            }

            #[inline]
            fn widen_matrix(matrix: $matrix) -> $wide_matrix {
                ($widen_m)(matrix)
            }

            #[inline]
            fn narrow_vector(vector: $wide_vector) -> $vector {
                ($narrow_v)(vector)
            }

            #[inline]
            fn narrow_matrix(matrix: $wide_matrix) -> $matrix {
                ($narrow_m)(matrix)
            }
        }
    };
}

impl_space!(
    /// Planar mixtures at single precision.
    F32x2, f32, Vec2, Mat2, 2, [0, 1],
    wide: F64x2, DVec2, DMat2,
    widen: |v: Vec2| v.as_dvec2(), |m: Mat2| m.as_dmat2(),
    narrow: |v: DVec2| v.as_vec2(), |m: DMat2| m.as_mat2()
);
impl_space!(
    /// Point-cloud mixtures at single precision.
    F32x3, f32, Vec3, Mat3, 3, [0, 1, 2],
    wide: F64x3, DVec3, DMat3,
    widen: |v: Vec3| v.as_dvec3(), |m: Mat3| m.as_dmat3(),
    narrow: |v: DVec3| v.as_vec3(), |m: DMat3| m.as_mat3()
);
impl_space!(
    /// Planar mixtures at double precision.
    F64x2, f64, DVec2, DMat2, 2, [0, 1],
    wide: F64x2, DVec2, DMat2,
    widen: |v: DVec2| v, |m: DMat2| m,
    narrow: |v: DVec2| v, |m: DMat2| m
);
impl_space!(
    /// Point-cloud mixtures at double precision.
    F64x3, f64, DVec3, DMat3, 3, [0, 1, 2],
    wide: F64x3, DVec3, DMat3,
    widen: |v: DVec3| v, |m: DMat3| m,
    narrow: |v: DVec3| v, |m: DMat3| m
);
