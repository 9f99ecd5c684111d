//! Precision dispatch and multi-cloud fitting.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use mixture_core::{Mixture, Space, F32x3, F64x3};

use crate::config::{FitConfig, Precision};
use crate::error::{FitError, Result};
use crate::hierarchy::{FitResult, HierarchicalEm};

/// Result of a fit run at the precision selected in [`FitConfig::precision`].
#[derive(Debug, Clone)]
pub enum PrecisionFit {
    Single(FitResult<F32x3>),
    Double(FitResult<F64x3>),
}

impl PrecisionFit {
    pub fn precision(&self) -> Precision {
        match self {
            Self::Single(_) => Precision::Single,
            Self::Double(_) => Precision::Double,
        }
    }

    /// Amplitude-weighted leaves widened to double precision.
    pub fn mixture(&self) -> Result<Mixture<F64x3>> {
        Ok(match self {
            Self::Single(fit) => fit.mixture.convert()?,
            Self::Double(fit) => fit.mixture.clone(),
        })
    }

    /// Prior-weighted leaves widened to double precision.
    pub fn mixture_model(&self) -> Result<Mixture<F64x3>> {
        Ok(match self {
            Self::Single(fit) => fit.mixture_model.convert()?,
            Self::Double(fit) => fit.mixture_model.clone(),
        })
    }
}

/// Fits a `(1, n_points)` cloud of xyz coordinates at the configured precision.
pub fn fit_point_cloud(points: ArrayView2<'_, [f64; 3]>, config: &FitConfig) -> Result<PrecisionFit> {
    match config.precision {
        Precision::Single => {
            let points = convert_cloud::<F32x3>(points)?;
            Ok(PrecisionFit::Single(HierarchicalEm::<F32x3>::new(config.clone())?.fit(points.view(), None)?))
        }
        Precision::Double => {
            let points = convert_cloud::<F64x3>(points)?;
            Ok(PrecisionFit::Double(HierarchicalEm::<F64x3>::new(config.clone())?.fit(points.view(), None)?))
        }
    }
}

/// Fits every batch row of `points` independently on the rayon pool.
///
/// Each cloud gets its own fitter and the default logger; results keep the
/// batch order.
pub fn fit_clouds_parallel<S: Space>(
    points: ArrayView2<'_, S::Vector>,
    config: &FitConfig,
) -> Vec<Result<FitResult<S>>> {
    (0..points.nrows())
        .into_par_iter()
        .map(|batch| {
            let cloud = points.row(batch).to_vec();
            HierarchicalEm::<S>::new(config.clone())?.fit_cloud(&cloud)
        })
        .collect()
}

fn convert_cloud<S: Space>(points: ArrayView2<'_, [f64; 3]>) -> Result<Array2<S::Vector>> {
    let converted = points
        .iter()
        .map(|p| {
            S::vector_from_f64(&p[..S::DIMS.min(3)])
                .ok_or_else(|| FitError::InvalidPointCloud(format!("{} expects {}-d points", S::NAME, S::DIMS)))
        })
        .collect::<Result<Vec<_>>>()?;
    Array2::from_shape_vec(points.dim(), converted)
        .map_err(|e| FitError::InvalidPointCloud(e.to_string()))
}
