//! GPU-ready packed records for single-precision 3-D mixtures.

use crate::gaussian::Gaussian;
use crate::mixture::Mixture;
use crate::space::F32x3;

/// Thirteen tightly packed floats: weight, position, column-major covariance.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PackedGaussian3 {
    pub weight: f32,
    pub position: [f32; 3],
    pub covariance: [f32; 9],
}

const _: () = assert!(core::mem::size_of::<PackedGaussian3>() == 13 * 4);

impl PackedGaussian3 {
    pub fn from_gaussian(gaussian: &Gaussian<F32x3>) -> Self {
        Self {
            weight: gaussian.weight,
            position: gaussian.position.to_array(),
            covariance: gaussian.covariance.to_cols_array(),
        }
    }

    pub fn to_gaussian(&self) -> Gaussian<F32x3> {
        Gaussian::new(
            self.weight,
            glam::Vec3::from_array(self.position),
            glam::Mat3::from_cols_array(&self.covariance),
        )
    }
}

impl Mixture<F32x3> {
    /// Components in `(batch, layer, component)` order as upload-ready records.
    pub fn gpu_records(&self) -> Vec<PackedGaussian3> {
        self.gaussians().iter().map(PackedGaussian3::from_gaussian).collect()
    }
}

/// Byte view of a record slice for buffer uploads.
pub fn records_as_bytes(records: &[PackedGaussian3]) -> &[u8] {
    bytemuck::cast_slice(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat3, Vec3};

    #[test]
    fn records_match_packed_rows() {
        let m = Mixture::<F32x3>::from_gaussians(&[Gaussian::new(
            0.5,
            Vec3::new(1.0, 2.0, 3.0),
            Mat3::from_diagonal(Vec3::new(1.0, 2.0, 3.0)),
        )])
        .unwrap();
        let records = m.gpu_records();
        let packed = m.pack();
        let floats: &[f32] = bytemuck::cast_slice(&records);
        for k in 0..13 {
            assert_eq!(floats[k], packed[[0, 0, 0, k]]);
        }
        assert_eq!(records_as_bytes(&records).len(), 52);
        assert_eq!(records[0].to_gaussian(), m.gaussians()[0]);
    }
}
