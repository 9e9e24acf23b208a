use crate::field_solver::LaplacianKind;
use crate::Real;

/// Tuning constants of the balloon evolution.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct BalloonParams {
    /// Half-width of the narrow band, in voxels.
    pub band_width: Real,
    /// Enlargement of the input bounding box seeding the initial balloon, in voxels.
    ///
    /// Kept slightly below `2` so the seed surface stays strictly inside the band.
    pub init_offset: Real,
    /// Weight of the distance constraints emitted by each ray.
    pub distance_weight: Real,
    /// Weight anchoring the confidence of every vertex to zero.
    pub confidence_vertex_weight: Real,
    /// Weight of the unit confidence constraints emitted by each ray.
    pub confidence_data_weight: Real,
    /// Contribution of the curvature to the voxel speed, relative to the distance.
    pub balance_coefficient: Real,
    /// Smoothness operator of both field solvers.
    pub laplacian: LaplacianKind,
    /// Screening weight keeping the solver systems definite.
    pub screening: Real,
}

impl Default for BalloonParams {
    fn default() -> Self {
        Self {
            band_width: 2.0,
            init_offset: 1.99,
            distance_weight: 1.0e8,
            confidence_vertex_weight: 0.1,
            confidence_data_weight: 0.1,
            balance_coefficient: 0.5,
            laplacian: LaplacianKind::Cotangent,
            screening: 1.0e-8,
        }
    }
}

impl BalloonParams {
    /// Checks that every parameter is in its valid range.
    pub fn validate(&self) -> crate::Result<()> {
        let positive = [
            ("band_width", self.band_width),
            ("init_offset", self.init_offset),
            ("distance_weight", self.distance_weight),
            ("confidence_data_weight", self.confidence_data_weight),
        ];
        let non_negative = [
            ("confidence_vertex_weight", self.confidence_vertex_weight),
            ("balance_coefficient", self.balance_coefficient),
            ("screening", self.screening),
        ];

        for (name, value) in positive {
            if !(value > 0.0 && value.is_finite()) {
                return Err(crate::BalloonError::InvalidParameter(format!(
                    "`{}` must be positive (got {})",
                    name, value
                )));
            }
        }
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(crate::BalloonError::InvalidParameter(format!(
                    "`{}` must be non-negative (got {})",
                    name, value
                )));
            }
        }

        if self.init_offset >= self.band_width {
            return Err(crate::BalloonError::InvalidParameter(format!(
                "the initial offset ({}) must be smaller than the band width ({})",
                self.init_offset, self.band_width
            )));
        }

        Ok(())
    }
}
