//! The update rule advancing the implicit function inside the narrow band.

use crate::mesh::SurfaceMesh;
use crate::volume::Volume;
use crate::Real;
use rayon::prelude::*;

/// Summary of one band update.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BandUpdate {
    /// Number of updated voxels.
    pub band_size: usize,
    /// Smallest and largest interpolated distance, if distances were available.
    pub distance_range: Option<(Real, Real)>,
    /// Largest interpolated `|distance|`, if distances were available.
    pub max_abs_distance: Option<Real>,
    /// Largest interpolated `|mean curvature|`, if curvatures were available.
    pub max_abs_curvature: Option<Real>,
    /// Largest `|change|` applied to a voxel.
    pub max_step: Real,
}

/// `magnitude` with the sign of `of` (zero counts as positive).
fn sign(magnitude: Real, of: Real) -> Real {
    if of >= 0.0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Moves the implicit function of every band voxel according to the distance and
/// curvature attributes available on `surface`.
///
/// The distance `d` and mean curvature `c` are interpolated at the projection of each
/// voxel on its face. With `σ² = delta²`, `D = max |d|` and `C = max |c|` over the band:
/// - the voxel speed is `min(delta / 2, |d|)` (or `delta / 2` without distances),
/// - `k1 = exp(-(|d| - D)² / σ²)` favors the voxels furthest from the surface,
/// - `k2 = 1 - exp(-D² / σ²)` slows everything down once the whole band is close,
/// - `k3 = sign(c) exp(-(|c| - C)² / C)` weighs the curvature correction.
///
/// The field moves by `sign(d) k1 k2 speed`, plus `k3 balance speed` when the voxel is
/// pushed inward (`d > 0`) or when only curvatures are known. The total change of a voxel
/// never exceeds `delta / 2`.
pub fn evolve_band(volume: &mut Volume, surface: &SurfaceMesh, balance: Real) -> BandUpdate {
    let attributes = surface.attributes();
    let delta = volume.delta();
    let half_delta = delta / 2.0;

    let quality: Option<Vec<Real>> = attributes.quality.then(|| {
        surface
            .vertices()
            .iter()
            .map(|v| v.quality.unwrap_or(0.0))
            .collect()
    });
    let curvature: Option<Vec<Real>> = attributes.curvature.then(|| {
        surface
            .vertices()
            .iter()
            .map(|v| v.curvature.map_or(0.0, |k| k.mean))
            .collect()
    });

    // Interpolate the vertex attributes at the projection of every band voxel.
    let samples: Vec<(Option<Real>, Option<Real>)> = {
        let volume = &*volume;
        volume
            .band()
            .par_iter()
            .map(|off| {
                let (fid, bc) = volume.band_barycentrics(surface, off);
                let corners = surface.faces()[fid].vertices;
                let interpolate = |values: &Vec<Real>| {
                    bc[0] * values[corners[0]] + bc[1] * values[corners[1]] + bc[2] * values[corners[2]]
                };
                (
                    quality.as_ref().map(interpolate),
                    curvature.as_ref().map(interpolate),
                )
            })
            .collect()
    };

    let mut result = BandUpdate {
        band_size: samples.len(),
        ..BandUpdate::default()
    };

    for (d, c) in &samples {
        if let Some(d) = d {
            let (lo, hi) = result.distance_range.unwrap_or((*d, *d));
            result.distance_range = Some((lo.min(*d), hi.max(*d)));
            result.max_abs_distance = Some(result.max_abs_distance.unwrap_or(0.0).max(d.abs()));
        }
        if let Some(c) = c {
            result.max_abs_curvature =
                Some(result.max_abs_curvature.unwrap_or(0.0).max(c.abs()));
        }
    }

    let sigma2 = delta * delta;
    let max_abs_dist = result.max_abs_distance.unwrap_or(0.0);
    let max_abs_curv = result.max_abs_curvature.unwrap_or(0.0);
    let k2 = 1.0 - (-max_abs_dist * max_abs_dist / sigma2).exp();

    let band = volume.band().to_vec();
    for (off, (d, c)) in band.iter().zip(samples.iter()) {
        let mut max_speed = half_delta;
        let mut step = 0.0;

        if let Some(d) = d {
            max_speed = max_speed.min(d.abs());
            let k1 = (-(d.abs() - max_abs_dist).powi(2) / sigma2).exp();
            step += sign(k1 * k2 * max_speed, *d);
        }

        if let Some(c) = c {
            // Smoothing is disabled while the distance pulls the surface back outward.
            let pushed_inward = d.map_or(true, |d| d > 0.0);
            if pushed_inward && max_abs_curv > 0.0 {
                let k3 = sign(
                    (-(c.abs() - max_abs_curv).powi(2) / max_abs_curv).exp(),
                    *c,
                );
                step += k3 * balance * max_speed;
            }
        }

        let step = step.clamp(-half_delta, half_delta);
        let voxel = volume.voxel_mut(off);
        debug_assert!(!voxel.sfield.is_nan());
        voxel.sfield += step;
        result.max_step = result.max_step.max(step.abs());
    }

    if let Some((lo, hi)) = result.distance_range {
        log::info!("View distance: min {:.3} max {:.3}", lo, hi);
    }
    if let Some(c) = result.max_abs_curvature {
        log::info!("Max curvature: {}", c);
    }
    match (attributes.quality, attributes.curvature) {
        (true, true) => log::debug!("Updated the implicit function using distances and modulated curvature"),
        (true, false) => log::debug!("Updated the implicit function using distances"),
        (false, true) => log::debug!("Updated the implicit function using unmodulated curvature"),
        (false, false) => log::debug!("No attribute available, the implicit function is unchanged"),
    }

    result
}
