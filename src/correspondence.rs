//! Pairing of rays and surface faces, and the constraints these pairs produce.

use crate::field_solver::FieldInterpolator;
use crate::geometry::{self, intersect_line_triangle};
use crate::mesh::SurfaceMesh;
use crate::ray_index::RayGrid;
use crate::Real;

/// Outcome of a constraint emission pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CorrespondenceStats {
    /// Rays that produced constraints.
    pub matched: usize,
    /// Rays without any face, excluded from the constraints.
    pub unmatched: usize,
    /// Faces corresponding to at least one ray.
    pub selected_faces: usize,
}

/// Weights of the constraints emitted by [`emit_constraints`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConstraintWeights {
    /// Weight of a ray's distance constraint, split barycentrically over the face corners.
    pub distance: Real,
    /// Weight of a ray's unit confidence constraint, split the same way.
    pub confidence: Real,
}

/// Assigns to every ray the face its line hits with the smallest `|t|`.
///
/// Faces are visited in order and a face only replaces the current one of a ray if it is
/// strictly closer, so ties go to the first face found. Previous correspondences are
/// cleared first. Returns the number of rays that found a face.
pub fn assign_rays(surface: &SurfaceMesh, rays: &mut RayGrid) -> usize {
    rays.clear_correspondences();
    let mut candidates = vec![];

    for fid in 0..surface.face_count() {
        let tri = surface.triangle(fid);
        candidates.clear();
        candidates.extend(rays.candidates_for_triangle(&tri));

        for rid in &candidates {
            let ray = &mut rays.rays_mut()[*rid];

            if let Some(hit) = intersect_line_triangle(&ray.origin, &ray.direction, &tri) {
                if ray.face.is_none() || hit.t.abs() < ray.t.abs() {
                    ray.face = Some(fid);
                    ray.t = hit.t;
                }
            }
        }
    }

    rays.rays().iter().filter(|r| r.face.is_some()).count()
}

/// Turns the ray/face pairs into constraints of the two interpolators.
///
/// Each matched ray hitting its face at barycentric coordinates `(b0, b1, b2)` constrains
/// the face's corners: the distance field toward `t` and the confidence field toward `1`,
/// with weights proportional to the coordinates. Faces also record the average `t` of their
/// rays and get colored accordingly.
pub fn emit_constraints(
    surface: &mut SurfaceMesh,
    rays: &RayGrid,
    distance: &mut FieldInterpolator,
    confidence: &mut FieldInterpolator,
    weights: ConstraintWeights,
) -> CorrespondenceStats {
    let mut stats = CorrespondenceStats::default();
    let mut hits_per_face = vec![0usize; surface.face_count()];

    for face in surface.faces_mut() {
        face.quality = 0.0;
        face.selected = false;
    }

    for (rid, ray) in rays.rays().iter().enumerate() {
        let fid = match ray.face {
            Some(fid) => fid,
            None => {
                log::debug!("Ray #{} has no corresponding face", rid);
                stats.unmatched += 1;
                continue;
            }
        };
        assert!(!ray.t.is_nan(), "ray #{} has a face but no distance", rid);

        let tri = surface.triangle(fid);
        let hit = match intersect_line_triangle(&ray.origin, &ray.direction, &tri) {
            Some(hit) => hit,
            None => {
                log::debug!("Ray #{} no longer intersects face {}", rid, fid);
                stats.unmatched += 1;
                continue;
            }
        };
        let bcoords = hit.barycentric();
        geometry::assert_barycentric(&bcoords);

        let corners = surface.faces()[fid].vertices;
        for (vid, b) in corners.iter().zip(bcoords.iter()) {
            distance.add_constraint(*vid, weights.distance * b, hit.t);
            confidence.add_constraint(*vid, weights.confidence * b, 1.0);
        }

        let face = &mut surface.faces_mut()[fid];
        face.quality += hit.t;
        face.selected = true;
        hits_per_face[fid] += 1;
        stats.matched += 1;
    }

    for (face, hits) in surface.faces_mut().iter_mut().zip(hits_per_face.iter()) {
        if *hits > 0 {
            face.quality /= *hits as Real;
            stats.selected_faces += 1;
        }
    }
    surface.color_faces_by_quality();

    if stats.unmatched > 0 {
        log::warn!(
            "{} of {} rays have no corresponding face",
            stats.unmatched,
            rays.len()
        );
    }

    stats
}
