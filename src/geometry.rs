//! Line, triangle and barycentric helpers.

use crate::Real;
use na::{Point3, Vector3};
use parry::query::PointQuery;
use parry::shape::Triangle;

/// Barycentric coordinates more than this outside of `[0, 1]` are an invariant violation,
/// anything closer is rounding noise.
pub(crate) const BARYCENTRIC_TOLERANCE: Real = 1.0e-6;

const PARALLEL_EPS: Real = 1.0e-12;
/// Lines grazing an edge within this barycentric slack still hit the triangle.
const EDGE_EPS: Real = 1.0e-9;

/// Result of intersecting an infinite line with a triangle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LineHit {
    /// Signed parameter along the line direction (negative: behind the origin).
    pub t: Real,
    /// Barycentric weight of the second triangle vertex.
    pub u: Real,
    /// Barycentric weight of the third triangle vertex.
    pub v: Real,
}

impl LineHit {
    /// The barycentric weights of the three triangle vertices.
    pub fn barycentric(&self) -> [Real; 3] {
        [1.0 - self.u - self.v, self.u, self.v]
    }
}

/// Intersects the infinite line `origin + t * dir` with the triangle `tri`.
///
/// Both `t > 0` and `t < 0` are accepted. Returns `None` if the line is parallel to the
/// triangle plane or misses the triangle.
pub fn intersect_line_triangle(
    origin: &Point3<Real>,
    dir: &Vector3<Real>,
    tri: &[Point3<Real>; 3],
) -> Option<LineHit> {
    let e1 = tri[1] - tri[0];
    let e2 = tri[2] - tri[0];
    let p = dir.cross(&e2);
    let det = e1.dot(&p);

    if det.abs() < PARALLEL_EPS * e1.norm() * e2.norm() * dir.norm() {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - tri[0];
    let u = s.dot(&p) * inv_det;

    if !(-EDGE_EPS..=1.0 + EDGE_EPS).contains(&u) {
        return None;
    }

    let q = s.cross(&e1);
    let v = dir.dot(&q) * inv_det;

    if v < -EDGE_EPS || u + v > 1.0 + EDGE_EPS {
        return None;
    }

    let t = e2.dot(&q) * inv_det;
    Some(LineHit { t, u, v })
}

/// Twice the area of the triangle, times its unit normal.
pub fn scaled_normal(tri: &[Point3<Real>; 3]) -> Vector3<Real> {
    (tri[1] - tri[0]).cross(&(tri[2] - tri[0]))
}

/// Closest point of `tri` to `pt`, together with its barycentric coordinates.
pub fn project_on_triangle(tri: &[Point3<Real>; 3], pt: &Point3<Real>) -> (Point3<Real>, [Real; 3]) {
    let proj = Triangle::new(tri[0], tri[1], tri[2])
        .project_local_point(pt, false)
        .point;
    (proj, barycentric_coordinates(tri, &proj))
}

/// Barycentric coordinates of a point lying on the plane of `tri`.
pub fn barycentric_coordinates(tri: &[Point3<Real>; 3], pt: &Point3<Real>) -> [Real; 3] {
    let v0 = tri[1] - tri[0];
    let v1 = tri[2] - tri[0];
    let v2 = pt - tri[0];
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;

    if denom.abs() <= Real::EPSILON * d00 * d11 {
        // Degenerate triangle: give everything to the first vertex.
        return [1.0, 0.0, 0.0];
    }

    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

/// Panics if `bcoords` is not a valid barycentric coordinate triplet.
pub(crate) fn assert_barycentric(bcoords: &[Real; 3]) {
    for c in bcoords {
        assert!(
            *c >= -BARYCENTRIC_TOLERANCE && *c <= 1.0 + BARYCENTRIC_TOLERANCE,
            "barycentric coordinates {:?} fall outside of the triangle",
            bcoords
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle(z: Real) -> [Point3<Real>; 3] {
        [
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(0.0, 1.0, z),
        ]
    }

    #[test]
    fn line_hits_behind_origin() {
        let tri = unit_triangle(-2.0);
        let hit = intersect_line_triangle(
            &Point3::new(0.25, 0.25, 0.0),
            &Vector3::z(),
            &tri,
        )
        .unwrap();
        assert_relative_eq!(hit.t, -2.0);
        assert_relative_eq!(hit.u, 0.25);
        assert_relative_eq!(hit.v, 0.25);
    }

    #[test]
    fn line_misses_and_parallel() {
        let tri = unit_triangle(1.0);
        assert!(
            intersect_line_triangle(&Point3::new(0.8, 0.8, 0.0), &Vector3::z(), &tri).is_none()
        );
        assert!(
            intersect_line_triangle(&Point3::new(0.2, 0.2, 0.0), &Vector3::x(), &tri).is_none()
        );
    }

    #[test]
    fn projection_barycentrics_interpolate_position() {
        let tri = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 3.0, 1.0),
        ];
        let (proj, bc) = project_on_triangle(&tri, &Point3::new(0.5, 0.5, 3.0));
        let rebuilt = tri[0].coords * bc[0] + tri[1].coords * bc[1] + tri[2].coords * bc[2];
        assert_relative_eq!(proj.coords, rebuilt, epsilon = 1.0e-9);
        assert_barycentric(&bc);

        // Outside of the triangle: the projection lands on a vertex.
        let (proj, bc) = project_on_triangle(&tri, &Point3::new(-1.0, -1.0, 0.0));
        assert_relative_eq!(proj, tri[0], epsilon = 1.0e-9);
        assert_relative_eq!(bc[0], 1.0, epsilon = 1.0e-9);
    }

    #[test]
    #[should_panic(expected = "fall outside of the triangle")]
    fn barycentrics_outside_the_triangle_are_fatal() {
        assert_barycentric(&[1.5, -0.5, 0.0]);
    }

    #[test]
    fn rounding_noise_is_tolerated() {
        assert_barycentric(&[1.0 + 1.0e-9, -1.0e-9, 0.0]);
    }
}
