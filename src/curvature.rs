//! Per-vertex curvature by local quadric fitting.
//!
//! Around every vertex the two-ring neighborhood is expressed in the tangent frame of the
//! vertex normal and fitted, in the least-squares sense, by the height field
//! `h(x, y) = a x² + b xy + c y² + d x + e y`. The principal curvatures are those of this
//! graph surface at the origin, with the convention that a sphere has positive curvature.

use crate::mesh::{Curvature, SurfaceMesh};
use crate::Real;
use na::{Matrix5, Vector3, Vector5};
use rayon::prelude::*;

/// Fits the curvature of every vertex of `surface`.
pub fn compute_curvature(surface: &SurfaceMesh) -> Vec<Curvature> {
    let normals = surface.vertex_normals();
    let neighbors = surface.vertex_neighbors();

    (0..surface.vertex_count())
        .into_par_iter()
        .map(|vid| {
            let ring = two_ring(&neighbors, vid);
            let center = surface.vertices()[vid].position;
            let offsets: Vec<_> = ring
                .iter()
                .map(|nid| surface.vertices()[*nid].position - center)
                .collect();
            fit_quadric(&normals[vid], &offsets)
        })
        .collect()
}

/// Computes the curvatures of `surface` and stores them on its vertices.
pub fn update_curvature(surface: &mut SurfaceMesh) {
    let curvatures = compute_curvature(surface);
    surface.set_curvature(&curvatures);
}

fn two_ring(neighbors: &[Vec<usize>], vid: usize) -> Vec<usize> {
    let mut ring: Vec<_> = neighbors[vid]
        .iter()
        .flat_map(|n| neighbors[*n].iter().copied().chain(Some(*n)))
        .filter(|n| *n != vid)
        .collect();
    ring.sort_unstable();
    ring.dedup();
    ring
}

/// Curvatures at the origin of the surface sampled by `offsets`, seen from `normal`.
fn fit_quadric(normal: &Vector3<Real>, offsets: &[Vector3<Real>]) -> Curvature {
    if *normal == Vector3::zeros() || offsets.len() < 5 {
        return Curvature::default();
    }

    let (u, v) = tangent_frame(normal);
    let mut ata = Matrix5::zeros();
    let mut atb = Vector5::zeros();

    for offset in offsets {
        let (x, y, h) = (offset.dot(&u), offset.dot(&v), offset.dot(normal));
        let row = Vector5::new(x * x, x * y, y * y, x, y);
        ata += row * row.transpose();
        atb += row * h;
    }

    let coeffs = match ata.cholesky() {
        Some(chol) => chol.solve(&atb),
        None => match ata.try_inverse() {
            Some(inv) => inv * atb,
            None => return Curvature::default(),
        },
    };

    let (a, b, c, d, e) = (coeffs[0], coeffs[1], coeffs[2], coeffs[3], coeffs[4]);

    // First and second fundamental forms of the graph of `h` at the origin.
    let (ff_e, ff_f, ff_g) = (1.0 + d * d, d * e, 1.0 + e * e);
    let w = (1.0 + d * d + e * e).sqrt();
    let (sf_l, sf_m, sf_n) = (2.0 * a / w, b / w, 2.0 * c / w);
    let det = ff_e * ff_g - ff_f * ff_f;

    // `h` grows outward: a convex surface bends toward negative heights.
    let mean = -(ff_e * sf_n - 2.0 * ff_f * sf_m + ff_g * sf_l) / (2.0 * det);
    let gauss = (sf_l * sf_n - sf_m * sf_m) / det;
    let spread = (mean * mean - gauss).max(0.0).sqrt();
    let (k1, k2) = (mean + spread, mean - spread);

    Curvature {
        k1,
        k2,
        mean: (k1 + k2) / 2.0,
    }
}

fn tangent_frame(normal: &Vector3<Real>) -> (Vector3<Real>, Vector3<Real>) {
    let axis = match normal.iamin() {
        0 => Vector3::x(),
        1 => Vector3::y(),
        _ => Vector3::z(),
    };
    let u = normal.cross(&axis).normalize();
    let v = normal.cross(&u);
    (u, v)
}
