//! Smooth interpolation of sparse per-vertex constraints over a surface.
//!
//! A [`FieldInterpolator`] finds the per-vertex values `x` minimizing
//!
//! ```text
//! sum_c w_c |x_{v_c} - b_c|² + xᵀ L x + ε |x|²
//! ```
//!
//! where `L` is a discrete Laplacian of the surface, the `(v_c, w_c, b_c)` are the point
//! constraints and `ε` is a tiny screening weight keeping the system definite on parts of
//! the surface without any constraint. The minimizer solves the sparse symmetric system
//! `(L + W + ε I) x = W b`, factored with a sparse Cholesky decomposition.

use crate::error::{BalloonError, Result};
use crate::geometry;
use crate::mesh::SurfaceMesh;
use crate::Real;
use na::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Faces whose area is below this fraction of their squared longest edge are degenerate.
const DEGENERATE_FACE_RATIO: Real = 1.0e-10;

/// The smoothness operator of a [`FieldInterpolator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum LaplacianKind {
    /// Cotangent weights: accurate, but requires non-degenerate triangles.
    #[default]
    Cotangent,
    /// Uniform weights on the edges: only depends on the connectivity.
    Combinatorial,
}

/// A weighted least-squares interpolator of per-vertex values.
#[derive(Clone, Debug)]
pub struct FieldInterpolator {
    kind: LaplacianKind,
    num_vertices: usize,
    dim: usize,
    laplacian: Vec<(usize, usize, Real)>,
    weights: Vec<Real>,
    rhs: DMatrix<Real>,
    screening: Real,
}

impl FieldInterpolator {
    /// Sets up the system of `surface` for values of dimension `dim`.
    ///
    /// Fails with [`BalloonError::IllConditioned`] listing the faces the operator cannot
    /// handle: faces repeating a vertex, and, for cotangent weights, faces with a null area.
    pub fn new(surface: &SurfaceMesh, dim: usize, kind: LaplacianKind) -> Result<Self> {
        assert!(dim > 0, "values must have at least one component");

        let faces = Self::ill_conditioned_faces(surface, kind);
        if !faces.is_empty() {
            return Err(BalloonError::IllConditioned { kind, faces });
        }

        let laplacian = match kind {
            LaplacianKind::Cotangent => cotangent_laplacian(surface),
            LaplacianKind::Combinatorial => combinatorial_laplacian(surface),
        };

        log::debug!(
            "Assembled {:?} laplacian over {} vertices ({} entries)",
            kind,
            surface.vertex_count(),
            laplacian.len()
        );

        Ok(Self {
            kind,
            num_vertices: surface.vertex_count(),
            dim,
            laplacian,
            weights: vec![0.0; surface.vertex_count()],
            rhs: DMatrix::zeros(surface.vertex_count(), dim),
            screening: 1.0e-8,
        })
    }

    /// Replaces the screening weight pulling unconstrained values toward zero.
    pub fn with_screening(mut self, screening: Real) -> Self {
        self.screening = screening;
        self
    }

    /// The smoothness operator of this system.
    pub fn kind(&self) -> LaplacianKind {
        self.kind
    }

    /// Number of components of the interpolated values.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The faces of `surface` that prevent building an operator of the given kind.
    pub fn ill_conditioned_faces(surface: &SurfaceMesh, kind: LaplacianKind) -> Vec<usize> {
        (0..surface.face_count())
            .filter(|fid| {
                let [a, b, c] = surface.faces()[*fid].vertices;
                if a == b || b == c || a == c {
                    return true;
                }

                match kind {
                    LaplacianKind::Combinatorial => false,
                    LaplacianKind::Cotangent => {
                        let tri = surface.triangle(*fid);
                        let longest = (0..3)
                            .map(|k| (tri[(k + 1) % 3] - tri[k]).norm_squared())
                            .fold(0.0, Real::max);
                        let area = geometry::scaled_normal(&tri).norm() / 2.0;
                        !(area > DEGENERATE_FACE_RATIO * longest)
                    }
                }
            })
            .collect()
    }

    /// Flags and paints red the faces of `surface` that an operator of the given kind
    /// cannot handle. Returns their indices.
    pub fn colorize_ill_conditioned(surface: &mut SurfaceMesh, kind: LaplacianKind) -> Vec<usize> {
        let faces = Self::ill_conditioned_faces(surface, kind);
        surface.mark_ill_conditioned(&faces);
        faces
    }

    /// Adds the constraint `x[vid] = value` with the given weight.
    ///
    /// Constraints on the same vertex accumulate.
    pub fn add_constraint(&mut self, vid: usize, weight: Real, value: Real) {
        self.add_constraint_n(vid, weight, &[value]);
    }

    /// Adds the constraint `x[vid] = values` with the given weight, for vector values.
    pub fn add_constraint_n(&mut self, vid: usize, weight: Real, values: &[Real]) {
        assert_eq!(values.len(), self.dim, "constraint dimension mismatch");
        assert!(vid < self.num_vertices, "vertex {} out of bounds", vid);

        self.weights[vid] += weight;
        for (k, value) in values.iter().enumerate() {
            self.rhs[(vid, k)] += weight * value;
        }
    }

    /// Solves the system. Returns one row of `dim` values per vertex.
    pub fn solve(&self) -> Result<DMatrix<Real>> {
        let n = self.num_vertices;
        let mut lhs = CooMatrix::new(n, n);

        for (i, j, w) in &self.laplacian {
            lhs.push(*i, *j, *w);
        }
        for (i, w) in self.weights.iter().enumerate() {
            lhs.push(i, i, *w + self.screening);
        }

        let lhs = CscMatrix::from(&lhs);
        let chol = CscCholesky::factor(&lhs).map_err(|e| {
            log::warn!("Failed to factor the {:?} system: {:?}", self.kind, e);
            BalloonError::IllConditioned {
                kind: self.kind,
                faces: vec![],
            }
        })?;

        let solution = chol.solve(&self.rhs);

        if solution.iter().any(|x| !x.is_finite()) {
            return Err(BalloonError::IllConditioned {
                kind: self.kind,
                faces: vec![],
            });
        }

        Ok(solution)
    }

    /// Solves a scalar system, returning one value per vertex.
    pub fn solve_scalar(&self) -> Result<Vec<Real>> {
        assert_eq!(self.dim, 1);
        Ok(self.solve()?.column(0).iter().copied().collect())
    }
}

/// Symmetric entries of the cotangent Laplacian, duplicates included.
fn cotangent_laplacian(surface: &SurfaceMesh) -> Vec<(usize, usize, Real)> {
    let mut entries = Vec::with_capacity(surface.face_count() * 12);

    for fid in 0..surface.face_count() {
        let ids = surface.faces()[fid].vertices;
        let pts = surface.triangle(fid);

        for k in 0..3 {
            // The edge (i, j) faces the corner o.
            let (o, i, j) = (k, (k + 1) % 3, (k + 2) % 3);
            let a = pts[i] - pts[o];
            let b = pts[j] - pts[o];
            let cot = a.dot(&b) / a.cross(&b).norm();
            push_edge(&mut entries, ids[i], ids[j], 0.5 * cot);
        }
    }

    entries
}

/// Symmetric entries of the uniform graph Laplacian, duplicates included.
fn combinatorial_laplacian(surface: &SurfaceMesh) -> Vec<(usize, usize, Real)> {
    let neighbors = surface.vertex_neighbors();
    let mut entries = vec![];

    for (i, list) in neighbors.iter().enumerate() {
        for j in list.iter().filter(|j| **j > i) {
            push_edge(&mut entries, i, *j, 1.0);
        }
    }

    entries
}

fn push_edge(entries: &mut Vec<(usize, usize, Real)>, i: usize, j: usize, w: Real) {
    entries.push((i, i, w));
    entries.push((j, j, w));
    entries.push((i, j, -w));
    entries.push((j, i, -w));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::tetrahedron;
    use approx::assert_relative_eq;
    use na::Point3;

    /// A flat `n x n` grid of unit quads.
    fn grid_patch(n: usize) -> SurfaceMesh {
        let mut positions = vec![];
        let mut triangles = vec![];
        for j in 0..=n {
            for i in 0..=n {
                positions.push(Point3::new(i as Real, j as Real, 0.0));
            }
        }
        let id = |i: usize, j: usize| i + j * (n + 1);
        for j in 0..n {
            for i in 0..n {
                triangles.push([id(i, j), id(i + 1, j), id(i + 1, j + 1)]);
                triangles.push([id(i, j), id(i + 1, j + 1), id(i, j + 1)]);
            }
        }
        SurfaceMesh::new(positions, triangles)
    }

    #[test]
    fn constant_constraints_give_constant_field() {
        let surface = grid_patch(4);
        for kind in [LaplacianKind::Cotangent, LaplacianKind::Combinatorial] {
            let mut interp = FieldInterpolator::new(&surface, 1, kind).unwrap();
            interp.add_constraint(0, 1.0e3, 2.0);
            interp.add_constraint(24, 1.0e3, 2.0);
            for x in interp.solve_scalar().unwrap() {
                assert_relative_eq!(x, 2.0, epsilon = 1.0e-4);
            }
        }
    }

    #[test]
    fn constraints_accumulate() {
        let surface = grid_patch(3);
        let mut halves = FieldInterpolator::new(&surface, 1, LaplacianKind::Cotangent).unwrap();
        let mut whole = halves.clone();

        halves.add_constraint(5, 0.5, 1.5);
        halves.add_constraint(5, 0.5, 1.5);
        halves.add_constraint(10, 2.0, -1.0);
        whole.add_constraint(5, 1.0, 1.5);
        whole.add_constraint(10, 2.0, -1.0);

        let a = halves.solve_scalar().unwrap();
        let b = whole.solve_scalar().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1.0e-12);
        }
        // Smooth interpolation stays within the constrained range.
        assert!(a.iter().all(|x| *x <= 1.5 + 1.0e-9 && *x >= -1.0 - 1.0e-9));
    }

    #[test]
    fn solve_is_deterministic() {
        let surface = tetrahedron();
        let mut interp = FieldInterpolator::new(&surface, 3, LaplacianKind::Cotangent).unwrap();
        interp.add_constraint_n(0, 1.0, &[1.0, 2.0, 3.0]);
        interp.add_constraint_n(3, 0.1, &[0.0, 0.0, 0.0]);
        assert_eq!(interp.solve().unwrap(), interp.solve().unwrap());
        assert_eq!(interp.solve().unwrap().shape(), (4, 3));
    }

    #[test]
    fn degenerate_faces_are_reported() {
        let mut surface = SurfaceMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 3], [0, 1, 2], [1, 1, 3]],
        );

        match FieldInterpolator::new(&surface, 1, LaplacianKind::Cotangent) {
            Err(BalloonError::IllConditioned { kind, faces }) => {
                assert_eq!(kind, LaplacianKind::Cotangent);
                assert_eq!(faces, vec![1, 2]);
            }
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }

        // The combinatorial operator only rejects the topologically broken face.
        assert_eq!(
            FieldInterpolator::ill_conditioned_faces(&surface, LaplacianKind::Combinatorial),
            vec![2]
        );

        let marked =
            FieldInterpolator::colorize_ill_conditioned(&mut surface, LaplacianKind::Cotangent);
        assert_eq!(marked, vec![1, 2]);
        assert!(surface.faces()[1].ill_conditioned && !surface.faces()[0].ill_conditioned);
    }
}
