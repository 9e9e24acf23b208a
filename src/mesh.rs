//! The explicit surface extracted from the implicit balloon.

use crate::geometry;
use crate::Real;
use na::{Point3, Vector3};
use parry::bounding_volume::Aabb;

/// RGBA color.
pub type Color = [u8; 4];

/// White, the color of faces without diagnostics.
pub const WHITE: Color = [255, 255, 255, 255];
/// Red, used to flag ill-conditioned faces.
pub const RED: Color = [255, 0, 0, 255];
const YELLOW: Color = [255, 255, 0, 255];
const BLUE: Color = [0, 0, 255, 255];

/// Principal and mean curvatures at a vertex.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Curvature {
    /// Largest principal curvature.
    pub k1: Real,
    /// Smallest principal curvature.
    pub k2: Real,
    /// Mean curvature `(k1 + k2) / 2`.
    pub mean: Real,
}

/// A vertex of the surface and its transient per-iteration attributes.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SurfaceVertex {
    /// Position of the vertex.
    pub position: Point3<Real>,
    /// Solved signed distance ("how far should I move").
    pub quality: Option<Real>,
    /// Solved confidence ("how sure").
    pub confidence: Option<Real>,
    /// Fitted curvature.
    pub curvature: Option<Curvature>,
    /// Display color.
    pub color: Option<Color>,
}

impl SurfaceVertex {
    fn new(position: Point3<Real>) -> Self {
        Self {
            position,
            quality: None,
            confidence: None,
            curvature: None,
            color: None,
        }
    }
}

/// A triangle of the surface.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SurfaceFace {
    /// Indices of the three vertices, counter-clockwise seen from outside.
    pub vertices: [usize; 3],
    /// Average signed ray distance of the rays corresponding to this face.
    pub quality: Real,
    /// Whether at least one ray corresponds to this face.
    pub selected: bool,
    /// Whether a field solver flagged this face as degenerate.
    pub ill_conditioned: bool,
    /// Display color.
    pub color: Color,
}

/// The set of optional per-vertex attributes currently available on a surface.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct VertexAttributes {
    /// Every vertex carries `quality` and `confidence`.
    pub quality: bool,
    /// Every vertex carries `curvature`.
    pub curvature: bool,
}

/// Which colors of the surface are meant to be displayed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ColorMode {
    /// No color information.
    #[default]
    None,
    /// Per-vertex colors.
    PerVertex,
    /// Per-face colors.
    PerFace,
}

/// A triangle mesh approximating the zero level set of the balloon.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SurfaceMesh {
    vertices: Vec<SurfaceVertex>,
    faces: Vec<SurfaceFace>,
    attributes: VertexAttributes,
    color_mode: ColorMode,
}

impl SurfaceMesh {
    /// Builds a surface from its vertex positions and triangles.
    pub fn new(positions: Vec<Point3<Real>>, triangles: Vec<[usize; 3]>) -> Self {
        debug_assert!(triangles.iter().flatten().all(|i| *i < positions.len()));
        Self {
            vertices: positions.into_iter().map(SurfaceVertex::new).collect(),
            faces: triangles
                .into_iter()
                .map(|vertices| SurfaceFace {
                    vertices,
                    quality: 0.0,
                    selected: false,
                    ill_conditioned: false,
                    color: WHITE,
                })
                .collect(),
            attributes: VertexAttributes::default(),
            color_mode: ColorMode::None,
        }
    }

    /// The vertices, indexed by vertex id.
    pub fn vertices(&self) -> &[SurfaceVertex] {
        &self.vertices
    }

    /// The faces, indexed by face id.
    pub fn faces(&self) -> &[SurfaceFace] {
        &self.faces
    }

    /// Mutable access to the face records. The connectivity must stay valid.
    pub fn faces_mut(&mut self) -> &mut [SurfaceFace] {
        &mut self.faces
    }

    /// Number of vertices.
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces.
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether the surface has no face.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// The per-vertex attributes available on this surface.
    pub fn attributes(&self) -> VertexAttributes {
        self.attributes
    }

    /// Which colors are meant to be displayed.
    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    /// Selects which colors are meant to be displayed.
    pub fn set_color_mode(&mut self, mode: ColorMode) {
        self.color_mode = mode;
    }

    /// The corner positions of the face `fid`.
    pub fn triangle(&self, fid: usize) -> [Point3<Real>; 3] {
        self.faces[fid].vertices.map(|v| self.vertices[v].position)
    }

    /// Unit normal of the face `fid`, pointing outside. Zero for degenerate faces.
    pub fn face_normal(&self, fid: usize) -> Vector3<Real> {
        geometry::scaled_normal(&self.triangle(fid))
            .try_normalize(0.0)
            .unwrap_or_else(Vector3::zeros)
    }

    /// Area-weighted unit vertex normals.
    pub fn vertex_normals(&self) -> Vec<Vector3<Real>> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];

        for fid in 0..self.faces.len() {
            let n = geometry::scaled_normal(&self.triangle(fid));
            for v in self.faces[fid].vertices {
                normals[v] += n;
            }
        }

        for n in &mut normals {
            *n = n.try_normalize(0.0).unwrap_or_else(Vector3::zeros);
        }

        normals
    }

    /// Sorted, deduplicated one-ring neighbors of every vertex.
    pub fn vertex_neighbors(&self) -> Vec<Vec<usize>> {
        let mut neighbors = vec![Vec::new(); self.vertices.len()];

        for face in &self.faces {
            for k in 0..3 {
                let a = face.vertices[k];
                let b = face.vertices[(k + 1) % 3];
                if a != b {
                    neighbors[a].push(b);
                    neighbors[b].push(a);
                }
            }
        }

        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }

        neighbors
    }

    /// Bounding box of the vertices.
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }

    /// Mean distance of the vertices to `center`.
    pub fn mean_radius(&self, center: &Point3<Real>) -> Real {
        if self.vertices.is_empty() {
            return 0.0;
        }

        self.vertices
            .iter()
            .map(|v| na::distance(&v.position, center))
            .sum::<Real>()
            / self.vertices.len() as Real
    }

    /// Stores the solved distance and confidence values, one per vertex.
    pub fn set_quality(&mut self, distances: &[Real], confidences: &[Real]) {
        assert_eq!(distances.len(), self.vertices.len());
        assert_eq!(confidences.len(), self.vertices.len());

        for (v, (d, c)) in self
            .vertices
            .iter_mut()
            .zip(distances.iter().zip(confidences.iter()))
        {
            v.quality = Some(*d);
            v.confidence = Some(*c);
        }
        self.attributes.quality = true;
    }

    /// Stores the fitted curvatures, one per vertex.
    pub fn set_curvature(&mut self, curvatures: &[Curvature]) {
        assert_eq!(curvatures.len(), self.vertices.len());

        for (v, k) in self.vertices.iter_mut().zip(curvatures.iter()) {
            v.curvature = Some(*k);
        }
        self.attributes.curvature = true;
    }

    /// Drops the per-iteration vertex attributes. They must be recomputed, never reused.
    pub fn discard_transient_attributes(&mut self) {
        for v in &mut self.vertices {
            v.quality = None;
            v.confidence = None;
            v.curvature = None;
        }
        self.attributes = VertexAttributes::default();
    }

    /// Colors the selected faces by their quality over the range spanned by the selection.
    pub fn color_faces_by_quality(&mut self) {
        let range = self
            .faces
            .iter()
            .filter(|f| f.selected)
            .fold(None, |acc: Option<(Real, Real)>, f| {
                Some(acc.map_or((f.quality, f.quality), |(lo, hi)| {
                    (lo.min(f.quality), hi.max(f.quality))
                }))
            });

        if let Some((lo, hi)) = range {
            for face in self.faces.iter_mut().filter(|f| f.selected) {
                face.color = color_ramp(lo, hi, face.quality);
            }
        }

        self.color_mode = ColorMode::PerFace;
    }

    /// Colors the vertices by their quality over `[lo, hi]`.
    pub fn color_vertices_by_quality(&mut self, lo: Real, hi: Real) {
        for v in &mut self.vertices {
            v.color = v.quality.map(|q| color_ramp(lo, hi, q));
        }
        self.color_mode = ColorMode::PerVertex;
    }

    /// Colors the vertices by mean curvature: blue to yellow for negative values,
    /// yellow to red for positive ones, normalized by the largest magnitude.
    pub fn color_vertices_by_curvature(&mut self) {
        let absmax = self
            .vertices
            .iter()
            .filter_map(|v| v.curvature)
            .map(|k| k.mean.abs())
            .fold(0.0, Real::max);

        for v in &mut self.vertices {
            v.color = v.curvature.map(|k| {
                let s = if absmax > 0.0 { k.mean.abs() / absmax } else { 0.0 };
                if k.mean < 0.0 {
                    lerp_color(YELLOW, BLUE, s)
                } else {
                    lerp_color(YELLOW, RED, s)
                }
            });
        }
        self.color_mode = ColorMode::PerVertex;
    }

    /// Flags the given faces as ill-conditioned and paints them red, everything else white.
    pub fn mark_ill_conditioned(&mut self, faces: &[usize]) {
        for face in &mut self.faces {
            face.ill_conditioned = false;
            face.color = WHITE;
        }
        for fid in faces {
            self.faces[*fid].ill_conditioned = true;
            self.faces[*fid].color = RED;
        }
        self.color_mode = ColorMode::PerFace;
    }
}

fn lerp_color(from: Color, to: Color, s: Real) -> Color {
    let s = s.clamp(0.0, 1.0);
    let mut result = [0; 4];
    for i in 0..4 {
        result[i] = (from[i] as Real * (1.0 - s) + to[i] as Real * s).round() as u8;
    }
    result
}

/// Red-yellow-green-cyan-blue ramp of `value` over `[lo, hi]`.
pub fn color_ramp(lo: Real, hi: Real, value: Real) -> Color {
    const STOPS: [Color; 5] = [
        [255, 0, 0, 255],
        [255, 255, 0, 255],
        [0, 255, 0, 255],
        [0, 255, 255, 255],
        [0, 0, 255, 255],
    ];

    let s = if hi > lo {
        ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let scaled = s * (STOPS.len() - 1) as Real;
    let i = (scaled.floor() as usize).min(STOPS.len() - 2);
    lerp_color(STOPS[i], STOPS[i + 1], scaled - i as Real)
}
