//! Dense voxel grid holding the balloon's implicit function and its narrow band.

use crate::error::{BalloonError, Result};
use crate::geometry;
use crate::mesh::SurfaceMesh;
use crate::Real;
use na::{Point3, Vector3};
use parry::bounding_volume::Aabb;
use parry::query::PointQuery;
use parry::shape::Triangle;

/// Band membership of a voxel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum VoxelStatus {
    /// Not part of the narrow band.
    #[default]
    Inactive,
    /// Reached by the band scan of the current surface, not yet confirmed.
    Queued,
    /// Part of the narrow band.
    Active,
}

/// One sample of the grid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Voxel {
    /// The evolving implicit function: negative inside the balloon, positive outside.
    pub sfield: Real,
    /// Signed distance to `face`. `NaN` outside of the band.
    pub field: Real,
    /// Band membership.
    pub status: VoxelStatus,
    /// Index of the closest face of the current surface (band voxels only).
    pub face: Option<usize>,
    /// Surface vertex generated in the cell whose lowest corner is this voxel.
    pub index: Option<usize>,
}

impl Default for Voxel {
    fn default() -> Self {
        Self {
            sfield: Real::NAN,
            field: Real::NAN,
            status: VoxelStatus::Inactive,
            face: None,
            index: None,
        }
    }
}

impl Voxel {
    fn reset_band_state(&mut self) {
        self.status = VoxelStatus::Inactive;
        self.face = None;
        self.index = None;
        self.field = Real::NAN;
    }
}

/// A regular grid of voxels with spacing `delta` wrapping the input bounding box.
#[derive(Clone, Debug, Default)]
pub struct Volume {
    dims: [usize; 3],
    origin: Point3<Real>,
    delta: Real,
    voxels: Vec<Voxel>,
    band: Vec<Point3<usize>>,
}

impl Volume {
    /// Allocates a grid whose spacing splits the largest extent of `bbox` into `resolution`
    /// intervals, with `padding` extra voxels on every side.
    pub fn init(&mut self, resolution: usize, padding: usize, bbox: &Aabb) -> Result<()> {
        if resolution == 0 {
            return Err(BalloonError::InvalidParameter(
                "the grid resolution must be positive".to_string(),
            ));
        }
        if padding < 3 {
            return Err(BalloonError::InvalidParameter(format!(
                "the grid padding must be at least 3 voxels (got {})",
                padding
            )));
        }

        let extents = bbox.extents();
        let max_extent = extents.max();

        if !(max_extent > 0.0) || !max_extent.is_finite() {
            return Err(BalloonError::InvalidParameter(format!(
                "degenerate bounding box {:?}",
                bbox
            )));
        }

        self.delta = max_extent / resolution as Real;
        self.origin = bbox.mins - Vector3::repeat(padding as Real * self.delta);
        for i in 0..3 {
            self.dims[i] = (extents[i] / self.delta).ceil() as usize + 1 + 2 * padding;
        }
        self.voxels = vec![Voxel::default(); self.dims.iter().product()];
        self.band.clear();

        log::info!(
            "Created a volume of sizes {} x {} x {}, delta = {}",
            self.dims[0],
            self.dims[1],
            self.dims[2],
            self.delta
        );
        Ok(())
    }

    /// Whether [`Self::init`] allocated the grid.
    pub fn is_init(&self) -> bool {
        !self.voxels.is_empty()
    }

    /// Number of voxels along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Grid spacing.
    pub fn delta(&self) -> Real {
        self.delta
    }

    /// Position of the voxel `(0, 0, 0)`.
    pub fn origin(&self) -> &Point3<Real> {
        &self.origin
    }

    /// The box spanned by the voxel centers.
    pub fn aabb(&self) -> Aabb {
        let last = Vector3::from_fn(|i, _| self.dims[i].saturating_sub(1) as Real);
        Aabb::new(self.origin, self.origin + last * self.delta)
    }

    /// The voxels currently in the narrow band.
    pub fn band(&self) -> &[Point3<usize>] {
        &self.band
    }

    fn linear(&self, off: &Point3<usize>) -> usize {
        off.x + self.dims[0] * (off.y + self.dims[1] * off.z)
    }

    /// The voxel at the grid coordinates `off`.
    pub fn voxel(&self, off: &Point3<usize>) -> &Voxel {
        &self.voxels[self.linear(off)]
    }

    /// Mutable access to the voxel at the grid coordinates `off`.
    pub fn voxel_mut(&mut self, off: &Point3<usize>) -> &mut Voxel {
        let id = self.linear(off);
        &mut self.voxels[id]
    }

    /// Position of a voxel.
    pub fn off2pos(&self, off: &Point3<usize>) -> Point3<Real> {
        self.origin + off.coords.map(|e| e as Real) * self.delta
    }

    /// The voxel closest to `pt`, if it lies inside of the grid.
    ///
    /// Voxels are grid nodes. The cells between them, as used by the isosurface and the
    /// ray index ([`crate::RayGrid::pos2off`]), are named after their lowest voxel: `pt` lies
    /// in the cell `c` iff `off2pos(c) <= pt < off2pos(c) + delta`, and its closest voxel is
    /// one of the eight corners of `c`.
    pub fn pos2off(&self, pt: &Point3<Real>) -> Option<Point3<usize>> {
        let rel = (pt - self.origin) / self.delta;
        let mut off = Point3::origin();

        for i in 0..3 {
            let k = rel[i].round();
            if !(k >= 0.0 && k < self.dims[i] as Real) {
                return None;
            }
            off[i] = k as usize;
        }

        Some(off)
    }

    /// Sets the implicit function to the signed distance from `region`'s boundary
    /// (negative inside) and clears every band attribute.
    pub fn init_field(&mut self, region: &Aabb) {
        let center = region.center();
        let half = region.half_extents();

        for k in 0..self.dims[2] {
            for j in 0..self.dims[1] {
                for i in 0..self.dims[0] {
                    let off = Point3::new(i, j, k);
                    let q = (self.off2pos(&off) - center).abs() - half;
                    let outside = q.map(|e| e.max(0.0)).norm();
                    let inside = q.max().min(0.0);
                    let voxel = self.voxel_mut(&off);
                    *voxel = Voxel::default();
                    voxel.sfield = outside + inside;
                }
            }
        }

        self.band.clear();
    }

    /// Extracts the surface `{sfield == level}` with surface nets.
    ///
    /// Every grid cell straddling the level gets one vertex at the average of its edge
    /// crossings; every crossing grid edge emits the two triangles joining the vertices of
    /// its four incident cells, oriented so that normals point toward increasing values.
    pub fn isosurface(&mut self, level: Real) -> SurfaceMesh {
        const CORNERS: [[usize; 3]; 8] = [
            [0, 0, 0],
            [1, 0, 0],
            [1, 1, 0],
            [0, 1, 0],
            [0, 0, 1],
            [1, 0, 1],
            [1, 1, 1],
            [0, 1, 1],
        ];
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];

        let [nx, ny, nz] = self.dims;
        let mut positions = vec![];
        let mut triangles = vec![];

        for voxel in &mut self.voxels {
            voxel.index = None;
        }

        if nx < 2 || ny < 2 || nz < 2 {
            return SurfaceMesh::default();
        }

        // Cell vertices.
        for k in 0..nz - 1 {
            for j in 0..ny - 1 {
                for i in 0..nx - 1 {
                    let corner = |c: usize| {
                        Point3::new(i + CORNERS[c][0], j + CORNERS[c][1], k + CORNERS[c][2])
                    };
                    let vals: [Real; 8] = std::array::from_fn(|c| {
                        let value = self.voxel(&corner(c)).sfield;
                        debug_assert!(!value.is_nan(), "the field must be initialized");
                        value
                    });

                    let outside = vals.iter().filter(|v| **v > level).count();
                    if outside == 0 || outside == 8 {
                        continue;
                    }

                    let mut avg = Vector3::zeros();
                    let mut count = 0;

                    for (a, b) in EDGES {
                        if (vals[a] > level) != (vals[b] > level) {
                            let t = (level - vals[a]) / (vals[b] - vals[a]);
                            let pa = self.off2pos(&corner(a));
                            let pb = self.off2pos(&corner(b));
                            avg += pa.coords.lerp(&pb.coords, t);
                            count += 1;
                        }
                    }

                    let off = Point3::new(i, j, k);
                    self.voxel_mut(&off).index = Some(positions.len());
                    positions.push(Point3::from(avg / count as Real));
                }
            }
        }

        // Quads around the crossing grid edges.
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let off = Point3::new(i, j, k);
                    let v0 = self.voxel(&off).sfield;

                    for axis in 0..3 {
                        let (u, w) = ((axis + 1) % 3, (axis + 2) % 3);
                        if off[axis] + 1 >= self.dims[axis] || off[u] == 0 || off[w] == 0 {
                            continue;
                        }

                        let mut next = off;
                        next[axis] += 1;
                        let v1 = self.voxel(&next).sfield;

                        if (v0 > level) == (v1 > level) {
                            continue;
                        }

                        // The four cells sharing the edge, counter-clockwise around `axis`.
                        let cell = |du: usize, dw: usize| {
                            let mut c = off;
                            c[u] -= 1 - du;
                            c[w] -= 1 - dw;
                            self.voxel(&c).index
                        };

                        if let (Some(a), Some(b), Some(c), Some(d)) =
                            (cell(0, 0), cell(1, 0), cell(1, 1), cell(0, 1))
                        {
                            if v1 > level {
                                triangles.push([a, b, c]);
                                triangles.push([a, c, d]);
                            } else {
                                triangles.push([a, c, b]);
                                triangles.push([a, d, c]);
                            }
                        }
                    }
                }
            }
        }

        log::debug!(
            "Extracted isosurface with {} vertices and {} faces",
            positions.len(),
            triangles.len()
        );

        SurfaceMesh::new(positions, triangles)
    }

    /// Resets every band voxel to inactive and empties the band.
    pub fn reset_band(&mut self) {
        let band = std::mem::take(&mut self.band);

        for off in &band {
            self.voxel_mut(off).reset_band_state();
        }

        self.band = band;
        self.band.clear();
    }

    /// Rebuilds the narrow band around `surface`: every voxel within `threshold` (inclusive)
    /// of a face becomes active, remembering its closest face and the signed distance to it.
    ///
    /// Returns the band size, or [`BalloonError::EmptyBand`] if no voxel qualifies.
    pub fn update_surface_correspondence(
        &mut self,
        surface: &SurfaceMesh,
        threshold: Real,
    ) -> Result<usize> {
        self.reset_band();
        self.band.reserve(5 * surface.face_count());

        let max_off = self.dims.map(|d| d as i64 - 1);

        for fid in 0..surface.face_count() {
            let tri = surface.triangle(fid);
            let normal = surface.face_normal(fid);

            if normal == Vector3::zeros() {
                log::debug!("Skipping degenerate face {} while building the band", fid);
                continue;
            }

            let shape = Triangle::new(tri[0], tri[1], tri[2]);
            let mins = tri[0].inf(&tri[1]).inf(&tri[2]) - Vector3::repeat(threshold);
            let maxs = tri[0].sup(&tri[1]).sup(&tri[2]) + Vector3::repeat(threshold);
            let lo = Vector3::from_fn(|i, _| {
                (((mins[i] - self.origin[i]) / self.delta).ceil() as i64).max(0)
            });
            let hi = Vector3::from_fn(|i, _| {
                (((maxs[i] - self.origin[i]) / self.delta).floor() as i64).min(max_off[i])
            });

            for k in lo.z..=hi.z {
                for j in lo.y..=hi.y {
                    for i in lo.x..=hi.x {
                        let off = Point3::new(i as usize, j as usize, k as usize);
                        let pos = self.off2pos(&off);
                        let proj = shape.project_local_point(&pos, false).point;
                        let dist = na::distance(&pos, &proj);

                        if dist > threshold {
                            continue;
                        }

                        let signed = if (pos - proj).dot(&normal) < 0.0 {
                            -dist
                        } else {
                            dist
                        };

                        let voxel = self.voxel_mut(&off);
                        match voxel.status {
                            VoxelStatus::Inactive => {
                                voxel.status = VoxelStatus::Queued;
                                voxel.face = Some(fid);
                                voxel.field = signed;
                                self.band.push(off);
                            }
                            _ => {
                                if dist < voxel.field.abs() {
                                    voxel.face = Some(fid);
                                    voxel.field = signed;
                                }
                            }
                        }
                    }
                }
            }
        }

        let band = std::mem::take(&mut self.band);
        for off in &band {
            self.voxel_mut(off).status = VoxelStatus::Active;
        }
        self.band = band;

        log::debug!("Narrow band holds {} voxels", self.band.len());

        if self.band.is_empty() {
            Err(BalloonError::EmptyBand)
        } else {
            Ok(self.band.len())
        }
    }

    /// Projects the band voxel `off` on its face, returning the barycentric coordinates of
    /// the projection.
    pub(crate) fn band_barycentrics(
        &self,
        surface: &SurfaceMesh,
        off: &Point3<usize>,
    ) -> (usize, [Real; 3]) {
        let voxel = self.voxel(off);
        assert_eq!(voxel.status, VoxelStatus::Active, "voxel {} is not in the band", off);
        assert!(!voxel.field.is_nan(), "NaN field read in the band at {}", off);
        let fid = match voxel.face {
            Some(fid) => fid,
            None => panic!("band voxel {} has no face", off),
        };

        let (_, bcoords) = geometry::project_on_triangle(&surface.triangle(fid), &self.off2pos(off));
        geometry::assert_barycentric(&bcoords);
        (fid, bcoords)
    }
}
