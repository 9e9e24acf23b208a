//! Spatial hashing of the input rays over the cells of the volume.

use crate::error::{BalloonError, Result};
use crate::hgrid::HGrid;
use crate::volume::Volume;
use crate::Real;
use itertools::Itertools;
use na::{Point3, Vector3};
use parry::bounding_volume::{Aabb, BoundingVolume};

/// An input sample: a position and the direction it was observed along.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct OrientedPoint {
    /// Where the sample lies.
    pub position: Point3<Real>,
    /// Direction of observation, not necessarily normalized.
    pub direction: Vector3<Real>,
}

impl OrientedPoint {
    /// A sample at `position` observed along `direction`.
    pub fn new(position: Point3<Real>, direction: Vector3<Real>) -> Self {
        Self {
            position,
            direction,
        }
    }
}

/// A sample seen as a line probing the surface, with its current correspondence.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PokingRay {
    /// The sample position.
    pub origin: Point3<Real>,
    /// Unit direction.
    pub direction: Vector3<Real>,
    /// The surface face this ray currently constrains.
    pub face: Option<usize>,
    /// Signed line parameter of the intersection with `face`. `NaN` without a face.
    pub t: Real,
}

impl PokingRay {
    fn new(origin: Point3<Real>, direction: Vector3<Real>) -> Self {
        Self {
            origin,
            direction,
            face: None,
            t: Real::NAN,
        }
    }

    /// Forgets the face of this ray.
    pub fn clear_correspondence(&mut self) {
        self.face = None;
        self.t = Real::NAN;
    }
}

/// The rays of the cloud, hashed into every volume cell their line crosses.
#[derive(Clone, Debug)]
pub struct RayGrid {
    grid: HGrid<usize>,
    bounds: Aabb,
    max_cell: Point3<i64>,
    rays: Vec<PokingRay>,
}

impl Default for RayGrid {
    fn default() -> Self {
        Self {
            grid: HGrid::new(Point3::origin(), 1.0),
            bounds: Aabb::new_invalid(),
            max_cell: Point3::new(-1, -1, -1),
            rays: vec![],
        }
    }
}

impl RayGrid {
    /// Hashes `samples` over the cells of `volume`.
    ///
    /// Samples with a null direction cannot probe anything and are dropped.
    pub fn new(volume: &Volume, samples: &[OrientedPoint]) -> Result<Self> {
        if !volume.is_init() {
            return Err(BalloonError::InvalidParameter(
                "rays can only be hashed over an initialized volume".to_string(),
            ));
        }

        let dims = volume.dims();
        let mut result = Self {
            grid: HGrid::new(*volume.origin(), volume.delta()),
            bounds: volume.aabb(),
            max_cell: Point3::from(dims.map(|d| d as i64 - 2)),
            rays: Vec::with_capacity(samples.len()),
        };

        for sample in samples {
            match sample.direction.try_normalize(0.0) {
                Some(dir) if sample.position.coords.iter().all(|e| e.is_finite()) => {
                    result.rays.push(PokingRay::new(sample.position, dir))
                }
                _ => log::warn!("Dropping sample {:?} without a usable direction", sample),
            }
        }

        if result.rays.is_empty() {
            return Err(BalloonError::EmptyCloud);
        }

        let mut cells = vec![];
        for rid in 0..result.rays.len() {
            cells.clear();
            let ray = result.rays[rid];
            result.traverse(&ray.origin, &ray.direction, |cell| cells.push(cell));

            for cell in &cells {
                result.grid.insert_at(*cell, rid);
            }
        }

        log::info!(
            "Finished hashing {} rays into {} cells",
            result.rays.len(),
            result.grid.num_cells()
        );
        Ok(result)
    }

    /// The cell containing `pt`.
    ///
    /// Cells span the volume voxels and are named after their lowest voxel: the cell `c`
    /// covers `[volume.off2pos(c), volume.off2pos(c) + delta)`. [`Volume::pos2off`] instead
    /// rounds to the nearest voxel, one of the corners of this cell.
    pub fn pos2off(&self, pt: &Point3<Real>) -> Point3<i64> {
        self.grid.key(pt)
    }

    /// The center of the cell `off`, half a voxel above its lowest voxel.
    pub fn off2pos(&self, off: &Point3<i64>) -> Point3<Real> {
        self.grid.cell_center(off)
    }

    /// Ids of the rays hashed into the cell `off`.
    pub fn rays_in_cell(&self, off: &Point3<i64>) -> &[usize] {
        self.grid.cell(off).map(|v| &v[..]).unwrap_or(&[])
    }

    /// Ids of the rays crossing the cell containing `pt`.
    pub fn candidates_at(&self, pt: &Point3<Real>) -> impl Iterator<Item = usize> + '_ {
        self.candidates_in(&Aabb::new(*pt, *pt))
    }

    /// Ids of the rays crossing any cell overlapped by the triangle's bounding box grown by
    /// one cell, each reported once, in cell order.
    pub fn candidates_for_triangle(
        &self,
        tri: &[Point3<Real>; 3],
    ) -> impl Iterator<Item = usize> + '_ {
        let aabb = Aabb::from_points(tri.iter()).loosened(self.grid.cell_width());
        self.candidates_in(&aabb)
    }

    fn candidates_in(&self, aabb: &Aabb) -> impl Iterator<Item = usize> + '_ {
        self.grid
            .cells_intersecting_aabb(&aabb.mins, &aabb.maxs)
            .flat_map(|(_, ids)| ids.iter().copied())
            .unique()
    }

    /// Forgets every ray/face correspondence.
    pub fn clear_correspondences(&mut self) {
        for ray in &mut self.rays {
            ray.clear_correspondence();
        }
    }

    /// Every ray, indexed by ray id.
    pub fn rays(&self) -> &[PokingRay] {
        &self.rays
    }

    /// Mutable access to the rays, for their correspondences.
    pub fn rays_mut(&mut self) -> &mut [PokingRay] {
        &mut self.rays
    }

    /// Number of rays.
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    /// Whether there is no ray.
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    /// Visits, in order, the cells crossed by the whole line `origin + t * dir` within the
    /// volume (3D DDA).
    fn traverse(
        &self,
        origin: &Point3<Real>,
        dir: &Vector3<Real>,
        mut visit: impl FnMut(Point3<i64>),
    ) {
        let (mut tmin, mut tmax) = (-Real::MAX, Real::MAX);

        for i in 0..3 {
            if dir[i] == 0.0 {
                if origin[i] < self.bounds.mins[i] || origin[i] > self.bounds.maxs[i] {
                    return;
                }
            } else {
                let t1 = (self.bounds.mins[i] - origin[i]) / dir[i];
                let t2 = (self.bounds.maxs[i] - origin[i]) / dir[i];
                tmin = tmin.max(t1.min(t2));
                tmax = tmax.min(t1.max(t2));
            }
        }

        if tmin > tmax {
            return;
        }

        let clamp = |cell: Point3<i64>| {
            Point3::from(Vector3::from_fn(|i, _| cell[i].clamp(0, self.max_cell[i])))
        };
        let width = self.grid.cell_width();
        let grid_origin = self.grid.origin();
        let mut cell = clamp(self.grid.key(&(origin + dir * tmin)));
        let end = clamp(self.grid.key(&(origin + dir * tmax)));

        let mut step = Vector3::<i64>::zeros();
        let mut t_next = Vector3::repeat(Real::MAX);
        let mut t_delta = Vector3::repeat(Real::MAX);

        for i in 0..3 {
            if dir[i] > 0.0 {
                step[i] = 1;
                t_next[i] = (grid_origin[i] + (cell[i] + 1) as Real * width - origin[i]) / dir[i];
                t_delta[i] = width / dir[i];
            } else if dir[i] < 0.0 {
                step[i] = -1;
                t_next[i] = (grid_origin[i] + cell[i] as Real * width - origin[i]) / dir[i];
                t_delta[i] = -width / dir[i];
            }
        }

        let max_steps = (self.max_cell.x + self.max_cell.y + self.max_cell.z + 4) as usize;

        for _ in 0..max_steps {
            visit(cell);

            if cell == end {
                break;
            }

            let axis = t_next.imin();
            if t_next[axis] > tmax {
                break;
            }

            cell[axis] += step[axis];
            if cell[axis] < 0 || cell[axis] > self.max_cell[axis] {
                break;
            }
            t_next[axis] += t_delta[axis];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn volume() -> Volume {
        let mut volume = Volume::default();
        volume
            .init(
                8,
                4,
                &Aabb::new(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0)),
            )
            .unwrap();
        volume
    }

    #[test]
    fn axis_aligned_ray_crosses_every_cell_of_its_row() {
        let volume = volume();
        let rays = RayGrid::new(
            &volume,
            &[OrientedPoint::new(Point3::new(0.1, 0.1, 0.1), Vector3::x() * 3.0)],
        )
        .unwrap();
        assert_eq!(rays.rays()[0].direction, Vector3::x());

        let row = rays.pos2off(&Point3::new(0.1, 0.1, 0.1));
        for i in 0..(volume.dims()[0] as i64 - 1) {
            assert_eq!(rays.rays_in_cell(&Point3::new(i, row.y, row.z)), &[0]);
        }
        assert!(rays.rays_in_cell(&Point3::new(0, row.y + 1, row.z)).is_empty());
    }

    #[test]
    fn line_is_hashed_on_both_sides_of_the_origin() {
        let volume = volume();
        let origin = Point3::new(0.05, -0.3, 0.2);
        let dir = Vector3::new(1.0, 2.0, -0.5).normalize();
        let rays = RayGrid::new(&volume, &[OrientedPoint::new(origin, dir)]).unwrap();

        for t in [-1.5, -0.7, 0.0, 0.4, 1.1] {
            let pt = origin + dir * t;
            assert_eq!(rays.candidates_at(&pt).collect::<Vec<_>>(), vec![0]);
        }
    }

    #[test]
    fn triangle_candidates_are_unique() {
        let volume = volume();
        let samples: Vec<_> = (0..5)
            .map(|i| {
                OrientedPoint::new(Point3::new(0.1 * i as Real, 0.0, 0.0), Vector3::z())
            })
            .chain(Some(OrientedPoint::new(Point3::new(0.0, 0.9, 0.9), Vector3::x())))
            .collect();
        let rays = RayGrid::new(&volume, &samples).unwrap();
        let tri = [
            Point3::new(-0.1, -0.1, 0.5),
            Point3::new(0.5, -0.1, 0.5),
            Point3::new(-0.1, 0.3, 0.5),
        ];
        let mut found: Vec<_> = rays.candidates_for_triangle(&tri).collect();
        let len = found.len();
        found.sort_unstable();
        found.dedup();
        assert_eq!(found.len(), len);
        assert_eq!(found, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn clear_resets_correspondences() {
        let volume = volume();
        let mut rays = RayGrid::new(
            &volume,
            &[
                OrientedPoint::new(Point3::origin(), Vector3::y()),
                OrientedPoint::new(Point3::origin(), Vector3::zeros()),
            ],
        )
        .unwrap();
        assert_eq!(rays.len(), 1);

        rays.rays_mut()[0].face = Some(3);
        rays.rays_mut()[0].t = 0.5;
        rays.clear_correspondences();
        assert!(rays.rays().iter().all(|r| r.face.is_none() && r.t.is_nan()));
    }

    #[test]
    fn empty_cloud_is_rejected() {
        let volume = volume();
        assert_eq!(
            RayGrid::new(&volume, &[]).unwrap_err(),
            BalloonError::EmptyCloud
        );

        let sample = OrientedPoint::new(Point3::origin(), Vector3::x());
        assert!(matches!(
            RayGrid::new(&Volume::default(), &[sample]),
            Err(BalloonError::InvalidParameter(_))
        ));
    }

    #[test]
    fn cells_sit_between_voxels() {
        let volume = volume();
        let rays = RayGrid::new(
            &volume,
            &[OrientedPoint::new(Point3::origin(), Vector3::x())],
        )
        .unwrap();
        let half = Vector3::repeat(volume.delta() / 2.0);

        for pt in [
            Point3::new(0.1, -0.3, 0.7),
            Point3::new(-0.9, 0.2, 0.05),
            Point3::new(0.0, 0.0, 0.0),
        ] {
            let cell = rays.pos2off(&pt);
            let lowest = Point3::new(cell.x as usize, cell.y as usize, cell.z as usize);
            let corner = volume.off2pos(&lowest);
            assert_relative_eq!(rays.off2pos(&cell), corner + half, epsilon = 1.0e-12);
            for i in 0..3 {
                assert!(corner[i] <= pt[i] && pt[i] < corner[i] + volume.delta());
            }

            // The closest voxel is a corner of the cell.
            let nearest = volume.pos2off(&pt).unwrap();
            for i in 0..3 {
                assert!(nearest[i] == lowest[i] || nearest[i] == lowest[i] + 1);
            }
        }
    }
}
