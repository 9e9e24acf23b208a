use crate::correspondence::{self, ConstraintWeights, CorrespondenceStats};
use crate::curvature;
use crate::error::{BalloonError, Result};
use crate::evolution;
use crate::field_solver::FieldInterpolator;
use crate::mesh::SurfaceMesh;
use crate::params::BalloonParams;
use crate::ray_index::{OrientedPoint, RayGrid};
use crate::volume::Volume;
use crate::Real;
use itertools::{Itertools, MinMaxResult};
use parry::bounding_volume::{Aabb, BoundingVolume};

/// Phase of the balloon evolution loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum BalloonState {
    /// No cloud loaded yet.
    Uninitialized,
    /// The volume, the ray index and the first surface exist.
    Ready,
    /// Rays are paired with the current surface and the solvers hold their constraints.
    FieldBuilt,
    /// The field moved at least once and a new surface was extracted.
    Evolving,
}

/// Scalars describing one evolution step, meant for logging.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(
    feature = "serde-serialize",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct IterationDiagnostics {
    /// Value of the iteration counter after the step.
    pub iteration: usize,
    /// Number of voxels the step updated.
    pub band_size: usize,
    /// Size of the band rebuilt around the new surface.
    pub next_band_size: usize,
    /// Grid spacing.
    pub delta: Real,
    /// Range of the interpolated distances over the band.
    pub distance_range: Option<(Real, Real)>,
    /// Largest interpolated `|distance|` over the band.
    pub max_abs_distance: Option<Real>,
    /// Largest interpolated `|mean curvature|` over the band.
    pub max_abs_curvature: Option<Real>,
    /// Largest change of the implicit function.
    pub max_step: Real,
    /// Rays that found no face during the correspondence pass this step built upon, if the
    /// step followed one.
    pub unmatched_rays: Option<usize>,
}

/// A volumetric balloon inflating or deflating toward an oriented point cloud.
///
/// A zero level set of an implicit function sampled on a voxel grid is evolved inside a
/// narrow band: every iteration pairs the input rays with the extracted surface, smoothly
/// interpolates the ray distances over the surface and moves the function accordingly,
/// optionally regularized by the surface curvature.
///
/// The phases must run in order:
/// [`Self::init`], then repeatedly [`Self::initialize_field`],
/// [`Self::interpolate_field`], [`Self::compute_curvature`] and [`Self::evolve`]
/// (or [`Self::iterate`] for the whole cycle).
#[derive(Clone, Debug)]
pub struct Balloon {
    params: BalloonParams,
    state: BalloonState,
    volume: Volume,
    rays: RayGrid,
    surface: SurfaceMesh,
    distance: Option<FieldInterpolator>,
    confidence: Option<FieldInterpolator>,
    correspondences: Option<CorrespondenceStats>,
    iterations: usize,
    diagnostics: Option<IterationDiagnostics>,
}

impl Default for Balloon {
    fn default() -> Self {
        Self::new(BalloonParams::default())
    }
}

impl Balloon {
    /// An uninitialized balloon with the given tuning constants.
    pub fn new(params: BalloonParams) -> Self {
        Self {
            params,
            state: BalloonState::Uninitialized,
            volume: Volume::default(),
            rays: RayGrid::default(),
            surface: SurfaceMesh::default(),
            distance: None,
            confidence: None,
            correspondences: None,
            iterations: 0,
            diagnostics: None,
        }
    }

    /// Loads `cloud` and seeds the balloon.
    ///
    /// The voxel grid covers the bounding box of the cloud with `resolution` intervals
    /// along its largest extent plus `padding` voxels on every side. The balloon starts
    /// as the bounding box, slightly enlarged, and its narrow band is built right away.
    /// May be called again at any time to restart from scratch.
    pub fn init(&mut self, cloud: &[OrientedPoint], resolution: usize, padding: usize) -> Result<()> {
        let result = self.try_init(cloud, resolution, padding);
        if result.is_err() {
            self.state = BalloonState::Uninitialized;
        }
        result
    }

    fn try_init(&mut self, cloud: &[OrientedPoint], resolution: usize, padding: usize) -> Result<()> {
        self.params.validate()?;
        if cloud.is_empty() {
            return Err(BalloonError::EmptyCloud);
        }

        *self = Self::new(self.params);

        let bbox = Aabb::from_points(cloud.iter().map(|s| &s.position));
        self.volume.init(resolution, padding, &bbox)?;
        self.rays = RayGrid::new(&self.volume, cloud)?;

        let delta = self.volume.delta();
        self.volume
            .init_field(&bbox.loosened(self.params.init_offset * delta));
        self.surface = self.volume.isosurface(0.0);
        let band = self
            .volume
            .update_surface_correspondence(&self.surface, self.band_threshold())?;

        log::info!(
            "Initialized the balloon: {} rays, {} surface faces, {} band voxels",
            self.rays.len(),
            self.surface.face_count(),
            band
        );
        self.state = BalloonState::Ready;
        Ok(())
    }

    /// Pairs the rays with the current surface and fills the field solvers with the
    /// resulting constraints.
    ///
    /// If a solver refuses the surface, the offending faces are marked on it, the balloon
    /// goes back to [`BalloonState::Ready`] and the error is returned.
    pub fn initialize_field(&mut self) -> Result<()> {
        if self.state == BalloonState::Uninitialized {
            return Err(self.invalid_state("initialize_field"));
        }

        self.surface.discard_transient_attributes();
        self.distance = None;
        self.confidence = None;
        self.correspondences = None;

        let kind = self.params.laplacian;
        let mut distance = match FieldInterpolator::new(&self.surface, 1, kind) {
            Ok(solver) => solver.with_screening(self.params.screening),
            Err(err) => return Err(self.ill_conditioned(err)),
        };
        let mut confidence = distance.clone();

        for vid in 0..self.surface.vertex_count() {
            confidence.add_constraint(vid, self.params.confidence_vertex_weight, 0.0);
        }

        let assigned = correspondence::assign_rays(&self.surface, &mut self.rays);
        log::debug!("{} of {} rays found a face", assigned, self.rays.len());

        let stats = correspondence::emit_constraints(
            &mut self.surface,
            &self.rays,
            &mut distance,
            &mut confidence,
            ConstraintWeights {
                distance: self.params.distance_weight,
                confidence: self.params.confidence_data_weight,
            },
        );

        self.correspondences = Some(stats);
        self.distance = Some(distance);
        self.confidence = Some(confidence);
        self.state = BalloonState::FieldBuilt;
        Ok(())
    }

    /// Solves both field systems and stores the results on the surface vertices, colored
    /// by distance.
    ///
    /// If a system cannot be factored, the balloon goes back to [`BalloonState::Ready`] as
    /// when [`Self::initialize_field`] rejects the surface.
    pub fn interpolate_field(&mut self) -> Result<()> {
        let (distance, confidence) = match (&self.distance, &self.confidence) {
            (Some(d), Some(c)) if self.state == BalloonState::FieldBuilt => (d, c),
            _ => return Err(self.invalid_state("interpolate_field")),
        };

        let solved = distance
            .solve_scalar()
            .and_then(|d| Ok((d, confidence.solve_scalar()?)));
        let (distances, confidences) = match solved {
            Ok(solved) => solved,
            Err(err) => return Err(self.ill_conditioned(err)),
        };
        self.surface.set_quality(&distances, &confidences);

        let range = match distances.iter().copied().minmax() {
            MinMaxResult::NoElements => None,
            MinMaxResult::OneElement(d) => Some((d, d)),
            MinMaxResult::MinMax(lo, hi) => Some((lo, hi)),
        };
        if let Some((lo, hi)) = range {
            log::debug!("Interpolated distances span [{}, {}]", lo, hi);
            self.surface.color_vertices_by_quality(lo, hi);
        }

        Ok(())
    }

    /// Fits the curvature of the current surface and colors its vertices accordingly.
    pub fn compute_curvature(&mut self) -> Result<()> {
        if self.state == BalloonState::Uninitialized {
            return Err(self.invalid_state("compute_curvature"));
        }

        curvature::update_curvature(&mut self.surface);
        self.surface.color_vertices_by_curvature();
        Ok(())
    }

    /// Moves the implicit function inside the band, extracts the new surface and rebuilds
    /// the band around it.
    ///
    /// The rays must have been paired with a surface at least once
    /// ([`Self::initialize_field`]). Returns [`BalloonError::EmptyBand`] when the new surface
    /// leaves no voxel to evolve, after which the balloon cannot progress anymore.
    pub fn evolve(&mut self) -> Result<IterationDiagnostics> {
        if !matches!(
            self.state,
            BalloonState::FieldBuilt | BalloonState::Evolving
        ) {
            return Err(self.invalid_state("evolve"));
        }

        self.iterations += 1;
        let update =
            evolution::evolve_band(&mut self.volume, &self.surface, self.params.balance_coefficient);

        // The solvers are tied to the topology being discarded.
        self.distance = None;
        self.confidence = None;
        self.surface = self.volume.isosurface(0.0);
        let band = self
            .volume
            .update_surface_correspondence(&self.surface, self.band_threshold());
        self.state = BalloonState::Evolving;

        let diagnostics = IterationDiagnostics {
            iteration: self.iterations,
            band_size: update.band_size,
            next_band_size: *band.as_ref().unwrap_or(&0),
            delta: self.volume.delta(),
            distance_range: update.distance_range,
            max_abs_distance: update.max_abs_distance,
            max_abs_curvature: update.max_abs_curvature,
            max_step: update.max_step,
            unmatched_rays: self.correspondences.take().map(|c| c.unmatched),
        };
        self.diagnostics = Some(diagnostics);

        log::info!(
            "Iteration {}: evolved {} voxels (delta {}, max step {}), new surface has {} faces",
            diagnostics.iteration,
            diagnostics.band_size,
            diagnostics.delta,
            diagnostics.max_step,
            self.surface.face_count()
        );

        band?;
        Ok(diagnostics)
    }

    /// Runs a whole cycle: correspondences, field interpolation, curvature, evolution.
    pub fn iterate(&mut self) -> Result<IterationDiagnostics> {
        self.initialize_field()?;
        self.interpolate_field()?;
        self.compute_curvature()?;
        self.evolve()
    }

    /// Marks the faces the solvers cannot handle and falls back to [`BalloonState::Ready`].
    fn ill_conditioned(&mut self, err: BalloonError) -> BalloonError {
        let faces =
            FieldInterpolator::colorize_ill_conditioned(&mut self.surface, self.params.laplacian);
        log::warn!(
            "Cannot solve the field systems: {} ({} faces marked)",
            err,
            faces.len()
        );
        self.distance = None;
        self.confidence = None;
        self.correspondences = None;
        self.state = BalloonState::Ready;
        err
    }

    fn band_threshold(&self) -> Real {
        self.params.band_width * self.volume.delta()
    }

    fn invalid_state(&self, operation: &'static str) -> BalloonError {
        BalloonError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// The tuning constants.
    pub fn params(&self) -> &BalloonParams {
        &self.params
    }

    /// The current phase.
    pub fn state(&self) -> BalloonState {
        self.state
    }

    /// The current surface.
    pub fn surface(&self) -> &SurfaceMesh {
        &self.surface
    }

    /// The voxel grid, including the implicit function and the narrow band.
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    /// The input rays and their current correspondences.
    pub fn rays(&self) -> &RayGrid {
        &self.rays
    }

    /// Outcome of the constraint emission on the current surface, if any.
    pub fn correspondences(&self) -> Option<CorrespondenceStats> {
        self.correspondences
    }

    /// Number of completed calls to [`Self::evolve`] since the last [`Self::init`].
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Diagnostics of the last evolution step.
    pub fn diagnostics(&self) -> Option<&IterationDiagnostics> {
        self.diagnostics.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_solver::LaplacianKind;
    use crate::mesh::{tests::tetrahedron, ColorMode, RED};
    use na::{Point3, Vector3};

    /// Samples on the faces of the cube `[-1, 1]³`, looking outward.
    fn cube_cloud() -> Vec<OrientedPoint> {
        let mut cloud = vec![];
        for axis in 0..3 {
            for side in [-1.0, 1.0] {
                for a in -2..=2 {
                    for b in -2..=2 {
                        let mut p = Vector3::zeros();
                        p[axis] = side;
                        p[(axis + 1) % 3] = a as Real * 0.4;
                        p[(axis + 2) % 3] = b as Real * 0.4;
                        let mut n = Vector3::zeros();
                        n[axis] = side;
                        cloud.push(OrientedPoint::new(Point3::from(p), n));
                    }
                }
            }
        }
        cloud
    }

    #[test]
    fn phases_must_run_in_order() {
        let mut balloon = Balloon::default();
        assert_eq!(balloon.state(), BalloonState::Uninitialized);
        assert_eq!(
            balloon.initialize_field(),
            Err(BalloonError::InvalidState {
                operation: "initialize_field",
                state: BalloonState::Uninitialized
            })
        );
        assert!(balloon.evolve().is_err());

        balloon.init(&cube_cloud(), 10, 4).unwrap();
        assert_eq!(balloon.state(), BalloonState::Ready);
        assert!(!balloon.volume().band().is_empty());
        assert!(matches!(
            balloon.interpolate_field(),
            Err(BalloonError::InvalidState { .. })
        ));
        assert!(matches!(
            balloon.evolve(),
            Err(BalloonError::InvalidState { .. })
        ));

        balloon.initialize_field().unwrap();
        assert_eq!(balloon.state(), BalloonState::FieldBuilt);
        balloon.interpolate_field().unwrap();
        assert!(balloon.surface().attributes().quality);
        balloon.compute_curvature().unwrap();
        assert!(balloon.surface().attributes().curvature);

        let diagnostics = balloon.evolve().unwrap();
        assert_eq!(balloon.state(), BalloonState::Evolving);
        assert_eq!(balloon.iterations(), 1);
        assert_eq!(diagnostics.iteration, 1);
        assert_eq!(balloon.diagnostics(), Some(&diagnostics));
        assert!(diagnostics.max_step <= diagnostics.delta / 2.0);

        // The new surface carries no stale attribute, and the solvers are gone.
        assert!(!balloon.surface().attributes().quality);
        assert!(balloon.interpolate_field().is_err());
    }

    #[test]
    fn init_rejects_empty_clouds() {
        let mut balloon = Balloon::default();
        assert_eq!(balloon.init(&[], 10, 4), Err(BalloonError::EmptyCloud));
        let no_direction = [OrientedPoint::new(Point3::origin(), Vector3::zeros()); 2];
        assert!(balloon.init(&no_direction, 10, 4).is_err());
        assert_eq!(balloon.state(), BalloonState::Uninitialized);
    }

    #[test]
    fn rays_reach_the_seed_surface() {
        let mut balloon = Balloon::new(BalloonParams {
            laplacian: LaplacianKind::Combinatorial,
            ..BalloonParams::default()
        });
        balloon.init(&cube_cloud(), 10, 4).unwrap();
        balloon.initialize_field().unwrap();

        let stats = balloon.correspondences().unwrap();
        assert_eq!(stats.matched, cube_cloud().len());
        assert_eq!(stats.unmatched, 0);
        // Every ray hits the enlarged box ahead of its sample.
        for ray in balloon.rays().rays() {
            assert!(ray.t > 0.0);
        }
    }

    #[test]
    fn degenerate_surface_is_marked_and_sends_back_to_ready() {
        let mut balloon = Balloon::default();
        balloon.init(&cube_cloud(), 10, 4).unwrap();

        let tetra = tetrahedron();
        let mut triangles: Vec<_> = tetra.faces().iter().map(|f| f.vertices).collect();
        triangles.push([0, 0, 1]);
        balloon.surface = SurfaceMesh::new(
            tetra.vertices().iter().map(|v| v.position).collect(),
            triangles,
        );

        assert_eq!(
            balloon.initialize_field(),
            Err(BalloonError::IllConditioned {
                kind: LaplacianKind::Cotangent,
                faces: vec![4],
            })
        );
        assert_eq!(balloon.state(), BalloonState::Ready);
        assert_eq!(balloon.correspondences(), None);
        assert!(balloon.surface().faces()[4].ill_conditioned);
        assert_eq!(balloon.surface().faces()[4].color, RED);
        assert!(!balloon.surface().faces()[0].ill_conditioned);
        assert_eq!(balloon.surface().color_mode(), ColorMode::PerFace);
        assert!(matches!(
            balloon.evolve(),
            Err(BalloonError::InvalidState {
                state: BalloonState::Ready,
                ..
            })
        ));
    }

    #[test]
    fn failed_factorization_sends_back_to_ready() {
        let mut balloon = Balloon::default();
        balloon.init(&cube_cloud(), 10, 4).unwrap();
        balloon.initialize_field().unwrap();

        // A negative screening makes the system indefinite.
        balloon.distance = Some(
            FieldInterpolator::new(&balloon.surface, 1, LaplacianKind::Cotangent)
                .unwrap()
                .with_screening(-1.0e6),
        );

        assert!(matches!(
            balloon.interpolate_field(),
            Err(BalloonError::IllConditioned { .. })
        ));
        assert_eq!(balloon.state(), BalloonState::Ready);
        assert!(balloon.distance.is_none() && balloon.confidence.is_none());
        assert!(!balloon.surface().attributes().quality);
        assert_eq!(balloon.surface().color_mode(), ColorMode::PerFace);
        assert!(matches!(
            balloon.evolve(),
            Err(BalloonError::InvalidState { .. })
        ));

        // The cycle can restart from there.
        balloon.initialize_field().unwrap();
        balloon.interpolate_field().unwrap();
    }

    #[test]
    fn collapsed_band_stops_the_evolution() {
        let mut balloon = Balloon::default();
        balloon.init(&cube_cloud(), 10, 4).unwrap();
        balloon.initialize_field().unwrap();

        // Everything outside: the next surface is empty.
        let dims = balloon.volume().dims();
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    balloon.volume.voxel_mut(&Point3::new(i, j, k)).sfield = 1.0;
                }
            }
        }

        assert_eq!(balloon.evolve(), Err(BalloonError::EmptyBand));
        assert_eq!(balloon.state(), BalloonState::Evolving);
        assert_eq!(balloon.iterations(), 1);
        assert!(balloon.surface().is_empty());
        assert!(balloon.volume().band().is_empty());
        let diagnostics = *balloon.diagnostics().unwrap();
        assert_eq!(diagnostics.next_band_size, 0);
        assert!(diagnostics.band_size > 0);
        assert_eq!(diagnostics.unmatched_rays, Some(0));

        // Nothing left to move, and no fresh correspondence to report.
        assert_eq!(balloon.evolve(), Err(BalloonError::EmptyBand));
        assert_eq!(balloon.iterations(), 2);
        let diagnostics = balloon.diagnostics().unwrap();
        assert_eq!(diagnostics.band_size, 0);
        assert_eq!(diagnostics.unmatched_rays, None);
        assert_eq!(balloon.correspondences(), None);
    }
}
