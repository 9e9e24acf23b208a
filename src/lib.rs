/*!
Volumetric balloon surface reconstruction.

A closed surface, represented as the zero level set of an implicit function sampled on a voxel
grid, is evolved toward an oriented point cloud. Every input sample is seen as a line probing
the surface: the signed distances along these lines are smoothly interpolated over the surface
with a sparse least-squares solve, and the implicit function is moved inside a narrow band
around the surface accordingly, optionally regularized by the surface curvature.

The whole loop is driven by [`Balloon`].
*/

#![allow(clippy::type_complexity, clippy::too_many_arguments)]
#![warn(missing_docs)]

/// Floating-point type used by this library.
pub type Real = f64;

extern crate nalgebra as na;
extern crate parry3d_f64 as parry;

pub use self::balloon::{Balloon, BalloonState, IterationDiagnostics};
pub use self::error::{BalloonError, Result};
pub use self::field_solver::{FieldInterpolator, LaplacianKind};
pub use self::mesh::{Color, ColorMode, Curvature, SurfaceFace, SurfaceMesh, SurfaceVertex};
pub use self::params::BalloonParams;
pub use self::ray_index::{OrientedPoint, PokingRay, RayGrid};
pub use self::volume::{Volume, Voxel, VoxelStatus};

mod balloon;
pub mod correspondence;
pub mod curvature;
mod error;
pub mod evolution;
pub mod field_solver;
pub mod geometry;
mod hgrid;
pub mod mesh;
mod params;
pub mod ray_index;
pub mod volume;
