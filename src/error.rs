use crate::balloon::BalloonState;
use crate::field_solver::LaplacianKind;
use thiserror::Error;

/// Errors reported by the balloon evolution engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BalloonError {
    /// The input cloud has no sample with a usable (non-zero) direction.
    #[error("the point cloud contains no usable oriented sample")]
    EmptyCloud,

    /// A host-supplied parameter is out of its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A field solver could not build or factor its system.
    ///
    /// `faces` lists the surface faces responsible for the failure when they could be
    /// identified (it is empty when the factorization itself broke down).
    #[error("ill-conditioned {kind:?} system ({} degenerate faces)", .faces.len())]
    IllConditioned {
        /// The smoothness operator the solver was built with.
        kind: LaplacianKind,
        /// Indices of the offending surface faces.
        faces: Vec<usize>,
    },

    /// The narrow band is empty after a correspondence update: the field cannot evolve.
    #[error("the narrow band is empty, the implicit field cannot evolve further")]
    EmptyBand,

    /// An orchestrator phase was invoked out of order.
    #[error("`{operation}` cannot run while the balloon is {state:?}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the orchestrator was in.
        state: BalloonState,
    },
}

/// Result type of the fallible operations of this crate.
pub type Result<T> = std::result::Result<T, BalloonError>;
