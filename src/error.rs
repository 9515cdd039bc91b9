use thiserror::Error;

use crate::datatypes::{Axis, Extreme};

/// Every failure the analysis pipeline can surface, tagged by the stage that
/// produced it.
#[derive(Error, Debug)]
pub enum AutoboltError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Geometry error in {operation}: {detail}")]
    GeometryConstruction { operation: String, detail: String },

    #[error(
        "Boundary error: expected exactly one flat surface at the {extreme} of the {axis} axis, \
         found {} ({matches:?})",
        .matches.len()
    )]
    AmbiguousBoundary {
        extreme: Extreme,
        axis: Axis,
        matches: Vec<usize>,
    },

    #[error("Boundary error: {0}")]
    InvalidAssignment(String),

    #[error("Mesher error: {0}")]
    MeshGeneration(String),

    #[error("Solver error: singular system ({0})")]
    SingularSystem(String),

    #[error(
        "Solver error: no convergence after {iterations} iterations \
         (relative residual {residual:e})"
    )]
    SolverDivergence { iterations: u64, residual: f64 },

    #[error("Input error: {0}")]
    Input(String),

    #[error("Output error: unable to write {path}: {source}")]
    Output {
        path: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutoboltError {
    pub(crate) fn geometry(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        AutoboltError::GeometryConstruction {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

