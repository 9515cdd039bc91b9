use std::collections::BTreeSet;

use log::{debug, info};
use nalgebra::Vector3;

use crate::{
    datatypes::{Axis, BoundaryAssignment, Extreme, SurfaceDescriptor},
    error::AutoboltError,
};

/// Default absolute tolerance for extent comparisons, in model length units
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Decides which mesh surfaces are held and which are loaded.
///
/// Implementations see only surface descriptors, never the mesh itself, so a
/// different geometry can bring its own tagging rule without touching the
/// problem formulation.
pub trait BoundaryClassificationStrategy {
    fn classify(&self, surfaces: &[SurfaceDescriptor]) -> Result<BoundaryAssignment, AutoboltError>;
}

/// Fixes the single flat face at the minimum of `axis` and loads the single
/// flat face at its maximum with `traction`.
///
/// Valid only when both extreme faces are flat and unique, which holds for
/// the two-plate assembly but not for arbitrary geometry.
#[derive(Debug, Clone)]
pub struct ExtremeFaceClassifier {
    pub axis: Axis,
    pub traction: Vector3<f64>,
    pub tolerance: f64,
}

impl ExtremeFaceClassifier {
    pub fn new(axis: Axis, traction: Vector3<f64>) -> ExtremeFaceClassifier {
        ExtremeFaceClassifier {
            axis,
            traction,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> ExtremeFaceClassifier {
        self.tolerance = tolerance;
        self
    }

    /// Finds the one outward flat surface whose position along the axis
    /// equals `target`
    fn face_at(
        &self,
        surfaces: &[SurfaceDescriptor],
        target: f64,
        extreme: Extreme,
    ) -> Result<usize, AutoboltError> {
        let matches: Vec<usize> = surfaces
            .iter()
            .filter(|s| s.outward)
            .filter(|s| {
                let min = s.extents.min_along(self.axis);
                let max = s.extents.max_along(self.axis);
                (max - min).abs() <= self.tolerance && (min - target).abs() <= self.tolerance
            })
            .map(|s| s.id)
            .collect();

        match matches.as_slice() {
            [id] => Ok(*id),
            _ => Err(AutoboltError::AmbiguousBoundary {
                extreme,
                axis: self.axis,
                matches,
            }),
        }
    }
}

impl BoundaryClassificationStrategy for ExtremeFaceClassifier {
    fn classify(
        &self,
        surfaces: &[SurfaceDescriptor],
    ) -> Result<BoundaryAssignment, AutoboltError> {
        if !(self.tolerance >= 0.0) {
            return Err(AutoboltError::InvalidParameter(format!(
                "classifier tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }

        let global_min = surfaces
            .iter()
            .map(|s| s.extents.min_along(self.axis))
            .fold(f64::INFINITY, f64::min);
        let global_max = surfaces
            .iter()
            .map(|s| s.extents.max_along(self.axis))
            .fold(f64::NEG_INFINITY, f64::max);
        debug!(
            "{} surfaces span {} in [{}, {}]",
            surfaces.len(),
            self.axis,
            global_min,
            global_max
        );

        let fixed = self.face_at(surfaces, global_min, Extreme::Minimum)?;
        let loaded = self.face_at(surfaces, global_max, Extreme::Maximum)?;

        let assignment = BoundaryAssignment {
            fixed_surface_ids: BTreeSet::from([fixed]),
            traction_surfaces: vec![(loaded, self.traction)],
        };
        assignment.validate_against(surfaces)?;

        info!(
            "fixed surface {} at {}={}, traction surface {} at {}={}",
            fixed, self.axis, global_min, loaded, self.axis, global_max
        );

        Ok(assignment)
    }
}
