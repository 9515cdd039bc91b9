//! End-to-end analysis: solid → interchange file → mesh → boundary
//! classification → elasticity solve → factor of safety.
//!
//! Every run owns a scratch directory that is removed when the run returns,
//! whether it succeeded or not. Runs share no state, so independent analyses
//! may execute in parallel.

use std::path::PathBuf;

use log::{debug, info};
use nalgebra::Vector3;

use crate::{
    classifier::{BoundaryClassificationStrategy, ExtremeFaceClassifier, DEFAULT_TOLERANCE},
    datatypes::{Axis, FosResult},
    error::AutoboltError,
    formulator::formulate,
    geometry::{self, GeoScriptExporter, Solid, SolidExporter},
    material::MaterialModel,
    mesher::{GmshMesher, MeshSettings, Mesher},
    parameters::AssemblyParameters,
    post_processor::{csv_output, factor_of_safety, recover_stress},
    solver::{ConjugateGradientSolver, ElasticitySolver},
};

/// Surface traction applied at the maximum of the load axis; the face at the
/// minimum is held fixed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TractionSpec {
    /// Force per unit area, Pa
    pub vector: Vector3<f64>,
    /// Axis along which the fixed and loaded faces are found. Defaults to
    /// the transverse axis of the solid.
    pub axis: Option<Axis>,
}

impl TractionSpec {
    pub fn new(vector: Vector3<f64>) -> TractionSpec {
        TractionSpec { vector, axis: None }
    }

    pub fn along(mut self, axis: Axis) -> TractionSpec {
        self.axis = Some(axis);
        self
    }
}

/// A configured analysis pipeline. The exporter, mesher and solver are
/// swappable so each stage can be replaced independently.
#[derive(Debug, Clone)]
pub struct Analysis<E = GeoScriptExporter, M = GmshMesher, S = ConjugateGradientSolver> {
    pub exporter: E,
    pub mesher: M,
    pub solver: S,
    pub classifier_tolerance: f64,
    /// When set, nodal displacements and element stresses are written here
    pub output_dir: Option<PathBuf>,
}

impl Analysis {
    /// gmsh and conjugate gradient with default settings, the element size
    /// capped by the plate thickness of `solid`
    pub fn for_solid(solid: &Solid) -> Analysis {
        Analysis::with_stages(
            GeoScriptExporter,
            GmshMesher::new(MeshSettings::default().sized_for(solid)),
            ConjugateGradientSolver::default(),
        )
    }
}

impl<E, M, S> Analysis<E, M, S>
where
    E: SolidExporter,
    M: Mesher,
    S: ElasticitySolver,
{
    pub fn with_stages(exporter: E, mesher: M, solver: S) -> Analysis<E, M, S> {
        Analysis {
            exporter,
            mesher,
            solver,
            classifier_tolerance: DEFAULT_TOLERANCE,
            output_dir: None,
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    pub fn with_classifier_tolerance(mut self, tolerance: f64) -> Self {
        self.classifier_tolerance = tolerance;
        self
    }

    /// Runs the analysis of `solid` under `traction`
    ///
    /// # Arguments
    /// * `solid` - The assembly to analyze
    /// * `material` - Material of every body
    /// * `yield_strength` - Yield strength of the material, Pa
    /// * `traction` - Applied load
    ///
    /// # Returns
    /// The peak von Mises stress and the factor of safety
    pub fn run(
        &self,
        solid: &Solid,
        material: &MaterialModel,
        yield_strength: f64,
        traction: &TractionSpec,
    ) -> Result<FosResult, AutoboltError> {
        if !(yield_strength.is_finite() && yield_strength > 0.0) {
            return Err(AutoboltError::InvalidParameter(format!(
                "yield strength must be a positive number, got {yield_strength}"
            )));
        }
        if traction.vector.iter().any(|c| !c.is_finite()) {
            return Err(AutoboltError::InvalidParameter(format!(
                "traction {:?} is not finite",
                traction.vector.as_slice()
            )));
        }

        let scratch = tempfile::Builder::new().prefix("autobolt-").tempdir()?;
        debug!("scratch directory {}", scratch.path().display());

        let geometry_file = scratch
            .path()
            .join(format!("model.{}", self.exporter.extension()));
        self.exporter.export(solid, &geometry_file)?;

        let mesh = self.mesher.mesh(&geometry_file, scratch.path())?;
        info!(
            "meshed {} bodies into {} nodes, {} elements, {} surfaces",
            solid.bodies.len(),
            mesh.nodes.len(),
            mesh.elements.len(),
            mesh.surfaces.len()
        );

        let axis = traction.axis.unwrap_or(solid.axes.transverse);
        let classifier = ExtremeFaceClassifier::new(axis, traction.vector)
            .with_tolerance(self.classifier_tolerance);
        let assignment = classifier.classify(&mesh.surfaces)?;

        let problem = formulate(&mesh, &assignment, material)?;
        let displacement = self.solver.solve(&problem)?;

        let stress = recover_stress(&mesh, &displacement, material)?;
        let result = factor_of_safety(&stress, yield_strength)?;

        if let Some(dir) = &self.output_dir {
            csv_output(&mesh, &displacement, &stress, dir)?;
        }

        info!(
            "max von Mises stress {:.4e} Pa, factor of safety {}",
            result.max_von_mises_stress, result.factor_of_safety
        );

        Ok(result)
    }
}

/// Builds the two-plate bolted assembly described by `params`
pub fn build_assembly(params: &AssemblyParameters) -> Result<Solid, AutoboltError> {
    geometry::build_assembly(params)
}

/// Factor of safety of `solid` under a traction on its transverse faces,
/// meshed by gmsh and solved with conjugate gradient
pub fn compute_fos(
    solid: &Solid,
    material: &MaterialModel,
    yield_strength: f64,
    traction: Vector3<f64>,
) -> Result<FosResult, AutoboltError> {
    Analysis::for_solid(solid).run(solid, material, yield_strength, &TractionSpec::new(traction))
}

/// [`build_assembly`] followed by [`compute_fos`]
pub fn calculate_fos(
    params: &AssemblyParameters,
    material: &MaterialModel,
    yield_strength: f64,
    traction: Vector3<f64>,
) -> Result<FosResult, AutoboltError> {
    let solid = build_assembly(params)?;
    compute_fos(&solid, material, yield_strength, traction)
}
