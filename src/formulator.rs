//! Statement of the linear elasticity boundary value problem.
//!
//! Find `u` such that for every test function `v`
//!
//! ```text
//! ∫ σ(u) : ε(v) dV = ∫ f · v dV + Σ ∫ t · v dS
//! ```
//!
//! with `ε(u) = ½(∇u + ∇uᵀ)`, `σ = 2μ ε + λ tr(ε) I`, and `u` prescribed on
//! the Dirichlet surfaces. Discretization and the linear solve belong to the
//! [`crate::solver::ElasticitySolver`] that receives the problem.

use log::info;
use nalgebra::{SMatrix, Vector3};

use crate::{
    datatypes::{BoundaryAssignment, Mesh},
    error::AutoboltError,
    material::MaterialModel,
};

/// Prescribed displacement on every node of a surface
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletCondition {
    pub surface_id: usize,
    pub displacement: Vector3<f64>,
}

/// Surface force per unit area applied to a surface
#[derive(Debug, Clone, PartialEq)]
pub struct TractionLoad {
    pub surface_id: usize,
    pub traction: Vector3<f64>,
}

/// Weak-form statement handed to a solver
#[derive(Debug, Clone)]
pub struct ElasticityProblem<'m> {
    pub mesh: &'m Mesh,
    pub material: MaterialModel,
    /// Voigt stress-strain matrix derived from `material`
    pub stress_strain: SMatrix<f64, 6, 6>,
    pub body_force: Vector3<f64>,
    pub dirichlet: Vec<DirichletCondition>,
    pub tractions: Vec<TractionLoad>,
}

impl<'m> ElasticityProblem<'m> {
    /// True when nothing drives the system away from the prescribed state
    pub fn is_unloaded(&self) -> bool {
        self.body_force.iter().all(|f| *f == 0.0)
            && self.tractions.iter().all(|t| t.traction.iter().all(|c| *c == 0.0))
            && self
                .dirichlet
                .iter()
                .all(|d| d.displacement.iter().all(|c| *c == 0.0))
    }
}

/// Assembles the problem statement from a classified mesh
///
/// # Arguments
/// * `mesh` - The volumetric mesh
/// * `assignment` - Fixed and loaded surfaces
/// * `material` - The isotropic material of every element
pub fn formulate<'m>(
    mesh: &'m Mesh,
    assignment: &BoundaryAssignment,
    material: &MaterialModel,
) -> Result<ElasticityProblem<'m>, AutoboltError> {
    assignment.validate_against(&mesh.surfaces)?;

    for (id, traction) in &assignment.traction_surfaces {
        if traction.iter().any(|c| !c.is_finite()) {
            return Err(AutoboltError::InvalidParameter(format!(
                "traction on surface {id} is not finite"
            )));
        }
    }

    let dirichlet: Vec<DirichletCondition> = assignment
        .fixed_surface_ids
        .iter()
        .map(|id| DirichletCondition {
            surface_id: *id,
            displacement: Vector3::zeros(),
        })
        .collect();

    let tractions: Vec<TractionLoad> = assignment
        .traction_surfaces
        .iter()
        .map(|(id, traction)| TractionLoad {
            surface_id: *id,
            traction: *traction,
        })
        .collect();

    info!(
        "formulated elasticity problem: E={:.3e}, nu={}, mu={:.3e}, lambda={:.3e}, \
         {} dirichlet / {} traction surfaces",
        material.youngs_modulus(),
        material.poisson_ratio(),
        material.mu(),
        material.lambda(),
        dirichlet.len(),
        tractions.len()
    );

    Ok(ElasticityProblem {
        mesh,
        material: *material,
        stress_strain: material.stress_strain_matrix(),
        body_force: Vector3::zeros(),
        dirichlet,
        tractions,
    })
}
