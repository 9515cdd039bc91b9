use crate::{
    datatypes::{DisplacementField, Element, Mesh, Vertex},
    error::AutoboltError,
    formulator::ElasticityProblem,
};
use indicatif::ProgressBar;
use log::{debug, info};
use nalgebra::{matrix, DVector, Matrix3, SMatrix, Vector3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        ArgminFloat, Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const DOF: usize = 3;

/// Discretizes and solves an [`ElasticityProblem`]
pub trait ElasticitySolver {
    fn solve(&self, problem: &ElasticityProblem) -> Result<DisplacementField, AutoboltError>;
}

#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub max_iterations: u64,
    /// Conjugate gradient stops once `|r| <= relative_tolerance * |b|`
    pub relative_tolerance: f64,
    /// A final relative residual above this is reported as divergence
    pub divergence_threshold: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            max_iterations: 200_000,
            relative_tolerance: 1e-9,
            divergence_threshold: 1e-5,
        }
    }
}

/// Linear tetrahedral finite elements solved with Jacobi-scaled conjugate
/// gradient
#[derive(Debug, Clone, Default)]
pub struct ConjugateGradientSolver {
    pub settings: SolverSettings,
}

impl ConjugateGradientSolver {
    pub fn new(settings: SolverSettings) -> ConjugateGradientSolver {
        ConjugateGradientSolver { settings }
    }
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(sparse_matvec(self.a, x))
    }
}

fn sparse_matvec(a: &CsrMatrix<f64>, x: &[f64]) -> Vec<f64> {
    let row_offsets = a.row_offsets();
    let col_indices = a.col_indices();
    let values = a.values();

    (0..a.nrows())
        .map(|row| {
            (row_offsets[row]..row_offsets[row + 1])
                .map(|idx| values[idx] * x[col_indices[idx]])
                .sum()
        })
        .collect()
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    start_mag: Option<f64>,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new(target_cost: f64) -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            start_mag: None,
            final_mag: target_cost.log10(),
        }
    }

    fn argmin_float_to_f64<F: ArgminFloat>(&self, value: F) -> Option<f64> {
        format!("{:?}", value).parse().ok()
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = match self.argmin_float_to_f64(state.get_cost()) {
            Some(c) if c > 0.0 => c,
            _ => return Ok(()), // skip if we can't parse
        };
        let cost_mag = cost.log10();
        let start_mag = *self.start_mag.get_or_insert(cost_mag);
        let span = (start_mag - self.final_mag).max(f64::EPSILON);
        let progress = (1000. * (start_mag - cost_mag) / span).clamp(0., 1000.) as u64;
        self.bar.set_position(progress);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish_and_clear();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite matrix
/// * `b` - A vector of the solutions to the system
/// * `settings` - Iteration limit and tolerances
///
/// # Returns
/// The approximation of `x` and the number of iterations spent
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<(DVector<f64>, u64), AutoboltError> {
    let b_flat: Vec<f64> = b.iter().copied().collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    // argmin reports the squared residual norm as the cost
    let target_cost = (settings.relative_tolerance * b.norm()).powi(2);

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new(target_cost);

    // Run solver
    let res = Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(settings.max_iterations)
                .target_cost(target_cost)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
        .map_err(|err| AutoboltError::SingularSystem(format!("Conjugate Gradient error: {err}")))?;

    let iterations = res.state().get_iter();
    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(AutoboltError::SingularSystem(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    Ok((best_param, iterations))
}

fn element_corners(element: &Element, nodes: &[Vertex]) -> [Vector3<f64>; 4] {
    element.nodes.map(|i| nodes[i].to_vector())
}

/// Calculates the shape function gradients and volume of a linear
/// tetrahedron
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
///
/// # Returns
/// A 4x3 matrix whose row `a` is the gradient of shape function `a`, and the
/// element volume
pub fn compute_shape_gradients(
    element: &Element,
    nodes: &[Vertex],
) -> Result<(SMatrix<f64, 4, 3>, f64), AutoboltError> {
    let [p0, p1, p2, p3] = element_corners(element, nodes);
    let jacobian = Matrix3::from_columns(&[p1 - p0, p2 - p0, p3 - p0]);
    let det = jacobian.determinant();

    let scale = jacobian.column_iter().map(|c| c.norm()).fold(0.0, f64::max);
    if !det.is_finite() || det.abs() <= 1e-12 * scale.powi(3) {
        return Err(AutoboltError::MeshGeneration(format!(
            "Degenerate tetrahedron with nodes {:?}",
            element.nodes
        )));
    }

    let inverse = jacobian.try_inverse().ok_or_else(|| {
        AutoboltError::MeshGeneration(format!(
            "Non-invertible tetrahedron with nodes {:?}",
            element.nodes
        ))
    })?;

    let natural_gradients: SMatrix<f64, 4, 3> = matrix![
        -1.0, -1.0, -1.0;
        1.0, 0.0, 0.0;
        0.0, 1.0, 0.0;
        0.0, 0.0, 1.0;
    ];

    Ok((natural_gradients * inverse, det.abs() / 6.0))
}

/// Calculates the strain-displacement matrix of the element
///
/// # Arguments
/// * `gradients` - Shape function gradients from [`compute_shape_gradients`]
///
/// # Returns
/// A 6x12 matrix mapping nodal displacements to Voigt strain
/// `[xx, yy, zz, yz, xz, xy]` (engineering shear)
pub fn compute_strain_displacement_matrix(gradients: &SMatrix<f64, 4, 3>) -> SMatrix<f64, 6, 12> {
    let mut b: SMatrix<f64, 6, 12> = SMatrix::zeros();

    for a in 0..4 {
        let (bx, by, bz) = (gradients[(a, 0)], gradients[(a, 1)], gradients[(a, 2)]);
        let c = DOF * a;

        b[(0, c)] = bx;
        b[(1, c + 1)] = by;
        b[(2, c + 2)] = bz;
        b[(3, c + 1)] = bz;
        b[(3, c + 2)] = by;
        b[(4, c)] = bz;
        b[(4, c + 2)] = bx;
        b[(5, c)] = by;
        b[(5, c + 1)] = bx;
    }

    b
}

/// Computes the stiffness matrix for a given element
///
/// # Returns
/// A 12x12 stiffness matrix for the element
fn compute_element_stiffness_matrix(
    element: &Element,
    nodes: &[Vertex],
    stress_strain: &SMatrix<f64, 6, 6>,
) -> Result<SMatrix<f64, 12, 12>, AutoboltError> {
    let (gradients, volume) = compute_shape_gradients(element, nodes)?;
    let b = compute_strain_displacement_matrix(&gradients);

    Ok(b.transpose() * stress_strain * b * volume)
}

/// State of one global degree of freedom
#[derive(Debug, Clone, Copy, PartialEq)]
enum DofState {
    /// Not attached to any element
    Inactive,
    Free(usize),
    Prescribed(f64),
}

/// Classifies every DOF as free, prescribed, or unused
fn build_dof_map(problem: &ElasticityProblem) -> (Vec<DofState>, usize) {
    let mesh = problem.mesh;
    let mut dofs = vec![DofState::Inactive; DOF * mesh.nodes.len()];

    for element in &mesh.elements {
        for node in element.nodes {
            for d in 0..DOF {
                dofs[DOF * node + d] = DofState::Free(0);
            }
        }
    }

    for condition in &problem.dirichlet {
        for face in mesh.faces_on(condition.surface_id) {
            for node in face.nodes {
                for d in 0..DOF {
                    if dofs[DOF * node + d] != DofState::Inactive {
                        dofs[DOF * node + d] = DofState::Prescribed(condition.displacement[d]);
                    }
                }
            }
        }
    }

    let mut num_free = 0;
    for dof in dofs.iter_mut() {
        if let DofState::Free(idx) = dof {
            *idx = num_free;
            num_free += 1;
        }
    }

    (dofs, num_free)
}

/// Builds the consistent nodal load vector over the free DOFs
fn build_load_vector(
    problem: &ElasticityProblem,
    dofs: &[DofState],
    num_free: usize,
) -> Result<DVector<f64>, AutoboltError> {
    let mesh = problem.mesh;
    let mut loads: DVector<f64> = DVector::zeros(num_free);

    let mut add = |node: usize, force: &Vector3<f64>| {
        for d in 0..DOF {
            if let DofState::Free(i) = dofs[DOF * node + d] {
                loads[i] += force[d];
            }
        }
    };

    for traction in &problem.tractions {
        let mut area_sum = 0.0;
        for face in mesh.faces_on(traction.surface_id) {
            let [p0, p1, p2] = face.nodes.map(|i| mesh.nodes[i].to_vector());
            let area = 0.5 * (p1 - p0).cross(&(p2 - p0)).norm();
            area_sum += area;

            let share = traction.traction * (area / 3.0);
            for node in face.nodes {
                add(node, &share);
            }
        }
        debug!(
            "traction {:?} over surface {} with area {:.4e}",
            traction.traction.as_slice(),
            traction.surface_id,
            area_sum
        );
    }

    if problem.body_force.iter().any(|f| *f != 0.0) {
        for element in &mesh.elements {
            let (_, volume) = compute_shape_gradients(element, &mesh.nodes)?;
            let share = problem.body_force * (volume / 4.0);
            for node in element.nodes {
                add(node, &share);
            }
        }
    }

    Ok(loads)
}

/// Compiles element stiffness matrices into the free-DOF stiffness matrix.
/// Couplings to prescribed DOFs move to the right-hand side.
///
/// # Returns
/// The entries of the reduced stiffness matrix, in COO triplets
fn build_total_stiffness_matrix(
    problem: &ElasticityProblem,
    dofs: &[DofState],
    rhs: &mut DVector<f64>,
) -> Result<Vec<(usize, usize, f64)>, AutoboltError> {
    let mesh = problem.mesh;
    let mut entries: Vec<(usize, usize, f64)> = Vec::with_capacity(mesh.elements.len() * 144);

    let bar = ProgressBar::new(mesh.elements.len() as u64);
    for element in &mesh.elements {
        bar.inc(1);

        let stiffness_mat =
            compute_element_stiffness_matrix(element, &mesh.nodes, &problem.stress_strain)?;
        let global: [usize; 12] =
            std::array::from_fn(|local| DOF * element.nodes[local / DOF] + local % DOF);

        for (local_row, global_row) in global.iter().enumerate() {
            let DofState::Free(row) = dofs[*global_row] else {
                continue;
            };

            for (local_col, global_col) in global.iter().enumerate() {
                let k = stiffness_mat[(local_row, local_col)];
                match dofs[*global_col] {
                    DofState::Free(col) => entries.push((row, col, k)),
                    DofState::Prescribed(u) => rhs[row] -= k * u,
                    DofState::Inactive => {}
                }
            }
        }
    }
    bar.finish_and_clear();

    Ok(entries)
}

/// Symmetrically scales `K` by its diagonal so that the scaled matrix has a
/// unit diagonal
///
/// # Returns
/// The scaled matrix and the scale factors `1/sqrt(K_ii)`
fn jacobi_scale(
    entries: &[(usize, usize, f64)],
    size: usize,
) -> Result<(CsrMatrix<f64>, DVector<f64>), AutoboltError> {
    let mut diagonal: DVector<f64> = DVector::zeros(size);
    for (row, col, k) in entries {
        if row == col {
            diagonal[*row] += k;
        }
    }

    if let Some(i) = diagonal.iter().position(|d| !(d.is_finite() && *d > 0.0)) {
        return Err(AutoboltError::SingularSystem(format!(
            "free degree of freedom {i} has no stiffness"
        )));
    }

    let scale = diagonal.map(|d| 1.0 / d.sqrt());

    let mut coo = CooMatrix::new(size, size);
    for (row, col, k) in entries {
        coo.push(*row, *col, k * scale[*row] * scale[*col]);
    }

    Ok((CsrMatrix::from(&coo), scale))
}

impl ConjugateGradientSolver {
    /// Assembles and solves for the free DOFs
    fn solve_free(
        &self,
        problem: &ElasticityProblem,
        dofs: &[DofState],
        num_free: usize,
    ) -> Result<DVector<f64>, AutoboltError> {
        let mut rhs = build_load_vector(problem, dofs, num_free)?;
        let entries = build_total_stiffness_matrix(problem, dofs, &mut rhs)?;

        if rhs.iter().all(|f| *f == 0.0) {
            info!("no load reaches a free degree of freedom, skipping solve");
            return Ok(DVector::zeros(num_free));
        }

        let (scaled, scale) = jacobi_scale(&entries, num_free)?;
        let scaled_rhs = rhs.component_mul(&scale);

        let start = std::time::Instant::now();
        info!("solving...");
        let (y, iterations) = run_conjugate_gradient(&scaled, &scaled_rhs, &self.settings)?;
        let elapsed = (std::time::Instant::now() - start).as_secs_f32();

        let residual = DVector::from_vec(sparse_matvec(&scaled, y.as_slice())) - &scaled_rhs;
        let relative_residual = residual.norm() / scaled_rhs.norm();
        info!(
            "solved system in {:.3} seconds ({} iterations, relative residual {:.3e})",
            elapsed, iterations, relative_residual
        );

        if !relative_residual.is_finite() || y.iter().any(|v| !v.is_finite()) {
            return Err(AutoboltError::SingularSystem(
                "solution contains non-finite values".to_owned(),
            ));
        }
        if relative_residual > self.settings.divergence_threshold {
            return Err(AutoboltError::SolverDivergence {
                iterations,
                residual: relative_residual,
            });
        }

        Ok(y.component_mul(&scale))
    }
}

impl ElasticitySolver for ConjugateGradientSolver {
    fn solve(&self, problem: &ElasticityProblem) -> Result<DisplacementField, AutoboltError> {
        let mesh: &Mesh = problem.mesh;

        info!("setting up system...");
        let (dofs, num_free) = build_dof_map(problem);
        let num_prescribed = dofs
            .iter()
            .filter(|d| matches!(d, DofState::Prescribed(_)))
            .count();
        info!(
            "{} free and {} prescribed degrees of freedom over {} elements",
            num_free,
            num_prescribed,
            mesh.elements.len()
        );

        let solution: DVector<f64> = if num_free == 0 || problem.is_unloaded() {
            info!("system is unloaded, skipping assembly");
            DVector::zeros(num_free)
        } else {
            self.solve_free(problem, &dofs, num_free)?
        };

        // Load displacement solution into the nodal field
        let values: Vec<Vector3<f64>> = (0..mesh.nodes.len())
            .map(|node| {
                Vector3::from_fn(|d, _| match dofs[DOF * node + d] {
                    DofState::Free(i) => solution[i],
                    DofState::Prescribed(u) => u,
                    DofState::Inactive => 0.0,
                })
            })
            .collect();

        info!("solve complete");

        Ok(DisplacementField { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::BoundaryAssignment, formulator::formulate, material::MaterialModel,
        mesher::BlockMesher,
    };
    use approx::assert_relative_eq;
    use std::collections::BTreeSet;

    fn unit_tet() -> (Element, Vec<Vertex>) {
        let nodes = vec![
            Vertex { x: 0.0, y: 0.0, z: 0.0 },
            Vertex { x: 1.0, y: 0.0, z: 0.0 },
            Vertex { x: 0.0, y: 1.0, z: 0.0 },
            Vertex { x: 0.0, y: 0.0, z: 1.0 },
        ];
        (
            Element {
                nodes: [0, 1, 2, 3],
                volume_id: 1,
            },
            nodes,
        )
    }

    #[test]
    fn unit_tetrahedron_gradients() {
        let (element, nodes) = unit_tet();
        let (gradients, volume) = compute_shape_gradients(&element, &nodes).unwrap();

        assert_relative_eq!(volume, 1.0 / 6.0, epsilon = 1e-14);
        assert_relative_eq!(gradients[(0, 0)], -1.0, epsilon = 1e-14);
        assert_relative_eq!(gradients[(1, 0)], 1.0, epsilon = 1e-14);
        assert_relative_eq!(gradients[(2, 1)], 1.0, epsilon = 1e-14);
        assert_relative_eq!(gradients[(3, 2)], 1.0, epsilon = 1e-14);
    }

    #[test]
    fn flat_tetrahedron_is_rejected() {
        let (element, mut nodes) = unit_tet();
        nodes[3].z = 0.0;

        assert!(matches!(
            compute_shape_gradients(&element, &nodes),
            Err(AutoboltError::MeshGeneration(_))
        ));
    }

    #[test]
    fn rigid_translation_produces_no_force() {
        let (element, nodes) = unit_tet();
        let material = MaterialModel::new(1.0, 0.25).unwrap();
        let k = compute_element_stiffness_matrix(&element, &nodes, &material.stress_strain_matrix())
            .unwrap();

        let mut shift: SMatrix<f64, 12, 1> = SMatrix::zeros();
        for a in 0..4 {
            shift[DOF * a] = 0.3;
            shift[DOF * a + 1] = -0.7;
            shift[DOF * a + 2] = 0.1;
        }
        assert!((k * shift).norm() < 1e-12);
        assert_relative_eq!(k, k.transpose(), epsilon = 1e-12);
    }

    /// Bar of unit cross section, fixed at y = 0 and pulled at y = length
    fn solve_bar(traction: f64, poisson_ratio: f64) -> (Mesh, DisplacementField) {
        let mesh = BlockMesher::new(Vector3::zeros(), Vector3::new(1.0, 4.0, 1.0), [2, 8, 2])
            .build_mesh()
            .unwrap();
        let material = MaterialModel::new(1000.0, poisson_ratio).unwrap();
        let assignment = BoundaryAssignment {
            fixed_surface_ids: BTreeSet::from([3]),
            traction_surfaces: vec![(4, Vector3::new(0.0, traction, 0.0))],
        };
        let field = {
            let problem = formulate(&mesh, &assignment, &material).unwrap();
            ConjugateGradientSolver::default().solve(&problem).unwrap()
        };
        (mesh, field)
    }

    #[test]
    fn uniaxial_bar_matches_hand_calculation() {
        // without lateral contraction the clamped end does not disturb the
        // uniform state, so u_y = sigma * L / E exactly
        let (mesh, field) = solve_bar(10.0, 0.0);

        for (node, u) in mesh.nodes.iter().zip(&field.values) {
            assert_relative_eq!(u.y, 10.0 * node.y / 1000.0, epsilon = 1e-6);
            assert!(u.x.abs() < 1e-6 && u.z.abs() < 1e-6);
        }
    }

    #[test]
    fn fixed_surface_stays_put() {
        let (mesh, field) = solve_bar(10.0, 0.3);

        for face in mesh.faces_on(3) {
            for node in face.nodes {
                assert_eq!(field.values[node], Vector3::zeros());
            }
        }
        let tip = field
            .values
            .iter()
            .zip(&mesh.nodes)
            .filter(|(_, n)| n.y == 4.0)
            .map(|(u, _)| u.y)
            .fold(f64::NEG_INFINITY, f64::max);
        assert!(tip > 0.0);
    }

    #[test]
    fn unloaded_system_has_zero_displacement() {
        let (_, field) = solve_bar(0.0, 0.3);
        assert!(field.values.iter().all(|u| *u == Vector3::zeros()));
    }

    #[test]
    fn unloaded_problem_is_not_assembled() {
        let mut mesh = BlockMesher::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0), [1, 1, 1])
            .build_mesh()
            .unwrap();
        // flat element that assembly would reject
        mesh.elements.push(Element {
            nodes: [0, 1, 2, 3],
            volume_id: 1,
        });
        let material = MaterialModel::new(1000.0, 0.3).unwrap();
        let assignment = BoundaryAssignment {
            fixed_surface_ids: BTreeSet::from([3]),
            traction_surfaces: vec![(4, Vector3::zeros())],
        };
        let problem = formulate(&mesh, &assignment, &material).unwrap();
        assert!(problem.is_unloaded());

        let field = ConjugateGradientSolver::default().solve(&problem).unwrap();
        assert!(field.values.iter().all(|u| *u == Vector3::zeros()));
    }

    #[test]
    fn unconstrained_block_is_singular() {
        let mut mesh = BlockMesher::new(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0), [1, 1, 1])
            .build_mesh()
            .unwrap();
        // attached to no element
        mesh.nodes.push(Vertex { x: 5.0, y: 5.0, z: 5.0 });
        let material = MaterialModel::new(1000.0, 0.3).unwrap();
        let assignment = BoundaryAssignment {
            fixed_surface_ids: BTreeSet::new(),
            traction_surfaces: vec![(4, Vector3::new(0.0, 1.0, 0.0))],
        };
        let problem = formulate(&mesh, &assignment, &material).unwrap();

        let err = ConjugateGradientSolver::new(SolverSettings {
            max_iterations: 500,
            ..SolverSettings::default()
        })
        .solve(&problem)
        .unwrap_err();
        assert!(matches!(
            err,
            AutoboltError::SingularSystem(_) | AutoboltError::SolverDivergence { .. }
        ));
    }
}
