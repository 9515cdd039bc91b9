use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info};
use nalgebra::{Matrix3, SMatrix, Vector6};

use crate::{
    datatypes::{DisplacementField, FosResult, Mesh, StressField},
    error::AutoboltError,
    material::{voigt_to_tensor, MaterialModel},
    solver::{compute_shape_gradients, compute_strain_displacement_matrix, DOF},
};

/// Equivalent (von Mises) stress of a Cauchy stress tensor,
/// `sqrt(3/2 s:s)` with `s` the deviatoric part
pub fn von_mises(stress: &Matrix3<f64>) -> f64 {
    let deviatoric = stress - Matrix3::identity() * (stress.trace() / 3.0);
    (1.5 * deviatoric.component_mul(&deviatoric).sum()).sqrt()
}

/// Recovers the constant stress tensor of every element from the nodal
/// displacements
///
/// # Arguments
/// * `mesh` - The mesh the displacement was solved on
/// * `displacement` - Nodal displacements, indexed like `mesh.nodes`
/// * `material` - The isotropic material of every element
///
/// # Returns
/// One stress tensor and its von Mises value per element
pub fn recover_stress(
    mesh: &Mesh,
    displacement: &DisplacementField,
    material: &MaterialModel,
) -> Result<StressField, AutoboltError> {
    if displacement.values.len() != mesh.nodes.len() {
        return Err(AutoboltError::InvalidParameter(format!(
            "displacement field has {} values for {} nodes",
            displacement.values.len(),
            mesh.nodes.len()
        )));
    }

    let mut tensors = Vec::with_capacity(mesh.elements.len());
    let mut equivalent = Vec::with_capacity(mesh.elements.len());

    for element in &mesh.elements {
        let (gradients, _) = compute_shape_gradients(element, &mesh.nodes)?;
        let b = compute_strain_displacement_matrix(&gradients);

        let mut nodal: SMatrix<f64, 12, 1> = SMatrix::zeros();
        for (a, node) in element.nodes.iter().enumerate() {
            for d in 0..DOF {
                nodal[DOF * a + d] = displacement.values[*node][d];
            }
        }

        // engineering shear strains halve into tensor components
        let voigt: Vector6<f64> = b * nodal;
        let strain = voigt_to_tensor(&Vector6::new(
            voigt[0],
            voigt[1],
            voigt[2],
            0.5 * voigt[3],
            0.5 * voigt[4],
            0.5 * voigt[5],
        ));
        let tensor = material.stress(&strain);

        equivalent.push(von_mises(&tensor));
        tensors.push(tensor);
    }

    Ok(StressField {
        tensors,
        von_mises: equivalent,
    })
}

/// Reduces a stress field to the peak von Mises stress and the factor of
/// safety against `yield_strength`
pub fn factor_of_safety(
    stress: &StressField,
    yield_strength: f64,
) -> Result<FosResult, AutoboltError> {
    if !(yield_strength.is_finite() && yield_strength > 0.0) {
        return Err(AutoboltError::InvalidParameter(format!(
            "yield strength must be a positive number, got {yield_strength}"
        )));
    }

    if let Some(i) = stress.von_mises.iter().position(|s| !s.is_finite()) {
        return Err(AutoboltError::SingularSystem(format!(
            "element {i} has a non-finite stress"
        )));
    }

    let max_von_mises_stress = stress.max_von_mises();
    let factor_of_safety = if max_von_mises_stress > 0.0 {
        yield_strength / max_von_mises_stress
    } else {
        f64::INFINITY
    };

    debug!(
        "peak von Mises stress {:.4e} Pa against yield {:.4e} Pa",
        max_von_mises_stress, yield_strength
    );

    Ok(FosResult {
        max_von_mises_stress,
        factor_of_safety,
    })
}

/// Recovers element stress and reduces it to a factor of safety
pub fn compute_fos(
    mesh: &Mesh,
    displacement: &DisplacementField,
    material: &MaterialModel,
    yield_strength: f64,
) -> Result<FosResult, AutoboltError> {
    let stress = recover_stress(mesh, displacement, material)?;
    factor_of_safety(&stress, yield_strength)
}

fn output_error(path: &Path) -> impl FnOnce(std::io::Error) -> AutoboltError + '_ {
    move |source| AutoboltError::Output {
        path: path.display().to_string(),
        source,
    }
}

fn write_nodes_csv(
    path: &Path,
    mesh: &Mesh,
    displacement: &DisplacementField,
) -> std::io::Result<()> {
    let mut nodes_file = BufWriter::new(File::create(path)?);

    writeln!(nodes_file, "x,y,z,ux,uy,uz")?;
    for (node, u) in mesh.nodes.iter().zip(&displacement.values) {
        writeln!(
            nodes_file,
            "{x},{y},{z},{ux},{uy},{uz}",
            x = node.x,
            y = node.y,
            z = node.z,
            ux = u.x,
            uy = u.y,
            uz = u.z,
        )?;
    }

    nodes_file.flush()
}

fn write_elements_csv(path: &Path, mesh: &Mesh, stress: &StressField) -> std::io::Result<()> {
    let mut elements_file = BufWriter::new(File::create(path)?);

    writeln!(elements_file, "n0,n1,n2,n3,von_mises")?;
    for (element, vm) in mesh.elements.iter().zip(&stress.von_mises) {
        let [n0, n1, n2, n3] = element.nodes;
        writeln!(elements_file, "{n0},{n1},{n2},{n3},{vm}")?;
    }

    elements_file.flush()
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `mesh` - The solved mesh
/// * `displacement` - Nodal displacements
/// * `stress` - Element stresses
/// * `output_dir` - Directory receiving `nodes.csv` and `elements.csv`
///
/// # Returns
/// The paths of the nodes and elements files
pub fn csv_output(
    mesh: &Mesh,
    displacement: &DisplacementField,
    stress: &StressField,
    output_dir: &Path,
) -> Result<(PathBuf, PathBuf), AutoboltError> {
    std::fs::create_dir_all(output_dir).map_err(output_error(output_dir))?;
    let nodes_output = output_dir.join("nodes.csv");
    let elements_output = output_dir.join("elements.csv");

    write_nodes_csv(&nodes_output, mesh, displacement).map_err(output_error(&nodes_output))?;
    write_elements_csv(&elements_output, mesh, stress).map_err(output_error(&elements_output))?;

    info!(
        "wrote output to {} and {}",
        nodes_output.display(),
        elements_output.display()
    );

    Ok((nodes_output, elements_output))
}
