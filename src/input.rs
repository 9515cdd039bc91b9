use std::path::Path;

use json::JsonValue;
use log::debug;
use nalgebra::Vector3;

use crate::{
    classifier::DEFAULT_TOLERANCE,
    datatypes::{Axis, AxisConvention},
    error::AutoboltError,
    material::MaterialModel,
    mesher::MeshSettings,
    parameters::{AssemblyParameters, LengthUnit},
    pipeline::TractionSpec,
    solver::SolverSettings,
};

/// Everything needed to run one analysis, as read from a request file
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub parameters: AssemblyParameters,
    pub material: MaterialModel,
    pub yield_strength: f64,
    pub traction: TractionSpec,
    pub mesh: MeshSettings,
    pub solver: SolverSettings,
    pub classifier_tolerance: f64,
}

/// Reads and parses an analysis request file
///
/// # Arguments
/// * `path` - Path to the request json
pub fn load_request(path: &Path) -> Result<AnalysisRequest, AutoboltError> {
    let file_string = std::fs::read_to_string(path).map_err(|err| {
        AutoboltError::Input(format!("Unable to read {}: {err}", path.display()))
    })?;
    debug!("loaded request {}", path.display());

    parse_request(&file_string)
}

/// Parses an analysis request from its json text
pub fn parse_request(contents: &str) -> Result<AnalysisRequest, AutoboltError> {
    let request_json = match json::parse(contents) {
        Ok(v) => v,
        Err(err) => {
            return Err(AutoboltError::Input(format!(
                "Error in request json: {err}"
            )))
        }
    };

    for section in ["geometry", "material", "load"] {
        if !request_json.has_key(section) {
            return Err(AutoboltError::Input(format!(
                "Request json missing {section} section"
            )));
        }
    }

    let material_json = &request_json["material"];
    let material = MaterialModel::new(
        required_f64(material_json, "material", "youngs_modulus")?,
        required_f64(material_json, "material", "poisson_ratio")?,
    )?;
    let yield_strength = required_f64(material_json, "material", "yield_strength")?;

    let classifier_tolerance = match request_json["classifier"]["tolerance"].as_f64() {
        Some(t) => t,
        None => DEFAULT_TOLERANCE,
    };

    Ok(AnalysisRequest {
        parameters: parse_geometry(&request_json["geometry"])?,
        material,
        yield_strength,
        traction: parse_load(&request_json["load"])?,
        mesh: parse_mesh_settings(&request_json["mesh"])?,
        solver: parse_solver_settings(&request_json["solver"])?,
        classifier_tolerance,
    })
}

fn required_f64(section: &JsonValue, section_name: &str, key: &str) -> Result<f64, AutoboltError> {
    if !section.has_key(key) {
        return Err(AutoboltError::Input(format!(
            "Request json missing {key} field in {section_name} section"
        )));
    }
    section[key].as_f64().ok_or_else(|| {
        AutoboltError::Input(format!("Non-numeric {key} in {section_name} section"))
    })
}

fn optional_f64(
    section: &JsonValue,
    section_name: &str,
    key: &str,
) -> Result<Option<f64>, AutoboltError> {
    if !section.has_key(key) {
        return Ok(None);
    }
    required_f64(section, section_name, key).map(Some)
}

fn parse_axis(value: &JsonValue, context: &str) -> Result<Axis, AutoboltError> {
    value
        .as_str()
        .ok_or_else(|| AutoboltError::Input(format!("Expected an axis name for {context}")))?
        .parse()
}

fn parse_geometry(geometry: &JsonValue) -> Result<AssemblyParameters, AutoboltError> {
    let num_holes = match geometry["num_holes"].as_usize() {
        Some(n) => n,
        None => {
            return Err(AutoboltError::Input(
                "Request json missing or non-integer num_holes in geometry section".to_owned(),
            ))
        }
    };

    // gap is either meters or { "value": .., "unit": "mm" }
    let gap = &geometry["plate_gap"];
    let (gap_value, gap_unit) = if gap.is_object() {
        let unit = match gap["unit"].as_str() {
            Some(u) => u.parse::<LengthUnit>()?,
            None => LengthUnit::Meters,
        };
        (required_f64(gap, "plate_gap", "value")?, unit)
    } else {
        (required_f64(geometry, "geometry", "plate_gap")?, LengthUnit::Meters)
    };

    let mut builder = AssemblyParameters::builder()
        .plate_length(required_f64(geometry, "geometry", "plate_length")?)
        .plate_width(required_f64(geometry, "geometry", "plate_width")?)
        .plate_thickness(required_f64(geometry, "geometry", "plate_thickness")?)
        .num_holes(num_holes)
        .hole_radius(required_f64(geometry, "geometry", "hole_radius")?)
        .edge_margin(required_f64(geometry, "geometry", "edge_margin")?)
        .hole_spacing(required_f64(geometry, "geometry", "hole_spacing")?)
        .hole_offset(required_f64(geometry, "geometry", "hole_offset")?)
        .plate_gap(gap_value, gap_unit);

    if geometry.has_key("axes") {
        let axes = &geometry["axes"];
        builder = builder.axes(AxisConvention::new(
            parse_axis(&axes["length"], "axes.length")?,
            parse_axis(&axes["transverse"], "axes.transverse")?,
            parse_axis(&axes["stacking"], "axes.stacking")?,
        )?);
    }

    builder.build()
}

fn parse_load(load: &JsonValue) -> Result<TractionSpec, AutoboltError> {
    let traction = &load["traction"];
    if !traction.is_array() || traction.len() != 3 {
        return Err(AutoboltError::Input(
            "Request json load.traction must be an array of three numbers".to_owned(),
        ));
    }

    let mut vector = Vector3::zeros();
    for (i, component) in traction.members().enumerate() {
        vector[i] = component.as_f64().ok_or_else(|| {
            AutoboltError::Input(format!("Non-numeric traction component {i}"))
        })?;
    }

    let mut spec = TractionSpec::new(vector);
    if load.has_key("axis") {
        spec = spec.along(parse_axis(&load["axis"], "load.axis")?);
    }

    Ok(spec)
}

fn parse_mesh_settings(mesh: &JsonValue) -> Result<MeshSettings, AutoboltError> {
    let mut settings = MeshSettings::default();

    if let Some(v) = optional_f64(mesh, "mesh", "characteristic_length_min")? {
        settings.characteristic_length_min = v;
    }
    if let Some(v) = optional_f64(mesh, "mesh", "characteristic_length_max")? {
        settings.characteristic_length_max = v;
    }
    if mesh.has_key("layers_through_thickness") {
        settings.layers_through_thickness = mesh["layers_through_thickness"]
            .as_usize()
            .ok_or_else(|| {
                AutoboltError::Input(
                    "Non-integer layers_through_thickness in mesh section".to_owned(),
                )
            })?;
    }
    if let Some(v) = mesh["conformal_interfaces"].as_bool() {
        settings.conformal_interfaces = v;
    }
    if let Some(v) = mesh["gmsh_executable"].as_str() {
        settings.gmsh_executable = v.to_owned();
    }

    if !(settings.characteristic_length_min > 0.0
        && settings.characteristic_length_min <= settings.characteristic_length_max)
    {
        return Err(AutoboltError::InvalidParameter(format!(
            "characteristic lengths must satisfy 0 < min <= max, got {} and {}",
            settings.characteristic_length_min, settings.characteristic_length_max
        )));
    }

    Ok(settings)
}

fn parse_solver_settings(solver: &JsonValue) -> Result<SolverSettings, AutoboltError> {
    let mut settings = SolverSettings::default();

    if solver.has_key("max_iterations") {
        settings.max_iterations = solver["max_iterations"].as_u64().ok_or_else(|| {
            AutoboltError::Input("Non-integer max_iterations in solver section".to_owned())
        })?;
    }
    if let Some(v) = optional_f64(solver, "solver", "relative_tolerance")? {
        settings.relative_tolerance = v;
    }
    if let Some(v) = optional_f64(solver, "solver", "divergence_threshold")? {
        settings.divergence_threshold = v;
    }

    Ok(settings)
}
