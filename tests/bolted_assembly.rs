use autobolt::{
    build_assembly, calculate_fos,
    classifier::{BoundaryClassificationStrategy, ExtremeFaceClassifier},
    datatypes::{Axis, Extents, SurfaceDescriptor},
    geometry::{BodyKind, GeoScriptExporter, Solid},
    material::MaterialModel,
    mesher::BlockMesher,
    parameters::{AssemblyParameters, AssemblyParametersBuilder, LengthUnit},
    solver::ConjugateGradientSolver,
    Analysis, AutoboltError, TractionSpec,
};
use approx::assert_relative_eq;
use nalgebra::Vector3;

fn reference_builder() -> AssemblyParametersBuilder {
    AssemblyParameters::builder()
        .plate_length(0.2)
        .plate_width(0.1)
        .plate_thickness(0.01)
        .num_holes(4)
        .hole_radius(0.01)
        .edge_margin(0.05387)
        .hole_spacing(0.035)
        .hole_offset(0.02)
        .plate_gap(0.01, LengthUnit::Millimeters)
}

fn steel() -> MaterialModel {
    MaterialModel::new(210e9, 0.3).unwrap()
}

/// Planar faces of every body: six per plate box, two end caps per bolt.
/// Curved bolt and hole walls are left out since they are never flat along
/// an axis.
fn planar_surfaces(solid: &Solid) -> Vec<SurfaceDescriptor> {
    let mut surfaces = Vec::new();
    for body in &solid.bodies {
        let extents = body.extents();
        let axes: Vec<Axis> = match body.kind {
            BodyKind::Plate => Axis::ALL.to_vec(),
            BodyKind::Bolt => vec![solid.axes.stacking],
        };
        for axis in axes {
            for at in [extents.min_along(axis), extents.max_along(axis)] {
                let (mut min, mut max) = (extents.min, extents.max);
                min[axis.index()] = at;
                max[axis.index()] = at;
                surfaces.push(SurfaceDescriptor {
                    id: surfaces.len() + 1,
                    extents: Extents::new(min, max),
                    outward: true,
                });
            }
        }
    }
    surfaces
}

/// Positions along the transverse axis of the fixed and the loaded face
fn classified_faces(solid: &Solid) -> (f64, f64) {
    let surfaces = planar_surfaces(solid);
    let axis = solid.axes.transverse;
    let assignment = ExtremeFaceClassifier::new(axis, Vector3::new(0.0, -1e6, 0.0))
        .classify(&surfaces)
        .unwrap();

    let position = |id: usize| {
        let surface = surfaces.iter().find(|s| s.id == id).unwrap();
        assert_relative_eq!(surface.extents.span(axis), 0.0);
        surface.extents.min_along(axis)
    };
    let fixed = *assignment.fixed_surface_ids.iter().next().unwrap();
    let loaded = assignment.traction_surfaces[0].0;
    (position(fixed), position(loaded))
}

#[test]
fn assembly_faces_classify_to_outer_plate_edges() {
    let solid = build_assembly(&reference_builder().build().unwrap()).unwrap();

    // plate B is mirrored to [2 * offset - width, 2 * offset]
    let (fixed, loaded) = classified_faces(&solid);
    assert_relative_eq!(fixed, -0.06, epsilon = 1e-12);
    assert_relative_eq!(loaded, 0.1, epsilon = 1e-12);
}

#[test]
fn unperforated_assembly_faces_classify_to_outer_plate_edges() {
    let solid = build_assembly(&reference_builder().num_holes(0).build().unwrap()).unwrap();
    assert_eq!(solid.count(BodyKind::Bolt), 0);

    let (fixed, loaded) = classified_faces(&solid);
    assert_relative_eq!(fixed, -0.06, epsilon = 1e-12);
    assert_relative_eq!(loaded, 0.1, epsilon = 1e-12);
}

#[test]
fn reference_assembly_has_two_plates_and_four_bolts() {
    let solid = build_assembly(&reference_builder().build().unwrap()).unwrap();

    assert_eq!(solid.count(BodyKind::Plate), 2);
    assert_eq!(solid.count(BodyKind::Bolt), 4);
    assert_relative_eq!(solid.extents().span(Axis::X), 0.2, epsilon = 1e-12);
}

#[test]
fn overflowing_hole_pattern_fails_before_geometry() {
    let err = reference_builder().num_holes(6).build().unwrap_err();
    assert!(matches!(err, AutoboltError::InvalidParameter(_)));
}

#[test]
fn block_pipeline_reports_stress_of_applied_traction() {
    // no lateral contraction: the bar carries exactly the applied stress
    let solid = build_assembly(&reference_builder().build().unwrap()).unwrap();
    let analysis = Analysis::with_stages(
        GeoScriptExporter,
        BlockMesher::new(Vector3::zeros(), Vector3::new(0.02, 0.1, 0.02), [2, 6, 2]),
        ConjugateGradientSolver::default(),
    );
    let material = MaterialModel::new(210e9, 0.0).unwrap();

    let result = analysis
        .run(&solid, &material, 200e6, &TractionSpec::new(Vector3::new(0.0, 1e6, 0.0)))
        .unwrap();

    assert_relative_eq!(result.max_von_mises_stress, 1e6, max_relative = 1e-4);
    assert_relative_eq!(result.factor_of_safety, 200.0, max_relative = 1e-4);
}

#[test]
#[ignore = "requires gmsh"]
fn reference_scenario_has_finite_positive_fos() {
    let params = reference_builder().build().unwrap();

    let loaded = calculate_fos(&params, &steel(), 200e6, Vector3::new(0.0, -1e6, 0.0)).unwrap();
    assert!(loaded.factor_of_safety.is_finite());
    assert!(loaded.factor_of_safety > 0.0);

    let unloaded = calculate_fos(&params, &steel(), 200e6, Vector3::zeros()).unwrap();
    assert!(unloaded.is_unbounded());
}

#[test]
#[ignore = "requires gmsh"]
fn reference_scenario_is_monotonic_in_load() {
    let params = reference_builder().build().unwrap();

    let light = calculate_fos(&params, &steel(), 200e6, Vector3::new(0.0, -1e6, 0.0)).unwrap();
    let heavy = calculate_fos(&params, &steel(), 200e6, Vector3::new(0.0, -3e6, 0.0)).unwrap();
    assert!(heavy.factor_of_safety < light.factor_of_safety);
}
