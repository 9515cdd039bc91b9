//! Parametric construction of the two-plate bolted assembly.
//!
//! Solids are kept as constructive descriptions: every body is a stock
//! primitive minus a list of cutting primitives. Rigid transforms are applied
//! eagerly to the primitives, which is exact because boxes and cylinders are
//! symmetric under the axis-aligned mirrors used here. The description is
//! handed to the meshing kernel through a [`SolidExporter`].

use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use nalgebra::Vector3;

use crate::{
    datatypes::{Axis, AxisConvention, Extents},
    error::AutoboltError,
    parameters::AssemblyParameters,
};

/// Extra cutter height so holes cut cleanly through the full thickness
pub const HOLE_CLEARANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Cuboid {
        center: Vector3<f64>,
        size: Vector3<f64>,
    },
    Cylinder {
        center: Vector3<f64>,
        radius: f64,
        height: f64,
        axis: Axis,
    },
}

impl Primitive {
    /// Creates an axis-aligned box centered at the origin
    pub fn cuboid(size: Vector3<f64>) -> Result<Primitive, AutoboltError> {
        if size.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(AutoboltError::geometry(
                "box",
                format!("size ({}, {}, {}) is degenerate", size.x, size.y, size.z),
            ));
        }

        Ok(Primitive::Cuboid {
            center: Vector3::zeros(),
            size,
        })
    }

    /// Creates a cylinder centered at the origin
    pub fn cylinder(radius: f64, height: f64, axis: Axis) -> Result<Primitive, AutoboltError> {
        if !radius.is_finite() || radius <= 0.0 || !height.is_finite() || height <= 0.0 {
            return Err(AutoboltError::geometry(
                "cylinder",
                format!("radius {radius} and height {height} must be positive"),
            ));
        }

        Ok(Primitive::Cylinder {
            center: Vector3::zeros(),
            radius,
            height,
            axis,
        })
    }

    pub fn center(&self) -> Vector3<f64> {
        match self {
            Primitive::Cuboid { center, .. } | Primitive::Cylinder { center, .. } => *center,
        }
    }

    fn center_mut(&mut self) -> &mut Vector3<f64> {
        match self {
            Primitive::Cuboid { center, .. } | Primitive::Cylinder { center, .. } => center,
        }
    }

    pub fn translated(mut self, offset: Vector3<f64>) -> Primitive {
        *self.center_mut() += offset;
        self
    }

    /// Reflects through the plane `normal = 0`
    pub fn mirrored(mut self, normal: Axis) -> Primitive {
        let center = self.center_mut();
        center[normal.index()] = -center[normal.index()];
        self
    }

    pub fn extents(&self) -> Extents {
        match self {
            Primitive::Cuboid { center, size } => {
                Extents::new(center - size / 2.0, center + size / 2.0)
            }
            Primitive::Cylinder {
                center,
                radius,
                height,
                axis,
            } => {
                let mut half = Vector3::repeat(*radius);
                half[axis.index()] = height / 2.0;
                Extents::new(center - half, center + half)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Plate,
    Bolt,
}

/// One body of the assembly: a stock primitive with material removed by
/// each of `cuts`
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub name: String,
    pub kind: BodyKind,
    pub stock: Primitive,
    pub cuts: Vec<Primitive>,
}

impl Body {
    pub fn new(name: impl Into<String>, kind: BodyKind, stock: Primitive) -> Body {
        Body {
            name: name.into(),
            kind,
            stock,
            cuts: Vec::new(),
        }
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Body {
        self.name = name.into();
        self
    }

    /// Boolean subtraction of `tool` from this body.
    ///
    /// Fails when the tool does not overlap the stock, since such a cut
    /// would leave the body unchanged and signals a construction mistake.
    pub fn subtract(mut self, tool: Primitive) -> Result<Body, AutoboltError> {
        let stock = self.stock.extents();
        let cutter = tool.extents();
        let overlaps = (0..3).all(|i| cutter.min[i] < stock.max[i] && cutter.max[i] > stock.min[i]);

        if !overlaps {
            return Err(AutoboltError::geometry(
                "subtract",
                format!(
                    "tool {:?} does not intersect body '{}' spanning {:?}..{:?}",
                    tool,
                    self.name,
                    stock.min.as_slice(),
                    stock.max.as_slice()
                ),
            ));
        }

        self.cuts.push(tool);
        Ok(self)
    }

    pub fn translate(mut self, offset: Vector3<f64>) -> Result<Body, AutoboltError> {
        if offset.iter().any(|c| !c.is_finite()) {
            return Err(AutoboltError::geometry(
                "translate",
                format!("offset {:?} of body '{}' is not finite", offset.as_slice(), self.name),
            ));
        }

        self.stock = self.stock.translated(offset);
        self.cuts = self.cuts.into_iter().map(|c| c.translated(offset)).collect();
        Ok(self)
    }

    /// Mirrors the body through the plane normal to `normal` that contains
    /// the origin
    pub fn mirror(mut self, normal: Axis) -> Body {
        self.stock = self.stock.mirrored(normal);
        self.cuts = self.cuts.into_iter().map(|c| c.mirrored(normal)).collect();
        self
    }

    pub fn extents(&self) -> Extents {
        self.stock.extents()
    }
}

/// Multi-body assembly. Bodies stay distinct; they are not fused.
#[derive(Debug, Clone, PartialEq)]
pub struct Solid {
    pub bodies: Vec<Body>,
    pub axes: AxisConvention,
}

impl Solid {
    pub fn compose(bodies: Vec<Body>, axes: AxisConvention) -> Result<Solid, AutoboltError> {
        if bodies.is_empty() {
            return Err(AutoboltError::geometry("compose", "assembly has no bodies"));
        }
        Ok(Solid { bodies, axes })
    }

    pub fn extents(&self) -> Extents {
        self.bodies
            .iter()
            .fold(Extents::empty(), |acc, b| acc.union(&b.extents()))
    }

    pub fn body(&self, name: &str) -> Option<&Body> {
        self.bodies.iter().find(|b| b.name == name)
    }

    pub fn count(&self, kind: BodyKind) -> usize {
        self.bodies.iter().filter(|b| b.kind == kind).count()
    }
}

/// Positions of the hole centers along the length axis, starting
/// `edge_margin` from the far end and stepping back by `hole_spacing`
pub fn hole_centers(params: &AssemblyParameters) -> Vec<f64> {
    let x0 = params.plate_length() - params.edge_margin();
    (0..params.num_holes())
        .map(|i| x0 - i as f64 * params.hole_spacing())
        .collect()
}

/// Builds plate A, its mirrored twin plate B and one bolt per hole
///
/// # Arguments
/// * `params` - Validated assembly parameters
///
/// # Returns
/// The composed multi-body solid
pub fn build_assembly(params: &AssemblyParameters) -> Result<Solid, AutoboltError> {
    let axes = params.axes();
    let length = params.plate_length();
    let width = params.plate_width();
    let thickness = params.plate_thickness();
    let gap = params.plate_gap();
    let radius = params.hole_radius();
    let offset = params.hole_offset();
    let x_coords = hole_centers(params);

    // Plate A: footprint [0, length] x [0, width], centered on the stacking axis
    let stock = Primitive::cuboid(axes.to_global(length, width, thickness))?
        .translated(axes.to_global(length / 2.0, width / 2.0, 0.0));
    let mut plate_a = Body::new("plate_a", BodyKind::Plate, stock);

    for x in &x_coords {
        let hole = Primitive::cylinder(radius, thickness + HOLE_CLEARANCE, axes.stacking)?
            .translated(axes.to_global(*x, offset, 0.0));
        plate_a = plate_a.subtract(hole)?;
    }

    // Plate B faces plate A, so the copy is mirrored and shifted back until
    // the hole rows line up again
    let plate_b = plate_a
        .clone()
        .renamed("plate_b")
        .translate(axes.to_global(0.0, 0.0, thickness + gap))?
        .mirror(axes.transverse)
        .translate(axes.to_global(0.0, 2.0 * offset, 0.0))?;

    let mut bodies = vec![plate_a, plate_b];

    let bolt_height = 2.0 * thickness + gap;
    for (i, x) in x_coords.iter().enumerate() {
        let bolt = Primitive::cylinder(radius, bolt_height, axes.stacking)?
            .translated(axes.to_global(*x, offset, thickness / 2.0 + gap / 2.0));
        bodies.push(Body::new(format!("bolt_{i}"), BodyKind::Bolt, bolt));
    }

    debug!("hole centers along {}: {:?}", axes.length, x_coords);
    info!("built assembly with 2 plates and {} bolts", x_coords.len());

    Solid::compose(bodies, axes)
}

/// Writes a [`Solid`] to a neutral interchange file consumed by the mesher
pub trait SolidExporter {
    /// File extension of the produced format, without the dot
    fn extension(&self) -> &str;

    fn export(&self, solid: &Solid, path: &Path) -> Result<(), AutoboltError>;
}

/// Exports solids as a gmsh geometry script on the OpenCASCADE kernel
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoScriptExporter;

impl GeoScriptExporter {
    fn write_primitive(
        out: &mut impl Write,
        tag: usize,
        primitive: &Primitive,
    ) -> std::io::Result<()> {
        match primitive {
            Primitive::Cuboid { .. } => {
                let e = primitive.extents();
                let d = e.max - e.min;
                writeln!(
                    out,
                    "Box({tag}) = {{ {}, {}, {}, {}, {}, {} }};",
                    e.min.x, e.min.y, e.min.z, d.x, d.y, d.z
                )?;
            }
            Primitive::Cylinder {
                center,
                radius,
                height,
                axis,
            } => {
                let base = center - axis.unit() * (height / 2.0);
                let span = axis.unit() * *height;
                writeln!(
                    out,
                    "Cylinder({tag}) = {{ {}, {}, {}, {}, {}, {}, {} }};",
                    base.x, base.y, base.z, span.x, span.y, span.z, radius
                )?;
            }
        }
        Ok(())
    }

    fn write_script(out: &mut impl Write, solid: &Solid) -> std::io::Result<()> {
        writeln!(out, "// Two-plate bolted assembly")?;
        writeln!(out, "SetFactory(\"OpenCASCADE\");")?;

        let mut next_tag: usize = 1;

        for body in &solid.bodies {
            writeln!(out, "\n// Body {}", body.name)?;

            let stock_tag = next_tag;
            next_tag += 1;
            Self::write_primitive(out, stock_tag, &body.stock)?;

            if body.cuts.is_empty() {
                continue;
            }

            let mut cut_tags = Vec::with_capacity(body.cuts.len());
            for cut in &body.cuts {
                Self::write_primitive(out, next_tag, cut)?;
                cut_tags.push(next_tag.to_string());
                next_tag += 1;
            }

            writeln!(
                out,
                "BooleanDifference({}) = {{ Volume{{{}}}; Delete; }}{{ Volume{{{}}}; Delete; }};",
                next_tag,
                stock_tag,
                cut_tags.join(", ")
            )?;
            next_tag += 1;
        }

        out.flush()
    }
}

impl SolidExporter for GeoScriptExporter {
    fn extension(&self) -> &str {
        "geo"
    }

    fn export(&self, solid: &Solid, path: &Path) -> Result<(), AutoboltError> {
        let file = std::fs::File::create(path).map_err(|err| {
            AutoboltError::geometry("export", format!("unable to create {}: {err}", path.display()))
        })?;

        Self::write_script(&mut BufWriter::new(file), solid).map_err(|err| {
            AutoboltError::geometry("export", format!("unable to write {}: {err}", path.display()))
        })?;
        info!("exported {} bodies to {}", solid.bodies.len(), path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::LengthUnit;
    use approx::assert_relative_eq;

    fn reference_params(num_holes: usize) -> AssemblyParameters {
        AssemblyParameters::builder()
            .plate_length(0.200)
            .plate_width(0.100)
            .plate_thickness(0.010)
            .num_holes(num_holes)
            .hole_radius(0.010)
            .edge_margin(0.05387)
            .hole_spacing(0.035)
            .hole_offset(0.020)
            .plate_gap(0.01, LengthUnit::Millimeters)
            .build()
            .unwrap()
    }

    #[test]
    fn hole_centers_step_back_from_far_edge() {
        let params = reference_params(4);
        let xs = hole_centers(&params);

        assert_eq!(xs.len(), 4);
        assert_relative_eq!(xs[0], 0.200 - 0.05387);
        for pair in xs.windows(2) {
            assert!(pair[1] < pair[0]);
            assert_relative_eq!(pair[0] - pair[1], 0.035, epsilon = 1e-12);
        }
    }

    #[test]
    fn each_plate_spans_length_and_width() {
        let params = reference_params(4);
        let solid = build_assembly(&params).unwrap();

        for name in ["plate_a", "plate_b"] {
            let e = solid.body(name).unwrap().extents();
            assert_relative_eq!(e.span(Axis::X), 0.200, epsilon = 1e-12);
            assert_relative_eq!(e.span(Axis::Y), 0.100, epsilon = 1e-12);
            assert_relative_eq!(e.span(Axis::Z), 0.010, epsilon = 1e-12);
        }
        assert_relative_eq!(solid.extents().span(Axis::X), 0.200, epsilon = 1e-12);
    }

    #[test]
    fn plate_b_is_stacked_and_mirrored() {
        let params = reference_params(4);
        let solid = build_assembly(&params).unwrap();
        let b = solid.body("plate_b").unwrap().extents();

        // mirrored about y = 0 then shifted by 2 * offset
        assert_relative_eq!(b.min_along(Axis::Y), 0.040 - 0.100, epsilon = 1e-12);
        assert_relative_eq!(b.max_along(Axis::Y), 0.040, epsilon = 1e-12);
        assert_relative_eq!(b.min_along(Axis::Z), 0.005 + 1e-5, epsilon = 1e-12);
    }

    #[test]
    fn hole_rows_line_up_between_plates() {
        let params = reference_params(4);
        let solid = build_assembly(&params).unwrap();
        let a = solid.body("plate_a").unwrap();
        let b = solid.body("plate_b").unwrap();

        assert_eq!(a.cuts.len(), 4);
        for (ha, hb) in a.cuts.iter().zip(&b.cuts) {
            assert_relative_eq!(ha.center().x, hb.center().x, epsilon = 1e-12);
            assert_relative_eq!(ha.center().y, hb.center().y, epsilon = 1e-12);
            assert_relative_eq!(hb.center().y, 0.020, epsilon = 1e-12);
        }
    }

    #[test]
    fn bolts_span_both_plates() {
        let params = reference_params(4);
        let solid = build_assembly(&params).unwrap();
        assert_eq!(solid.count(BodyKind::Bolt), 4);

        let bolt = solid.body("bolt_0").unwrap().extents();
        let a = solid.body("plate_a").unwrap().extents();
        let b = solid.body("plate_b").unwrap().extents();
        assert_relative_eq!(bolt.min_along(Axis::Z), a.min_along(Axis::Z), epsilon = 1e-12);
        assert_relative_eq!(bolt.max_along(Axis::Z), b.max_along(Axis::Z), epsilon = 1e-12);
    }

    #[test]
    fn zero_holes_gives_plain_plates() {
        let params = reference_params(0);
        let solid = build_assembly(&params).unwrap();

        assert_eq!(solid.count(BodyKind::Plate), 2);
        assert_eq!(solid.count(BodyKind::Bolt), 0);
        assert!(solid.bodies.iter().all(|b| b.cuts.is_empty()));
    }

    #[test]
    fn custom_axes_are_respected() {
        let axes = AxisConvention::new(Axis::Z, Axis::X, Axis::Y).unwrap();
        let params = AssemblyParameters::builder()
            .plate_length(0.2)
            .plate_width(0.1)
            .plate_thickness(0.01)
            .num_holes(2)
            .hole_radius(0.01)
            .edge_margin(0.05)
            .hole_spacing(0.05)
            .hole_offset(0.02)
            .plate_gap(0.1, LengthUnit::Millimeters)
            .axes(axes)
            .build()
            .unwrap();
        let solid = build_assembly(&params).unwrap();

        let a = solid.body("plate_a").unwrap().extents();
        assert_relative_eq!(a.span(Axis::Z), 0.2, epsilon = 1e-12);
        assert_relative_eq!(a.span(Axis::X), 0.1, epsilon = 1e-12);
        assert_relative_eq!(a.span(Axis::Y), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn subtract_rejects_disjoint_tool() {
        let plate = Body::new(
            "p",
            BodyKind::Plate,
            Primitive::cuboid(Vector3::new(1.0, 1.0, 1.0)).unwrap(),
        );
        let far = Primitive::cylinder(0.1, 1.0, Axis::Z)
            .unwrap()
            .translated(Vector3::new(5.0, 0.0, 0.0));

        assert!(matches!(
            plate.subtract(far),
            Err(AutoboltError::GeometryConstruction { .. })
        ));
    }

    #[test]
    fn geo_export_lists_every_body() {
        let params = reference_params(4);
        let solid = build_assembly(&params).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assembly.geo");

        GeoScriptExporter.export(&solid, &path).unwrap();
        let script = std::fs::read_to_string(&path).unwrap();

        assert!(script.contains("SetFactory(\"OpenCASCADE\");"));
        assert_eq!(script.matches("Box(").count(), 2);
        // 4 cutters per plate plus 4 bolts
        assert_eq!(script.matches("Cylinder(").count(), 12);
        assert_eq!(script.matches("BooleanDifference(").count(), 2);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn export_write_failure_is_a_geometry_error() {
        let solid = build_assembly(&reference_params(2)).unwrap();
        let err = GeoScriptExporter
            .export(&solid, Path::new("/dev/full"))
            .unwrap_err();
        assert!(matches!(
            err,
            AutoboltError::GeometryConstruction { ref operation, .. } if operation == "export"
        ));
        assert!(err.to_string().contains("/dev/full"));
    }
}
