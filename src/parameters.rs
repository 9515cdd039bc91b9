use std::fmt::Display;

use crate::{datatypes::AxisConvention, error::AutoboltError};

/// Length unit for parameters that are not supplied in the model unit.
///
/// Model lengths are meters throughout the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Meters,
    Millimeters,
}

impl LengthUnit {
    /// Converts `value` in this unit into meters
    pub fn to_meters(self, value: f64) -> f64 {
        match self {
            LengthUnit::Meters => value,
            LengthUnit::Millimeters => millimeters_to_meters(value),
        }
    }
}

impl Display for LengthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LengthUnit::Meters => write!(f, "m"),
            LengthUnit::Millimeters => write!(f, "mm"),
        }
    }
}

impl std::str::FromStr for LengthUnit {
    type Err = AutoboltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "m" | "meters" => Ok(LengthUnit::Meters),
            "mm" | "millimeters" => Ok(LengthUnit::Millimeters),
            other => Err(AutoboltError::Input(format!("Unknown length unit '{other}'"))),
        }
    }
}

pub fn millimeters_to_meters(mm: f64) -> f64 {
    mm * 1e-3
}

/// Scalar description of the two-plate bolted assembly. All lengths are in
/// meters.
///
/// Instances can only be obtained through [`AssemblyParameters::builder`],
/// which validates every invariant, so a value in hand always describes a
/// constructible assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyParameters {
    plate_length: f64,
    plate_width: f64,
    plate_thickness: f64,
    num_holes: usize,
    hole_radius: f64,
    edge_margin: f64,
    hole_spacing: f64,
    hole_offset: f64,
    plate_gap: f64,
    axes: AxisConvention,
}

impl AssemblyParameters {
    pub fn builder() -> AssemblyParametersBuilder {
        AssemblyParametersBuilder::default()
    }

    pub fn plate_length(&self) -> f64 {
        self.plate_length
    }

    pub fn plate_width(&self) -> f64 {
        self.plate_width
    }

    pub fn plate_thickness(&self) -> f64 {
        self.plate_thickness
    }

    pub fn num_holes(&self) -> usize {
        self.num_holes
    }

    pub fn hole_radius(&self) -> f64 {
        self.hole_radius
    }

    pub fn edge_margin(&self) -> f64 {
        self.edge_margin
    }

    pub fn hole_spacing(&self) -> f64 {
        self.hole_spacing
    }

    /// Distance of the hole row from the bottom edge along the transverse axis
    pub fn hole_offset(&self) -> f64 {
        self.hole_offset
    }

    pub fn plate_gap(&self) -> f64 {
        self.plate_gap
    }

    pub fn axes(&self) -> AxisConvention {
        self.axes
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyParametersBuilder {
    plate_length: Option<f64>,
    plate_width: Option<f64>,
    plate_thickness: Option<f64>,
    num_holes: Option<usize>,
    hole_radius: Option<f64>,
    edge_margin: Option<f64>,
    hole_spacing: Option<f64>,
    hole_offset: Option<f64>,
    plate_gap: Option<f64>,
    axes: Option<AxisConvention>,
}

impl AssemblyParametersBuilder {
    pub fn plate_length(mut self, meters: f64) -> Self {
        self.plate_length = Some(meters);
        self
    }

    pub fn plate_width(mut self, meters: f64) -> Self {
        self.plate_width = Some(meters);
        self
    }

    pub fn plate_thickness(mut self, meters: f64) -> Self {
        self.plate_thickness = Some(meters);
        self
    }

    pub fn num_holes(mut self, count: usize) -> Self {
        self.num_holes = Some(count);
        self
    }

    pub fn hole_radius(mut self, meters: f64) -> Self {
        self.hole_radius = Some(meters);
        self
    }

    pub fn edge_margin(mut self, meters: f64) -> Self {
        self.edge_margin = Some(meters);
        self
    }

    pub fn hole_spacing(mut self, meters: f64) -> Self {
        self.hole_spacing = Some(meters);
        self
    }

    pub fn hole_offset(mut self, meters: f64) -> Self {
        self.hole_offset = Some(meters);
        self
    }

    /// Sets the gap between the plates, converting from `unit`
    pub fn plate_gap(mut self, value: f64, unit: LengthUnit) -> Self {
        self.plate_gap = Some(unit.to_meters(value));
        self
    }

    pub fn axes(mut self, axes: AxisConvention) -> Self {
        self.axes = Some(axes);
        self
    }

    pub fn build(self) -> Result<AssemblyParameters, AutoboltError> {
        let params = AssemblyParameters {
            plate_length: required("plate_length", self.plate_length)?,
            plate_width: required("plate_width", self.plate_width)?,
            plate_thickness: required("plate_thickness", self.plate_thickness)?,
            num_holes: required("num_holes", self.num_holes)?,
            hole_radius: required("hole_radius", self.hole_radius)?,
            edge_margin: required("edge_margin", self.edge_margin)?,
            hole_spacing: required("hole_spacing", self.hole_spacing)?,
            hole_offset: required("hole_offset", self.hole_offset)?,
            plate_gap: required("plate_gap", self.plate_gap)?,
            axes: self.axes.unwrap_or_default(),
        };

        validate(&params)?;
        Ok(params)
    }
}

fn required<T>(name: &str, value: Option<T>) -> Result<T, AutoboltError> {
    value.ok_or_else(|| AutoboltError::InvalidParameter(format!("{name} was not provided")))
}

/// Rounding slack for sums and differences of lengths compared against a
/// dimension of size `scale`
fn length_tolerance(scale: f64) -> f64 {
    4.0 * f64::EPSILON * scale
}

fn validate(p: &AssemblyParameters) -> Result<(), AutoboltError> {
    let lengths = [
        ("plate_length", p.plate_length),
        ("plate_width", p.plate_width),
        ("plate_thickness", p.plate_thickness),
        ("hole_radius", p.hole_radius),
        ("edge_margin", p.edge_margin),
        ("hole_spacing", p.hole_spacing),
        ("hole_offset", p.hole_offset),
        ("plate_gap", p.plate_gap),
    ];
    for (name, value) in lengths {
        if !value.is_finite() || value <= 0.0 {
            return Err(AutoboltError::InvalidParameter(format!(
                "{name} must be a positive length, got {value}"
            )));
        }
    }

    let pattern_length = p.edge_margin + p.num_holes.saturating_sub(1) as f64 * p.hole_spacing;
    if pattern_length - p.plate_length > length_tolerance(p.plate_length) {
        return Err(AutoboltError::InvalidParameter(format!(
            "hole pattern needs {pattern_length} (edge_margin + (num_holes - 1) * hole_spacing) \
             but the plate is only {} long",
            p.plate_length
        )));
    }

    if p.hole_offset - p.hole_radius <= length_tolerance(p.plate_width) {
        return Err(AutoboltError::InvalidParameter(format!(
            "holes of radius {} at offset {} cross the bottom edge",
            p.hole_radius, p.hole_offset
        )));
    }
    if p.plate_width - p.hole_radius - p.hole_offset <= length_tolerance(p.plate_width) {
        return Err(AutoboltError::InvalidParameter(format!(
            "holes of radius {} at offset {} cross the top edge of a {} wide plate",
            p.hole_radius, p.hole_offset, p.plate_width
        )));
    }

    Ok(())
}
