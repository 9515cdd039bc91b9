use std::collections::BTreeSet;
use std::fmt::Display;

use nalgebra::{Matrix3, Vector3};

use crate::error::AutoboltError;

/// A Cartesian axis of the global frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index of the axis in an `[x, y, z]` triple
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Unit vector pointing along the axis
    pub fn unit(self) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        v[self.index()] = 1.0;
        v
    }
}

impl Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Axis {
    type Err = AutoboltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(AutoboltError::Input(format!("Unknown axis '{other}'"))),
        }
    }
}

/// Which end of an axis a boundary sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extreme {
    Minimum,
    Maximum,
}

impl Display for Extreme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Extreme::Minimum => write!(f, "minimum"),
            Extreme::Maximum => write!(f, "maximum"),
        }
    }
}

/// Names the role each global axis plays in the assembly.
///
/// * `length` carries the hole row
/// * `transverse` is the in-plane axis across the plates; loads are applied
///   along it and the second plate is mirrored across the plane normal to it
/// * `stacking` is the axis along which the plates are stacked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisConvention {
    pub length: Axis,
    pub transverse: Axis,
    pub stacking: Axis,
}

impl AxisConvention {
    /// Builds a convention, rejecting any axis used for more than one role
    pub fn new(length: Axis, transverse: Axis, stacking: Axis) -> Result<Self, AutoboltError> {
        if length == transverse || length == stacking || transverse == stacking {
            return Err(AutoboltError::InvalidParameter(format!(
                "Axis convention must use three distinct axes, got length={length}, \
                 transverse={transverse}, stacking={stacking}"
            )));
        }

        Ok(AxisConvention {
            length,
            transverse,
            stacking,
        })
    }

    /// Maps (length, transverse, stacking) components into global xyz
    pub fn to_global(
        &self,
        along_length: f64,
        along_transverse: f64,
        along_stacking: f64,
    ) -> Vector3<f64> {
        let mut v = Vector3::zeros();
        v[self.length.index()] = along_length;
        v[self.transverse.index()] = along_transverse;
        v[self.stacking.index()] = along_stacking;
        v
    }
}

impl Default for AxisConvention {
    fn default() -> Self {
        AxisConvention {
            length: Axis::X,
            transverse: Axis::Y,
            stacking: Axis::Z,
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Extents {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Extents {
        Extents { min, max }
    }

    /// An inverted box that any `include` call will overwrite
    pub fn empty() -> Extents {
        Extents {
            min: Vector3::repeat(f64::INFINITY),
            max: Vector3::repeat(f64::NEG_INFINITY),
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn include(&mut self, point: &Vector3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn union(&self, other: &Extents) -> Extents {
        Extents {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn min_along(&self, axis: Axis) -> f64 {
        self.min[axis.index()]
    }

    pub fn max_along(&self, axis: Axis) -> f64 {
        self.max[axis.index()]
    }

    pub fn span(&self, axis: Axis) -> f64 {
        self.max_along(axis) - self.min_along(axis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// Linear tetrahedron, indexes into `Mesh::nodes`
#[derive(Debug, Clone)]
pub struct Element {
    pub nodes: [usize; 4],
    pub volume_id: usize,
}

/// Linear boundary triangle on a tagged surface
#[derive(Debug, Clone)]
pub struct Face {
    pub nodes: [usize; 3],
    pub surface_id: usize,
}

/// Geometric summary of one tagged mesh surface
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDescriptor {
    pub id: usize,
    pub extents: Extents,
    /// false for interfaces shared by two bodies
    pub outward: bool,
}

/// Volumetric mesh with tagged boundary surfaces
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub nodes: Vec<Vertex>,
    pub elements: Vec<Element>,
    pub faces: Vec<Face>,
    pub surfaces: Vec<SurfaceDescriptor>,
}

impl Mesh {
    pub fn surface(&self, id: usize) -> Option<&SurfaceDescriptor> {
        self.surfaces.iter().find(|s| s.id == id)
    }

    /// Iterates the boundary triangles that belong to surface `id`
    pub fn faces_on(&self, id: usize) -> impl Iterator<Item = &Face> {
        self.faces.iter().filter(move |f| f.surface_id == id)
    }
}

/// Result of boundary classification: which surfaces are pinned and which
/// carry which traction
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryAssignment {
    pub fixed_surface_ids: BTreeSet<usize>,
    pub traction_surfaces: Vec<(usize, Vector3<f64>)>,
}

impl BoundaryAssignment {
    /// Checks that the fixed and traction sets are disjoint and that every
    /// referenced surface exists
    pub fn validate_against(&self, surfaces: &[SurfaceDescriptor]) -> Result<(), AutoboltError> {
        let known = |id: &usize| surfaces.iter().any(|s| s.id == *id);

        for id in self
            .fixed_surface_ids
            .iter()
            .chain(self.traction_surfaces.iter().map(|(id, _)| id))
        {
            if !known(id) {
                return Err(AutoboltError::InvalidAssignment(format!(
                    "surface {id} does not exist in the mesh"
                )));
            }
        }

        for (id, _) in &self.traction_surfaces {
            if self.fixed_surface_ids.contains(id) {
                return Err(AutoboltError::InvalidAssignment(format!(
                    "surface {id} is both fixed and traction-loaded"
                )));
            }
        }

        Ok(())
    }
}

/// Nodal displacements, indexed like `Mesh::nodes`
#[derive(Debug, Clone)]
pub struct DisplacementField {
    pub values: Vec<Vector3<f64>>,
}

/// Element stress tensors and their von Mises equivalents, indexed like
/// `Mesh::elements`
#[derive(Debug, Clone)]
pub struct StressField {
    pub tensors: Vec<Matrix3<f64>>,
    pub von_mises: Vec<f64>,
}

impl StressField {
    pub fn max_von_mises(&self) -> f64 {
        self.von_mises.iter().copied().fold(0.0, f64::max)
    }
}

/// Terminal artifact of an analysis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FosResult {
    pub max_von_mises_stress: f64,
    /// `f64::INFINITY` when the part carries no stress
    pub factor_of_safety: f64,
}

impl FosResult {
    pub fn is_unbounded(&self) -> bool {
        self.factor_of_safety.is_infinite()
    }
}
