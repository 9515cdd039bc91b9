//! Factor of safety analysis of a two-plate bolted assembly.
//!
//! A parametric solid is exported to gmsh, meshed with linear tetrahedra,
//! fixed and loaded on its extreme transverse faces, solved for linear
//! elastic displacement and reduced to the ratio of yield strength to peak
//! von Mises stress.

pub mod classifier;
pub mod datatypes;
pub mod error;
pub mod formulator;
pub mod geometry;
pub mod input;
pub mod material;
pub mod mesher;
pub mod parameters;
pub mod pipeline;
pub mod post_processor;
pub mod solver;

pub use error::AutoboltError;
pub use pipeline::{build_assembly, calculate_fos, compute_fos, Analysis, TractionSpec};
