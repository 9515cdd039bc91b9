use std::collections::HashMap;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use nalgebra::Vector3;

use crate::{
    datatypes::{Element, Extents, Face, Mesh, SurfaceDescriptor, Vertex},
    error::AutoboltError,
    geometry::{BodyKind, Solid},
};

/// Gmsh element type ids used by the parser
const GMSH_TRIANGLE: usize = 2;
const GMSH_TETRAHEDRON: usize = 4;

/// Turns an exported solid into a volumetric mesh with tagged surfaces
pub trait Mesher {
    /// # Arguments
    /// * `geometry` - The interchange file written by the exporter
    /// * `scratch` - A directory owned by the current analysis for
    ///     intermediate files
    fn mesh(&self, geometry: &Path, scratch: &Path) -> Result<Mesh, AutoboltError>;
}

#[derive(Debug, Clone)]
pub struct MeshSettings {
    pub characteristic_length_min: f64,
    pub characteristic_length_max: f64,
    /// Minimum number of elements across the thinnest plate, applied by
    /// [`MeshSettings::sized_for`]
    pub layers_through_thickness: usize,
    /// Fragment touching bodies so their interfaces share nodes
    pub conformal_interfaces: bool,
    pub gmsh_executable: String,
}

impl Default for MeshSettings {
    fn default() -> Self {
        MeshSettings {
            characteristic_length_min: 2.5e-3,
            characteristic_length_max: 1e-2,
            layers_through_thickness: 3,
            conformal_interfaces: true,
            gmsh_executable: std::env::var("GMSH_PATH").unwrap_or_else(|_| "gmsh".to_string()),
        }
    }
}

impl MeshSettings {
    /// Caps the element size so the thinnest plate of `solid` is spanned by
    /// at least `layers_through_thickness` elements
    pub fn sized_for(mut self, solid: &Solid) -> MeshSettings {
        let thinnest = solid
            .bodies
            .iter()
            .filter(|b| b.kind == BodyKind::Plate)
            .map(|b| b.extents().span(solid.axes.stacking))
            .fold(f64::INFINITY, f64::min);

        if thinnest.is_finite() && self.layers_through_thickness > 0 {
            let cap = thinnest / self.layers_through_thickness as f64;
            self.characteristic_length_max = self.characteristic_length_max.min(cap);
            self.characteristic_length_min = self
                .characteristic_length_min
                .min(self.characteristic_length_max);
            debug!(
                "plate thickness {:.3e} caps characteristic length at {:.3e}",
                thinnest, self.characteristic_length_max
            );
        }

        self
    }
}

/// Meshes geometry scripts by running the gmsh executable
#[derive(Debug, Clone, Default)]
pub struct GmshMesher {
    pub settings: MeshSettings,
}

impl GmshMesher {
    pub fn new(settings: MeshSettings) -> GmshMesher {
        GmshMesher { settings }
    }

    /// Builds the driver script that meshes `geometry` and saves to `mesh`
    fn build_driver(
        &self,
        geometry: &Path,
        mesh: &Path,
        output_file: &Path,
    ) -> Result<(), AutoboltError> {
        self.write_driver(geometry, mesh, output_file).map_err(|err| {
            AutoboltError::MeshGeneration(format!(
                "Unable to write gmsh driver {}: {err}",
                output_file.display()
            ))
        })
    }

    fn write_driver(
        &self,
        geometry: &Path,
        mesh: &Path,
        output_file: &Path,
    ) -> std::io::Result<()> {
        let file = std::fs::File::create(output_file)?;
        let mut driver = BufWriter::new(file);

        writeln!(driver, "// Mesh driver")?;
        writeln!(driver, "Include \"{}\";", geometry.display())?;
        writeln!(
            driver,
            "\n// Define Mesh Settings\n\
             Mesh.ElementOrder = 1;\n\
             Mesh.CharacteristicLengthMin = {cl_min};\n\
             Mesh.CharacteristicLengthMax = {cl_max};\n\
             Mesh.MshFileVersion = 4.1;\n\
             Mesh.Binary = 0;\n\
             Mesh.SaveAll = 1;",
            cl_min = self.settings.characteristic_length_min,
            cl_max = self.settings.characteristic_length_max,
        )?;
        if self.settings.conformal_interfaces {
            writeln!(driver, "Coherence;")?;
        }
        writeln!(driver, "Mesh 3;")?;
        writeln!(driver, "Coherence Mesh;")?;
        writeln!(driver, "Save \"{}\";", mesh.display())?;

        driver.flush()?;
        Ok(())
    }
}

impl Mesher for GmshMesher {
    fn mesh(&self, geometry: &Path, scratch: &Path) -> Result<Mesh, AutoboltError> {
        let driver_path = scratch.join("mesh_driver.geo");
        let mesh_path = scratch.join("mesh.msh");

        info!(
            "building gmsh driver with {:.3e} < CL < {:.3e}",
            self.settings.characteristic_length_min, self.settings.characteristic_length_max
        );
        self.build_driver(geometry, &mesh_path, &driver_path)?;

        info!("running {}...", self.settings.gmsh_executable);
        let output = std::process::Command::new(&self.settings.gmsh_executable)
            .arg(&driver_path)
            .arg("-parse_and_exit")
            .current_dir(scratch)
            .output()
            .map_err(|err| AutoboltError::MeshGeneration(format!("Gmsh failed to start: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let errors: Vec<&str> = stdout
            .lines()
            .chain(stderr.lines())
            .filter(|l| l.trim_start().starts_with("Error"))
            .collect();

        if !output.status.success() || !mesh_path.exists() {
            return Err(AutoboltError::MeshGeneration(format!(
                "Gmsh exited with {} and produced no mesh: {}",
                output.status,
                errors.join("; ")
            )));
        }
        for line in stdout.lines().filter(|l| l.trim_start().starts_with("Warning")) {
            warn!("[gmsh] {}", line.trim());
        }

        parse_mesh(&mesh_path)
    }
}

enum MeshParseState {
    Format,
    Entities,
    Nodes,
    Elements,
    Limbo,
}

/// Per-surface information read from the `$Entities` section
struct SurfaceEntity {
    extents: Extents,
    volume_refs: usize,
}

fn parse_numbers<T: FromStr>(line: &str) -> Result<Vec<T>, AutoboltError> {
    line.split_whitespace()
        .map(|token| {
            token.parse().map_err(|_| {
                AutoboltError::MeshGeneration(format!("Unexpected token '{token}' in mesh data"))
            })
        })
        .collect()
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>) -> Result<&'a str, AutoboltError> {
    lines
        .next()
        .ok_or_else(|| AutoboltError::MeshGeneration("Mesh file ended unexpectedly".to_owned()))
}

fn field<T: Copy>(values: &[T], index: usize, line: &str) -> Result<T, AutoboltError> {
    values.get(index).copied().ok_or_else(|| {
        AutoboltError::MeshGeneration(format!("Truncated record in mesh data: '{line}'"))
    })
}

/// Parses one entity record `tag minX minY minZ maxX maxY maxZ ...`
fn parse_entity_box(line: &str) -> Result<(usize, Extents, Vec<f64>), AutoboltError> {
    let values: Vec<f64> = parse_numbers(line)?;
    if values.len() < 8 {
        return Err(AutoboltError::MeshGeneration(format!(
            "Truncated entity record '{line}'"
        )));
    }
    let extents = Extents::new(
        Vector3::new(values[1], values[2], values[3]),
        Vector3::new(values[4], values[5], values[6]),
    );
    Ok((values[0] as usize, extents, values[7..].to_vec()))
}

fn parse_entities<'a>(
    header: &str,
    lines: &mut impl Iterator<Item = &'a str>,
) -> Result<HashMap<usize, SurfaceEntity>, AutoboltError> {
    let counts: Vec<usize> = parse_numbers(header)?;
    let num_points = field(&counts, 0, header)?;
    let num_curves = field(&counts, 1, header)?;
    let num_surfaces = field(&counts, 2, header)?;
    let num_volumes = field(&counts, 3, header)?;

    for _ in 0..(num_points + num_curves) {
        next_line(lines)?;
    }

    let mut surfaces: HashMap<usize, SurfaceEntity> = HashMap::with_capacity(num_surfaces);
    for _ in 0..num_surfaces {
        let (tag, extents, _) = parse_entity_box(next_line(lines)?)?;
        surfaces.insert(
            tag,
            SurfaceEntity {
                extents,
                volume_refs: 0,
            },
        );
    }

    // volume record tail: numPhysicalTags physicalTag... numBoundingSurfaces surfaceTag...
    for _ in 0..num_volumes {
        let line = next_line(lines)?;
        let (_, _, tail) = parse_entity_box(line)?;
        let num_physical = field(&tail, 0, line)? as usize;
        let num_bounding = field(&tail, 1 + num_physical, line)? as usize;
        for k in 0..num_bounding {
            let surface_tag = field(&tail, 2 + num_physical + k, line)?.abs() as usize;
            if let Some(surface) = surfaces.get_mut(&surface_tag) {
                surface.volume_refs += 1;
            }
        }
    }

    Ok(surfaces)
}

/// Parses MSH 4.1 ASCII contents into a [`Mesh`]
///
/// Tetrahedra become elements, triangles on surface entities become faces,
/// all other element types of lower dimension are skipped.
pub fn parse_msh(contents: &str) -> Result<Mesh, AutoboltError> {
    let mut parser_state = MeshParseState::Limbo;
    let mut lines = contents.lines().map(|l| l.trim()).filter(|l| !l.is_empty());

    let mut entity_surfaces: HashMap<usize, SurfaceEntity> = HashMap::new();
    let mut nodes: Vec<Vertex> = Vec::new();
    let mut node_indexes: HashMap<usize, usize> = HashMap::new();
    let mut raw_elements: Vec<(usize, [usize; 4])> = Vec::new();
    let mut raw_faces: Vec<(usize, [usize; 3])> = Vec::new();

    while let Some(line) = lines.next() {
        if line.starts_with("$End") {
            parser_state = MeshParseState::Limbo;
            continue;
        }

        match parser_state {
            MeshParseState::Limbo => {
                if line.starts_with("$MeshFormat") {
                    parser_state = MeshParseState::Format;
                } else if line.starts_with("$Entities") {
                    parser_state = MeshParseState::Entities;
                } else if line.starts_with("$Nodes") {
                    parser_state = MeshParseState::Nodes;
                } else if line.starts_with("$Elements") {
                    parser_state = MeshParseState::Elements;
                }
            }
            MeshParseState::Format => {
                let mut tokens = line.split_whitespace();
                let version = tokens.next().unwrap_or_default();
                let file_type = tokens.next().unwrap_or_default();
                if !version.starts_with('4') || file_type != "0" {
                    return Err(AutoboltError::MeshGeneration(format!(
                        "Unsupported mesh format '{line}', expected ASCII MSH 4.1"
                    )));
                }
            }
            MeshParseState::Entities => {
                entity_surfaces = parse_entities(line, &mut lines)?;
            }
            MeshParseState::Nodes => {
                let header: Vec<usize> = parse_numbers(line)?;
                let num_blocks = field(&header, 0, line)?;
                nodes.reserve(field(&header, 1, line)?);

                for _ in 0..num_blocks {
                    let block_line = next_line(&mut lines)?;
                    let block: Vec<usize> = parse_numbers(block_line)?;
                    let num_nodes_local = field(&block, 3, block_line)?;

                    let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
                    for _ in 0..num_nodes_local {
                        let tag_line = next_line(&mut lines)?;
                        node_tags.push(field(&parse_numbers::<usize>(tag_line)?, 0, tag_line)?);
                    }

                    for tag in node_tags {
                        let coord_line = next_line(&mut lines)?;
                        let coords: Vec<f64> = parse_numbers(coord_line)?;
                        node_indexes.insert(tag, nodes.len());
                        nodes.push(Vertex {
                            x: field(&coords, 0, coord_line)?,
                            y: field(&coords, 1, coord_line)?,
                            z: field(&coords, 2, coord_line)?,
                        });
                    }
                }
            }
            MeshParseState::Elements => {
                let header: Vec<usize> = parse_numbers(line)?;
                let num_blocks = field(&header, 0, line)?;

                for _ in 0..num_blocks {
                    let block_line = next_line(&mut lines)?;
                    let block: Vec<usize> = parse_numbers(block_line)?;
                    let entity_dim = field(&block, 0, block_line)?;
                    let entity_tag = field(&block, 1, block_line)?;
                    let element_type = field(&block, 2, block_line)?;
                    let num_elements = field(&block, 3, block_line)?;

                    let supported = matches!(
                        (entity_dim, element_type),
                        (3, GMSH_TETRAHEDRON) | (2, GMSH_TRIANGLE)
                    );
                    if !supported && entity_dim >= 2 {
                        return Err(AutoboltError::MeshGeneration(format!(
                            "Unsupported element type {element_type} \
                             on {entity_dim}D entity {entity_tag}"
                        )));
                    }

                    for _ in 0..num_elements {
                        let record_line = next_line(&mut lines)?;
                        if !supported {
                            continue;
                        }
                        let record: Vec<usize> = parse_numbers(record_line)?;

                        if element_type == GMSH_TETRAHEDRON {
                            raw_elements.push((
                                entity_tag,
                                [
                                    field(&record, 1, record_line)?,
                                    field(&record, 2, record_line)?,
                                    field(&record, 3, record_line)?,
                                    field(&record, 4, record_line)?,
                                ],
                            ));
                        } else {
                            raw_faces.push((
                                entity_tag,
                                [
                                    field(&record, 1, record_line)?,
                                    field(&record, 2, record_line)?,
                                    field(&record, 3, record_line)?,
                                ],
                            ));
                        }
                    }
                }
            }
        }
    }

    let resolve = |tag: usize| -> Result<usize, AutoboltError> {
        node_indexes.get(&tag).copied().ok_or_else(|| {
            AutoboltError::MeshGeneration(format!("Element references unknown node {tag}"))
        })
    };

    let mut elements: Vec<Element> = Vec::with_capacity(raw_elements.len());
    for (volume_id, tags) in raw_elements {
        elements.push(Element {
            nodes: [resolve(tags[0])?, resolve(tags[1])?, resolve(tags[2])?, resolve(tags[3])?],
            volume_id,
        });
    }

    let mut faces: Vec<Face> = Vec::with_capacity(raw_faces.len());
    for (surface_id, tags) in raw_faces {
        faces.push(Face {
            nodes: [resolve(tags[0])?, resolve(tags[1])?, resolve(tags[2])?],
            surface_id,
        });
    }

    if elements.is_empty() {
        return Err(AutoboltError::MeshGeneration(
            "Mesh contains no tetrahedral elements".to_owned(),
        ));
    }

    let surfaces = describe_surfaces(&nodes, &faces, &entity_surfaces);

    info!(
        "loaded {} nodes, {} elements and {} surfaces",
        nodes.len(),
        elements.len(),
        surfaces.len()
    );

    Ok(Mesh {
        nodes,
        elements,
        faces,
        surfaces,
    })
}

/// Derives surface extents from the nodes of each surface's triangles,
/// falling back to the entity bounding box for surfaces without triangles
fn describe_surfaces(
    nodes: &[Vertex],
    faces: &[Face],
    entities: &HashMap<usize, SurfaceEntity>,
) -> Vec<SurfaceDescriptor> {
    let mut extents: HashMap<usize, Extents> = HashMap::new();
    for face in faces {
        let e = extents.entry(face.surface_id).or_insert_with(Extents::empty);
        for n in face.nodes {
            e.include(&nodes[n].to_vector());
        }
    }

    let mut ids: Vec<usize> = extents.keys().chain(entities.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    ids.into_iter()
        .map(|id| {
            let entity = entities.get(&id);
            let extents = extents
                .get(&id)
                .copied()
                .or_else(|| entity.map(|e| e.extents))
                .unwrap_or_else(Extents::empty);
            SurfaceDescriptor {
                id,
                extents,
                outward: entity.map_or(true, |e| e.volume_refs <= 1),
            }
        })
        .collect()
}

/// Reads and parses a .msh file
///
/// # Arguments
/// * `mesh_file` - The path to the mesh file
pub fn parse_mesh(mesh_file: &Path) -> Result<Mesh, AutoboltError> {
    let contents = std::fs::read_to_string(mesh_file).map_err(|err| {
        AutoboltError::MeshGeneration(format!(
            "Unable to open generated mesh file {}: {err}",
            mesh_file.display()
        ))
    })?;

    parse_msh(&contents)
}

/// Structured tetrahedral mesh of an axis-aligned block.
///
/// Each hexahedral cell is split into six tetrahedra around its main
/// diagonal, which keeps neighbouring cells conforming. The six faces are
/// tagged 1..=6 in the order x-min, x-max, y-min, y-max, z-min, z-max. The
/// geometry file handed to [`Mesher::mesh`] is ignored, so the block stands
/// in for a real mesher wherever a known mesh is wanted.
#[derive(Debug, Clone)]
pub struct BlockMesher {
    pub extents: Extents,
    pub divisions: [usize; 3],
}

impl BlockMesher {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>, divisions: [usize; 3]) -> BlockMesher {
        BlockMesher {
            extents: Extents::new(min, max),
            divisions,
        }
    }

    pub fn build_mesh(&self) -> Result<Mesh, AutoboltError> {
        let [nx, ny, nz] = self.divisions;
        if nx == 0 || ny == 0 || nz == 0 || self.extents.is_empty() {
            return Err(AutoboltError::MeshGeneration(format!(
                "Degenerate block {:?} with divisions {:?}",
                self.extents, self.divisions
            )));
        }

        let min = self.extents.min;
        let divisions = Vector3::new(nx as f64, ny as f64, nz as f64);
        let step = (self.extents.max - min).component_div(&divisions);
        let index = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);

        let mut nodes = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    nodes.push(Vertex {
                        x: min.x + i as f64 * step.x,
                        y: min.y + j as f64 * step.y,
                        z: min.z + k as f64 * step.z,
                    });
                }
            }
        }

        const PERMUTATIONS: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        let mut elements = Vec::with_capacity(6 * nx * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    for perm in PERMUTATIONS {
                        let mut corner = [i, j, k];
                        let mut tet = [index(i, j, k); 4];
                        for (slot, axis) in perm.iter().enumerate() {
                            corner[*axis] += 1;
                            tet[slot + 1] = index(corner[0], corner[1], corner[2]);
                        }
                        elements.push(Element {
                            nodes: tet,
                            volume_id: 1,
                        });
                    }
                }
            }
        }

        let mut faces = Vec::new();
        let mut quad = |surface_id: usize, a: usize, b: usize, c: usize, d: usize| {
            faces.push(Face {
                nodes: [a, b, c],
                surface_id,
            });
            faces.push(Face {
                nodes: [a, c, d],
                surface_id,
            });
        };
        for k in 0..nz {
            for j in 0..ny {
                let (j1, k1) = (j + 1, k + 1);
                quad(1, index(0, j, k), index(0, j1, k), index(0, j1, k1), index(0, j, k1));
                quad(2, index(nx, j, k), index(nx, j1, k), index(nx, j1, k1), index(nx, j, k1));
            }
        }
        for k in 0..nz {
            for i in 0..nx {
                let (i1, k1) = (i + 1, k + 1);
                quad(3, index(i, 0, k), index(i1, 0, k), index(i1, 0, k1), index(i, 0, k1));
                quad(4, index(i, ny, k), index(i1, ny, k), index(i1, ny, k1), index(i, ny, k1));
            }
        }
        for j in 0..ny {
            for i in 0..nx {
                let (i1, j1) = (i + 1, j + 1);
                quad(5, index(i, j, 0), index(i1, j, 0), index(i1, j1, 0), index(i, j1, 0));
                quad(6, index(i, j, nz), index(i1, j, nz), index(i1, j1, nz), index(i, j1, nz));
            }
        }

        let surfaces = describe_surfaces(&nodes, &faces, &HashMap::new());

        debug!(
            "block mesh with {} nodes and {} elements",
            nodes.len(),
            elements.len()
        );

        Ok(Mesh {
            nodes,
            elements,
            faces,
            surfaces,
        })
    }
}

impl Mesher for BlockMesher {
    fn mesh(&self, geometry: &Path, _scratch: &Path) -> Result<Mesh, AutoboltError> {
        debug!("block mesher ignoring geometry {}", geometry.display());
        self.build_mesh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        datatypes::Axis,
        geometry::build_assembly,
        parameters::{AssemblyParameters, LengthUnit},
    };
    use approx::assert_relative_eq;

    // Two tetrahedra sharing the face (2, 3, 4); surface 1 is the base
    // triangle of the first, surface 2 bounds both volumes.
    const SAMPLE_MSH: &str = "$MeshFormat
4.1 0 8
$EndMeshFormat
$Entities
0 0 2 2
1 0 0 0 1 1 0 0 0
2 0 0 0 1 1 1 0 0
1 0 0 0 1 1 1 0 2 1 2
2 0 0 0 1 1 1 0 1 -2
$EndEntities
$Nodes
2 5 1 5
3 1 0 4
1
2
3
4
0 0 0
1 0 0
0 1 0
0 0 1
3 2 0 1
5
1 1 1
$EndNodes
$Elements
3 3 1 3
2 1 2 1
1 1 2 3
3 1 4 1
2 1 2 3 4
3 2 4 1
3 5 2 3 4
$EndElements
";

    #[test]
    fn parses_nodes_elements_and_faces() {
        let mesh = parse_msh(SAMPLE_MSH).unwrap();

        assert_eq!(mesh.nodes.len(), 5);
        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.faces.len(), 1);
        assert_eq!(mesh.elements[1].nodes, [4, 1, 2, 3]);
        assert_eq!(mesh.elements[1].volume_id, 2);
        assert_relative_eq!(mesh.nodes[4].z, 1.0);
    }

    #[test]
    fn surfaces_carry_extents_and_orientation() {
        let mesh = parse_msh(SAMPLE_MSH).unwrap();

        let base = mesh.surface(1).unwrap();
        assert!(base.outward);
        assert_relative_eq!(base.extents.span(Axis::Z), 0.0);
        assert_relative_eq!(base.extents.max_along(Axis::X), 1.0);

        // referenced by both volumes, so interior
        let shared = mesh.surface(2).unwrap();
        assert!(!shared.outward);
        assert_relative_eq!(shared.extents.max_along(Axis::Z), 1.0);
    }

    #[test]
    fn rejects_binary_or_old_formats() {
        let old = SAMPLE_MSH.replace("4.1 0 8", "2.2 0 8");
        assert!(matches!(parse_msh(&old), Err(AutoboltError::MeshGeneration(_))));

        let binary = SAMPLE_MSH.replace("4.1 0 8", "4.1 1 8");
        assert!(matches!(parse_msh(&binary), Err(AutoboltError::MeshGeneration(_))));
    }

    #[test]
    fn rejects_second_order_elements() {
        let quadratic = SAMPLE_MSH.replace("3 1 4 1\n", "3 1 11 1\n");
        assert!(matches!(parse_msh(&quadratic), Err(AutoboltError::MeshGeneration(_))));
    }

    #[test]
    fn rejects_unknown_node_reference() {
        let broken = SAMPLE_MSH.replace("3 5 2 3 4", "3 9 2 3 4");
        assert!(matches!(parse_msh(&broken), Err(AutoboltError::MeshGeneration(_))));
    }

    #[test]
    fn truncated_file_is_an_error() {
        let cut = &SAMPLE_MSH[..SAMPLE_MSH.find("$Elements").unwrap() + 20];
        assert!(parse_msh(cut).is_err());
    }

    #[test]
    fn block_mesh_counts_and_volume() {
        let mesher = BlockMesher::new(Vector3::zeros(), Vector3::new(2.0, 1.0, 0.5), [4, 2, 1]);
        let mesh = mesher.build_mesh().unwrap();

        assert_eq!(mesh.nodes.len(), 5 * 3 * 2);
        assert_eq!(mesh.elements.len(), 6 * 8);
        assert_eq!(mesh.surfaces.len(), 6);

        let volume: f64 = mesh
            .elements
            .iter()
            .map(|e| {
                let p: Vec<Vector3<f64>> =
                    e.nodes.iter().map(|n| mesh.nodes[*n].to_vector()).collect();
                (p[1] - p[0]).cross(&(p[2] - p[0])).dot(&(p[3] - p[0])).abs() / 6.0
            })
            .sum();
        assert_relative_eq!(volume, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn block_faces_are_flat_and_tagged() {
        let mesher = BlockMesher::new(Vector3::zeros(), Vector3::new(1.0, 2.0, 3.0), [2, 2, 2]);
        let mesh = mesher.build_mesh().unwrap();

        let y_min = mesh.surface(3).unwrap();
        let y_max = mesh.surface(4).unwrap();
        assert_relative_eq!(y_min.extents.span(Axis::Y), 0.0);
        assert_relative_eq!(y_max.extents.min_along(Axis::Y), 2.0);
        assert_relative_eq!(y_max.extents.span(Axis::Z), 3.0);
        assert_eq!(mesh.faces_on(4).count(), 8);
    }

    #[test]
    fn driver_script_includes_geometry_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mesher = GmshMesher::new(MeshSettings {
            characteristic_length_min: 1e-3,
            characteristic_length_max: 4e-3,
            layers_through_thickness: 3,
            conformal_interfaces: true,
            gmsh_executable: "gmsh".to_string(),
        });
        let driver = dir.path().join("driver.geo");
        mesher
            .build_driver(Path::new("/tmp/model.geo"), Path::new("/tmp/mesh.msh"), &driver)
            .unwrap();

        let script = std::fs::read_to_string(driver).unwrap();
        assert!(script.contains("Include \"/tmp/model.geo\";"));
        assert!(script.contains("Mesh.CharacteristicLengthMax = 0.004;"));
        assert!(script.contains("Coherence;"));
        assert!(script.contains("Mesh 3;"));
        assert!(script.contains("Save \"/tmp/mesh.msh\";"));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn driver_write_failure_is_a_mesh_error() {
        let err = GmshMesher::default()
            .build_driver(
                Path::new("/tmp/model.geo"),
                Path::new("/tmp/mesh.msh"),
                Path::new("/dev/full"),
            )
            .unwrap_err();
        assert!(matches!(err, AutoboltError::MeshGeneration(msg) if msg.contains("driver")));
    }

    #[test]
    fn element_size_follows_plate_thickness() {
        let params = AssemblyParameters::builder()
            .plate_length(0.2)
            .plate_width(0.1)
            .plate_thickness(0.01)
            .num_holes(4)
            .hole_radius(0.01)
            .edge_margin(0.05387)
            .hole_spacing(0.035)
            .hole_offset(0.02)
            .plate_gap(0.01, LengthUnit::Millimeters)
            .build()
            .unwrap();
        let solid = build_assembly(&params).unwrap();

        let sized = MeshSettings::default().sized_for(&solid);
        assert_relative_eq!(sized.characteristic_length_max, 0.01 / 3.0, epsilon = 1e-15);
        assert!(sized.characteristic_length_min <= sized.characteristic_length_max);

        let coarse = MeshSettings {
            characteristic_length_min: 5e-3,
            ..MeshSettings::default()
        }
        .sized_for(&solid);
        assert_relative_eq!(coarse.characteristic_length_min, 0.01 / 3.0, epsilon = 1e-15);

        let unlimited = MeshSettings {
            layers_through_thickness: 0,
            ..MeshSettings::default()
        }
        .sized_for(&solid);
        assert_eq!(unlimited.characteristic_length_max, 1e-2);
    }

    #[test]
    fn missing_gmsh_is_a_mesh_error() {
        let dir = tempfile::tempdir().unwrap();
        let mesher = GmshMesher::new(MeshSettings {
            gmsh_executable: "definitely-not-gmsh-7f3a".to_string(),
            ..MeshSettings::default()
        });

        let err = mesher.mesh(&dir.path().join("model.geo"), dir.path()).unwrap_err();
        assert!(matches!(err, AutoboltError::MeshGeneration(_)));
    }
}
