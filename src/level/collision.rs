//! Collision sections.
//!
//! ```text
//! CollisionSection   6 × f32 bounds, u32 count, geometries
//! CollisionGeometry  u32 layer_mask,
//!                    u16 n, n × 4 f32 vertices (xyz + w),
//!                    u16 n, n × 2 u16 edges,
//!                    u16 n, n × {3 u16 vertices, 3 u16 edges, 4 f32 plane},
//!                    BSP tree
//! ```

use std::collections::HashMap;

use binrw::binrw;

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::level::bsp::{BspHeuristic, BspTree};
use crate::math::{face_plane, Aabb};

pub const DEFAULT_LAYER_MASK: u32 = 0x3E00;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
#[brw(little)]
pub struct CollisionTriangle {
    pub vertices: [u16; 3],
    pub edges: [u16; 3],
    /// Unit normal and `-normal · centre`
    pub plane: [f32; 4],
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollisionGeometry {
    pub layer_mask: u32,
    pub vertices: Vec<[f32; 4]>,
    pub edges: Vec<[u16; 2]>,
    pub triangles: Vec<CollisionTriangle>,
    pub bsp: BspTree,
}

impl Default for CollisionGeometry {
    fn default() -> Self {
        CollisionGeometry {
            layer_mask: DEFAULT_LAYER_MASK,
            vertices: Vec::new(),
            edges: Vec::new(),
            triangles: Vec::new(),
            bsp: BspTree::default(),
        }
    }
}

impl CollisionGeometry {
    pub fn decode(reader: &mut ByteReader) -> Result<Self> {
        let layer_mask = reader.u32()?;
        let vertex_count = reader.u16()? as usize;
        let vertices = (0..vertex_count).map(|_| reader.vec4()).collect::<Result<Vec<_>>>()?;
        let edge_count = reader.u16()? as usize;
        let edges = (0..edge_count)
            .map(|_| Ok([reader.u16()?, reader.u16()?]))
            .collect::<Result<Vec<_>>>()?;
        let triangle_count = reader.u16()? as usize;
        let triangles = (0..triangle_count)
            .map(|_| reader.record::<CollisionTriangle>())
            .collect::<Result<Vec<_>>>()?;
        let bsp = BspTree::decode(reader)?;
        Ok(CollisionGeometry {
            layer_mask,
            vertices,
            edges,
            triangles,
            bsp,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        w.u32(self.layer_mask);
        w.count_u16(self.vertices.len(), "collision vertices")?;
        self.vertices.iter().for_each(|v| w.vec4(*v));
        w.count_u16(self.edges.len(), "collision edges")?;
        for edge in &self.edges {
            w.u16(edge[0]);
            w.u16(edge[1]);
        }
        w.count_u16(self.triangles.len(), "collision triangles")?;
        for triangle in &self.triangles {
            w.record(triangle)?;
        }
        self.bsp.encode(w);
        Ok(())
    }

    /// Derive edges, planes and a fresh BSP tree for one triangle group.
    pub fn from_triangles(
        layer_mask: u32,
        positions: &[[f32; 3]],
        faces: &[[u32; 3]],
        heuristic: BspHeuristic,
    ) -> Result<Self> {
        if positions.len() > u16::MAX as usize || faces.len() > u16::MAX as usize {
            return Err(AssetError::InvalidInput(format!(
                "collision group of {} vertices / {} triangles exceeds the 16-bit index range",
                positions.len(),
                faces.len()
            )));
        }
        let mut edges: Vec<[u16; 2]> = Vec::new();
        let mut edge_index: HashMap<(u16, u16), u16> = HashMap::new();
        let mut edge_of = |a: u16, b: u16| -> Result<u16> {
            let key = (a.min(b), a.max(b));
            if let Some(&i) = edge_index.get(&key) {
                return Ok(i);
            }
            let i = u16::try_from(edges.len()).map_err(|_| {
                AssetError::InvalidInput("collision group has more than 65535 edges".to_string())
            })?;
            edges.push([key.0, key.1]);
            edge_index.insert(key, i);
            Ok(i)
        };

        let mut triangles = Vec::with_capacity(faces.len());
        let mut corners = Vec::with_capacity(faces.len());
        for face in faces {
            if face.iter().any(|&i| i as usize >= positions.len()) {
                return Err(AssetError::InvalidInput(format!(
                    "collision face {:?} indexes past {} vertices",
                    face,
                    positions.len()
                )));
            }
            let [a, b, c] = face.map(|i| i as u16);
            let tri = face.map(|i| positions[i as usize]);
            triangles.push(CollisionTriangle {
                vertices: [a, b, c],
                edges: [edge_of(a, b)?, edge_of(b, c)?, edge_of(c, a)?],
                plane: face_plane(&tri),
            });
            corners.push(tri);
        }

        Ok(CollisionGeometry {
            layer_mask,
            vertices: positions.iter().map(|p| [p[0], p[1], p[2], 1.0]).collect(),
            edges,
            triangles,
            bsp: BspTree::build(&corners, heuristic),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionSection {
    /// Local-space bounds, min xyz then max xyz
    pub bounds: [f32; 6],
    pub geometries: Vec<CollisionGeometry>,
}

impl CollisionSection {
    pub fn decode(reader: &mut ByteReader) -> Result<Self> {
        let mut bounds = [0.0f32; 6];
        for b in bounds.iter_mut() {
            *b = reader.f32()?;
        }
        let count = reader.u32()? as usize;
        let geometries = (0..count)
            .map(|_| CollisionGeometry::decode(reader))
            .collect::<Result<Vec<_>>>()?;
        Ok(CollisionSection { bounds, geometries })
    }

    pub fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        self.bounds.iter().for_each(|&b| w.f32(b));
        w.u32(self.geometries.len() as u32);
        self.geometries.iter().try_for_each(|g| g.encode(w))
    }

    /// All geometries merged; each geometry becomes one group.
    pub fn mesh(&self) -> CollisionMesh {
        let mut mesh = CollisionMesh::default();
        for (group, geometry) in self.geometries.iter().enumerate() {
            let base = mesh.positions.len() as u32;
            mesh.positions
                .extend(geometry.vertices.iter().map(|v| [v[0], v[1], v[2]]));
            let mut members = Vec::with_capacity(geometry.triangles.len() * 3);
            for tri in &geometry.triangles {
                let indices = tri.vertices.map(|i| i as u32 + base);
                members.extend_from_slice(&indices);
                mesh.faces.push(CollisionFace {
                    indices,
                    normal: [tri.plane[0], tri.plane[1], tri.plane[2]],
                    group: group as u32,
                });
            }
            mesh.vertex_groups.push(members);
            mesh.layer_masks.push(geometry.layer_mask);
        }
        mesh
    }

    /// One geometry per group of `mesh`, with vertices renumbered per group.
    pub fn from_mesh(mesh: &CollisionMesh, heuristic: BspHeuristic) -> Result<Self> {
        let mut geometries = Vec::with_capacity(mesh.layer_masks.len());
        for (group, &layer_mask) in mesh.layer_masks.iter().enumerate() {
            let mut remap: HashMap<u32, u32> = HashMap::new();
            let mut positions = Vec::new();
            let mut faces = Vec::new();
            for face in mesh.faces.iter().filter(|f| f.group as usize == group) {
                let mut local = [0u32; 3];
                for (slot, &index) in local.iter_mut().zip(&face.indices) {
                    let position = *mesh.positions.get(index as usize).ok_or_else(|| {
                        AssetError::InvalidInput(format!(
                            "collision face index {} past {} vertices",
                            index,
                            mesh.positions.len()
                        ))
                    })?;
                    *slot = *remap.entry(index).or_insert_with(|| {
                        positions.push(position);
                        positions.len() as u32 - 1
                    });
                }
                faces.push(local);
            }
            geometries.push(CollisionGeometry::from_triangles(
                layer_mask, &positions, &faces, heuristic,
            )?);
        }
        let bounds = Aabb::from_points(&mesh.positions).unwrap_or_default();
        Ok(CollisionSection {
            bounds: bounds.to_floats(),
            geometries,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionFace {
    pub indices: [u32; 3],
    pub normal: [f32; 3],
    pub group: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CollisionMesh {
    pub positions: Vec<[f32; 3]>,
    pub faces: Vec<CollisionFace>,
    /// Rebased triangle corner indices of each geometry
    pub vertex_groups: Vec<Vec<u32>>,
    /// Layer mask of each group
    pub layer_masks: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> (Vec<[f32; 3]>, Vec<[u32; 3]>) {
        (
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 1.0]],
            vec![[0, 2, 1], [1, 2, 3]],
        )
    }

    #[test]
    fn shared_edges_are_deduplicated() {
        let (positions, faces) = quad();
        let geometry =
            CollisionGeometry::from_triangles(0x100, &positions, &faces, BspHeuristic::MedianX).unwrap();
        assert_eq!(geometry.edges.len(), 5);
        // edge 1-2 shared by both triangles
        assert_eq!(geometry.triangles[0].edges[1], geometry.triangles[1].edges[0]);
        assert_eq!(geometry.vertices[3], [1.0, 0.0, 1.0, 1.0]);
        let normal = &geometry.triangles[0].plane;
        assert!((normal[1].abs() - 1.0).abs() < 1e-6);

        let mut seen = geometry.bsp.triangle_indices();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn section_survives_encode_and_mesh_regroups() {
        let (positions, faces) = quad();
        let section = CollisionSection {
            bounds: [0.0, 0.0, 0.0, 1.0, 0.0, 1.0],
            geometries: vec![
                CollisionGeometry::from_triangles(0x3E00, &positions, &faces[..1], BspHeuristic::MedianX)
                    .unwrap(),
                CollisionGeometry::from_triangles(0x0200, &positions, &faces[1..], BspHeuristic::MedianX)
                    .unwrap(),
            ],
        };
        let mut w = ByteWriter::new();
        section.encode(&mut w).unwrap();
        let bytes = w.into_inner();
        let decoded = CollisionSection::decode(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded, section);

        let mesh = decoded.mesh();
        assert_eq!(mesh.layer_masks, vec![0x3E00, 0x0200]);
        assert_eq!(mesh.faces[1].indices, [5, 6, 7]);
        assert_eq!(mesh.vertex_groups[1], vec![5, 6, 7]);

        let rebuilt = CollisionSection::from_mesh(&mesh, BspHeuristic::MedianX).unwrap();
        assert_eq!(rebuilt.geometries.len(), 2);
        assert_eq!(rebuilt.geometries[1].vertices.len(), 3);
        assert_eq!(rebuilt.geometries[1].triangles[0].vertices, [0, 1, 2]);
        assert_eq!(rebuilt.bounds, section.bounds);
    }

    #[test]
    fn oversized_vertex_count_is_an_error() {
        let geometry = CollisionGeometry {
            vertices: vec![[0.0; 4]; 0x1_0000],
            ..Default::default()
        };
        let mut w = ByteWriter::new();
        assert!(matches!(geometry.encode(&mut w), Err(AssetError::InvalidInput(_))));
    }
}
