//! Render sections: strip-encoded geometry grouped by material.
//!
//! ```text
//! RenderSection  u32 color_maps, 6 × f32 bounds, u32 submesh_count, submeshes
//! Submesh        u16 material, u16 lod_marker, [8 × f32 if lod_marker != 0],
//!                u32 entry_count, entries
//! GeomEntry      u32 n, n × {3 × f32 position, u32 flags},
//!                [n × 3 × f32 normals if the material has normals],
//!                properties × color_maps × n × 4 u8 colours,
//!                uv_maps × n × 2 × f32 uvs
//! ```
//!
//! There is no index buffer. Vertex `i >= 2` closes the triangle
//! `(i-2, i-1, i)` (even `i`) or `(i-1, i-2, i)` (odd `i`) unless bit 15 of
//! its flag word is set.

use std::collections::BTreeMap;

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::level::materials::{Material, MaterialList};
use crate::math::Aabb;
use crate::stripper::{self, StripifierConfig};

/// Flag bit: this vertex does not close a triangle.
pub const SKIP_FLAG: u32 = 0x8000;

/// Vertex ceiling of one geometry entry (hardware vertex buffer size).
pub const MAX_ENTRY_VERTICES: usize = 64;

pub const DEFAULT_NORMAL: [f32; 3] = [0.0, 1.0, 0.0];

/// Colour used where an entry stores no colour data (0x80 is full intensity).
pub const NEUTRAL_COLOR: [u8; 4] = [0x80; 4];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeomEntry {
    pub positions: Vec<[f32; 3]>,
    pub flags: Vec<u32>,
    pub normals: Option<Vec<[f32; 3]>>,
    /// `[property][channel][vertex]`
    pub colors: Vec<Vec<Vec<[u8; 4]>>>,
    /// `[uv map][vertex]`
    pub uvs: Vec<Vec<[f32; 2]>>,
}

impl GeomEntry {
    pub fn decode(reader: &mut ByteReader, material: &Material, color_maps: usize) -> Result<Self> {
        let count = reader.u32()? as usize;
        if count * 16 > reader.remaining() {
            return Err(AssetError::corrupt(
                reader.position() - 4,
                format!("geometry entry claims {} vertices", count),
            ));
        }
        let mut entry = GeomEntry {
            positions: Vec::with_capacity(count),
            flags: Vec::with_capacity(count),
            ..Default::default()
        };
        for _ in 0..count {
            entry.positions.push(reader.vec3()?);
            entry.flags.push(reader.u32()?);
        }
        if material.has_normals() {
            let normals = (0..count).map(|_| reader.vec3()).collect::<Result<Vec<_>>>()?;
            entry.normals = Some(normals);
        }
        for _ in 0..material.properties.len() {
            let mut channels = Vec::with_capacity(color_maps);
            for _ in 0..color_maps {
                let mut colors = Vec::with_capacity(count);
                for _ in 0..count {
                    let raw = reader.bytes(4)?;
                    colors.push([raw[0], raw[1], raw[2], raw[3]]);
                }
                channels.push(colors);
            }
            entry.colors.push(channels);
        }
        for _ in 0..material.uv_maps {
            let mut uvs = Vec::with_capacity(count);
            for _ in 0..count {
                uvs.push([reader.f32()?, reader.f32()?]);
            }
            entry.uvs.push(uvs);
        }
        Ok(entry)
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.positions.len() as u32);
        for (position, &flags) in self.positions.iter().zip(&self.flags) {
            w.vec3(*position);
            w.u32(flags);
        }
        if let Some(normals) = &self.normals {
            normals.iter().for_each(|n| w.vec3(*n));
        }
        for channels in &self.colors {
            for colors in channels {
                colors.iter().for_each(|c| w.bytes(c));
            }
        }
        for uvs in &self.uvs {
            for uv in uvs {
                w.f32(uv[0]);
                w.f32(uv[1]);
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangles(&self) -> Vec<[u32; 3]> {
        strip_triangles(&self.flags)
    }
}

/// Triangles implied by a run of flag words, in entry-local indices.
pub fn strip_triangles(flags: &[u32]) -> Vec<[u32; 3]> {
    let identity: Vec<u32> = (0..flags.len() as u32).collect();
    (2..flags.len())
        .filter(|&i| flags[i] & SKIP_FLAG == 0)
        .map(|i| stripper::strip_triangle(&identity, i))
        .collect()
}

/// Geometry drawn with one material.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderSubmesh {
    pub material_index: u16,
    /// Non-zero when eight extra LOD floats follow
    pub lod_marker: u16,
    pub lod_params: [f32; 8],
    pub entries: Vec<GeomEntry>,
}

impl RenderSubmesh {
    pub fn decode(reader: &mut ByteReader, materials: &MaterialList, color_maps: usize) -> Result<Self> {
        let at = reader.position();
        let material_index = reader.u16()?;
        let material = materials.get(material_index as usize).ok_or_else(|| {
            AssetError::corrupt(
                at,
                format!("submesh material {} of {}", material_index, materials.len()),
            )
        })?;
        let lod_marker = reader.u16()?;
        let mut lod_params = [0.0f32; 8];
        if lod_marker != 0 {
            for p in lod_params.iter_mut() {
                *p = reader.f32()?;
            }
        }
        let count = reader.u32()? as usize;
        let entries = (0..count)
            .map(|_| GeomEntry::decode(reader, material, color_maps))
            .collect::<Result<Vec<_>>>()?;
        Ok(RenderSubmesh {
            material_index,
            lod_marker,
            lod_params,
            entries,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.u16(self.material_index);
        w.u16(self.lod_marker);
        if self.lod_marker != 0 {
            self.lod_params.iter().for_each(|&p| w.f32(p));
        }
        w.u32(self.entries.len() as u32);
        self.entries.iter().for_each(|e| e.encode(w));
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderSection {
    pub color_maps: u32,
    /// Local-space bounds, min xyz then max xyz
    pub bounds: [f32; 6],
    pub submeshes: Vec<RenderSubmesh>,
}

impl RenderSection {
    pub fn decode(reader: &mut ByteReader, materials: &MaterialList) -> Result<Self> {
        let color_maps = reader.u32()?;
        let mut bounds = [0.0f32; 6];
        for b in bounds.iter_mut() {
            *b = reader.f32()?;
        }
        let count = reader.u32()? as usize;
        let submeshes = (0..count)
            .map(|_| RenderSubmesh::decode(reader, materials, color_maps as usize))
            .collect::<Result<Vec<_>>>()?;
        Ok(RenderSection {
            color_maps,
            bounds,
            submeshes,
        })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.color_maps);
        self.bounds.iter().for_each(|&b| w.f32(b));
        w.u32(self.submeshes.len() as u32);
        self.submeshes.iter().for_each(|s| s.encode(w));
    }

    /// Flatten every entry into one indexed mesh. Each geometry entry becomes
    /// one vertex group, and its faces carry that group's index.
    pub fn mesh(&self) -> RenderMesh {
        let channels = self.color_maps as usize;
        let mut mesh = RenderMesh {
            colors: vec![Vec::new(); channels],
            ..Default::default()
        };
        for submesh in &self.submeshes {
            for entry in &submesh.entries {
                let base = mesh.positions.len() as u32;
                let group = mesh.vertex_groups.len() as u32;
                let n = entry.vertex_count();

                mesh.positions.extend_from_slice(&entry.positions);
                match &entry.normals {
                    Some(normals) => mesh.normals.extend_from_slice(normals),
                    None => mesh.normals.extend(std::iter::repeat(DEFAULT_NORMAL).take(n)),
                }
                while mesh.uvs.len() < entry.uvs.len() {
                    mesh.uvs.push(vec![[0.0; 2]; base as usize]);
                }
                for (layer, uvs) in mesh.uvs.iter_mut().enumerate() {
                    match entry.uvs.get(layer) {
                        Some(entry_uvs) => uvs.extend_from_slice(entry_uvs),
                        None => uvs.extend(std::iter::repeat([0.0; 2]).take(n)),
                    }
                }
                for (channel, colors) in mesh.colors.iter_mut().enumerate() {
                    match entry.colors.first().and_then(|p| p.get(channel)) {
                        Some(entry_colors) => colors.extend_from_slice(entry_colors),
                        None => colors.extend(std::iter::repeat(NEUTRAL_COLOR).take(n)),
                    }
                }
                for tri in entry.triangles() {
                    mesh.faces.push(RenderFace {
                        indices: [tri[0] + base, tri[1] + base, tri[2] + base],
                        material: submesh.material_index,
                        group,
                    });
                }
                mesh.vertex_groups.push((base..base + n as u32).collect());
            }
        }
        mesh
    }

    /// Re-strip `mesh` into submeshes (one per material) and entries (runs of
    /// one vertex group, at most [`MAX_ENTRY_VERTICES`] each).
    pub fn from_mesh(
        mesh: &RenderMesh,
        materials: &MaterialList,
        config: &StripifierConfig,
    ) -> Result<Self> {
        mesh.validate()?;
        let mut by_material: BTreeMap<u16, BTreeMap<u32, Vec<u32>>> = BTreeMap::new();
        for face in &mesh.faces {
            by_material
                .entry(face.material)
                .or_default()
                .entry(face.group)
                .or_default()
                .extend_from_slice(&face.indices);
        }

        let mut submeshes = Vec::with_capacity(by_material.len());
        for (material_index, groups) in by_material {
            let material = materials.get(material_index as usize).ok_or_else(|| {
                AssetError::InvalidInput(format!(
                    "face uses material {} but the level has {}",
                    material_index,
                    materials.len()
                ))
            })?;
            let mut entries = Vec::new();
            for indices in groups.values() {
                let mut runs = Vec::new();
                for group in stripper::stripify(indices, config)? {
                    runs.extend(group.runs());
                }
                for packed in pack_runs(&runs) {
                    entries.push(mesh.entry(&packed, material));
                }
            }
            submeshes.push(RenderSubmesh {
                material_index,
                lod_marker: 0,
                lod_params: [0.0; 8],
                entries,
            });
        }

        let bounds = Aabb::from_points(&mesh.positions).unwrap_or_default();
        Ok(RenderSection {
            color_maps: mesh.colors.len() as u32,
            bounds: bounds.to_floats(),
            submeshes,
        })
    }

    pub fn entry_count(&self) -> usize {
        self.submeshes.iter().map(|s| s.entries.len()).sum()
    }
}

/// Pack strip runs into entries of at most [`MAX_ENTRY_VERTICES`] vertices.
///
/// Runs longer than the ceiling are cut into pieces that overlap by two
/// vertices and start at even offsets, so winding parity is unchanged. A run
/// appended at an odd position is preceded by a skipped copy of its first
/// vertex for the same reason. The first two vertices of every piece skip.
fn pack_runs(runs: &[Vec<u32>]) -> Vec<Vec<(u32, bool)>> {
    let step = MAX_ENTRY_VERTICES - 2;
    let mut pieces: Vec<&[u32]> = Vec::new();
    for run in runs {
        if run.len() <= MAX_ENTRY_VERTICES {
            pieces.push(run);
            continue;
        }
        let mut start = 0;
        while start + 2 < run.len() {
            let end = (start + MAX_ENTRY_VERTICES).min(run.len());
            pieces.push(&run[start..end]);
            start += step;
        }
    }

    let mut packed = Vec::new();
    let mut current: Vec<(u32, bool)> = Vec::new();
    for piece in pieces {
        let pad = current.len() % 2;
        if current.len() + pad + piece.len() > MAX_ENTRY_VERTICES {
            packed.push(std::mem::take(&mut current));
        }
        if current.len() % 2 == 1 {
            current.push((piece[0], true));
        }
        for (i, &v) in piece.iter().enumerate() {
            current.push((v, i < 2));
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }
    packed
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderFace {
    pub indices: [u32; 3],
    pub material: u16,
    pub group: u32,
}

/// Host-neutral indexed mesh exchanged with an authoring tool.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderMesh {
    pub positions: Vec<[f32; 3]>,
    /// Empty, or one per vertex
    pub normals: Vec<[f32; 3]>,
    /// `[layer][vertex]`, one layer per UV map
    pub uvs: Vec<Vec<[f32; 2]>>,
    /// `[channel][vertex]`
    pub colors: Vec<Vec<[u8; 4]>>,
    pub faces: Vec<RenderFace>,
    /// Vertex indices of each stored entry, for re-partitioning
    pub vertex_groups: Vec<Vec<u32>>,
}

impl RenderMesh {
    pub fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        if !self.normals.is_empty() && self.normals.len() != n {
            return Err(AssetError::InvalidInput(format!(
                "{} normals for {} vertices",
                self.normals.len(),
                n
            )));
        }
        if self.uvs.iter().any(|l| l.len() != n) || self.colors.iter().any(|l| l.len() != n) {
            return Err(AssetError::InvalidInput(
                "every UV and colour layer needs one entry per vertex".to_string(),
            ));
        }
        if let Some(face) = self
            .faces
            .iter()
            .find(|f| f.indices.iter().any(|&i| i as usize >= n))
        {
            return Err(AssetError::InvalidInput(format!(
                "face {:?} indexes past {} vertices",
                face.indices, n
            )));
        }
        Ok(())
    }

    fn entry(&self, run: &[(u32, bool)], material: &Material) -> GeomEntry {
        let vertices: Vec<usize> = run.iter().map(|&(v, _)| v as usize).collect();
        let normals = material.has_normals().then(|| {
            vertices
                .iter()
                .map(|&v| self.normals.get(v).copied().unwrap_or(DEFAULT_NORMAL))
                .collect()
        });
        let channels: Vec<Vec<[u8; 4]>> = self
            .colors
            .iter()
            .map(|layer| vertices.iter().map(|&v| layer[v]).collect())
            .collect();
        let uvs = (0..material.uv_maps as usize)
            .map(|m| {
                vertices
                    .iter()
                    .map(|&v| self.uvs.get(m).map_or([0.0; 2], |layer| layer[v]))
                    .collect()
            })
            .collect();
        GeomEntry {
            positions: vertices.iter().map(|&v| self.positions[v]).collect(),
            flags: run.iter().map(|&(_, skip)| if skip { SKIP_FLAG } else { 0 }).collect(),
            normals,
            colors: vec![channels; material.properties.len()],
            uvs,
        }
    }
}
