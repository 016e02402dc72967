//! P2M static models.
//!
//! ```text
//! P2M {
//!   INFO  u32 version
//!   SETT  u32 flags, [f32 scale if &1], [3 × f32 centre, f32 size if &2]
//!   TEXT  texture list, as the level TEX block
//!   MATL  materials
//!   MODL  u32 mesh_count, meshes
//!   END
//! }
//! Mesh      u32 lod_count, lods
//! Lod       f32 radius, u32 submesh_count, submeshes
//! Submesh   u32 material, u32 geometry_count, geometries
//! Geometry  u32 n, n × {3 × f32 position, 3 × f32 normal, 2 × f32 uv, u32 flags}
//! ```
//!
//! Each geometry is one triangle strip. Bit 15 of a vertex's flag word
//! stops it from closing a triangle; the first two vertices always carry it.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::chunk::{has_magic, scan, ChunkWriter, P2M_FAMILY};
use crate::compression::unwrap_pk2;
use crate::error::{AssetError, Diagnostics, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::level::render::{strip_triangles, DEFAULT_NORMAL, SKIP_FLAG};
use crate::level::textures::TextureList;
use crate::stripper::{self, StripifierConfig};

use super::{decode_materials, encode_materials, ModelMaterial};

pub const DEFAULT_VERSION: u32 = 5;

const ROOT_TAG: [u8; 4] = *b"P2M ";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelBounds {
    pub flags: u32,
    pub scale: f32,
    pub centre: [f32; 3],
    pub size: f32,
}

impl Default for ModelBounds {
    fn default() -> Self {
        ModelBounds {
            flags: 0,
            scale: 0.0,
            centre: [0.0; 3],
            size: 5.0,
        }
    }
}

impl ModelBounds {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let mut bounds = ModelBounds {
            flags: reader.u32()?,
            ..Default::default()
        };
        if bounds.flags & 1 != 0 {
            bounds.scale = reader.f32()?;
        }
        if bounds.flags & 2 != 0 {
            bounds.centre = reader.vec3()?;
            bounds.size = reader.f32()?;
        }
        Ok(bounds)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut flags = self.flags;
        if self.scale > 0.0 {
            flags |= 1;
        }
        let mut w = ByteWriter::new();
        w.u32(flags);
        if flags & 1 != 0 {
            w.f32(self.scale);
        }
        if flags & 2 != 0 {
            w.vec3(self.centre);
            w.f32(self.size);
        }
        w.into_inner()
    }

    /// Bounding sphere around `points`.
    pub fn around(points: &[[f32; 3]]) -> Self {
        let Some(first) = points.first() else {
            return ModelBounds::default();
        };
        let (mut min, mut max) = (*first, *first);
        for p in points {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        let centre = [
            (min[0] + max[0]) * 0.5,
            (min[1] + max[1]) * 0.5,
            (min[2] + max[2]) * 0.5,
        ];
        let size = points
            .iter()
            .map(|p| {
                let d = [p[0] - centre[0], p[1] - centre[1], p[2] - centre[2]];
                (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
            })
            .fold(0.0f32, f32::max);
        ModelBounds {
            flags: 2,
            scale: 0.0,
            centre,
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    pub flags: u32,
}

impl ModelVertex {
    pub fn skips(&self) -> bool {
        self.flags & SKIP_FLAG != 0
    }
}

/// One triangle strip.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModelGeometry {
    pub vertices: Vec<ModelVertex>,
}

impl ModelGeometry {
    fn decode(reader: &mut ByteReader) -> Result<Self> {
        let count = reader.u32()? as usize;
        if count * 36 > reader.remaining() {
            return Err(AssetError::corrupt(
                reader.position() - 4,
                format!("geometry claims {} vertices", count),
            ));
        }
        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count {
            vertices.push(ModelVertex {
                position: reader.vec3()?,
                normal: reader.vec3()?,
                uv: [reader.f32()?, reader.f32()?],
                flags: reader.u32()?,
            });
        }
        Ok(ModelGeometry { vertices })
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.vertices.len() as u32);
        for v in &self.vertices {
            w.vec3(v.position);
            w.vec3(v.normal);
            w.f32(v.uv[0]);
            w.f32(v.uv[1]);
            w.u32(v.flags);
        }
    }

    /// Triangles in geometry-local indices.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let flags: Vec<u32> = self.vertices.iter().map(|v| v.flags).collect();
        strip_triangles(&flags)
    }

    /// Rough strip count: skipped vertices come in pairs at strip starts.
    pub fn strip_count(&self) -> usize {
        self.vertices.iter().filter(|v| v.skips()).count() / 2
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModelSubmesh {
    pub material: u32,
    pub geometries: Vec<ModelGeometry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModelLod {
    /// Distance at which this LOD is used; negative when unset
    pub radius: f32,
    pub submeshes: Vec<ModelSubmesh>,
}

/// A group of LODs of one part of the model.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ModelMesh {
    pub lods: Vec<ModelLod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshFace {
    pub indices: [u32; 3],
    pub material: u32,
}

/// Indexed triangle mesh of one LOD, the editable form of [`ModelLod`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LodMesh {
    pub radius: f32,
    pub positions: Vec<[f32; 3]>,
    /// Empty, or one per position
    pub normals: Vec<[f32; 3]>,
    /// Empty, or one per position
    pub uvs: Vec<[f32; 2]>,
    pub faces: Vec<MeshFace>,
}

impl LodMesh {
    fn validate(&self) -> Result<()> {
        let n = self.positions.len();
        if !self.normals.is_empty() && self.normals.len() != n {
            return Err(AssetError::InvalidInput(format!(
                "{} normals for {} positions",
                self.normals.len(),
                n
            )));
        }
        if !self.uvs.is_empty() && self.uvs.len() != n {
            return Err(AssetError::InvalidInput(format!(
                "{} uvs for {} positions",
                self.uvs.len(),
                n
            )));
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

    fn vertex(&self, index: u32, flags: u32) -> ModelVertex {
        let i = index as usize;
        ModelVertex {
            position: self.positions[i],
            normal: self.normals.get(i).copied().unwrap_or(DEFAULT_NORMAL),
            uv: self.uvs.get(i).copied().unwrap_or([0.0; 2]),
            flags,
        }
    }
}

impl ModelLod {
    /// Flatten into an indexed mesh; geometries keep their own vertices.
    pub fn mesh(&self) -> LodMesh {
        let mut mesh = LodMesh {
            radius: self.radius,
            ..Default::default()
        };
        for submesh in &self.submeshes {
            for geometry in &submesh.geometries {
                let base = mesh.positions.len() as u32;
                for v in &geometry.vertices {
                    mesh.positions.push(v.position);
                    mesh.normals.push(v.normal);
                    mesh.uvs.push(v.uv);
                }
                mesh.faces.extend(geometry.triangles().into_iter().map(|t| MeshFace {
                    indices: [t[0] + base, t[1] + base, t[2] + base],
                    material: submesh.material,
                }));
            }
        }
        mesh
    }

    /// Re-strip `mesh`, one submesh per material in ascending order. Every
    /// strip and every leftover triangle becomes its own geometry.
    pub fn from_mesh(mesh: &LodMesh, config: &StripifierConfig) -> Result<Self> {
        mesh.validate()?;
        let mut by_material: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for face in &mesh.faces {
            by_material
                .entry(face.material)
                .or_default()
                .extend_from_slice(&face.indices);
        }
        let mut submeshes = Vec::with_capacity(by_material.len());
        for (material, indices) in by_material {
            let mut geometries = Vec::new();
            for group in stripper::stripify(&indices, config)? {
                for run in group.runs() {
                    let vertices = run
                        .iter()
                        .enumerate()
                        .map(|(i, &index)| mesh.vertex(index, if i < 2 { SKIP_FLAG } else { 0 }))
                        .collect();
                    geometries.push(ModelGeometry { vertices });
                }
            }
            submeshes.push(ModelSubmesh {
                material,
                geometries,
            });
        }
        Ok(ModelLod {
            radius: mesh.radius,
            submeshes,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.submeshes
            .iter()
            .flat_map(|s| &s.geometries)
            .map(|g| g.triangles().len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct P2mModel {
    pub name: String,
    pub version: u32,
    pub bounds: Option<ModelBounds>,
    pub textures: Option<TextureList>,
    pub materials: Vec<ModelMaterial>,
    pub meshes: Vec<ModelMesh>,
}

#[derive(Debug, Clone, Serialize)]
pub struct P2mSummary {
    pub name: String,
    pub version: u32,
    pub bounds: Option<ModelBounds>,
    pub textures: usize,
    pub materials: usize,
    pub meshes: usize,
    pub lods: usize,
    pub geometries: usize,
    pub strips: usize,
    pub triangles: usize,
}

fn decode_meshes(payload: &[u8]) -> Result<Vec<ModelMesh>> {
    let mut reader = ByteReader::new(payload);
    let mesh_count = reader.u32()? as usize;
    let mut meshes = Vec::with_capacity(mesh_count.min(64));
    for _ in 0..mesh_count {
        let lod_count = reader.u32()? as usize;
        let mut lods = Vec::with_capacity(lod_count.min(16));
        for _ in 0..lod_count {
            let radius = reader.f32()?;
            let submesh_count = reader.u32()? as usize;
            let mut submeshes = Vec::with_capacity(submesh_count.min(256));
            for _ in 0..submesh_count {
                let material = reader.u32()?;
                let geometry_count = reader.u32()? as usize;
                let geometries = (0..geometry_count)
                    .map(|_| ModelGeometry::decode(&mut reader))
                    .collect::<Result<Vec<_>>>()?;
                submeshes.push(ModelSubmesh {
                    material,
                    geometries,
                });
            }
            lods.push(ModelLod { radius, submeshes });
        }
        meshes.push(ModelMesh { lods });
    }
    Ok(meshes)
}

fn encode_meshes(meshes: &[ModelMesh]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.u32(meshes.len() as u32);
    for mesh in meshes {
        w.u32(mesh.lods.len() as u32);
        for lod in &mesh.lods {
            w.f32(lod.radius);
            w.u32(lod.submeshes.len() as u32);
            for submesh in &lod.submeshes {
                w.u32(submesh.material);
                w.u32(submesh.geometries.len() as u32);
                submesh.geometries.iter().for_each(|g| g.encode(&mut w));
            }
        }
    }
    w.into_inner()
}

impl P2mModel {
    pub fn decode(bytes: &[u8], name: &str, diagnostics: &mut Diagnostics) -> Result<Self> {
        Self::probe(bytes, name, diagnostics)?.ok_or_else(|| AssetError::NotThisFormat {
            expected: "P2M",
            found: String::from_utf8_lossy(&bytes[..bytes.len().min(4)]).into_owned(),
        })
    }

    /// `Ok(None)` when `bytes` (after PK2 unwrapping) is not a P2M file.
    pub fn probe(bytes: &[u8], name: &str, diagnostics: &mut Diagnostics) -> Result<Option<Self>> {
        let data = unwrap_pk2(bytes, diagnostics)?;
        let data = data.as_ref();
        if !has_magic(data, b"P2M") {
            return Ok(None);
        }
        let map = scan(data, &P2M_FAMILY)?;
        let payload = |tag: &[u8; 4]| map.payload(data, tag);

        let version = match payload(b"INFO") {
            Some(info) => ByteReader::new(info).u32()?,
            None => DEFAULT_VERSION,
        };
        let model = P2mModel {
            name: name.to_string(),
            version,
            bounds: payload(b"SETT").map(ModelBounds::decode).transpose()?,
            textures: payload(b"TEXT").map(|p| TextureList::decode(p, name)).transpose()?,
            materials: payload(b"MATL").map(decode_materials).transpose()?.unwrap_or_default(),
            meshes: payload(b"MODL").map(decode_meshes).transpose()?.unwrap_or_default(),
        };
        for entry in map.unknown() {
            log::debug!("P2M '{}': skipping block {}", name, entry.tag);
        }
        log::info!(
            "P2M '{}' version {}: {} meshes, {} materials",
            name,
            version,
            model.meshes.len(),
            model.materials.len()
        );
        Ok(Some(model))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ChunkWriter::new();
        writer.begin(&ROOT_TAG);
        writer.leaf_with(b"INFO", |w| w.u32(self.version));
        if let Some(bounds) = &self.bounds {
            writer.leaf(b"SETT", &bounds.encode());
        }
        if let Some(textures) = &self.textures {
            writer.leaf(b"TEXT", &textures.encode());
        }
        writer.leaf(b"MATL", &encode_materials(&self.materials));
        writer.leaf(b"MODL", &encode_meshes(&self.meshes));
        writer.end();
        writer.finish()
    }

    /// Build a model from edited LODs, one entry of `groups` per mesh.
    /// Submeshes reference `materials` by index.
    pub fn from_mesh(
        name: &str,
        groups: &[Vec<LodMesh>],
        materials: Vec<ModelMaterial>,
        textures: TextureList,
        config: &StripifierConfig,
    ) -> Result<Self> {
        let mut model = P2mModel {
            name: name.to_string(),
            version: DEFAULT_VERSION,
            bounds: None,
            textures: Some(textures),
            materials,
            meshes: Vec::new(),
        };
        model.replace_geometry(groups, config)?;
        let points: Vec<[f32; 3]> = groups
            .iter()
            .flatten()
            .flat_map(|lod| lod.positions.iter().copied())
            .collect();
        model.bounds = Some(ModelBounds::around(&points));
        Ok(model)
    }

    /// Re-strip every mesh, keeping bounds, textures and materials.
    pub fn replace_geometry(&mut self, groups: &[Vec<LodMesh>], config: &StripifierConfig) -> Result<()> {
        let material_count = self.materials.len();
        if let Some(face) = groups
            .iter()
            .flatten()
            .flat_map(|lod| &lod.faces)
            .find(|f| f.material as usize >= material_count)
        {
            return Err(AssetError::InvalidInput(format!(
                "face uses material {} but the model has {}",
                face.material, material_count
            )));
        }
        self.meshes = groups
            .iter()
            .map(|lods| {
                Ok(ModelMesh {
                    lods: lods
                        .iter()
                        .map(|lod| ModelLod::from_mesh(lod, config))
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    pub fn lods(&self) -> impl Iterator<Item = &ModelLod> {
        self.meshes.iter().flat_map(|m| &m.lods)
    }

    pub fn summary(&self) -> P2mSummary {
        let geometries = || {
            self.lods()
                .flat_map(|l| &l.submeshes)
                .flat_map(|s| &s.geometries)
        };
        P2mSummary {
            name: self.name.clone(),
            version: self.version,
            bounds: self.bounds,
            textures: self.textures.as_ref().map_or(0, TextureList::len),
            materials: self.materials.len(),
            meshes: self.meshes.len(),
            lods: self.lods().count(),
            geometries: geometries().count(),
            strips: geometries().map(ModelGeometry::strip_count).sum(),
            triangles: self.lods().map(ModelLod::triangle_count).sum(),
        }
    }
}
