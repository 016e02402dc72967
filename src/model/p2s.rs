//! P2S skinned models. Decode only.
//!
//! ```text
//! P2S {
//!   INFO  u32 version
//!   TEXT  texture list
//!   MATL  materials
//!   MODL  u32 lod_flags, u32 lod_count, lods
//!   JNTL  u32 count, count × {16-byte name, u32 n, n × u32}
//!   SKEL  u32 bone_count, bone tree
//!   CYCL  u32 flags, u32 count, cycles
//!   END
//! }
//! Lod       [f32 radius if lod_flags & 1], u32 submesh_count, submeshes,
//!           then per submesh u32 material and per strip vertex 2 × f32 uv
//! Submesh   u32 geometry_count, geometries
//! Geometry  u32 joint_pairs, u32 vertices, u32 strips,
//!           joint_pairs × 2 u16,
//!           vertices × {3 × f32 position, u32 flags, 3 × f32 normal, 2 u16 joints},
//!           strips × {u32 n, n × {u16 vertex << 4, u16 flags}}
//! Bone      u32 index (0xFFFFFFFF: no bone), 16 × f32, 3 × f32, u32,
//!           then two child bones
//! ```

use serde::Serialize;

use crate::chunk::{has_magic, scan, P2S_FAMILY};
use crate::compression::unwrap_pk2;
use crate::error::{AssetError, Diagnostics, Result};
use crate::io::ByteReader;
use crate::level::render::SKIP_FLAG;
use crate::level::textures::TextureList;
use crate::math::TpMatrix44;
use crate::stripper;

use super::{decode_materials, ModelMaterial};

const NO_BONE: u32 = 0xFFFF_FFFF;
const NO_KEYFRAME: i32 = -1;
const NAME_LEN: usize = 16;
/// Deepest keyframe tree accepted before the data is treated as corrupt.
const MAX_KEYFRAME_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkinnedVertex {
    pub position: [f32; 3],
    pub flags: u32,
    pub normal: [f32; 3],
    pub joints: [u16; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StripVertex {
    pub vertex: u16,
    pub flags: u16,
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SkinnedGeometry {
    pub joint_pairs: Vec<[u16; 2]>,
    pub vertices: Vec<SkinnedVertex>,
    pub strips: Vec<Vec<StripVertex>>,
}

impl SkinnedGeometry {
    fn decode(reader: &mut ByteReader) -> Result<Self> {
        let joint_count = reader.u32()? as usize;
        let vertex_count = reader.u32()? as usize;
        let strip_count = reader.u32()? as usize;
        if joint_count * 4 + vertex_count * 32 + strip_count * 4 > reader.remaining() {
            return Err(AssetError::corrupt(
                reader.position() - 12,
                format!(
                    "skinned geometry claims {} joints, {} vertices, {} strips",
                    joint_count, vertex_count, strip_count
                ),
            ));
        }
        let joint_pairs = (0..joint_count)
            .map(|_| Ok([reader.u16()?, reader.u16()?]))
            .collect::<Result<Vec<_>>>()?;
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(SkinnedVertex {
                position: reader.vec3()?,
                flags: reader.u32()?,
                normal: reader.vec3()?,
                joints: [reader.u16()?, reader.u16()?],
            });
        }
        let mut strips = Vec::with_capacity(strip_count);
        for _ in 0..strip_count {
            let n = reader.u32()? as usize;
            let strip = (0..n)
                .map(|_| {
                    Ok(StripVertex {
                        vertex: reader.u16()? >> 4,
                        flags: reader.u16()?,
                        uv: [0.0; 2],
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            strips.push(strip);
        }
        Ok(SkinnedGeometry {
            joint_pairs,
            vertices,
            strips,
        })
    }

    /// Triangles in geometry-local vertex indices. A strip entry closes the
    /// triangle ending at the vertex it names.
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        let identity: Vec<u32> = (0..self.vertices.len() as u32).collect();
        self.strips
            .iter()
            .flatten()
            .filter(|s| u32::from(s.flags) & SKIP_FLAG == 0)
            .map(|s| s.vertex as usize)
            .filter(|&v| v >= 2 && v < identity.len())
            .map(|v| stripper::strip_triangle(&identity, v))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SkinnedSubmesh {
    pub material: u32,
    pub geometries: Vec<SkinnedGeometry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SkinnedLod {
    pub radius: f32,
    pub submeshes: Vec<SkinnedSubmesh>,
}

impl SkinnedLod {
    fn decode(reader: &mut ByteReader, lod_flags: u32) -> Result<Self> {
        let radius = if lod_flags & 1 != 0 { reader.f32()? } else { 0.0 };
        let submesh_count = reader.u32()? as usize;
        let mut submeshes = Vec::with_capacity(submesh_count.min(256));
        for _ in 0..submesh_count {
            let geometry_count = reader.u32()? as usize;
            let geometries = (0..geometry_count)
                .map(|_| SkinnedGeometry::decode(reader))
                .collect::<Result<Vec<_>>>()?;
            submeshes.push(SkinnedSubmesh {
                material: 0,
                geometries,
            });
        }
        // materials and strip uvs trail the geometry
        for submesh in &mut submeshes {
            submesh.material = reader.u32()?;
            for geometry in &mut submesh.geometries {
                for strip in &mut geometry.strips {
                    for entry in strip.iter_mut() {
                        entry.uv = [reader.f32()?, reader.f32()?];
                    }
                }
            }
        }
        Ok(SkinnedLod { radius, submeshes })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SkinnedModel {
    pub lod_flags: u32,
    pub lods: Vec<SkinnedLod>,
}

impl SkinnedModel {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let lod_flags = reader.u32()?;
        let count = reader.u32()? as usize;
        let lods = (0..count)
            .map(|_| SkinnedLod::decode(&mut reader, lod_flags))
            .collect::<Result<Vec<_>>>()?;
        Ok(SkinnedModel { lod_flags, lods })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Joint {
    pub name: String,
    pub indices: Vec<u32>,
}

pub fn decode_joints(payload: &[u8]) -> Result<Vec<Joint>> {
    let mut reader = ByteReader::new(payload);
    let count = reader.u32()? as usize;
    let mut joints = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let name = reader.fixed_str(NAME_LEN)?;
        let n = reader.u32()? as usize;
        let indices = (0..n).map(|_| reader.u32()).collect::<Result<Vec<_>>>()?;
        joints.push(Joint { name, indices });
    }
    Ok(joints)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub index: u32,
    pub parent: Option<u32>,
    pub transform: TpMatrix44,
    pub extra: [f32; 3],
    pub unknown: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Skeleton {
    pub bone_count: u32,
    /// In file order, parents before children
    pub bones: Vec<Bone>,
}

impl Skeleton {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let bone_count = reader.u32()?;
        let mut bones: Vec<Bone> = Vec::with_capacity((bone_count as usize).min(256));
        // each slot is a bone record or a terminator; a bone opens two more
        let mut pending: Vec<Option<u32>> = vec![None];
        while let Some(parent) = pending.pop() {
            let offset = reader.position();
            let index = reader.u32()?;
            if index == NO_BONE {
                continue;
            }
            if index >= bone_count || bones.iter().any(|b| b.index == index) {
                return Err(AssetError::corrupt(
                    offset,
                    format!("bone index {} repeated or past {} bones", index, bone_count),
                ));
            }
            bones.push(Bone {
                index,
                parent,
                transform: reader.record::<TpMatrix44>()?,
                extra: reader.vec3()?,
                unknown: reader.u32()?,
            });
            pending.push(Some(index));
            pending.push(Some(index));
        }
        Ok(Skeleton { bone_count, bones })
    }

    pub fn bone(&self, index: u32) -> Option<&Bone> {
        self.bones.iter().find(|b| b.index == index)
    }

    pub fn children(&self, index: u32) -> impl Iterator<Item = &Bone> {
        self.bones.iter().filter(move |b| b.parent == Some(index))
    }
}

/// One of a bone's three animation channels.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CycleChannel {
    pub key: i32,
    pub keyframes: Vec<[f32; 5]>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    pub name: String,
    pub unknown_1: i32,
    pub unknown_2: i32,
    pub speed: f32,
    pub frame_rate: f32,
    pub events: Vec<i32>,
    pub markers: Vec<[u8; 4]>,
    pub next: i32,
    /// Three per bone
    pub channels: Vec<CycleChannel>,
}

impl Default for Cycle {
    fn default() -> Self {
        Cycle {
            name: String::new(),
            unknown_1: 0,
            unknown_2: 0,
            speed: 1.0,
            frame_rate: 20.0,
            events: Vec::new(),
            markers: Vec::new(),
            next: -1,
            channels: Vec::new(),
        }
    }
}

/// Keyframes are a binary tree read in order: a non-terminator check
/// word, the left subtree, five floats, the right subtree.
fn read_keyframes(reader: &mut ByteReader, out: &mut Vec<[f32; 5]>, depth: usize) -> Result<()> {
    let offset = reader.position();
    if reader.i32()? == NO_KEYFRAME {
        return Ok(());
    }
    if depth >= MAX_KEYFRAME_DEPTH {
        return Err(AssetError::corrupt(offset, "keyframe tree too deep"));
    }
    read_keyframes(reader, out, depth + 1)?;
    let mut values = [0.0f32; 5];
    for v in values.iter_mut() {
        *v = reader.f32()?;
    }
    out.push(values);
    read_keyframes(reader, out, depth + 1)
}

impl Cycle {
    fn decode(reader: &mut ByteReader, flags: u32, bone_count: u32) -> Result<Self> {
        let mut cycle = Cycle::default();
        if flags & 0x1 != 0 {
            cycle.name = reader.fixed_str(NAME_LEN)?;
        }
        if flags & 0x2 != 0 {
            cycle.unknown_1 = reader.i32()?;
        }
        if flags & 0x4 != 0 {
            cycle.unknown_2 = reader.i32()?;
        }
        if flags & 0x8 != 0 {
            cycle.speed = reader.f32()?;
        }
        if flags & 0x10 != 0 {
            cycle.frame_rate = reader.f32()?;
        }
        if flags & 0x20 != 0 {
            let n = reader.i32()?.max(0) as usize;
            cycle.events = (0..n).map(|_| reader.i32()).collect::<Result<Vec<_>>>()?;
        }
        if flags & 0x40 != 0 {
            let n = reader.i32()?.max(0) as usize;
            cycle.markers = (0..n)
                .map(|_| Ok([reader.u8()?, reader.u8()?, reader.u8()?, reader.u8()?]))
                .collect::<Result<Vec<_>>>()?;
        }
        if flags & 0x80 != 0 {
            cycle.next = reader.i32()?;
        }
        for _ in 0..bone_count * 3 {
            let mut channel = CycleChannel {
                key: reader.i32()?,
                keyframes: Vec::new(),
            };
            read_keyframes(reader, &mut channel.keyframes, 0)?;
            cycle.channels.push(channel);
        }
        Ok(cycle)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CycleTable {
    pub flags: u32,
    pub cycles: Vec<Cycle>,
}

impl CycleTable {
    pub fn decode(payload: &[u8], bone_count: u32) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let flags = reader.u32()?;
        let count = reader.u32()? as usize;
        let mut cycles = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let cycle = Cycle::decode(&mut reader, flags, bone_count)?;
            log::debug!(
                "cycle '{}': {} keyframes",
                cycle.name,
                cycle.channels.iter().map(|c| c.keyframes.len()).sum::<usize>()
            );
            cycles.push(cycle);
        }
        Ok(CycleTable { flags, cycles })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct P2sModel {
    pub name: String,
    pub version: u32,
    pub textures: Option<TextureList>,
    pub materials: Vec<ModelMaterial>,
    pub model: Option<SkinnedModel>,
    pub joints: Vec<Joint>,
    pub skeleton: Option<Skeleton>,
    pub cycles: Option<CycleTable>,
}

impl P2sModel {
    pub fn decode(bytes: &[u8], name: &str, diagnostics: &mut Diagnostics) -> Result<Self> {
        Self::probe(bytes, name, diagnostics)?.ok_or_else(|| AssetError::NotThisFormat {
            expected: "P2S",
            found: String::from_utf8_lossy(&bytes[..bytes.len().min(4)]).into_owned(),
        })
    }

    pub fn probe(bytes: &[u8], name: &str, diagnostics: &mut Diagnostics) -> Result<Option<Self>> {
        let data = unwrap_pk2(bytes, diagnostics)?;
        let data = data.as_ref();
        if !has_magic(data, b"P2S") {
            return Ok(None);
        }
        let map = scan(data, &P2S_FAMILY)?;
        let payload = |tag: &[u8; 4]| map.payload(data, tag);

        let skeleton = payload(b"SKEL").map(Skeleton::decode).transpose()?;
        let bone_count = skeleton.as_ref().map_or(0, |s| s.bone_count);
        let model = P2sModel {
            name: name.to_string(),
            version: payload(b"INFO")
                .map(|info| ByteReader::new(info).u32())
                .transpose()?
                .unwrap_or_default(),
            textures: payload(b"TEXT").map(|p| TextureList::decode(p, name)).transpose()?,
            materials: payload(b"MATL").map(decode_materials).transpose()?.unwrap_or_default(),
            model: payload(b"MODL").map(SkinnedModel::decode).transpose()?,
            joints: payload(b"JNTL").map(decode_joints).transpose()?.unwrap_or_default(),
            cycles: payload(b"CYCL")
                .map(|p| CycleTable::decode(p, bone_count))
                .transpose()?,
            skeleton,
        };
        log::info!(
            "P2S '{}': {} LODs, {} bones, {} cycles",
            name,
            model.model.as_ref().map_or(0, |m| m.lods.len()),
            bone_count,
            model.cycles.as_ref().map_or(0, |c| c.cycles.len())
        );
        Ok(Some(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkWriter;
    use crate::io::ByteWriter;

    fn bone(w: &mut ByteWriter, index: u32, x: f32) {
        w.u32(index);
        w.mat4(&TpMatrix44::from_translation([x, 0.0, 0.0]).to_slice());
        w.vec3([0.0; 3]);
        w.u32(0);
    }

    /// Root 0 with children 1 and 2, written child-two-first.
    fn skeleton() -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(3);
        bone(&mut w, 0, 0.0);
        bone(&mut w, 2, 2.0);
        w.u32(NO_BONE);
        w.u32(NO_BONE);
        bone(&mut w, 1, 1.0);
        w.u32(NO_BONE);
        w.u32(NO_BONE);
        w.into_inner()
    }

    /// One LOD, one submesh, one geometry: a four-vertex strip.
    fn model() -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(1);
        w.u32(1);
        w.f32(10.0);
        w.u32(1);
        w.u32(1);
        w.u32(1);
        w.u32(4);
        w.u32(1);
        w.u16(0);
        w.u16(1);
        for i in 0..4 {
            w.vec3([i as f32, 0.0, 0.0]);
            w.u32(0);
            w.vec3([0.0, 1.0, 0.0]);
            w.u16(0);
            w.u16(0);
        }
        w.u32(4);
        for (i, flags) in [0x8000u16, 0x8000, 0, 0].iter().enumerate() {
            w.u16((i as u16) << 4);
            w.u16(*flags);
        }
        w.u32(7);
        for i in 0..4 {
            w.f32(i as f32 * 0.25);
            w.f32(0.5);
        }
        w.into_inner()
    }

    #[test]
    fn skeleton_tree_reads_depth_first() {
        let skeleton = Skeleton::decode(&skeleton()).unwrap();
        let order: Vec<_> = skeleton.bones.iter().map(|b| (b.index, b.parent)).collect();
        assert_eq!(order, vec![(0, None), (2, Some(0)), (1, Some(0))]);
        assert_eq!(skeleton.bone(1).unwrap().transform.translation(), [1.0, 0.0, 0.0]);
        assert_eq!(skeleton.children(0).count(), 2);
    }

    #[test]
    fn repeated_bones_are_corrupt() {
        let mut w = ByteWriter::new();
        w.u32(2);
        bone(&mut w, 0, 0.0);
        bone(&mut w, 0, 0.0);
        assert!(matches!(Skeleton::decode(w.as_slice()), Err(AssetError::Corrupt { .. })));
    }

    #[test]
    fn materials_and_uvs_follow_the_geometry() {
        let model = SkinnedModel::decode(&model()).unwrap();
        let lod = &model.lods[0];
        assert_eq!(lod.radius, 10.0);
        assert_eq!(lod.submeshes[0].material, 7);
        let geometry = &lod.submeshes[0].geometries[0];
        assert_eq!(geometry.joint_pairs, vec![[0, 1]]);
        assert_eq!(geometry.strips[0][3].uv, [0.75, 0.5]);
        assert_eq!(geometry.triangles(), vec![[0, 1, 2], [2, 1, 3]]);
    }

    #[test]
    fn keyframes_read_in_order() {
        let mut w = ByteWriter::new();
        // root with a left child and no right child
        w.i32(0);
        w.i32(0);
        w.i32(NO_KEYFRAME);
        (0..5).for_each(|_| w.f32(1.0));
        w.i32(NO_KEYFRAME);
        (0..5).for_each(|_| w.f32(2.0));
        w.i32(NO_KEYFRAME);
        let mut frames = Vec::new();
        read_keyframes(&mut ByteReader::new(w.as_slice()), &mut frames, 0).unwrap();
        assert_eq!(frames, vec![[1.0; 5], [2.0; 5]]);
    }

    #[test]
    fn file_level_decode_links_cycles_to_the_skeleton() {
        let mut cycles = ByteWriter::new();
        cycles.u32(0x1);
        cycles.u32(1);
        cycles.fixed_str("walk", NAME_LEN).unwrap();
        for channel in 0..9 {
            cycles.i32(channel);
            cycles.i32(NO_KEYFRAME);
        }

        let mut writer = ChunkWriter::new();
        writer.begin(b"P2S ");
        writer.leaf_with(b"INFO", |w| w.u32(3));
        writer.leaf(b"MODL", &model());
        writer.leaf(b"SKEL", &skeleton());
        writer.leaf(b"CYCL", cycles.as_slice());
        writer.end();
        let bytes = writer.finish();

        let p2s = P2sModel::decode(&bytes, "jim", &mut Diagnostics::new()).unwrap();
        assert_eq!(p2s.version, 3);
        let cycles = p2s.cycles.unwrap();
        assert_eq!(cycles.cycles[0].name, "walk");
        assert_eq!(cycles.cycles[0].channels.len(), 9);
        assert_eq!(cycles.cycles[0].frame_rate, 20.0);
        assert!(P2sModel::probe(b"P2M ", "x", &mut Diagnostics::new()).unwrap().is_none());
    }
}
