//! Standalone model files: static P2M meshes and skinned P2S characters.
//!
//! Both share the `MATL` layout: `u32 count`, then per material
//! `u32 kind, u32 property_count, property_count × 4 u8`.

pub mod p2m;
pub mod p2s;

use serde::Serialize;

use crate::error::Result;
use crate::io::{ByteReader, ByteWriter};

/// Texture slot value meaning "no texture".
pub const NO_TEXTURE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelMaterialProperty {
    /// Index into the file's `TEXT` list, [`NO_TEXTURE`] for none
    pub texture: u8,
    pub kind: u8,
    pub colour_select: u8,
    pub flags: u8,
}

impl ModelMaterialProperty {
    pub fn textured(texture: u8) -> Self {
        ModelMaterialProperty {
            texture,
            kind: 1,
            colour_select: 0,
            flags: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ModelMaterial {
    pub kind: u32,
    pub properties: Vec<ModelMaterialProperty>,
}

impl ModelMaterial {
    pub fn texture_indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.properties
            .iter()
            .map(|p| p.texture)
            .filter(|&t| t != NO_TEXTURE)
    }
}

pub fn decode_materials(payload: &[u8]) -> Result<Vec<ModelMaterial>> {
    let mut reader = ByteReader::new(payload);
    let count = reader.u32()? as usize;
    let mut materials = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let kind = reader.u32()?;
        let property_count = reader.u32()? as usize;
        let mut properties = Vec::with_capacity(property_count.min(64));
        for _ in 0..property_count {
            properties.push(ModelMaterialProperty {
                texture: reader.u8()?,
                kind: reader.u8()?,
                colour_select: reader.u8()?,
                flags: reader.u8()?,
            });
        }
        materials.push(ModelMaterial { kind, properties });
    }
    Ok(materials)
}

pub fn encode_materials(materials: &[ModelMaterial]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.u32(materials.len() as u32);
    for material in materials {
        w.u32(material.kind);
        w.u32(material.properties.len() as u32);
        for p in &material.properties {
            w.u8(p.texture);
            w.u8(p.kind);
            w.u8(p.colour_select);
            w.u8(p.flags);
        }
    }
    w.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn material_properties_keep_their_byte_order() {
        let materials = vec![ModelMaterial {
            kind: 2,
            properties: vec![
                ModelMaterialProperty::textured(3),
                ModelMaterialProperty {
                    texture: NO_TEXTURE,
                    kind: 5,
                    colour_select: 1,
                    flags: 0x10,
                },
            ],
        }];
        let bytes = encode_materials(&materials);
        assert_eq!(&bytes[12..], &[3, 1, 0, 0, 0xFF, 5, 1, 0x10]);
        let decoded = decode_materials(&bytes).unwrap();
        assert_eq!(decoded, materials);
        assert_eq!(decoded[0].texture_indices().collect::<Vec<_>>(), vec![3]);
    }
}
