//! `MAT ` block: the level material table.
//!
//! ```text
//! u32 count
//! count × { u32 lod_flags, u16 property_count, u16 uv_maps, u16 normals,
//!           property_count × { u16 texture, u8 flags, u8 kind, u8 uv } }
//! ```

use binrw::binrw;

use crate::error::{Diagnostics, Result, Warning};
use crate::io::{ByteReader, ByteWriter};

/// Texture index meaning "no texture".
pub const NO_TEXTURE: u16 = 0xFFFF;

/// LOD flag value that on its own means "never render".
pub const LOD_NEVER_RENDER: u32 = 0x7;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct MaterialProperty {
    pub texture_index: u16,
    pub flags: u8,
    /// Texture role: 0 diffuse, 1/4 glow, 2/5 environment map, 3 glass
    pub kind: u8,
    /// 1-based UV map selector, 0 for none
    pub uv: u8,
}

impl Default for MaterialProperty {
    fn default() -> Self {
        MaterialProperty {
            texture_index: NO_TEXTURE,
            flags: 0,
            kind: 0,
            uv: 0,
        }
    }
}

#[binrw]
#[derive(Debug, Clone, PartialEq, Default)]
#[brw(little)]
pub struct Material {
    pub lod_flags: u32,
    #[bw(try_calc = u16::try_from(properties.len()))]
    property_count: u16,
    pub uv_maps: u16,
    /// Non-zero when geometry using this material stores vertex normals
    pub normals: u16,
    #[br(count = property_count)]
    pub properties: Vec<MaterialProperty>,
}

impl Material {
    pub fn new(lod_flags: u32, uv_maps: u16, normals: bool) -> Self {
        Material {
            lod_flags,
            uv_maps,
            normals: normals as u16,
            properties: Vec::new(),
        }
    }

    pub fn has_normals(&self) -> bool {
        self.normals != 0
    }

    pub fn add_property(&mut self, property: MaterialProperty) {
        self.properties.push(property);
    }

    /// Only the bare value counts; other bits alongside it are a normal
    /// LOD setup.
    pub fn is_never_rendered(&self) -> bool {
        self.lod_flags == LOD_NEVER_RENDER
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MaterialList {
    pub materials: Vec<Material>,
}

impl MaterialList {
    /// LOD flags of exactly "never render" are kept but reported.
    pub fn decode(payload: &[u8], diagnostics: &mut Diagnostics) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let count = reader.u32()? as usize;
        let mut materials = Vec::with_capacity(count.min(4096));
        for index in 0..count {
            let material: Material = reader.record()?;
            if material.is_never_rendered() {
                diagnostics.warn(Warning::NeverRenderMaterial { material: index });
            }
            materials.push(material);
        }
        log::debug!("{} materials", materials.len());
        Ok(MaterialList { materials })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.u32(self.materials.len() as u32);
        for material in &self.materials {
            w.record(material)?;
        }
        Ok(w.into_inner())
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AssetError;

    fn sample() -> MaterialList {
        let mut diffuse = Material::new(0, 1, true);
        diffuse.add_property(MaterialProperty {
            texture_index: 3,
            flags: 0x20,
            kind: 0,
            uv: 1,
        });
        let mut hidden = Material::new(0x7, 0, false);
        hidden.add_property(MaterialProperty::default());
        MaterialList {
            materials: vec![diffuse, hidden],
        }
    }

    #[test]
    fn property_record_is_five_bytes() {
        let list = sample();
        let payload = list.encode().unwrap();
        // count + (10 + 5) + (10 + 5)
        assert_eq!(payload.len(), 4 + 15 + 15);
        assert_eq!(&payload[14..19], &[3, 0, 0x20, 0, 1]);
    }

    #[test]
    fn never_render_flags_are_kept_and_reported() {
        let payload = sample().encode().unwrap();
        let mut diagnostics = Diagnostics::new();
        let list = MaterialList::decode(&payload, &mut diagnostics).unwrap();
        assert_eq!(list, sample());
        assert_eq!(list.materials[1].lod_flags, 0x7);
        assert_eq!(diagnostics.warnings(), &[Warning::NeverRenderMaterial { material: 1 }]);
    }

    #[test]
    fn never_render_bits_alongside_others_are_not_reported() {
        let list = MaterialList {
            materials: vec![Material::new(0x17, 0, false), Material::new(0x8000_0007, 0, false)],
        };
        let mut diagnostics = Diagnostics::new();
        let decoded = MaterialList::decode(&list.encode().unwrap(), &mut diagnostics).unwrap();
        assert_eq!(decoded, list);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn property_count_must_fit_its_field() {
        let mut crowded = Material::new(0, 1, false);
        crowded.properties = vec![MaterialProperty::default(); 0x1_0000];
        let list = MaterialList {
            materials: vec![crowded],
        };
        assert!(matches!(list.encode(), Err(AssetError::InvalidInput(_))));
    }
}
