//! ADEF actor-class definition files.
//!
//! ```text
//! ADEF {
//!   INFO  u32 version
//!   STR   string pool shared by class, property and enum names
//!   ENUM  u32 count, count × { u16 name, u16 n, n × u16 value }
//!   CLAS  u32 count, count × {
//!           u16 name, u16 parent (0xFFFF none),
//!           u32 n, n × property,   own properties
//!           u32 m, m × property    script-exposed properties
//!         }
//!   END
//! }
//! property = { u16 name, u16 type, u32 class_ref, u32 default value }
//! ```

use std::collections::BTreeMap;

use binrw::binrw;

use crate::chunk::{scan, ChunkWriter, ADEF_FAMILY};
use crate::compression::unwrap_pk2;
use crate::error::{AssetError, Diagnostics, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::strings::StringTable;

pub const NO_PARENT: u16 = 0xFFFF;

/// Parameter type tag shared by class properties and actor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Float,
    Bool,
    /// Index into the level's `PSTR` pool
    String,
    /// Index into the level's `ASTR` pool
    Enum,
    /// Index of another actor
    Actor,
    /// Group of nested parameters described by another class
    Struct,
    Unsupported,
    Spline,
    Geometry,
    AiMap,
    Other(u16),
}

impl ParamType {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => ParamType::Float,
            2 => ParamType::Bool,
            3 => ParamType::String,
            4 => ParamType::Enum,
            5 => ParamType::Actor,
            6 => ParamType::Struct,
            7 => ParamType::Unsupported,
            8 => ParamType::Spline,
            9 => ParamType::Geometry,
            10 => ParamType::AiMap,
            other => ParamType::Other(other),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            ParamType::Float => 0,
            ParamType::Bool => 2,
            ParamType::String => 3,
            ParamType::Enum => 4,
            ParamType::Actor => 5,
            ParamType::Struct => 6,
            ParamType::Unsupported => 7,
            ParamType::Spline => 8,
            ParamType::Geometry => 9,
            ParamType::AiMap => 10,
            ParamType::Other(raw) => raw,
        }
    }
}

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ClassProperty {
    pub name: u16,
    #[br(map = |raw: u16| ParamType::from_raw(raw))]
    #[bw(map = |kind: &ParamType| kind.raw())]
    pub kind: ParamType,
    /// Class describing the nested fields of a `Struct` property
    pub class_ref: u32,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorClass {
    pub name: u16,
    pub parent: Option<u16>,
    /// First-tier properties, owned by the class
    pub own: Vec<ClassProperty>,
    /// Second-tier properties, exposed to scripts
    pub exposed: Vec<ClassProperty>,
}

impl ActorClass {
    pub fn property_count(&self) -> usize {
        self.own.len() + self.exposed.len()
    }

    fn decode(reader: &mut ByteReader) -> Result<Self> {
        let name = reader.u16()?;
        let parent = reader.u16()?;
        let mut tiers = [Vec::new(), Vec::new()];
        for tier in tiers.iter_mut() {
            let at = reader.position();
            let count = reader.i32()?;
            if count < 0 {
                return Err(AssetError::corrupt(at, format!("negative property count {}", count)));
            }
            *tier = (0..count)
                .map(|_| reader.record::<ClassProperty>())
                .collect::<Result<Vec<_>>>()?;
        }
        let [own, exposed] = tiers;
        Ok(ActorClass {
            name,
            parent: (parent != NO_PARENT).then_some(parent),
            own,
            exposed,
        })
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<()> {
        w.u16(self.name);
        w.u16(self.parent.unwrap_or(NO_PARENT));
        for tier in [&self.own, &self.exposed] {
            w.u32(tier.len() as u32);
            for property in tier {
                w.record(property)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdefEnum {
    pub name: u16,
    pub values: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Adef {
    pub version: u32,
    pub strings: StringTable,
    pub enums: Vec<AdefEnum>,
    pub classes: Vec<ActorClass>,
}

impl Adef {
    pub fn decode(bytes: &[u8], diagnostics: &mut Diagnostics) -> Result<Self> {
        let data = unwrap_pk2(bytes, diagnostics)?;
        let data = data.as_ref();
        let map = scan(data, &ADEF_FAMILY)?;
        if map.get(b"ADEF").is_none() {
            return Err(AssetError::NotThisFormat {
                expected: "ADEF",
                found: String::from_utf8_lossy(&data[..data.len().min(4)]).into_owned(),
            });
        }

        let mut adef = Adef::default();
        if let Some(info) = map.payload(data, b"INFO") {
            adef.version = ByteReader::new(info).u32()?;
        }
        if let Some(payload) = map.payload(data, b"STR ") {
            adef.strings = StringTable::decode(payload)?;
        }
        if let Some(payload) = map.payload(data, b"ENUM") {
            let mut reader = ByteReader::new(payload);
            let count = reader.u32()? as usize;
            for _ in 0..count {
                let name = reader.u16()?;
                let n = reader.u16()? as usize;
                let values = (0..n).map(|_| reader.u16()).collect::<Result<Vec<_>>>()?;
                adef.enums.push(AdefEnum { name, values });
            }
        }
        if let Some(payload) = map.payload(data, b"CLAS") {
            let mut reader = ByteReader::new(payload);
            let count = reader.u32()? as usize;
            adef.classes = (0..count)
                .map(|_| ActorClass::decode(&mut reader))
                .collect::<Result<Vec<_>>>()?;
        }
        log::info!(
            "ADEF v{}: {} classes, {} enums, {} strings",
            adef.version,
            adef.classes.len(),
            adef.enums.len(),
            adef.strings.len()
        );
        Ok(adef)
    }

    pub fn encode(&mut self) -> Result<Vec<u8>> {
        let mut enums = ByteWriter::new();
        enums.u32(self.enums.len() as u32);
        for e in &self.enums {
            enums.u16(e.name);
            enums.count_u16(e.values.len(), "enum values")?;
            e.values.iter().for_each(|&v| enums.u16(v));
        }
        let mut classes = ByteWriter::new();
        classes.u32(self.classes.len() as u32);
        for class in &self.classes {
            class.encode(&mut classes)?;
        }

        let mut writer = ChunkWriter::new();
        writer.begin(b"ADEF");
        writer.leaf_with(b"INFO", |w| w.u32(self.version));
        writer.leaf(b"STR ", &self.strings.encode());
        writer.leaf(b"ENUM", enums.as_slice());
        writer.leaf(b"CLAS", classes.as_slice());
        writer.end();
        Ok(writer.finish())
    }

    pub fn string(&self, index: u16) -> Option<&str> {
        self.strings.get(index as usize)
    }

    pub fn class_name(&self, class: usize) -> Option<&str> {
        self.classes.get(class).and_then(|c| self.string(c.name))
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.classes
            .iter()
            .position(|c| self.string(c.name) == Some(name))
    }

    /// Enum name → allowed values. Enums declared more than once are merged.
    pub fn enum_dictionary(&self) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for e in &self.enums {
            let Some(name) = self.string(e.name) else {
                continue;
            };
            let values = out.entry(name.to_string()).or_default();
            for value in e.values.iter().filter_map(|&v| self.string(v)) {
                if !values.iter().any(|existing| existing == value) {
                    values.push(value.to_string());
                }
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn property(name: u16, kind: ParamType, class_ref: u32, value: u32) -> ClassProperty {
        ClassProperty {
            name,
            kind,
            class_ref,
            value,
        }
    }

    /// Three classes:
    /// - `Actor` (root): own `Flags` (float 1.0), `Name` (string);
    ///   exposed `Colour` (struct of `RGB`)
    /// - `Door : Actor`: own `Flags` (float 2.0), `Speed` (float 3.0);
    ///   exposed `Spawn` (enum), `Target` (actor)
    /// - `RGB`: own `Red`, `Green` (float)
    pub(crate) fn sample_adef() -> Adef {
        let mut strings = StringTable::new();
        for s in [
            "Actor", "Door", "RGB", "Flags", "Name", "Colour", "Speed", "Spawn", "Target", "Red",
            "Green", "SPAWN_NEVER", "SPAWN_ALWAYS",
        ] {
            strings.intern(s);
        }
        let float = |v: f32| v.to_bits();
        Adef {
            version: 1,
            strings,
            enums: vec![AdefEnum {
                name: 7,
                values: vec![11, 12],
            }],
            classes: vec![
                ActorClass {
                    name: 0,
                    parent: None,
                    own: vec![
                        property(3, ParamType::Float, 0, float(1.0)),
                        property(4, ParamType::String, 0, 0),
                    ],
                    exposed: vec![property(5, ParamType::Struct, 2, 0)],
                },
                ActorClass {
                    name: 1,
                    parent: Some(0),
                    own: vec![
                        property(3, ParamType::Float, 0, float(2.0)),
                        property(6, ParamType::Float, 0, float(3.0)),
                    ],
                    exposed: vec![
                        property(7, ParamType::Enum, 0, 11),
                        property(8, ParamType::Actor, 0, 0),
                    ],
                },
                ActorClass {
                    name: 2,
                    parent: None,
                    own: vec![
                        property(9, ParamType::Float, 0, 0),
                        property(10, ParamType::Float, 0, 0),
                    ],
                    exposed: vec![],
                },
            ],
        }
    }

    #[test]
    fn encode_then_decode_keeps_classes() {
        let mut adef = sample_adef();
        let bytes = adef.encode().unwrap();
        assert_eq!(&bytes[..4], b"ADEF");
        let decoded = Adef::decode(&bytes, &mut Diagnostics::new()).unwrap();
        assert_eq!(decoded, adef);
        assert_eq!(decoded.class_index("Door"), Some(1));
        assert_eq!(decoded.class_name(2), Some("RGB"));
        assert_eq!(decoded.classes[1].property_count(), 4);
    }

    #[test]
    fn enum_dictionary_resolves_names() {
        let dictionary = sample_adef().enum_dictionary();
        assert_eq!(
            dictionary.get("Spawn"),
            Some(&vec!["SPAWN_NEVER".to_string(), "SPAWN_ALWAYS".to_string()])
        );
    }

    #[test]
    fn other_files_are_not_adef() {
        let err = Adef::decode(b"LEVL\0\0\0\0", &mut Diagnostics::new()).unwrap_err();
        assert!(matches!(err, AssetError::NotThisFormat { .. }));
    }
}
