//! `ACTR` container: `ASTR` and `PSTR` string pools plus `AINF`, the actor
//! list (`u32 count`, then `count` actor records).

use std::collections::BTreeMap;

use crate::actor::params::{intern, Actor, LoadSources, ParamValue, NULL_REF};
use crate::actor::schema::SchemaTable;
use crate::error::{AssetError, Diagnostics, Result, Warning};
use crate::io::{ByteReader, ByteWriter};
use crate::math::TpMatrix44;
use crate::strings::StringTable;

/// Per-level string pools actors refer to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorStrings {
    /// Actor names, parameter names and enum values
    pub astr: StringTable,
    /// String parameter values
    pub pstr: StringTable,
}

/// Table sizes actor references are checked against.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBounds {
    pub splines: usize,
    pub ai_maps: usize,
}

/// Encoded payloads of the three `ACTR` blocks.
#[derive(Debug, Clone, Default)]
pub struct ActorBlocks {
    pub astr: Vec<u8>,
    pub pstr: Vec<u8>,
    pub ainf: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ActorList {
    pub strings: ActorStrings,
    pub actors: Vec<Actor>,
    /// Enum values seen on actors, by parameter name
    discovered_enums: BTreeMap<String, Vec<String>>,
}

impl ActorList {
    pub fn decode(
        astr: Option<&[u8]>,
        pstr: Option<&[u8]>,
        ainf: &[u8],
        schema: &SchemaTable,
        adef_strings: &StringTable,
        bounds: ReferenceBounds,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let strings = ActorStrings {
            astr: astr.map(StringTable::decode).transpose()?.unwrap_or_default(),
            pstr: pstr.map(StringTable::decode).transpose()?.unwrap_or_default(),
        };

        let mut reader = ByteReader::new(ainf);
        let count = reader.i32()?;
        if count < 0 {
            return Err(AssetError::corrupt(0, format!("negative actor count {}", count)));
        }
        let sources = LoadSources {
            schema,
            adef_strings,
            astr: &strings.astr,
        };
        let mut actors = Vec::with_capacity((count as usize).min(4096));
        for _ in 0..count {
            actors.push(Actor::decode(&mut reader, &sources, diagnostics)?);
        }

        let mut list = ActorList {
            strings,
            actors,
            discovered_enums: BTreeMap::new(),
        };
        list.populate(bounds, diagnostics);
        log::info!(
            "AINF: {} actors, {} ASTR / {} PSTR strings",
            list.actors.len(),
            list.strings.astr.len(),
            list.strings.pstr.len()
        );
        Ok(list)
    }

    /// Second pass, once every actor exists: resolve stored values, check
    /// references and collect enum values.
    fn populate(&mut self, bounds: ReferenceBounds, diagnostics: &mut Diagnostics) {
        let actor_count = self.actors.len();
        for actor in &mut self.actors {
            actor.populate(&self.strings);
            for param in actor.params.iter().filter(|p| p.is_saved()) {
                let dangling = match param.value {
                    ParamValue::Actor(Some(i)) => i as usize >= actor_count,
                    ParamValue::Spline(Some(i)) => i as usize >= bounds.splines,
                    ParamValue::AiMap(Some(i)) => i as usize >= bounds.ai_maps,
                    ParamValue::Enum(None) => param.raw < NULL_REF,
                    _ => false,
                };
                if dangling {
                    diagnostics.warn(Warning::DanglingReference {
                        actor: actor.name.clone(),
                        parameter: param.name.clone(),
                        index: param.raw,
                    });
                }
            }
            for param in &actor.params {
                if let ParamValue::Enum(Some(value)) = &param.value {
                    let values = self.discovered_enums.entry(param.name.clone()).or_default();
                    if !values.contains(value) {
                        values.push(value.clone());
                    }
                }
            }
        }
    }

    /// Payloads for `ASTR`, `PSTR` and `AINF`. Encoding actors may add
    /// strings, so the pools are encoded last.
    pub fn encode(&mut self) -> Result<ActorBlocks> {
        let mut w = ByteWriter::new();
        w.u32(self.actors.len() as u32);
        for actor in &self.actors {
            actor.encode(&mut w, &mut self.strings)?;
        }
        Ok(ActorBlocks {
            ainf: w.into_inner(),
            astr: self.strings.astr.encode(),
            pstr: self.strings.pstr.encode(),
        })
    }

    /// Place a new actor of `class_name` carrying only class defaults.
    pub fn create_actor(
        &mut self,
        class_name: &str,
        transform: TpMatrix44,
        schema: &SchemaTable,
        adef_strings: &StringTable,
    ) -> Result<usize> {
        let class = schema
            .class_for_actor(class_name)
            .ok_or_else(|| AssetError::UnknownClass(class_name.to_string()))?;
        let name = schema.class_name(class).unwrap_or(class_name).to_string();
        let name_index = intern(&mut self.strings.astr, &name)?;
        let mut actor = Actor::with_defaults(&name, name_index, class, schema, adef_strings);
        actor.transform = transform;
        self.actors.push(actor);
        Ok(self.actors.len() - 1)
    }

    /// Set a parameter of actor `actor`; see [`Actor::set_param`].
    pub fn set_param(&mut self, actor: usize, path: &[&str], value: ParamValue) -> Result<usize> {
        let target = self
            .actors
            .get_mut(actor)
            .ok_or_else(|| AssetError::InvalidInput(format!("no actor {}", actor)))?;
        target.set_param(path, value, &mut self.strings)
    }

    pub fn get(&self, index: usize) -> Option<&Actor> {
        self.actors.get(index)
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    pub fn discovered_enums(&self) -> &BTreeMap<String, Vec<String>> {
        &self.discovered_enums
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::adef::tests::sample_adef;
    use crate::actor::params::ParamState;

    fn strings_block(strings: &[&str]) -> Vec<u8> {
        let mut table = StringTable::new();
        strings.iter().for_each(|s| {
            table.intern(s);
        });
        table.encode()
    }

    fn param(w: &mut ByteWriter, name: u16, kind: u8, value: u32) {
        w.u16(name);
        w.u8(kind);
        w.u8(0);
        w.u32(value);
    }

    /// Two doors: the first targets the second, the second targets a
    /// missing actor and a missing enum string.
    fn ainf() -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(2);
        w.u16(0);
        w.mat4(&TpMatrix44::default().to_slice());
        w.u16(1);
        param(&mut w, 1, 5, 1);
        w.u16(0);
        w.mat4(&TpMatrix44::from_translation([0.0, 0.0, 4.0]).to_slice());
        w.u16(2);
        param(&mut w, 1, 5, 9);
        param(&mut w, 2, 4, 40);
        w.into_inner()
    }

    fn decode(diagnostics: &mut Diagnostics) -> (ActorList, crate::actor::Adef) {
        let adef = sample_adef();
        let schema = SchemaTable::build(&adef).unwrap();
        let astr = strings_block(&["Door", "Target", "Spawn"]);
        let list = ActorList::decode(
            Some(&astr),
            None,
            &ainf(),
            &schema,
            &adef.strings,
            ReferenceBounds::default(),
            diagnostics,
        )
        .unwrap();
        (list, adef)
    }

    #[test]
    fn references_resolve_after_every_actor_exists() {
        let mut diagnostics = Diagnostics::new();
        let (list, _) = decode(&mut diagnostics);
        assert_eq!(list.len(), 2);
        assert_eq!(list.actors[0].param(&["Target"]).unwrap().value, ParamValue::Actor(Some(1)));
        let dangling: Vec<_> = diagnostics
            .warnings()
            .iter()
            .filter_map(|w| match w {
                Warning::DanglingReference { parameter, index, .. } => Some((parameter.as_str(), *index)),
                _ => None,
            })
            .collect();
        assert_eq!(dangling, vec![("Target", 9), ("Spawn", 40)]);
        // the untouched first door still reports its class default
        assert_eq!(
            list.discovered_enums().get("Spawn"),
            Some(&vec!["SPAWN_NEVER".to_string()])
        );
    }

    #[test]
    fn encode_reproduces_the_actor_stream() {
        let (mut list, _) = decode(&mut Diagnostics::new());
        let blocks = list.encode().unwrap();
        assert_eq!(blocks.ainf, ainf());
        assert_eq!(blocks.astr, strings_block(&["Door", "Target", "Spawn"]));
    }

    #[test]
    fn created_actors_start_from_class_defaults() {
        let (mut list, adef) = decode(&mut Diagnostics::new());
        let schema = SchemaTable::build(&adef).unwrap();
        let index = list
            .create_actor("RGB", TpMatrix44::default(), &schema, &adef.strings)
            .unwrap();
        let actor = list.get(index).unwrap();
        assert_eq!(actor.name, "RGB");
        assert!(actor.params.iter().all(|p| p.state == ParamState::Default));
        assert_eq!(list.strings.astr.index_of("RGB"), Some(3));

        list.set_param(index, &["Red"], ParamValue::Float(0.25)).unwrap();
        let blocks = list.encode().unwrap();
        assert_eq!(&blocks.ainf[..4], &3u32.to_le_bytes());
        assert!(matches!(
            list.create_actor("Nope", TpMatrix44::default(), &schema, &adef.strings),
            Err(AssetError::UnknownClass(_))
        ));
    }
}
