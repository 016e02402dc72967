//! Actor instances and their sparse parameter overrides.
//!
//! An actor starts from its class's default parameter tree. Parameters
//! read from a level either overwrite a default in place or, when no
//! default with the same name, type and parent exists, are appended as
//! added parameters. Only overwritten and added parameters are saved.
//!
//! `AINF` actor record:
//! ```text
//! u16 name (ASTR), 16 × f32 transform, u16 param_count,
//! param_count × { u16 name (ASTR), u8 type, u8 child_count, u32 value,
//!                 child_count × param }
//! ```

use std::fmt;

use crate::error::{AssetError, Diagnostics, Result, Warning};
use crate::io::{ByteReader, ByteWriter};
use crate::level::actors::ActorStrings;
use crate::math::TpMatrix44;
use crate::strings::StringTable;

use super::adef::ParamType;
use super::schema::{PropertyRef, SchemaTable};

/// Raw values at or above this mean "no reference".
pub const NULL_REF: u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamState {
    /// Class default, not written on save
    Default,
    /// Class default with an explicit value
    Overwritten,
    /// Not part of the class schema
    Added,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Bool(bool),
    String(String),
    Enum(Option<String>),
    Actor(Option<u32>),
    Struct,
    Spline(Option<u32>),
    Geometry(u32),
    AiMap(Option<u32>),
    /// Unsupported or unknown types, kept as stored
    Raw(u32),
}

fn reference(raw: u32) -> Option<u32> {
    (raw < NULL_REF).then_some(raw)
}

impl ParamValue {
    /// `text` is the string `raw` refers to for string and enum types.
    pub fn from_raw(kind: ParamType, raw: u32, text: Option<&str>) -> Self {
        match kind {
            ParamType::Float => ParamValue::Float(f32::from_bits(raw)),
            ParamType::Bool => ParamValue::Bool(raw == 1),
            ParamType::String => ParamValue::String(text.unwrap_or_default().to_string()),
            ParamType::Enum => ParamValue::Enum(reference(raw).and(text).map(str::to_string)),
            ParamType::Actor => ParamValue::Actor(reference(raw)),
            ParamType::Struct => ParamValue::Struct,
            ParamType::Spline => ParamValue::Spline(reference(raw)),
            ParamType::Geometry => ParamValue::Geometry(raw),
            ParamType::AiMap => ParamValue::AiMap(reference(raw)),
            ParamType::Unsupported | ParamType::Other(_) => ParamValue::Raw(raw),
        }
    }

    /// Type a new parameter holding this value gets; `None` for values
    /// that do not imply one.
    pub fn kind(&self) -> Option<ParamType> {
        match self {
            ParamValue::Float(_) => Some(ParamType::Float),
            ParamValue::Bool(_) => Some(ParamType::Bool),
            ParamValue::String(_) => Some(ParamType::String),
            ParamValue::Enum(_) => Some(ParamType::Enum),
            ParamValue::Actor(_) => Some(ParamType::Actor),
            ParamValue::Struct => Some(ParamType::Struct),
            ParamValue::Spline(_) => Some(ParamType::Spline),
            ParamValue::Geometry(_) => Some(ParamType::Geometry),
            ParamValue::AiMap(_) => Some(ParamType::AiMap),
            ParamValue::Raw(_) => None,
        }
    }

    /// Stored form. Strings go to `PSTR`, enum values to `ASTR`.
    fn to_raw(&self, current: u32, strings: &mut ActorStrings) -> Result<u32> {
        Ok(match self {
            ParamValue::Float(v) => v.to_bits(),
            ParamValue::Bool(v) => *v as u32,
            ParamValue::String(text) => intern(&mut strings.pstr, text)? as u32,
            ParamValue::Enum(Some(text)) => intern(&mut strings.astr, text)? as u32,
            ParamValue::Enum(None) => NULL_REF,
            ParamValue::Actor(index) | ParamValue::Spline(index) | ParamValue::AiMap(index) => {
                index.unwrap_or(NULL_REF)
            }
            ParamValue::Struct => current,
            ParamValue::Geometry(raw) | ParamValue::Raw(raw) => *raw,
        })
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{:.3}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::String(text) => write!(f, "{:?}", text),
            ParamValue::Enum(Some(text)) => write!(f, "{}", text),
            ParamValue::Actor(Some(i)) => write!(f, "actor #{}", i),
            ParamValue::Spline(Some(i)) => write!(f, "spline #{}", i),
            ParamValue::AiMap(Some(i)) => write!(f, "AI map #{}", i),
            ParamValue::Enum(None)
            | ParamValue::Actor(None)
            | ParamValue::Spline(None)
            | ParamValue::AiMap(None) => write!(f, "NULL"),
            ParamValue::Struct => write!(f, "{{..}}"),
            ParamValue::Geometry(raw) | ParamValue::Raw(raw) => write!(f, "{:#x}", raw),
        }
    }
}

/// Index of `text` in `table`, appending it if needed.
pub(crate) fn intern(table: &mut StringTable, text: &str) -> Result<u16> {
    let index = table.intern(text);
    u16::try_from(index)
        .map_err(|_| AssetError::InvalidInput(format!("string table full, cannot add '{}'", text)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorParam {
    pub name: String,
    /// `ASTR` index of the name as last loaded
    pub name_index: Option<u16>,
    pub kind: ParamType,
    pub raw: u32,
    pub value: ParamValue,
    /// Arena index of the enclosing struct parameter
    pub parent: Option<usize>,
    pub state: ParamState,
    /// Declaring class property, when known
    pub schema: Option<PropertyRef>,
    /// Class describing this parameter's fields, for struct defaults
    pub field_class: Option<usize>,
    /// Position in the stored parameter stream
    load_order: Option<usize>,
}

impl ActorParam {
    pub fn is_saved(&self) -> bool {
        self.state != ParamState::Default
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Usually the class name, sometimes without its `Actor` suffix
    pub name: String,
    pub name_index: u16,
    pub class: Option<usize>,
    pub transform: TpMatrix44,
    /// Parameter arena; children follow no particular position
    pub params: Vec<ActorParam>,
}

/// What actor decoding reads from besides the `AINF` stream.
pub(crate) struct LoadSources<'a> {
    pub schema: &'a SchemaTable,
    pub adef_strings: &'a StringTable,
    pub astr: &'a StringTable,
}

impl Actor {
    /// Actor of `class` carrying only class defaults.
    pub fn with_defaults(
        name: &str,
        name_index: u16,
        class: usize,
        schema: &SchemaTable,
        adef_strings: &StringTable,
    ) -> Self {
        let params = schema
            .defaults(class)
            .iter()
            .map(|d| {
                let text = match d.kind {
                    ParamType::Enum => adef_strings.get(d.value as usize),
                    _ => None,
                };
                ActorParam {
                    name: d.name.clone(),
                    name_index: None,
                    kind: d.kind,
                    raw: d.value,
                    value: ParamValue::from_raw(d.kind, d.value, text),
                    parent: d.parent,
                    state: ParamState::Default,
                    schema: Some(d.source),
                    field_class: d.field_class,
                    load_order: None,
                }
            })
            .collect();
        Actor {
            name: name.to_string(),
            name_index,
            class: Some(class),
            transform: TpMatrix44::default(),
            params,
        }
    }

    pub(crate) fn decode(
        reader: &mut ByteReader,
        sources: &LoadSources,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let at = reader.position();
        let name_index = reader.u16()?;
        let name = sources
            .astr
            .get(name_index as usize)
            .ok_or_else(|| {
                AssetError::corrupt(
                    at,
                    format!("actor name {} outside ASTR ({} strings)", name_index, sources.astr.len()),
                )
            })?
            .to_string();
        let transform = reader.record::<TpMatrix44>()?;
        let param_count = reader.u16()? as usize;

        let mut actor = match sources.schema.class_for_actor(&name) {
            Some(class) => {
                Actor::with_defaults(&name, name_index, class, sources.schema, sources.adef_strings)
            }
            None => {
                diagnostics.warn(Warning::UnknownActorClass { actor: name.clone() });
                Actor {
                    name,
                    name_index,
                    class: None,
                    transform: TpMatrix44::default(),
                    params: Vec::new(),
                }
            }
        };
        actor.transform = transform;
        let mut order = 0;
        actor.load_params(reader, param_count, None, sources, &mut order, diagnostics)?;
        Ok(actor)
    }

    fn load_params(
        &mut self,
        reader: &mut ByteReader,
        count: usize,
        parent: Option<usize>,
        sources: &LoadSources,
        order: &mut usize,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        for _ in 0..count {
            let at = reader.position();
            let name_index = reader.u16()?;
            let kind = ParamType::from_raw(reader.u8()? as u16);
            let child_count = reader.u8()? as usize;
            let raw = reader.u32()?;
            let name = sources.astr.get(name_index as usize).ok_or_else(|| {
                AssetError::corrupt(
                    at,
                    format!("parameter name {} outside ASTR ({} strings)", name_index, sources.astr.len()),
                )
            })?;

            let matched = self.params.iter().position(|p| {
                p.state == ParamState::Default && p.parent == parent && p.kind == kind && p.name == name
            });
            let index = match matched {
                Some(index) => {
                    let param = &mut self.params[index];
                    param.raw = raw;
                    param.state = ParamState::Overwritten;
                    param.name_index = Some(name_index);
                    index
                }
                None => {
                    let schema = self.resolve_added(name, parent, sources, diagnostics);
                    self.params.push(ActorParam {
                        name: name.to_string(),
                        name_index: Some(name_index),
                        kind,
                        raw,
                        value: ParamValue::Raw(raw),
                        parent,
                        state: ParamState::Added,
                        schema,
                        field_class: None,
                        load_order: None,
                    });
                    self.params.len() - 1
                }
            };
            self.params[index].load_order = Some(*order);
            *order += 1;
            if child_count > 0 {
                self.load_params(reader, child_count, Some(index), sources, order, diagnostics)?;
            }
        }
        Ok(())
    }

    /// Schema slot for a parameter that matched no default. Top-level
    /// parameters resolve against the actor's class, struct fields against
    /// the struct's class.
    fn resolve_added(
        &self,
        name: &str,
        parent: Option<usize>,
        sources: &LoadSources,
        diagnostics: &mut Diagnostics,
    ) -> Option<PropertyRef> {
        let class = match parent {
            None => self.class?,
            Some(p) => self.params[p].field_class?,
        };
        match sources.schema.resolve(class, name) {
            Ok(found) => Some(found.source),
            Err(_) => {
                diagnostics.warn(Warning::UnresolvedParameter {
                    actor: self.name.clone(),
                    parameter: name.to_string(),
                });
                None
            }
        }
    }

    /// Resolve stored values of loaded parameters. Runs once every actor of
    /// the level exists.
    pub(crate) fn populate(&mut self, strings: &ActorStrings) {
        for param in self.params.iter_mut().filter(|p| p.is_saved()) {
            let text = match param.kind {
                ParamType::Enum => strings.astr.get((param.raw & 0xFFFF) as usize),
                ParamType::String => strings.pstr.get(param.raw as usize),
                _ => None,
            };
            param.value = ParamValue::from_raw(param.kind, param.raw, text);
        }
    }

    /// Saved children of `parent`, loaded ones in stream order first.
    fn saved_children(&self, parent: Option<usize>) -> Vec<usize> {
        let mut children: Vec<usize> = (0..self.params.len())
            .filter(|&i| self.params[i].parent == parent && self.params[i].is_saved())
            .collect();
        children.sort_by_key(|&i| (self.params[i].load_order.unwrap_or(usize::MAX), i));
        children
    }

    pub(crate) fn encode(&self, w: &mut ByteWriter, strings: &mut ActorStrings) -> Result<()> {
        w.u16(self.name_index);
        w.mat4(&self.transform.to_slice());
        let roots = self.saved_children(None);
        let count = u16::try_from(roots.len()).map_err(|_| {
            AssetError::InvalidInput(format!("actor '{}' has {} parameters", self.name, roots.len()))
        })?;
        w.u16(count);
        for index in roots {
            self.encode_param(index, w, strings)?;
        }
        Ok(())
    }

    fn encode_param(&self, index: usize, w: &mut ByteWriter, strings: &mut ActorStrings) -> Result<()> {
        let param = &self.params[index];
        let name_index = match param.name_index {
            Some(i) if strings.astr.get(i as usize) == Some(param.name.as_str()) => i,
            _ => intern(&mut strings.astr, &param.name)?,
        };
        let children = self.saved_children(Some(index));
        let child_count = u8::try_from(children.len()).map_err(|_| {
            AssetError::InvalidInput(format!(
                "parameter '{}' of actor '{}' has {} fields",
                param.name,
                self.name,
                children.len()
            ))
        })?;
        let kind = u8::try_from(param.kind.raw()).map_err(|_| {
            AssetError::InvalidInput(format!("parameter type {} does not fit a byte", param.kind.raw()))
        })?;
        w.u16(name_index);
        w.u8(kind);
        w.u8(child_count);
        w.u32(param.raw);
        for child in children {
            self.encode_param(child, w, strings)?;
        }
        Ok(())
    }

    /// Arena index of the parameter at `path`, outermost name first.
    pub fn find_param(&self, path: &[&str]) -> Option<usize> {
        let mut parent = None;
        for name in path {
            let index = self
                .params
                .iter()
                .position(|p| p.parent == parent && p.name == *name)?;
            parent = Some(index);
        }
        parent
    }

    pub fn param(&self, path: &[&str]) -> Option<&ActorParam> {
        self.find_param(path).map(|i| &self.params[i])
    }

    pub fn children(&self, parent: Option<usize>) -> impl Iterator<Item = (usize, &ActorParam)> {
        self.params
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.parent == parent)
    }

    /// Set the parameter at `path`. A class default becomes overwritten
    /// along with the structs enclosing it; a path the actor does not have
    /// yet is added under its (existing) parent.
    pub fn set_param(&mut self, path: &[&str], value: ParamValue, strings: &mut ActorStrings) -> Result<usize> {
        let (last, outer) = path
            .split_last()
            .ok_or_else(|| AssetError::InvalidInput("empty parameter path".to_string()))?;
        let index = match self.find_param(path) {
            Some(index) => {
                let param = &self.params[index];
                if let Some(kind) = value.kind() {
                    if kind != param.kind {
                        return Err(AssetError::InvalidInput(format!(
                            "parameter '{}' is {:?}, not {:?}",
                            param.name, param.kind, kind
                        )));
                    }
                }
                index
            }
            None => {
                let parent = match outer {
                    [] => None,
                    _ => Some(
                        self.find_param(outer)
                            .ok_or_else(|| AssetError::UnknownParameter(outer.join(":")))?,
                    ),
                };
                let kind = value.kind().ok_or_else(|| {
                    AssetError::InvalidInput(format!("cannot infer the type of new parameter '{}'", last))
                })?;
                self.params.push(ActorParam {
                    name: last.to_string(),
                    name_index: None,
                    kind,
                    raw: 0,
                    value: ParamValue::Raw(0),
                    parent,
                    state: ParamState::Added,
                    schema: None,
                    field_class: None,
                    load_order: None,
                });
                self.params.len() - 1
            }
        };

        let raw = value.to_raw(self.params[index].raw, strings)?;
        let param = &mut self.params[index];
        param.raw = raw;
        param.value = value;
        let mut current = Some(index);
        while let Some(i) = current {
            let param = &mut self.params[i];
            if param.state == ParamState::Default {
                param.state = ParamState::Overwritten;
            }
            current = param.parent;
        }
        Ok(index)
    }

    /// Switch to `class_name` (or `class_name` + `Actor`), dropping every
    /// parameter in favour of the new class defaults.
    pub fn change_class(
        &mut self,
        class_name: &str,
        schema: &SchemaTable,
        adef_strings: &StringTable,
        strings: &mut ActorStrings,
    ) -> Result<()> {
        let class = schema
            .class_for_actor(class_name)
            .ok_or_else(|| AssetError::UnknownClass(class_name.to_string()))?;
        let name = schema.class_name(class).unwrap_or(class_name).to_string();
        let name_index = intern(&mut strings.astr, &name)?;
        let transform = self.transform;
        *self = Actor::with_defaults(&name, name_index, class, schema, adef_strings);
        self.transform = transform;
        Ok(())
    }

    pub fn saved_param_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_saved()).count()
    }
}
