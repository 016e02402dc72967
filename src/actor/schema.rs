//! Class hierarchy resolved once per ADEF.
//!
//! For every class the table holds its ancestor chain, a name → property
//! map where the most-derived declaration wins, and the flattened default
//! parameter tree an actor of that class starts from.

use std::collections::HashMap;

use crate::error::{AssetError, Result};

use super::adef::{Adef, ClassProperty, ParamType};

/// Property name retried when a lookup misses.
pub const FLAGS_PROPERTY: &str = "Flags";

/// Guards struct-typed properties that (directly or not) contain themselves.
const MAX_STRUCT_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Own,
    Exposed,
}

/// Where a property is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRef {
    pub class: usize,
    pub tier: Tier,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedProperty {
    pub source: PropertyRef,
    pub property: ClassProperty,
}

/// One node of a class's default parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultParam {
    pub name: String,
    pub kind: ParamType,
    /// Default value; enum and actor defaults of 0 read as 0xFFFF
    pub value: u32,
    pub parent: Option<usize>,
    /// Class describing a struct parameter's fields
    pub field_class: Option<usize>,
    /// Number of fields a struct parameter carries by default
    pub field_count: usize,
    pub source: PropertyRef,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaTable {
    names: Vec<String>,
    by_name: HashMap<String, usize>,
    /// Ancestors, root first, ending with the class itself
    chains: Vec<Vec<usize>>,
    lookups: Vec<HashMap<String, ResolvedProperty>>,
    defaults: Vec<Vec<DefaultParam>>,
}

impl SchemaTable {
    pub fn build(adef: &Adef) -> Result<Self> {
        let count = adef.classes.len();
        let mut table = SchemaTable::default();

        for (index, class) in adef.classes.iter().enumerate() {
            let name = adef.string(class.name).unwrap_or_default().to_string();
            table.by_name.entry(name.clone()).or_insert(index);
            table.names.push(name);
        }

        for index in 0..count {
            let mut chain = vec![index];
            let mut current = index;
            while let Some(parent) = adef.classes[current].parent {
                let parent = parent as usize;
                if parent >= count {
                    return Err(AssetError::corrupt(
                        0,
                        format!("class '{}' has parent {} of {}", table.names[current], parent, count),
                    ));
                }
                if chain.len() > count {
                    return Err(AssetError::corrupt(
                        0,
                        format!("class '{}' inherits from itself", table.names[index]),
                    ));
                }
                chain.push(parent);
                current = parent;
            }
            chain.reverse();
            table.chains.push(chain);
        }

        for index in 0..count {
            let mut lookup = HashMap::new();
            for (name, resolved) in table.level_properties(adef, index) {
                lookup.insert(name, resolved);
            }
            table.lookups.push(lookup);
        }

        for index in 0..count {
            let mut defaults = Vec::new();
            table.emit_defaults(adef, index, None, 0, &mut defaults)?;
            table.defaults.push(defaults);
        }
        log::debug!("resolved schema for {} classes", count);
        Ok(table)
    }

    /// Properties visible on `class`, in declaration order from the root
    /// ancestor down. A redeclared name replaces the inherited entry in place.
    fn level_properties(&self, adef: &Adef, class: usize) -> Vec<(String, ResolvedProperty)> {
        let mut out: Vec<(String, ResolvedProperty)> = Vec::new();
        for &k in &self.chains[class] {
            let declared = &adef.classes[k];
            let tiers = [(Tier::Own, &declared.own), (Tier::Exposed, &declared.exposed)];
            for (tier, properties) in tiers {
                for (index, property) in properties.iter().enumerate() {
                    let name = adef.string(property.name).unwrap_or_default().to_string();
                    let resolved = ResolvedProperty {
                        source: PropertyRef { class: k, tier, index },
                        property: *property,
                    };
                    match out.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 = resolved,
                        None => out.push((name, resolved)),
                    }
                }
            }
        }
        out
    }

    fn emit_defaults(
        &self,
        adef: &Adef,
        class: usize,
        parent: Option<usize>,
        depth: usize,
        out: &mut Vec<DefaultParam>,
    ) -> Result<()> {
        if depth > MAX_STRUCT_DEPTH {
            return Err(AssetError::corrupt(
                0,
                format!("struct properties of class '{}' nest too deeply", self.names[class]),
            ));
        }
        for (name, resolved) in self.level_properties(adef, class) {
            let property = resolved.property;
            let value = match property.kind {
                ParamType::Enum | ParamType::Actor if property.value == 0 => 0xFFFF,
                _ => property.value,
            };
            let field_class = (property.kind == ParamType::Struct)
                .then_some(property.class_ref as usize);
            if let Some(field_class) = field_class {
                if field_class >= adef.classes.len() {
                    return Err(AssetError::corrupt(
                        0,
                        format!("property '{}' refers to missing class {}", name, field_class),
                    ));
                }
            }
            let index = out.len();
            out.push(DefaultParam {
                name,
                kind: property.kind,
                value,
                parent,
                field_class,
                field_count: field_class.map_or(0, |c| adef.classes[c].property_count()),
                source: resolved.source,
            });
            if let Some(field_class) = field_class {
                self.emit_defaults(adef, field_class, Some(index), depth + 1, out)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn class_name(&self, class: usize) -> Option<&str> {
        self.names.get(class).map(String::as_str)
    }

    pub fn class_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Class for an actor named `name`; actor names may drop the `Actor`
    /// suffix of their class.
    pub fn class_for_actor(&self, name: &str) -> Option<usize> {
        self.class_index(name)
            .or_else(|| self.class_index(&format!("{}Actor", name)))
    }

    pub fn chain(&self, class: usize) -> &[usize] {
        self.chains.get(class).map_or(&[], Vec::as_slice)
    }

    pub fn lookup(&self, class: usize, name: &str) -> Option<ResolvedProperty> {
        self.lookups.get(class)?.get(name).copied()
    }

    /// Most-derived declaration of `name`, retrying once with `Flags` when
    /// the class has no such property.
    pub fn resolve(&self, class: usize, name: &str) -> Result<ResolvedProperty> {
        if let Some(found) = self.lookup(class, name) {
            return Ok(found);
        }
        if name != FLAGS_PROPERTY {
            if let Some(found) = self.lookup(class, FLAGS_PROPERTY) {
                log::debug!("'{}' not declared, using '{}'", name, FLAGS_PROPERTY);
                return Ok(found);
            }
        }
        Err(AssetError::UnknownParameter(name.to_string()))
    }

    pub fn defaults(&self, class: usize) -> &[DefaultParam] {
        self.defaults.get(class).map_or(&[], Vec::as_slice)
    }
}
