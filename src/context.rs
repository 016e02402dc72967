//! Per-session state shared by the codecs.
//!
//! One `AssetContext` is built per editing session and borrowed by every
//! load and save. It owns the actor class schema, the enum dictionary and
//! the warnings collected so far.

use std::collections::BTreeMap;
use std::path::Path;

use crate::actor::adef::Adef;
use crate::actor::schema::SchemaTable;
use crate::error::{Diagnostics, Result};
use crate::level::models::ModelDirectory;

/// Enum name → allowed values, in declaration order.
pub type EnumDictionary = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default)]
pub struct AssetContext {
    adef: Adef,
    schema: SchemaTable,
    enums: EnumDictionary,
    models: Option<ModelDirectory>,
    pub diagnostics: Diagnostics,
}

impl AssetContext {
    pub fn new(adef: Adef) -> Result<Self> {
        let schema = SchemaTable::build(&adef)?;
        let enums = adef.enum_dictionary();
        Ok(AssetContext {
            adef,
            schema,
            enums,
            models: None,
            diagnostics: Diagnostics::new(),
        })
    }

    /// Context with no class definitions; every actor loads with its
    /// parameters kept as added.
    pub fn without_classes() -> Self {
        Self::default()
    }

    /// Merge a JSON sidecar of the form `{ "Param": ["VALUE", ...] }`.
    pub fn with_enum_overrides(mut self, path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let overrides: EnumDictionary = serde_json::from_str(&text)?;
        log::info!(
            "{} enum overrides from {}",
            overrides.len(),
            path.as_ref().display()
        );
        self.merge_enums(&overrides);
        Ok(self)
    }

    pub fn with_asset_root(mut self, root: impl AsRef<Path>) -> Self {
        self.models = Some(ModelDirectory::new(root));
        self
    }

    pub fn adef(&self) -> &Adef {
        &self.adef
    }

    pub fn schema(&self) -> &SchemaTable {
        &self.schema
    }

    pub fn enums(&self) -> &EnumDictionary {
        &self.enums
    }

    pub fn enum_values(&self, name: &str) -> &[String] {
        self.enums.get(name).map_or(&[], Vec::as_slice)
    }

    pub fn models(&self) -> Option<&ModelDirectory> {
        self.models.as_ref()
    }

    /// Additive union; existing values keep their position.
    pub fn merge_enums(&mut self, other: &EnumDictionary) {
        for (name, values) in other {
            let known = self.enums.entry(name.clone()).or_default();
            for value in values {
                if !known.contains(value) {
                    known.push(value.clone());
                }
            }
        }
    }
}
