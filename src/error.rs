use std::fmt;
use std::io;

use thiserror::Error;

/// Asset codec error types
#[derive(Error, Debug)]
pub enum AssetError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The buffer does not start with the expected magic. Format probes
    /// turn this into `Ok(None)`.
    #[error("not a {expected} stream (found {found:?})")]
    NotThisFormat { expected: &'static str, found: String },

    /// A read or seek would run past the end of the buffer
    #[error("truncated data: {wanted} bytes wanted at offset {offset:#x}, buffer is {len:#x} bytes")]
    Truncated { offset: usize, wanted: usize, len: usize },

    /// Structurally invalid data at a specific position
    #[error("corrupt data at offset {offset:#x}: {message}")]
    Corrupt { offset: usize, message: String },

    #[error("unknown actor class '{0}'")]
    UnknownClass(String),

    #[error("unknown actor parameter '{0}'")]
    UnknownParameter(String),

    /// Caller-supplied structure cannot be encoded
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("enum override file: {0}")]
    Json(#[from] serde_json::Error),
}

impl AssetError {
    pub fn corrupt(offset: usize, message: impl Into<String>) -> Self {
        AssetError::Corrupt {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for asset codec operations
pub type Result<T> = std::result::Result<T, AssetError>;

/// A non-fatal finding raised while decoding. Known shipped assets trip
/// several of these, so they never abort a load.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Material LOD flags equal to 7 mean "never render"
    NeverRenderMaterial { material: usize },
    CellFlagsOutOfRange { cell: usize, flags: u32 },
    NodeListMismatch {
        cell: usize,
        stored: Vec<u16>,
        derived: Vec<u16>,
    },
    DegenerateAiCell { map: usize, cell: usize },
    UnknownActorClass { actor: String },
    UnresolvedParameter { actor: String, parameter: String },
    /// Actor, spline, AI map or enum-string index past the end of its table
    DanglingReference { actor: String, parameter: String, index: u32 },
    UnknownBlock { tag: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ChecksumMismatch { expected, actual } => write!(
                f,
                "PK2 checksum mismatch: header says {:#010x}, output sums to {:#010x}",
                expected, actual
            ),
            Warning::NeverRenderMaterial { material } => {
                write!(f, "material {} has LOD flags 0x7 (never rendered)", material)
            }
            Warning::CellFlagsOutOfRange { cell, flags } => {
                write!(f, "portal cell {} has flags {:#x} above 0xff", cell, flags)
            }
            Warning::NodeListMismatch {
                cell,
                stored,
                derived,
            } => write!(
                f,
                "portal cell {} node list {:?} does not match derived {:?}",
                cell, stored, derived
            ),
            Warning::DegenerateAiCell { map, cell } => {
                write!(f, "AI map {} cell {} has fewer than 3 vertices, dropped", map, cell)
            }
            Warning::UnknownActorClass { actor } => {
                write!(f, "actor '{}' has no matching class", actor)
            }
            Warning::UnresolvedParameter { actor, parameter } => write!(
                f,
                "actor '{}' parameter '{}' not found in class schema, kept as added",
                actor, parameter
            ),
            Warning::DanglingReference {
                actor,
                parameter,
                index,
            } => write!(
                f,
                "actor '{}' parameter '{}' refers to missing index {}",
                actor, parameter, index
            ),
            Warning::UnknownBlock { tag } => write!(f, "unrecognised block '{}' passed through", tag),
        }
    }
}

/// Warnings collected over one decode/encode session.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.warnings.extend(other.warnings);
    }

    pub fn take(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }
}
