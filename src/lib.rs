//! Codecs for Treasure Planet PS2 assets: LP2 levels, P2M and P2S models,
//! TP2 textures and ADEF actor class definitions.
//!
//! Every decoder takes the whole file as a byte slice and works out of it
//! with bounds-checked readers. Files may be PK2-compressed; decoders unwrap
//! them first. A load that depends on actor classes or enum values borrows
//! an [`AssetContext`], which also collects non-fatal [`Warning`]s.

pub mod actor;
pub mod chunk;
pub mod compression;
pub mod context;
pub mod error;
pub mod io;
pub mod level;
pub mod math;
pub mod model;
pub mod strings;
pub mod stripper;
pub mod texture;

pub use context::AssetContext;
pub use error::{AssetError, Diagnostics, Result, Warning};
pub use level::{Level, LevelSaveOptions};
pub use model::p2m::P2mModel;
pub use model::p2s::P2sModel;
pub use texture::Tp2Texture;
