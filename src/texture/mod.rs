//! Texture codecs: TP2 files and the colour quantizer used to author them.

pub mod quantizer;
pub mod tp2;

pub use tp2::{PaletteLayout, PixelFormat, Tp2Texture};
