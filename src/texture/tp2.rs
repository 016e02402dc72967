//! TP2 texture files.
//!
//! ```text
//! 0x00  "TP2\0"
//! 0x04  u16 version, u16 marker (0xFFC..0xFFE)
//! 0x08  u32 header size (0x24, or 0x44 with a 32-byte name at 0x10)
//! 0x0C  u32 total size
//! info  u16 width, u16 height, u8 format, u8 bit depth, u32 pixel bytes,
//!       u16 colour count, u8 0, u8 palette depth, u16 palette bytes, u32 flags
//! ```
//!
//! Pixels start at the header size and the palette follows the pixels.
//! Raw pixels and palette entries are stored R, G, B(, A).

use binrw::binrw;
use image::RgbaImage;

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};

use super::quantizer::{Color, OctreeQuantizer};

pub const TP2_MAGIC: &[u8; 4] = b"TP2\0";
pub const NAME_LEN: usize = 0x20;

const SHORT_HEADER: u32 = 0x24;
/// Header size of files that embed a name.
pub const NAMED_HEADER: u32 = 0x44;
const DEFAULT_VERSION: u16 = 4;
const DEFAULT_MARKER: u16 = 0xFFD;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub(crate) struct Tp2Header {
    pub version: u16,
    pub marker: u16,
    pub header_size: u32,
    pub total_size: u32,
}

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[brw(little)]
struct Tp2Info {
    width: u16,
    height: u16,
    format: u8,
    bit_depth: u8,
    data_size: u32,
    color_count: u16,
    reserved: u8,
    palette_depth: u8,
    palette_size: u16,
    flags: u32,
}

/// Read the fixed header that follows the magic. Used by the level
/// texture list to find where each embedded file ends.
pub(crate) fn read_header(reader: &mut ByteReader) -> Result<Tp2Header> {
    let at = reader.position();
    let magic = reader.tag()?;
    if &magic != TP2_MAGIC {
        return Err(AssetError::NotThisFormat {
            expected: "TP2",
            found: String::from_utf8_lossy(&magic).into_owned(),
        });
    }
    let header: Tp2Header = reader.record()?;
    if header.header_size != SHORT_HEADER && header.header_size != NAMED_HEADER {
        return Err(AssetError::corrupt(
            at + 8,
            format!("unexpected TP2 header size {:#x}", header.header_size),
        ));
    }
    Ok(header)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba32,
    Rgb24,
    Pal8,
    Pal4,
}

impl PixelFormat {
    /// The bit depth byte is authoritative; the format byte varies between
    /// exporters and is only consulted when the depth is unusual.
    fn from_info(info: &Tp2Info, at: usize) -> Result<Self> {
        match info.bit_depth {
            4 => return Ok(PixelFormat::Pal4),
            8 => return Ok(PixelFormat::Pal8),
            24 => return Ok(PixelFormat::Rgb24),
            32 => return Ok(PixelFormat::Rgba32),
            _ => {}
        }
        match info.format {
            0x00 => Ok(PixelFormat::Rgba32),
            0x01 => Ok(PixelFormat::Rgb24),
            0x04 | 0x13 => Ok(PixelFormat::Pal8),
            0x05 | 0x14 => Ok(PixelFormat::Pal4),
            _ if info.color_count > 16 => Ok(PixelFormat::Pal8),
            _ if info.color_count > 0 => Ok(PixelFormat::Pal4),
            other => Err(AssetError::corrupt(at, format!("unknown TP2 pixel format {:#x}", other))),
        }
    }

    pub fn bit_depth(self) -> u8 {
        match self {
            PixelFormat::Rgba32 => 32,
            PixelFormat::Rgb24 => 24,
            PixelFormat::Pal8 => 8,
            PixelFormat::Pal4 => 4,
        }
    }

    fn format_code(self) -> u8 {
        match self {
            PixelFormat::Rgba32 => 0x00,
            PixelFormat::Rgb24 => 0x01,
            PixelFormat::Pal8 => 0x04,
            PixelFormat::Pal4 => 0x05,
        }
    }

    pub fn is_paletted(self) -> bool {
        matches!(self, PixelFormat::Pal8 | PixelFormat::Pal4)
    }

    fn stored_len(self, pixel_count: usize) -> usize {
        match self {
            PixelFormat::Rgba32 => pixel_count * 4,
            PixelFormat::Rgb24 => pixel_count * 3,
            PixelFormat::Pal8 => pixel_count,
            PixelFormat::Pal4 => pixel_count.div_ceil(2),
        }
    }
}

/// Order of palette entries in the file. Shipped textures store entries
/// linearly; `Csm1` is the GS swizzle that swaps entries 8..16 and 16..24 of
/// every 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaletteLayout {
    #[default]
    Linear,
    Csm1,
}

impl PaletteLayout {
    /// Maps a stored slot to its logical colour index; its own inverse.
    fn slot(self, index: usize) -> usize {
        match self {
            PaletteLayout::Linear => index,
            PaletteLayout::Csm1 => match index & 0x18 {
                0x08 => index + 8,
                0x10 => index - 8,
                _ => index,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tp2Texture {
    pub name: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub version: u16,
    pub marker: u16,
    /// Raw format byte as stored, kept so re-encoding is lossless
    pub format_code: u8,
    pub flags: u32,
    /// 24 or 32; only meaningful for paletted formats
    pub palette_depth: u8,
    /// RGBA entries; 24-bit palettes read back with alpha 255
    pub palette: Vec<[u8; 4]>,
    /// One palette index per pixel for paletted formats, otherwise the
    /// stored RGB(A) bytes
    pub pixels: Vec<u8>,
}

impl Tp2Texture {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with_layout(bytes, PaletteLayout::Linear)
    }

    /// `Ok(None)` when `bytes` is not a TP2 file.
    pub fn probe(bytes: &[u8]) -> Result<Option<Self>> {
        match Self::decode(bytes) {
            Ok(texture) => Ok(Some(texture)),
            Err(AssetError::NotThisFormat { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn decode_with_layout(bytes: &[u8], layout: PaletteLayout) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let header = read_header(&mut reader)?;
        let name = if header.header_size == NAMED_HEADER {
            Some(reader.fixed_str(NAME_LEN)?)
        } else {
            None
        };
        let info_at = reader.position();
        let info: Tp2Info = reader.record()?;
        let format = PixelFormat::from_info(&info, info_at)?;
        let (width, height) = (info.width as u32, info.height as u32);
        let pixel_count = width as usize * height as usize;

        let stored = format.stored_len(pixel_count);
        reader.seek(header.header_size as usize)?;
        let raw = reader.bytes(stored.max(info.data_size as usize))?;
        let pixels = match format {
            PixelFormat::Pal4 => unpack_nibbles(&raw[..stored], pixel_count),
            _ => raw[..stored].to_vec(),
        };

        let mut palette = Vec::new();
        if format.is_paletted() && info.color_count > 0 {
            let count = info.color_count as usize;
            let stride = (info.palette_size as usize / count).clamp(3, 4);
            reader.seek(header.header_size as usize + info.data_size as usize)?;
            let block = reader.bytes(stride * count)?;
            palette = vec![[0, 0, 0, 255]; count];
            for (stored_slot, entry) in block.chunks_exact(stride).enumerate() {
                let logical = layout.slot(stored_slot);
                if let Some(color) = palette.get_mut(logical) {
                    color[..stride].copy_from_slice(entry);
                }
            }
        }

        log::debug!(
            "TP2 {}: {}x{} {:?}, {} palette entries",
            name.as_deref().unwrap_or("<unnamed>"),
            width,
            height,
            format,
            palette.len()
        );

        Ok(Tp2Texture {
            name,
            width,
            height,
            format,
            version: header.version,
            marker: header.marker,
            format_code: info.format,
            flags: info.flags,
            palette_depth: if format.is_paletted() { info.palette_depth } else { 0 },
            palette,
            pixels,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_with_layout(PaletteLayout::Linear)
    }

    pub fn encode_with_layout(&self, layout: PaletteLayout) -> Result<Vec<u8>> {
        let (width, height) = (
            u16::try_from(self.width).map_err(|_| too_large(self.width))?,
            u16::try_from(self.height).map_err(|_| too_large(self.height))?,
        );
        let pixel_count = self.width as usize * self.height as usize;
        let expected = match self.format {
            PixelFormat::Pal4 | PixelFormat::Pal8 => pixel_count,
            other => other.stored_len(pixel_count),
        };
        if self.pixels.len() != expected {
            return Err(AssetError::InvalidInput(format!(
                "{}x{} {:?} texture needs {} pixel bytes, has {}",
                self.width,
                self.height,
                self.format,
                expected,
                self.pixels.len()
            )));
        }

        let pixel_data = match self.format {
            PixelFormat::Pal4 => pack_nibbles(&self.pixels),
            _ => self.pixels.clone(),
        };

        let paletted = self.format.is_paletted();
        let stride = if self.palette_depth == 24 { 3 } else { 4 };
        let mut palette_data = Vec::new();
        if paletted {
            palette_data = vec![0u8; self.palette.len() * stride];
            for (logical, color) in self.palette.iter().enumerate() {
                let slot = layout.slot(logical);
                if let Some(entry) = palette_data.get_mut(slot * stride..(slot + 1) * stride) {
                    entry.copy_from_slice(&color[..stride]);
                }
            }
        }

        let header_size = if self.name.is_some() { NAMED_HEADER } else { SHORT_HEADER };
        let mut w = ByteWriter::new();
        w.bytes(TP2_MAGIC);
        w.record(&Tp2Header {
            version: self.version,
            marker: self.marker,
            header_size,
            total_size: header_size + (pixel_data.len() + palette_data.len()) as u32,
        })?;
        if let Some(name) = &self.name {
            w.fixed_str(name, NAME_LEN)?;
        }
        w.record(&Tp2Info {
            width,
            height,
            format: self.format_code,
            bit_depth: self.format.bit_depth(),
            data_size: pixel_data.len() as u32,
            color_count: if paletted { self.palette.len() as u16 } else { 0 },
            reserved: 0,
            palette_depth: if paletted { stride as u8 * 8 } else { 0 },
            palette_size: palette_data.len() as u16,
            flags: self.flags,
        })?;
        w.bytes(&pixel_data);
        w.bytes(&palette_data);
        Ok(w.into_inner())
    }

    pub fn to_rgba_image(&self) -> Result<RgbaImage> {
        let rgba: Vec<u8> = match self.format {
            PixelFormat::Rgba32 => self.pixels.clone(),
            PixelFormat::Rgb24 => self
                .pixels
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 255])
                .collect(),
            PixelFormat::Pal8 | PixelFormat::Pal4 => self
                .pixels
                .iter()
                .flat_map(|&i| self.palette.get(i as usize).copied().unwrap_or([0; 4]))
                .collect(),
        };
        RgbaImage::from_raw(self.width, self.height, rgba).ok_or_else(|| {
            AssetError::InvalidInput(format!(
                "pixel buffer does not fill a {}x{} image",
                self.width, self.height
            ))
        })
    }

    /// Quantize `image` to at most `limit` colours (capped at 256). Sixteen
    /// colours or fewer pack as 4-bit, otherwise 8-bit. The palette always
    /// carries alpha.
    pub fn from_rgba(image: &RgbaImage, name: Option<&str>, limit: usize) -> Self {
        let limit = limit.clamp(1, 256);
        let mut octree = OctreeQuantizer::new();
        for pixel in image.pixels() {
            octree.add_color(Color::from(pixel.0));
        }
        let palette: Vec<[u8; 4]> = octree.make_palette(limit).into_iter().map(Color::to_array).collect();
        let pixels = image
            .pixels()
            .map(|p| octree.palette_index(Color::from(p.0)) as u8)
            .collect();
        let format = if palette.len() > 16 {
            PixelFormat::Pal8
        } else {
            PixelFormat::Pal4
        };
        log::info!(
            "quantized {}x{} image to {} colours ({:?})",
            image.width(),
            image.height(),
            palette.len(),
            format
        );
        Tp2Texture {
            name: name.map(str::to_owned),
            width: image.width(),
            height: image.height(),
            format,
            version: DEFAULT_VERSION,
            marker: DEFAULT_MARKER,
            format_code: format.format_code(),
            flags: 1,
            palette_depth: 32,
            palette,
            pixels,
        }
    }

    pub fn encode_rgba(image: &RgbaImage, name: Option<&str>, limit: usize) -> Result<Vec<u8>> {
        Self::from_rgba(image, name, limit).encode()
    }
}

fn too_large(dimension: u32) -> AssetError {
    AssetError::InvalidInput(format!("texture dimension {} does not fit in 16 bits", dimension))
}

/// First pixel of each pair in the low nibble.
fn unpack_nibbles(packed: &[u8], pixel_count: usize) -> Vec<u8> {
    packed
        .iter()
        .flat_map(|&b| [b & 0xF, b >> 4])
        .take(pixel_count)
        .collect()
}

fn pack_nibbles(indices: &[u8]) -> Vec<u8> {
    indices
        .chunks(2)
        .map(|pair| (pair[0] & 0xF) | pair.get(1).map_or(0, |hi| (hi & 0xF) << 4))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker(colors: &[[u8; 4]], width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba(colors[((x + y * width) as usize) % colors.len()])
        })
    }

    #[test]
    fn two_colour_image_survives_a_round_trip() {
        let image = checker(&[[255, 0, 0, 255], [0, 0, 255, 64]], 4, 2);
        let bytes = Tp2Texture::encode_rgba(&image, None, 256).unwrap();
        assert_eq!(&bytes[..4], TP2_MAGIC);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0x24);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize, bytes.len());

        let texture = Tp2Texture::decode(&bytes).unwrap();
        assert_eq!(texture.format, PixelFormat::Pal4);
        assert_eq!(texture.palette.len(), 2);
        assert_eq!(texture.to_rgba_image().unwrap(), image);
        assert_eq!(texture.encode().unwrap(), bytes);
    }

    #[test]
    fn four_bit_pixels_put_the_first_pixel_in_the_low_nibble() {
        assert_eq!(pack_nibbles(&[1, 2, 3]), vec![0x21, 0x03]);
        assert_eq!(unpack_nibbles(&[0x21, 0x03], 3), vec![1, 2, 3]);
    }

    #[test]
    fn named_eight_bit_texture() {
        let colors: Vec<[u8; 4]> = (0..40u8).map(|i| [i * 6, 255 - i * 6, 0, 255]).collect();
        let image = checker(&colors, 8, 5);
        let bytes = Tp2Texture::encode_rgba(&image, Some("wall_a"), 256).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 0x44);

        let texture = Tp2Texture::decode(&bytes).unwrap();
        assert_eq!(texture.name.as_deref(), Some("wall_a"));
        assert_eq!(texture.format, PixelFormat::Pal8);
        assert_eq!(texture.pixels.len(), 40);
        assert_eq!(texture.to_rgba_image().unwrap(), image);
    }

    #[test]
    fn swizzled_palette_swaps_the_middle_blocks() {
        assert_eq!(PaletteLayout::Csm1.slot(8), 16);
        assert_eq!(PaletteLayout::Csm1.slot(16), 8);
        assert_eq!(PaletteLayout::Csm1.slot(40), 48);
        assert_eq!(PaletteLayout::Csm1.slot(7), 7);

        let colors: Vec<[u8; 4]> = (0..32u8).map(|i| [i * 7, i, 255 - i, 255]).collect();
        let texture = Tp2Texture::from_rgba(&checker(&colors, 8, 4), None, 256);
        let bytes = texture.encode_with_layout(PaletteLayout::Csm1).unwrap();
        assert_ne!(bytes, texture.encode().unwrap());
        let decoded = Tp2Texture::decode_with_layout(&bytes, PaletteLayout::Csm1).unwrap();
        assert_eq!(decoded.palette, texture.palette);
    }

    #[test]
    fn raw_rgb_pixels_decode_without_a_palette() {
        let mut w = ByteWriter::new();
        w.bytes(TP2_MAGIC);
        w.record(&Tp2Header {
            version: 4,
            marker: 0xFFC,
            header_size: 0x24,
            total_size: 0x24 + 6,
        })
        .unwrap();
        w.record(&Tp2Info {
            width: 2,
            height: 1,
            format: 0x01,
            bit_depth: 24,
            data_size: 6,
            ..Default::default()
        })
        .unwrap();
        w.bytes(&[10, 20, 30, 40, 50, 60]);
        let texture = Tp2Texture::decode(&w.into_inner()).unwrap();
        assert_eq!(texture.format, PixelFormat::Rgb24);
        let image = texture.to_rgba_image().unwrap();
        assert_eq!(image.get_pixel(1, 0).0, [40, 50, 60, 255]);
    }

    #[test]
    fn probe_rejects_other_files() {
        assert!(Tp2Texture::probe(b"P2M \0\0\0\0").unwrap().is_none());
        assert!(matches!(
            Tp2Texture::probe(b"TP2\0\x04\x00"),
            Err(AssetError::Truncated { .. })
        ));
    }
}
