//! Binary primitives shared by every codec.
//!
//! All counts, sizes, indices and floats in the asset formats are stored
//! little-endian, the console's native order. The only big-endian data is the
//! PK2 control stream, read through the explicit `*_be` methods.
//!
//! Strings are Shift-JIS, either null-terminated or in fixed-width,
//! null-padded fields.

use std::io::{Cursor, Read, Seek, SeekFrom};

use binrw::{BinRead, BinWrite};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{AssetError, Result};

/// On-disk byte order of every multi-byte field.
pub type FileOrder = byteorder::LittleEndian;

// ============================================================================
// Reading
// ============================================================================

/// Bounds-checked cursor over an in-memory asset.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Reader positioned at `offset`.
    pub fn at(data: &'a [u8], offset: usize) -> Result<Self> {
        let mut reader = Self::new(data);
        reader.seek(offset)?;
        Ok(reader)
    }

    pub fn data(&self) -> &'a [u8] {
        self.cursor.get_ref()
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn remaining(&self) -> usize {
        self.len().saturating_sub(self.position())
    }

    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.len() {
            return Err(AssetError::Truncated {
                offset,
                wanted: 0,
                len: self.len(),
            });
        }
        self.cursor.seek(SeekFrom::Start(offset as u64))?;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.ensure(count)?;
        self.seek(self.position() + count)
    }

    fn ensure(&self, wanted: usize) -> Result<()> {
        if self.remaining() < wanted {
            return Err(AssetError::Truncated {
                offset: self.position(),
                wanted,
                len: self.len(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.cursor.read_u16::<FileOrder>()?)
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.cursor.read_i16::<FileOrder>()?)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<FileOrder>()?)
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.cursor.read_i32::<FileOrder>()?)
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.cursor.read_f32::<FileOrder>()?)
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn vec3(&mut self) -> Result<[f32; 3]> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn vec4(&mut self) -> Result<[f32; 4]> {
        Ok([self.f32()?, self.f32()?, self.f32()?, self.f32()?])
    }

    pub fn bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.ensure(count)?;
        let start = self.position();
        let data: &'a [u8] = self.cursor.get_ref();
        self.cursor.seek(SeekFrom::Current(count as i64))?;
        Ok(&data[start..start + count])
    }

    pub fn read_exact_into(&mut self, out: &mut [u8]) -> Result<()> {
        self.ensure(out.len())?;
        self.cursor.read_exact(out)?;
        Ok(())
    }

    /// Fixed-layout record declared with `#[binrw]`.
    pub fn record<T>(&mut self) -> Result<T>
    where
        T: BinRead,
        for<'b> T::Args<'b>: Default,
    {
        let start = self.position();
        let len = self.len();
        T::read_le(&mut self.cursor).map_err(|e| {
            if e.is_eof() {
                AssetError::Truncated {
                    offset: start,
                    wanted: std::mem::size_of::<T>(),
                    len,
                }
            } else {
                AssetError::corrupt(start, e.to_string())
            }
        })
    }

    /// Four raw bytes, for chunk tags.
    pub fn tag(&mut self) -> Result<[u8; 4]> {
        let mut tag = [0u8; 4];
        self.read_exact_into(&mut tag)?;
        Ok(tag)
    }

    /// Fixed-width null-padded string field.
    pub fn fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(decode_sjis(&raw[..end]))
    }

    /// Null-terminated string at the current position; consumes the terminator.
    pub fn cstr(&mut self) -> Result<String> {
        let rest = &self.data()[self.position()..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = decode_sjis(&rest[..end]);
        let consumed = (end + 1).min(rest.len());
        self.skip(consumed)?;
        Ok(s)
    }
}

/// Null-terminated string starting at `offset` inside `data`. Running off the
/// end of the buffer terminates the string.
pub fn cstr_at(data: &[u8], offset: usize) -> Result<String> {
    if offset > data.len() {
        return Err(AssetError::Truncated {
            offset,
            wanted: 1,
            len: data.len(),
        });
    }
    let rest = &data[offset..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Ok(decode_sjis(&rest[..end]))
}

pub fn decode_sjis(raw: &[u8]) -> String {
    let (text, _, _) = encoding_rs::SHIFT_JIS.decode(raw);
    text.into_owned()
}

pub fn encode_sjis(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(text);
    bytes.into_owned()
}

// ============================================================================
// Writing
// ============================================================================

/// Growable output buffer with the asset byte order baked in.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Element count stored as a u16; fails instead of truncating.
    pub fn count_u16(&mut self, len: usize, what: &str) -> Result<()> {
        let count = u16::try_from(len)
            .map_err(|_| AssetError::InvalidInput(format!("{} {} exceed the u16 count field", len, what)))?;
        self.u16(count);
        Ok(())
    }

    pub fn u16(&mut self, v: u16) {
        // Writing into a Vec cannot fail.
        let _ = self.buf.write_u16::<FileOrder>(v);
    }

    pub fn i16(&mut self, v: i16) {
        let _ = self.buf.write_i16::<FileOrder>(v);
    }

    pub fn u32(&mut self, v: u32) {
        let _ = self.buf.write_u32::<FileOrder>(v);
    }

    pub fn i32(&mut self, v: i32) {
        let _ = self.buf.write_i32::<FileOrder>(v);
    }

    pub fn f32(&mut self, v: f32) {
        let _ = self.buf.write_f32::<FileOrder>(v);
    }

    pub fn u16_be(&mut self, v: u16) {
        let _ = self.buf.write_u16::<BigEndian>(v);
    }

    pub fn u32_be(&mut self, v: u32) {
        let _ = self.buf.write_u32::<BigEndian>(v);
    }

    pub fn vec3(&mut self, v: [f32; 3]) {
        v.iter().for_each(|&c| self.f32(c));
    }

    pub fn vec4(&mut self, v: [f32; 4]) {
        v.iter().for_each(|&c| self.f32(c));
    }

    pub fn mat4(&mut self, m: &[f32; 16]) {
        m.iter().for_each(|&c| self.f32(c));
    }

    pub fn bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Append a `#[binrw]` record. Fails when a computed field (a count)
    /// does not fit its on-disk width.
    pub fn record<T>(&mut self, value: &T) -> Result<()>
    where
        T: BinWrite,
        for<'b> T::Args<'b>: Default,
    {
        let mut cursor = Cursor::new(&mut self.buf);
        cursor.set_position(cursor.get_ref().len() as u64);
        value
            .write_le(&mut cursor)
            .map_err(|e| AssetError::InvalidInput(e.to_string()))
    }

    pub fn zeros(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, 0);
    }

    /// Fixed-width null-padded string field; fails if the encoded text does
    /// not fit.
    pub fn fixed_str(&mut self, text: &str, width: usize) -> Result<()> {
        let encoded = encode_sjis(text);
        if encoded.len() > width {
            return Err(AssetError::InvalidInput(format!(
                "string '{}' is too long (max length {:#x})",
                text, width
            )));
        }
        self.bytes(&encoded);
        self.zeros(width - encoded.len());
        Ok(())
    }

    pub fn cstr(&mut self, text: &str) {
        let encoded = encode_sjis(text);
        self.bytes(&encoded);
        self.u8(0);
    }

    /// Pad with zeros up to the next multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let padding = padding_to(self.buf.len(), alignment);
        self.zeros(padding);
    }

    /// Overwrite a previously written u32 at `offset`.
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&to_file_u32(v));
    }
}

fn to_file_u32(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Bytes needed to bring `len` up to a multiple of `alignment`.
pub fn padding_to(len: usize, alignment: usize) -> usize {
    (alignment - len % alignment) % alignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_bounds_checked() {
        let data = [1u8, 0, 0];
        let mut reader = ByteReader::new(&data);
        assert!(matches!(reader.u32(), Err(AssetError::Truncated { wanted: 4, .. })));
        assert_eq!(reader.u16().unwrap(), 1);
        assert!(reader.seek(4).is_err());
    }

    #[test]
    fn file_order_is_little_endian() {
        let mut w = ByteWriter::new();
        w.u32(0x1234_5678);
        w.u32_be(0x1234_5678);
        assert_eq!(w.as_slice(), &[0x78, 0x56, 0x34, 0x12, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn shift_jis_strings() {
        let mut w = ByteWriter::new();
        w.cstr("ロボット");
        w.fixed_str("Hero", 8).unwrap();
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.cstr().unwrap(), "ロボット");
        assert_eq!(r.fixed_str(8).unwrap(), "Hero");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn align_pads_to_multiple() {
        let mut w = ByteWriter::new();
        w.cstr("abc");
        w.align(4);
        assert_eq!(w.len(), 4);
        w.u8(1);
        w.align(4);
        assert_eq!(w.len(), 8);
        assert!(ByteWriter::new().fixed_str("toolong", 4).is_err());
    }

    #[test]
    fn oversized_counts_are_rejected() {
        let mut w = ByteWriter::new();
        w.count_u16(0xFFFF, "edges").unwrap();
        assert!(matches!(w.count_u16(0x1_0000, "edges"), Err(AssetError::InvalidInput(_))));
        assert_eq!(w.as_slice(), &[0xFF, 0xFF]);
    }
}
