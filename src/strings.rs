//! Index-referenced string pools (`STR `, `ASTR`, `PSTR`).
//!
//! Payload layout (after the chunk header):
//! ```text
//! [4]      blob size (multiple of 4 on encode)
//! [blob]   null-terminated Shift-JIS strings
//! [4]      count
//! [count × 4]  byte offset of each string inside the blob
//! ```

use crate::chunk::leaf_block;
use crate::error::{AssetError, Result};
use crate::io::{cstr_at, ByteReader, ByteWriter};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    pub strings: Vec<String>,
    /// Blob offsets as last decoded or encoded. Not necessarily increasing
    /// after a decode; always increasing after an encode.
    pub offsets: Vec<u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let blob_size = reader.i32()?;
        if blob_size < 0 {
            return Err(AssetError::corrupt(0, format!("negative string blob size {}", blob_size)));
        }
        let blob = reader.bytes(blob_size as usize)?;
        let count = reader.i32()?.max(0) as usize;
        let mut table = StringTable {
            strings: Vec::with_capacity(count),
            offsets: Vec::with_capacity(count),
        };
        for _ in 0..count {
            let offset = reader.i32()?;
            if offset < 0 || offset as usize > blob.len() {
                return Err(AssetError::corrupt(
                    reader.position() - 4,
                    format!("string offset {:#x} outside {:#x}-byte blob", offset, blob.len()),
                ));
            }
            table.strings.push(cstr_at(blob, offset as usize)?);
            table.offsets.push(offset as u32);
        }
        Ok(table)
    }

    /// Payload bytes; refreshes `offsets`.
    pub fn encode(&mut self) -> Vec<u8> {
        let mut blob = ByteWriter::new();
        self.offsets.clear();
        for s in &self.strings {
            self.offsets.push(blob.len() as u32);
            blob.cstr(s);
        }
        blob.align(4);

        let mut out = ByteWriter::new();
        out.u32(blob.len() as u32);
        out.bytes(blob.as_slice());
        out.u32(self.strings.len() as u32);
        for &offset in &self.offsets {
            out.u32(offset);
        }
        out.into_inner()
    }

    /// Complete block with header, e.g. `b"ASTR"`.
    pub fn encode_block(&mut self, tag: &[u8; 4]) -> Vec<u8> {
        leaf_block(tag, &self.encode())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.strings.get(index).map(String::as_str)
    }

    pub fn index_of(&self, text: &str) -> Option<usize> {
        self.strings.iter().position(|s| s == text)
    }

    /// Index of `text`, appending it on first use.
    pub fn intern(&mut self, text: &str) -> usize {
        match self.index_of(text) {
            Some(index) => index,
            None => {
                self.strings.push(text.to_string());
                self.strings.len() - 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_packs_aligned_blob() {
        let mut table = StringTable::new();
        assert_eq!(table.intern("Hero"), 0);
        assert_eq!(table.intern("Door"), 1);
        assert_eq!(table.intern("Hero"), 0);
        let payload = table.encode();
        // "Hero\0Door\0" = 10 bytes, padded to 12
        assert_eq!(&payload[..4], &12u32.to_le_bytes());
        assert_eq!(table.offsets, vec![0, 5]);
        assert_eq!(payload.len(), 4 + 12 + 4 + 8);

        let decoded = StringTable::decode(&payload).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn decode_tolerates_shared_offsets() {
        let mut w = ByteWriter::new();
        w.u32(4);
        w.bytes(b"abc\0");
        w.u32(2);
        w.u32(0);
        w.u32(1);
        let table = StringTable::decode(w.as_slice()).unwrap();
        assert_eq!(table.strings, vec!["abc".to_string(), "bc".to_string()]);
    }

    #[test]
    fn offset_outside_blob_is_corrupt() {
        let mut w = ByteWriter::new();
        w.u32(4);
        w.bytes(b"abc\0");
        w.u32(1);
        w.u32(9);
        assert!(StringTable::decode(w.as_slice()).is_err());
    }
}
