//! Tagged-block container shared by every asset family.
//!
//! Layout:
//! ```text
//! [4 bytes]  tag (ASCII, e.g. "LEVL", "MAT ", "TP2\0")
//! [4 bytes]  size (u32, excludes these 8 header bytes)
//! [size]     payload: either more chunks (containers) or format data (leaves)
//! ...
//! "END " + u32(0) closes a container's child list
//! ```
//!
//! The scan is a flat walk: a container's payload is entered immediately,
//! a leaf (or an unrecognised tag) is skipped by its size, and `END ` markers
//! are stepped over until fewer than 4 bytes would remain after the tag.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;

use binrw::{binrw, BinRead};

use crate::error::{AssetError, Result};
use crate::io::ByteWriter;

pub const CHUNK_HEADER_SIZE: usize = 8;
pub const END_TAG: Tag = Tag(*b"END ");

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct ChunkHeader {
    pub tag: [u8; 4],
    pub size: u32,
}

/// Four-byte block tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const fn new(raw: &[u8; 4]) -> Self {
        Tag(*raw)
    }

    /// Tag text with trailing NUL padding removed.
    pub fn as_str(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }

    /// Printable ASCII, optionally NUL-padded. Anything else ends a scan.
    fn is_plausible(&self) -> bool {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(4);
        end > 0
            && self.0[..end].iter().all(|b| (0x20..0x7f).contains(b))
            && self.0[end..].iter().all(|&b| b == 0)
    }

    pub fn is_end(&self) -> bool {
        self.0.starts_with(b"END")
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// How a scanner treats a recognised tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Container,
    Leaf,
    Unknown,
}

/// Tag whitelist of one asset family. A pattern ending in `*` matches by
/// prefix (`"TEX*"` covers `"TEX "`).
#[derive(Debug, Clone, Copy)]
pub struct ChunkFamily {
    pub name: &'static str,
    pub containers: &'static [&'static str],
    pub leaves: &'static [&'static str],
}

impl ChunkFamily {
    pub fn classify(&self, tag: &Tag) -> ChunkKind {
        let text = String::from_utf8_lossy(&tag.0).into_owned();
        let matches = |pattern: &&str| match pattern.strip_suffix('*') {
            Some(prefix) => text.starts_with(prefix),
            None => text == *pattern,
        };
        if self.containers.iter().any(matches) {
            ChunkKind::Container
        } else if self.leaves.iter().any(matches) {
            ChunkKind::Leaf
        } else {
            ChunkKind::Unknown
        }
    }
}

pub const LEVEL_FAMILY: ChunkFamily = ChunkFamily {
    name: "LP2",
    containers: &["LEVL", "GMSH", "ACTR"],
    leaves: &[
        "INFO", "TEX*", "ANIM", "MAT ", "SECT", "NODE", "PVS ", "AIMP", "GRID", "SPLN", "LITE",
        "ASTR", "PSTR", "AINF",
    ],
};

pub const P2M_FAMILY: ChunkFamily = ChunkFamily {
    name: "P2M",
    containers: &["P2M*"],
    leaves: &["INFO", "SETT", "TEXT", "MATL", "MODL*"],
};

pub const P2S_FAMILY: ChunkFamily = ChunkFamily {
    name: "P2S",
    containers: &["P2S*"],
    leaves: &[
        "INFO", "SETT", "TEXT", "MATL", "SKEL", "CYCL", "JNTL", "MODL",
    ],
};

pub const ADEF_FAMILY: ChunkFamily = ChunkFamily {
    name: "ADEF",
    containers: &["ADEF"],
    leaves: &["INFO", "STR ", "ENUM", "CLAS"],
};

/// One block found by [`scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEntry {
    pub tag: Tag,
    /// Offset of the tag itself
    pub offset: usize,
    /// Offset of the first payload byte
    pub payload: usize,
    pub size: usize,
    /// Container nesting level, 0 for the root
    pub depth: usize,
    pub kind: ChunkKind,
}

impl ChunkEntry {
    pub fn payload_range(&self) -> std::ops::Range<usize> {
        self.payload..self.payload + self.size
    }

    /// Header plus payload, as stored.
    pub fn raw_range(&self) -> std::ops::Range<usize> {
        self.offset..self.payload + self.size
    }
}

/// Result of a scan, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkMap {
    pub entries: Vec<ChunkEntry>,
}

impl ChunkMap {
    /// Last block with this tag. A repeated tag shadows earlier ones.
    pub fn get(&self, tag: &[u8; 4]) -> Option<&ChunkEntry> {
        self.entries.iter().rev().find(|e| &e.tag.0 == tag)
    }

    pub fn payload<'a>(&self, data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
        self.get(tag).map(|e| &data[e.payload_range()])
    }

    pub fn raw<'a>(&self, data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
        self.get(tag).map(|e| &data[e.raw_range()])
    }

    /// Tag → payload offset, the shape most callers and tests want.
    pub fn payload_offsets(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|e| (e.tag.as_str(), e.payload))
            .collect()
    }

    pub fn unknown(&self) -> impl Iterator<Item = &ChunkEntry> {
        self.entries.iter().filter(|e| e.kind == ChunkKind::Unknown)
    }

    /// Render the block nesting as a tree.
    pub fn to_tree(&self, root_label: &str) -> ptree::item::StringItem {
        let mut builder = ptree::TreeBuilder::new(root_label.to_string());
        let mut open = 0usize;
        for entry in &self.entries {
            while open > entry.depth {
                builder.end_child();
                open -= 1;
            }
            let label = format!("{} @{:#x} ({:#x} bytes)", entry.tag, entry.offset, entry.size);
            if entry.kind == ChunkKind::Container {
                builder.begin_child(label);
                open += 1;
            } else {
                builder.add_empty_child(label);
            }
        }
        while open > 0 {
            builder.end_child();
            open -= 1;
        }
        builder.build()
    }
}

fn read_header(data: &[u8], offset: usize) -> Result<ChunkHeader> {
    if offset + CHUNK_HEADER_SIZE > data.len() {
        return Err(AssetError::Truncated {
            offset,
            wanted: CHUNK_HEADER_SIZE,
            len: data.len(),
        });
    }
    let mut cursor = Cursor::new(&data[offset..offset + CHUNK_HEADER_SIZE]);
    ChunkHeader::read(&mut cursor).map_err(|e| AssetError::corrupt(offset, e.to_string()))
}

/// Walk the block structure of `data` starting at offset 0.
///
/// Stops at the end of the buffer, at a final `END ` marker, or at bytes that
/// cannot be a tag. A block whose size runs past the buffer is an error.
pub fn scan(data: &[u8], family: &ChunkFamily) -> Result<ChunkMap> {
    scan_from(data, 0, family)
}

pub fn scan_from(data: &[u8], start: usize, family: &ChunkFamily) -> Result<ChunkMap> {
    let mut map = ChunkMap::default();
    let mut offset = start;
    let mut depth = 0usize;

    while offset + 4 <= data.len() {
        let tag = Tag([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        if !tag.is_plausible() {
            break;
        }
        if tag.is_end() {
            let after_tag = offset + 4;
            if data.len() - after_tag > 4 {
                depth = depth.saturating_sub(1);
                offset = after_tag + 4;
                continue;
            }
            break;
        }

        let header = read_header(data, offset)?;
        let size = header.size as usize;
        let payload = offset + CHUNK_HEADER_SIZE;
        let kind = family.classify(&tag);
        if payload + size > data.len() {
            return Err(AssetError::corrupt(
                offset,
                format!(
                    "{} block '{}' claims {:#x} bytes, only {:#x} remain",
                    family.name,
                    tag,
                    size,
                    data.len() - payload
                ),
            ));
        }
        log::debug!("{} block {} at {:#x}, {:#x} bytes", family.name, tag, offset, size);
        map.entries.push(ChunkEntry {
            tag,
            offset,
            payload,
            size,
            depth,
            kind,
        });

        match kind {
            ChunkKind::Container => {
                depth += 1;
                offset = payload;
            }
            ChunkKind::Leaf | ChunkKind::Unknown => offset = payload + size,
        }
    }
    Ok(map)
}

/// True when `data` starts with a tag matching `prefix`.
pub fn has_magic(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && &data[..prefix.len()] == prefix
}

// ============================================================================
// Writing
// ============================================================================

/// Chunk writer with size backpatching. Containers are opened with
/// [`ChunkWriter::begin`] and closed with [`ChunkWriter::end`], which appends
/// the `END ` marker and patches the size of everything written in between.
#[derive(Debug, Default)]
pub struct ChunkWriter {
    out: ByteWriter,
    open: Vec<usize>,
}

impl ChunkWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn header(&mut self, tag: &[u8; 4], size: u32) {
        self.out.bytes(tag);
        self.out.u32(size);
    }

    pub fn begin(&mut self, tag: &[u8; 4]) {
        self.open.push(self.out.len());
        self.header(tag, 0);
    }

    pub fn end(&mut self) {
        self.end_marker();
        if let Some(start) = self.open.pop() {
            let size = self.out.len() - start - CHUNK_HEADER_SIZE;
            self.out.patch_u32(start + 4, size as u32);
        }
    }

    /// `END ` with a zero size.
    pub fn end_marker(&mut self) {
        self.header(&END_TAG.0, 0);
    }

    pub fn leaf(&mut self, tag: &[u8; 4], payload: &[u8]) {
        self.header(tag, payload.len() as u32);
        self.out.bytes(payload);
    }

    /// Leaf whose payload is produced by `build`.
    pub fn leaf_with(&mut self, tag: &[u8; 4], build: impl FnOnce(&mut ByteWriter)) {
        let mut payload = ByteWriter::new();
        build(&mut payload);
        self.leaf(tag, payload.as_slice());
    }

    /// Append an already-encoded block (header included) verbatim.
    pub fn raw(&mut self, block: &[u8]) {
        self.out.bytes(block);
    }

    pub fn finish(mut self) -> Vec<u8> {
        while !self.open.is_empty() {
            self.end();
        }
        self.out.into_inner()
    }
}

/// Encode a single leaf block.
pub fn leaf_block(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut writer = ChunkWriter::new();
    writer.leaf(tag, payload);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FAMILY: ChunkFamily = ChunkFamily {
        name: "test",
        containers: &["ROOT"],
        leaves: &["TEST", "TEX*"],
    };

    #[test]
    fn scans_single_leaf_then_end() {
        let mut data = b"TEST".to_vec();
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data.extend_from_slice(b"END ");
        data.extend_from_slice(&0u32.to_le_bytes());

        let map = scan(&data, &TEST_FAMILY).unwrap();
        assert_eq!(map.entries.len(), 1);
        assert_eq!(map.payload_offsets().get("TEST"), Some(&8));

        let mut writer = ChunkWriter::new();
        writer.leaf(b"TEST", &data[8..16]);
        writer.end_marker();
        assert_eq!(writer.finish(), data);
    }

    #[test]
    fn containers_are_entered_and_sizes_backpatched() {
        let mut writer = ChunkWriter::new();
        writer.begin(b"ROOT");
        writer.leaf(b"TEX ", &[0xAA; 6]);
        writer.leaf(b"ZZZZ", &[0xBB; 2]);
        writer.end();
        let data = writer.finish();
        assert_eq!(u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize, data.len() - 8);

        let map = scan(&data, &TEST_FAMILY).unwrap();
        let tags: Vec<String> = map.entries.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["ROOT", "TEX ", "ZZZZ"]);
        assert_eq!(map.get(b"TEX ").unwrap().depth, 1);
        assert_eq!(map.unknown().count(), 1);
        assert_eq!(map.payload(&data, b"TEX ").unwrap(), &[0xAA; 6]);
    }

    #[test]
    fn oversized_leaf_is_corrupt() {
        let mut data = b"TEST".to_vec();
        data.extend_from_slice(&64u32.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(scan(&data, &TEST_FAMILY), Err(AssetError::Corrupt { .. })));
    }

    #[test]
    fn trailing_padding_after_end_stops_scan() {
        let mut writer = ChunkWriter::new();
        writer.leaf(b"TEST", &[0; 4]);
        writer.end_marker();
        let mut data = writer.finish();
        data.extend_from_slice(&[0, 0, 0]);
        let map = scan(&data, &TEST_FAMILY).unwrap();
        assert_eq!(map.entries.len(), 1);
    }
}
