//! `TEX ` and `ANIM` blocks.
//!
//! `TEX ` is `u32 count` followed by `count` complete TP2 files, each as long
//! as the total size in its own header. P2M files use the same layout for
//! their `TEXT` block.
//!
//! `ANIM` lists animated textures as `{ u16 texture, u16 frame_count,
//! frame_count × (u16, u16) }` up to a texture index of `0xFFFF`.

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::texture::tp2::{self, Tp2Texture, NAMED_HEADER, NAME_LEN};

const ANIM_END: u16 = 0xFFFF;

/// One embedded TP2 file, kept as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelTexture {
    pub name: String,
    pub data: Vec<u8>,
}

impl LevelTexture {
    pub fn from_texture(texture: &Tp2Texture, fallback_name: &str) -> Result<Self> {
        Ok(LevelTexture {
            name: texture.name.clone().unwrap_or_else(|| fallback_name.to_owned()),
            data: texture.encode()?,
        })
    }

    pub fn texture(&self) -> Result<Tp2Texture> {
        Tp2Texture::decode(&self.data)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureList {
    pub textures: Vec<LevelTexture>,
}

impl TextureList {
    /// `prefix` names textures whose header carries no name.
    pub fn decode(payload: &[u8], prefix: &str) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let count = reader.u32()? as usize;
        let mut textures = Vec::with_capacity(count.min(1024));
        for i in 0..count {
            let start = reader.position();
            let header = tp2::read_header(&mut reader).map_err(|e| match e {
                AssetError::NotThisFormat { found, .. } => {
                    AssetError::corrupt(start, format!("texture {} is not a TP2 file (magic {:?})", i, found))
                }
                other => other,
            })?;
            let name = if header.header_size == NAMED_HEADER {
                reader.fixed_str(NAME_LEN)?
            } else {
                format!("{}_{}", prefix, i)
            };
            reader.seek(start)?;
            let data = reader.bytes(header.total_size as usize)?.to_vec();
            textures.push(LevelTexture { name, data });
        }
        log::debug!("{}: {} textures", prefix, textures.len());
        Ok(TextureList { textures })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.textures.len() as u32);
        self.textures.iter().for_each(|t| w.bytes(&t.data));
        w.into_inner()
    }

    pub fn get(&self, index: usize) -> Option<&LevelTexture> {
        self.textures.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.textures.iter().position(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimatedTexture {
    pub texture: u16,
    pub frames: Vec<[u16; 2]>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimatedTextures {
    pub entries: Vec<AnimatedTexture>,
    /// Whether the block holds an entry list at all; empty levels store
    /// only padding.
    pub terminated: bool,
    /// Bytes after the terminator
    pub tail: Vec<u8>,
}

impl AnimatedTextures {
    /// Payloads of four bytes or fewer hold no list.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() <= 4 {
            return Ok(AnimatedTextures {
                tail: payload.to_vec(),
                ..Default::default()
            });
        }
        let mut reader = ByteReader::new(payload);
        let mut entries = Vec::new();
        loop {
            let texture = reader.u16()?;
            if texture == ANIM_END {
                break;
            }
            let frame_count = reader.u16()? as usize;
            let frames = (0..frame_count)
                .map(|_| Ok([reader.u16()?, reader.u16()?]))
                .collect::<Result<Vec<_>>>()?;
            entries.push(AnimatedTexture { texture, frames });
        }
        log::debug!("ANIM: {} animated textures", entries.len());
        let tail = payload[reader.position()..].to_vec();
        Ok(AnimatedTextures {
            entries,
            terminated: true,
            tail,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        if self.terminated || !self.entries.is_empty() {
            for entry in &self.entries {
                w.u16(entry.texture);
                w.u16(entry.frames.len() as u16);
                for [a, b] in &entry.frames {
                    w.u16(*a);
                    w.u16(*b);
                }
            }
            w.u16(ANIM_END);
        }
        w.bytes(&self.tail);
        w.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn tp2(name: Option<&str>) -> Vec<u8> {
        let image = RgbaImage::from_pixel(2, 2, Rgba([9, 8, 7, 255]));
        Tp2Texture::encode_rgba(&image, name, 16).unwrap()
    }

    #[test]
    fn textures_are_split_by_their_own_size() {
        let (a, b) = (tp2(Some("rock")), tp2(None));
        let mut w = ByteWriter::new();
        w.u32(2);
        w.bytes(&a);
        w.bytes(&b);
        let payload = w.into_inner();

        let list = TextureList::decode(&payload, "beach").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.textures[0].name, "rock");
        assert_eq!(list.textures[1].name, "beach_1");
        assert_eq!(list.textures[1].data, b);
        assert_eq!(list.index_of("rock"), Some(0));
        assert_eq!(list.get(0).unwrap().texture().unwrap().width, 2);
        assert_eq!(list.encode(), payload);
    }

    #[test]
    fn non_tp2_entries_are_corrupt() {
        let mut w = ByteWriter::new();
        w.u32(1);
        w.bytes(b"P2M \0\0\0\0\0\0\0\0");
        let err = TextureList::decode(&w.into_inner(), "x").unwrap_err();
        assert!(matches!(err, AssetError::Corrupt { offset: 4, .. }));
    }

    #[test]
    fn animated_textures_round_trip_with_padding() {
        let mut w = ByteWriter::new();
        w.u16(3);
        w.u16(2);
        w.u16(4);
        w.u16(5);
        w.u16(6);
        w.u16(7);
        w.u16(ANIM_END);
        w.u16(0);
        let payload = w.into_inner();

        let anim = AnimatedTextures::decode(&payload).unwrap();
        assert_eq!(anim.entries.len(), 1);
        assert_eq!(anim.entries[0].frames, vec![[4, 5], [6, 7]]);
        assert_eq!(anim.tail, vec![0, 0]);
        assert_eq!(anim.encode(), payload);

        let empty = AnimatedTextures::decode(&[]).unwrap();
        assert!(empty.entries.is_empty());
        assert!(empty.encode().is_empty());
    }
}
