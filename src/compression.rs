//! PK2 stream decompression.
//!
//! Header layout:
//! ```text
//! 0x0  "PK2" magic (4 bytes, padded)
//! 0x4  decompressed length, u24 little-endian
//! 0x7  unused
//! 0x8  checksum, u32: sum of all decompressed bytes mod 2^32
//! 0xC  compressed stream
//! ```
//!
//! The stream is a sequence of 32-bit big-endian flag registers, each
//! governing up to 30 steps. At each step the sign bit of the shifted
//! register picks a literal byte (clear) or a big-endian u16 back-reference
//! (set). The low two bits of the register, taken when it is loaded, decide
//! how that u16 splits into a 5-bit length field and a distance field.

use std::borrow::Cow;

use crate::chunk::has_magic;
use crate::error::{AssetError, Diagnostics, Result, Warning};
use crate::io::ByteReader;

pub const PK2_MAGIC: &[u8; 3] = b"PK2";
const STREAM_START: usize = 0xC;
const STEPS_PER_REGISTER: usize = 0x1E;

pub fn is_pk2(data: &[u8]) -> bool {
    has_magic(data, PK2_MAGIC)
}

/// Declared decompressed length.
pub fn decompressed_len(data: &[u8]) -> Result<usize> {
    if data.len() < STREAM_START {
        return Err(AssetError::Truncated {
            offset: 0,
            wanted: STREAM_START,
            len: data.len(),
        });
    }
    Ok(((data[6] as usize) << 16) | ((data[5] as usize) << 8) | data[4] as usize)
}

/// Expand a PK2 stream. A checksum mismatch is reported through
/// `diagnostics` and the output is still returned.
pub fn decompress(data: &[u8], diagnostics: &mut Diagnostics) -> Result<Vec<u8>> {
    if !is_pk2(data) {
        return Err(AssetError::NotThisFormat {
            expected: "PK2",
            found: String::from_utf8_lossy(&data[..data.len().min(4)]).into_owned(),
        });
    }
    let target = decompressed_len(data)?;
    let mut header = ByteReader::at(data, 8)?;
    let checksum = header.u32()?;

    let mut reader = ByteReader::at(data, STREAM_START)?;
    let mut out: Vec<u8> = Vec::with_capacity(target + 34);

    'stream: while out.len() < target {
        let register = reader.u32_be()?;
        let mask = register & 3;
        let mut shifted = register;
        for _ in 0..STEPS_PER_REGISTER {
            if (shifted as i32) < 0 {
                let word = reader.u16_be()? as u32;
                let length = ((word >> (0xE - mask)) & 0x1F) + 2;
                let distance = (word & (0x3FFF >> mask)) as usize + 1;
                // The copy runs one byte past `length`.
                for _ in 0..=length {
                    let pos = out.len();
                    if distance > pos {
                        return Err(AssetError::corrupt(
                            reader.position() - 2,
                            format!("back-reference {} bytes behind output start", distance - pos),
                        ));
                    }
                    out.push(out[pos - distance]);
                }
            } else {
                out.push(reader.u8()?);
            }
            if out.len() >= target {
                break 'stream;
            }
            shifted <<= 1;
        }
    }

    // A back-reference may overshoot the declared length.
    out.truncate(target);
    let actual = out.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32));
    if actual != checksum {
        diagnostics.warn(Warning::ChecksumMismatch {
            expected: checksum,
            actual,
        });
    }
    log::debug!("PK2: {:#x} -> {:#x} bytes", data.len(), out.len());
    Ok(out)
}

/// Strip PK2 compression when present, borrow the input otherwise.
pub fn unwrap_pk2<'a>(data: &'a [u8], diagnostics: &mut Diagnostics) -> Result<Cow<'a, [u8]>> {
    if is_pk2(data) {
        Ok(Cow::Owned(decompress(data, diagnostics)?))
    } else {
        Ok(Cow::Borrowed(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two literals then a five-byte back-reference at distance 2.
    fn ab_stream(checksum: u32) -> Vec<u8> {
        let mut data = b"PK2\0".to_vec();
        data.extend_from_slice(&[7, 0, 0, 0]);
        data.extend_from_slice(&checksum.to_le_bytes());
        data.extend_from_slice(&0x2000_0000u32.to_be_bytes());
        data.extend_from_slice(b"ab");
        data.extend_from_slice(&((2u16 << 14) | 1).to_be_bytes());
        data
    }

    #[test]
    fn expands_literals_and_back_reference() {
        let mut diagnostics = Diagnostics::new();
        let out = decompress(&ab_stream(682), &mut diagnostics).unwrap();
        assert_eq!(out, b"abababa");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn checksum_mismatch_is_a_warning() {
        let mut diagnostics = Diagnostics::new();
        let out = decompress(&ab_stream(1), &mut diagnostics).unwrap();
        assert_eq!(out, b"abababa");
        assert_eq!(
            diagnostics.warnings(),
            &[Warning::ChecksumMismatch {
                expected: 1,
                actual: 682
            }]
        );
    }

    #[test]
    fn mask_bits_widen_the_length_field() {
        // mask 3: length = (word >> 11) & 0x1f, distance = (word & 0x7ff) + 1
        let mut data = b"PK2\0".to_vec();
        data.extend_from_slice(&[12, 0, 0, 0]);
        data.extend_from_slice(&(12u32 * b'z' as u32).to_le_bytes());
        data.extend_from_slice(&0x4000_0003u32.to_be_bytes());
        data.push(b'z');
        data.extend_from_slice(&((8u16 << 11) | 0).to_be_bytes());
        let mut diagnostics = Diagnostics::new();
        let out = decompress(&data, &mut diagnostics).unwrap();
        assert_eq!(out, vec![b'z'; 12]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn reference_before_start_is_corrupt() {
        let mut data = b"PK2\0".to_vec();
        data.extend_from_slice(&[4, 0, 0, 0]);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0x8000_0000u32.to_be_bytes());
        data.extend_from_slice(&0x0005u16.to_be_bytes());
        let mut diagnostics = Diagnostics::new();
        assert!(matches!(decompress(&data, &mut diagnostics), Err(AssetError::Corrupt { .. })));
    }

    #[test]
    fn plain_data_passes_through() {
        let mut diagnostics = Diagnostics::new();
        let data = b"LEVL\0\0\0\0";
        assert!(matches!(unwrap_pk2(data, &mut diagnostics).unwrap(), Cow::Borrowed(_)));
    }
}
