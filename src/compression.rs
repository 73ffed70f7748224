//! Column data decompression
//!
//! Compressed column values carry a scheme selector in the high 5 bits of
//! the first byte: 7-bit packed text (ASCII or UTF-16), or MS-XCA LZ77
//! "plain" (XPRESS) with a 16-bit decompressed size at bytes 1..3 and the
//! stream starting at byte 3. XPRESS9 and XPRESS10 appear in newer
//! Exchange databases and are rejected as unsupported.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::format::CompressionScheme;

/// Decompress a column value. Buffers without a recognized scheme selector
/// are returned as-is; unimplemented schemes fail.
pub fn decompress(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    match CompressionScheme::from_selector(buf[0]) {
        Some(CompressionScheme::SevenBitAscii) => Ok(seven_bit(&buf[1..], false)),
        Some(CompressionScheme::SevenBitUnicode) => Ok(seven_bit(&buf[1..], true)),
        Some(CompressionScheme::Xpress) => {
            if buf.len() < 3 {
                return Err(Error::Truncated("xpress header"));
            }
            xpress(&buf[3..])
        }
        Some(CompressionScheme::Xpress9) | Some(CompressionScheme::Xpress10) => {
            Err(Error::UnsupportedCompression(buf[0] >> 3))
        }
        _ => Ok(buf.to_vec()),
    }
}

/// Size of the decompressed data, when the scheme declares or implies
/// one; `None` for buffers that are not compressed.
pub fn decompressed_size(buf: &[u8]) -> Result<Option<usize>> {
    if buf.is_empty() {
        return Ok(Some(0));
    }
    // The low 3 bits of the 7-bit selector byte carry residual size bits
    let seven_bit_size = |buf: &[u8]| ((buf[0] & 7) as usize + 8 * buf.len()) / 7;
    match CompressionScheme::from_selector(buf[0]) {
        Some(CompressionScheme::SevenBitAscii) => Ok(Some(seven_bit_size(buf))),
        Some(CompressionScheme::SevenBitUnicode) => Ok(Some(2 * seven_bit_size(buf))),
        Some(CompressionScheme::Xpress) => {
            if buf.len() < 3 {
                return Err(Error::Truncated("xpress header"));
            }
            Ok(Some(LittleEndian::read_u16(&buf[1..]) as usize))
        }
        Some(CompressionScheme::Xpress9) | Some(CompressionScheme::Xpress10) => {
            Err(Error::UnsupportedCompression(buf[0] >> 3))
        }
        _ => Ok(None),
    }
}

/// Unpack 7-bit characters accumulated LSB-first. In the wide variant each
/// character becomes a UTF-16-LE code unit with a zero high byte.
fn seven_bit(data: &[u8], wide: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() * 8 / 7 * if wide { 2 } else { 1 });
    let mut acc: u32 = 0;
    let mut bits = 0;
    for &byte in data {
        acc |= (byte as u32) << bits;
        bits += 8;
        while bits >= 7 {
            out.push((acc & 0x7F) as u8);
            if wide {
                out.push(0);
            }
            acc >>= 7;
            bits -= 7;
        }
    }
    out
}

/// MS-XCA LZ77 plain decompression.
///
/// The stream is groups of 32 operations prefixed by a little-endian flag
/// word, MSB first; a clear bit copies a literal, a set bit copies a match.
/// A match word packs offset-1 in the high 13 bits and length-3 in the low
/// 3, with 7 escaping to a shared nibble, then a byte, then a u16/u32.
fn xpress(src: &[u8]) -> Result<Vec<u8>> {
    let mut dst = Vec::with_capacity(src.len() * 2);
    let mut pos = 0usize;
    let mut flags: u32 = 0;
    let mut flag_count = 0u32;
    // Length nibbles are consumed low half first from a shared byte
    let mut nibble_at: Option<usize> = None;

    loop {
        if flag_count == 0 {
            if pos + 4 > src.len() {
                break;
            }
            flags = LittleEndian::read_u32(&src[pos..]);
            pos += 4;
            flag_count = 32;
        }
        flag_count -= 1;

        if flags & (1 << flag_count) == 0 {
            if pos >= src.len() {
                break;
            }
            dst.push(src[pos]);
            pos += 1;
            continue;
        }

        if pos + 2 > src.len() {
            break;
        }
        let word = LittleEndian::read_u16(&src[pos..]);
        pos += 2;
        let offset = (word >> 3) as usize + 1;
        let mut length = (word & 0x7) as usize;

        if length == 7 {
            length = match nibble_at.take() {
                Some(at) => (src[at] >> 4) as usize,
                None => {
                    if pos >= src.len() {
                        return Err(Error::Truncated("xpress length nibble"));
                    }
                    nibble_at = Some(pos);
                    let low = (src[pos] & 0xF) as usize;
                    pos += 1;
                    low
                }
            };
            if length == 15 {
                if pos >= src.len() {
                    return Err(Error::Truncated("xpress length byte"));
                }
                let mut extra = src[pos] as usize;
                pos += 1;
                if extra == 255 {
                    if pos + 2 > src.len() {
                        return Err(Error::Truncated("xpress length word"));
                    }
                    extra = LittleEndian::read_u16(&src[pos..]) as usize;
                    pos += 2;
                    if extra == 0 {
                        if pos + 4 > src.len() {
                            return Err(Error::Truncated("xpress length dword"));
                        }
                        extra = LittleEndian::read_u32(&src[pos..]) as usize;
                        pos += 4;
                    }
                    if extra < 15 + 7 {
                        return Err(Error::Truncated("xpress match length out of range"));
                    }
                    extra -= 15 + 7;
                }
                length = extra + 15;
            }
            length += 7;
        }
        length += 3;

        if offset > dst.len() {
            return Err(Error::Truncated("xpress match before start of output"));
        }
        for _ in 0..length {
            let byte = dst[dst.len() - offset];
            dst.push(byte);
        }
    }

    Ok(dst)
}
