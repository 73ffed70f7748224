//! Typed column values
//!
//! Raw column bytes become a `Value` according to the column type and, for
//! text, the declared codepage. Timestamps are surfaced as the raw 64-bit
//! value; whether it is a FILETIME or an OLE date depends on the
//! application that wrote the database.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::format::{Codepage, ColumnType};

/// A decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Column is null
    Null,
    /// Boolean (stored as 0xFF = true)
    Bool(bool),
    /// Unsigned 8-bit integer
    U8(u8),
    /// Signed 16-bit integer
    I16(i16),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Signed 32-bit integer
    I32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    I64(i64),
    /// 32-bit float
    F32(f32),
    /// 64-bit float
    F64(f64),
    /// Raw 64-bit timestamp
    DateTime(i64),
    /// Decoded text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// 16-byte GUID
    Guid(Guid),
    /// Multi-valued column instances
    Multi(Vec<Value>),
}

impl Value {
    /// Whether the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of any signed or unsigned integer value that fits
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::U8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::DateTime(v) => Some(v),
            _ => None,
        }
    }

    /// Unsigned view; negative integers yield `None`
    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|v| u32::try_from(v).ok())
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Binary view
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

/// A GUID in its little-endian stored form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid(pub [u8; 16]);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            LittleEndian::read_u32(&b[0..4]),
            LittleEndian::read_u16(&b[4..6]),
            LittleEndian::read_u16(&b[6..8]),
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15],
        )
    }
}

/// Decode raw column bytes as `coltyp`
pub fn decode(coltyp: ColumnType, codepage: Codepage, buf: &[u8]) -> Result<Value> {
    let short = |what: &'static str| Err(Error::Truncated(what));

    Ok(match coltyp {
        ColumnType::Nil => Value::Binary(buf.to_vec()),
        ColumnType::Bit => match buf.first() {
            Some(&b) => Value::Bool(b == 0xFF),
            None => return short("boolean value"),
        },
        ColumnType::UnsignedByte => match buf.first() {
            Some(&b) => Value::U8(b),
            None => return short("byte value"),
        },
        ColumnType::Short => {
            if buf.len() < 2 {
                return short("16-bit value");
            }
            Value::I16(LittleEndian::read_i16(buf))
        }
        ColumnType::UnsignedShort => {
            if buf.len() < 2 {
                return short("16-bit value");
            }
            Value::U16(LittleEndian::read_u16(buf))
        }
        ColumnType::Long => {
            if buf.len() < 4 {
                return short("32-bit value");
            }
            Value::I32(LittleEndian::read_i32(buf))
        }
        ColumnType::UnsignedLong => {
            if buf.len() < 4 {
                return short("32-bit value");
            }
            Value::U32(LittleEndian::read_u32(buf))
        }
        ColumnType::Currency | ColumnType::LongLong => {
            if buf.len() < 8 {
                return short("64-bit value");
            }
            Value::I64(LittleEndian::read_i64(buf))
        }
        ColumnType::IeeeSingle => {
            if buf.len() < 4 {
                return short("float value");
            }
            Value::F32(LittleEndian::read_f32(buf))
        }
        ColumnType::IeeeDouble => {
            if buf.len() < 8 {
                return short("double value");
            }
            Value::F64(LittleEndian::read_f64(buf))
        }
        ColumnType::DateTime => {
            if buf.len() < 8 {
                return short("timestamp value");
            }
            Value::DateTime(LittleEndian::read_i64(buf))
        }
        ColumnType::Guid => {
            if buf.len() < 16 {
                return short("guid value");
            }
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&buf[..16]);
            Value::Guid(Guid(bytes))
        }
        ColumnType::Text | ColumnType::LongText => Value::Text(decode_text(codepage, buf)?),
        ColumnType::Binary | ColumnType::LongBinary | ColumnType::Slv => {
            Value::Binary(buf.to_vec())
        }
    })
}

/// Decode text bytes in `codepage`, stripping trailing NUL terminators
pub fn decode_text(codepage: Codepage, buf: &[u8]) -> Result<String> {
    let mut text = match codepage {
        Codepage::Unicode => {
            let mut units: Vec<u16> = buf.chunks(2).map(unit_le).collect();
            while units.last() == Some(&0) {
                units.pop();
            }
            String::from_utf16(&units)
                .map_err(|_| Error::Truncated("invalid utf-16 text"))?
        }
        Codepage::Western => buf.iter().map(|&b| WINDOWS_1252[b as usize]).collect(),
        Codepage::Ascii => {
            if buf.iter().any(|&b| b > 0x7F) {
                return Err(Error::Truncated("non-ascii byte in ascii text"));
            }
            buf.iter().map(|&b| b as char).collect()
        }
    };
    while text.ends_with('\0') {
        text.pop();
    }
    Ok(text)
}

/// An odd trailing byte is padded as the low half of a final code unit
fn unit_le(chunk: &[u8]) -> u16 {
    match chunk {
        [lo, hi] => u16::from_le_bytes([*lo, *hi]),
        [lo] => *lo as u16,
        _ => 0,
    }
}

/// Windows-1252 to Unicode, full 256-entry table. The C1 range 0x80..0x9F
/// maps to typographic characters; the five undefined slots fall back to
/// their Latin-1 values.
const WINDOWS_1252: [char; 256] = {
    let mut table = ['\0'; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = i as u8 as char;
        i += 1;
    }
    table[0x80] = '\u{20AC}';
    table[0x82] = '\u{201A}';
    table[0x83] = '\u{0192}';
    table[0x84] = '\u{201E}';
    table[0x85] = '\u{2026}';
    table[0x86] = '\u{2020}';
    table[0x87] = '\u{2021}';
    table[0x88] = '\u{02C6}';
    table[0x89] = '\u{2030}';
    table[0x8A] = '\u{0160}';
    table[0x8B] = '\u{2039}';
    table[0x8C] = '\u{0152}';
    table[0x8E] = '\u{017D}';
    table[0x91] = '\u{2018}';
    table[0x92] = '\u{2019}';
    table[0x93] = '\u{201C}';
    table[0x94] = '\u{201D}';
    table[0x95] = '\u{2022}';
    table[0x96] = '\u{2013}';
    table[0x97] = '\u{2014}';
    table[0x98] = '\u{02DC}';
    table[0x99] = '\u{2122}';
    table[0x9A] = '\u{0161}';
    table[0x9B] = '\u{203A}';
    table[0x9C] = '\u{0153}';
    table[0x9E] = '\u{017E}';
    table[0x9F] = '\u{0178}';
    table
};
