//! Database file header (DBFILEHDR)
//!
//! The first physical page of an ESE file holds the database header; the
//! second holds a shadow copy. The header fixes the page size and format
//! version for everything that follows, so it is parsed and validated
//! before any page is trusted.

use byteorder::{ByteOrder, LittleEndian};
use static_assertions::const_assert;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::format::{DatabaseState, JET_MAGIC, SUPPORTED_PAGE_SIZES};

/// Bytes of the header we parse fields from
pub const HEADER_PARSE_LEN: usize = 240;

/// The header checksum always covers the first 4 KiB, independent of the
/// declared page size
const HEADER_CHECKSUM_LEN: usize = 4096;

// Field offsets in DBFILEHDR
const OFF_CHECKSUM: usize = 0;
const OFF_MAGIC: usize = 4;
const OFF_VERSION: usize = 8;
const OFF_DBTIME: usize = 16;
const OFF_STATE: usize = 52;
const OFF_DBID: usize = 104;
const OFF_OBJID_LAST: usize = 212;
const OFF_FORMAT_REVISION: usize = 232;
const OFF_PAGE_SIZE: usize = 236;

const_assert!(OFF_PAGE_SIZE + 4 <= HEADER_PARSE_LEN);

/// Parsed database header
#[derive(Debug, Clone)]
pub struct DbHeader {
    /// XOR checksum stored in the header
    pub checksum: u32,
    /// Format version (ulVersion)
    pub version: u32,
    /// Format revision (ulDaeUpdateMajor)
    pub format_revision: u32,
    /// Database time at last dirty
    pub dbtime: i64,
    /// Shutdown state
    pub state: DatabaseState,
    /// Attachment id
    pub dbid: u32,
    /// Highest object id handed out
    pub objid_last: u32,
    /// Declared page size in bytes
    pub page_size: u32,
    /// File offset the header was found at (non-zero after shadow recovery)
    pub offset: u64,
}

impl DbHeader {
    /// Parse header fields from a buffer starting at the header
    fn parse(buf: &[u8], offset: u64) -> Result<Self> {
        if buf.len() < HEADER_PARSE_LEN {
            return Err(Error::Truncated("database header"));
        }

        let magic = LittleEndian::read_u32(&buf[OFF_MAGIC..]);
        if magic != JET_MAGIC {
            return Err(Error::InvalidDatabase("bad magic"));
        }

        // cbPageSize of 0 means the 4 KiB default of old engines
        let mut page_size = LittleEndian::read_u32(&buf[OFF_PAGE_SIZE..]);
        if page_size == 0 {
            page_size = 4096;
        }
        if !SUPPORTED_PAGE_SIZES.contains(&page_size) {
            return Err(Error::UnsupportedPageSize(page_size));
        }

        Ok(Self {
            checksum: LittleEndian::read_u32(&buf[OFF_CHECKSUM..]),
            version: LittleEndian::read_u32(&buf[OFF_VERSION..]),
            format_revision: LittleEndian::read_u32(&buf[OFF_FORMAT_REVISION..]),
            dbtime: LittleEndian::read_i64(&buf[OFF_DBTIME..]),
            state: DatabaseState::from_raw(LittleEndian::read_u32(&buf[OFF_STATE..])),
            dbid: LittleEndian::read_u32(&buf[OFF_DBID..]),
            objid_last: LittleEndian::read_u32(&buf[OFF_OBJID_LAST..]),
            page_size,
            offset,
        })
    }

    /// Validate the header checksum over its page region
    pub fn validate_checksum(&self, buf: &[u8]) -> Result<()> {
        let end = HEADER_CHECKSUM_LEN.min(buf.len());
        if end <= OFF_MAGIC {
            return Err(Error::Truncated("database header"));
        }
        let actual = checksum_xor(&buf[OFF_MAGIC..end], JET_MAGIC);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum as u64,
                actual: actual as u64,
            });
        }
        Ok(())
    }

    /// Locate and parse the database header in `buf` (the file head).
    ///
    /// The primary header sits at offset 0. When its magic is gone, probe
    /// the doubling offsets 0x800..=0x8000 for a surviving shadow header.
    /// A checksum mismatch on the recovered header is an error in strict
    /// mode and a warning otherwise.
    pub fn locate(buf: &[u8], strict: bool) -> Result<Self> {
        let primary = Self::parse(buf, 0);

        let header = match primary {
            Ok(h) => h,
            Err(Error::InvalidDatabase(_)) => {
                let mut found = None;
                let mut offset = 0x800usize;
                while offset <= 0x8000 {
                    if buf.len() > offset + HEADER_PARSE_LEN {
                        if let Ok(h) = Self::parse(&buf[offset..], offset as u64) {
                            warn!(offset, "primary database header unusable, using shadow header");
                            found = Some(h);
                            break;
                        }
                    }
                    offset <<= 1;
                }
                found.ok_or(Error::InvalidDatabase("no usable header found"))?
            }
            Err(e) => return Err(e),
        };

        let region = &buf[header.offset as usize..];
        if let Err(e) = header.validate_checksum(region) {
            if strict {
                return Err(e);
            }
            warn!(error = %e, "database header checksum mismatch");
        }

        debug!(
            page_size = header.page_size,
            version = format_args!("0x{:x}", header.version),
            revision = header.format_revision,
            state = ?header.state,
            "parsed database header"
        );

        Ok(header)
    }
}

/// XOR checksum over little-endian u32 words, as used by the old ESE
/// checksum format. Trailing bytes short of a word are ignored.
pub fn checksum_xor(data: &[u8], seed: u32) -> u32 {
    let mut digest = seed;
    for chunk in data.chunks_exact(4) {
        digest ^= LittleEndian::read_u32(chunk);
    }
    digest
}
