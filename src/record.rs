//! Record decoding
//!
//! A record is the payload of a data-tree leaf node. It has three storage
//! classes, addressed by field id: fixed columns (fid 1..128) at computed
//! offsets, variable columns (fid 128..256) through a cumulative
//! end-offset array, and tagged columns (fid 256..) through a sorted
//! TAGFLD array that only stores set values. Decoding is per-column and
//! best-effort: one malformed column yields a `ColumnDecode` error for
//! that column without poisoning the rest of the record.

use byteorder::{ByteOrder, LittleEndian};

use crate::catalog::{ColumnMeta, TableMeta};
use crate::compression;
use crate::error::{Error, Result};
use crate::format::{TaggedFlags, FID_VARIABLE_FIRST};
use crate::longvalue::LongValueStore;
use crate::store::PageStore;
use crate::value::{self, Value};

/// Size of the record header (RECHDR)
const RECHDR_SIZE: usize = 4;

/// Null marker in a variable column end offset
const VAR_NULL: u16 = 0x8000;

/// Offset mask of a variable column end offset
const VAR_OFFSET_MASK: u16 = 0x7FFF;

/// Everything column decoding needs besides the record bytes
pub struct DecodeContext<'d> {
    /// Page store for separated long values
    pub store: &'d PageStore,
    /// Schema of the owning table
    pub table: &'d TableMeta,
    /// Whether decode failures in long value trees are fatal
    pub strict: bool,
}

/// A parsed record: header fields plus the raw bytes
pub struct RecordData {
    data: Vec<u8>,
    new_format: bool,
    small_page: bool,
    last_fixed_fid: u32,
    last_var_fid: u32,
    end_of_fixed: usize,
    var_offsets: Vec<u16>,
    var_data_start: usize,
    tagged_start: usize,
    tagged_count: usize,
}

impl RecordData {
    /// Parse the record layout. Structurally impossible headers degrade to
    /// an empty record rather than failing; per-column errors surface on
    /// access.
    pub fn parse(data: Vec<u8>, new_format: bool, small_page: bool) -> Self {
        let mut rec = Self {
            data,
            new_format,
            small_page,
            last_fixed_fid: 0,
            last_var_fid: 0,
            end_of_fixed: 0,
            var_offsets: Vec::new(),
            var_data_start: 0,
            tagged_start: 0,
            tagged_count: 0,
        };

        if rec.data.len() < RECHDR_SIZE {
            return rec;
        }

        rec.last_fixed_fid = rec.data[0] as u32;
        rec.last_var_fid = rec.data[1] as u32;
        rec.end_of_fixed = LittleEndian::read_u16(&rec.data[2..]) as usize;

        if rec.end_of_fixed < RECHDR_SIZE || rec.end_of_fixed > rec.data.len() {
            // Header cannot be trusted; leave the record unreadable
            rec.last_fixed_fid = 0;
            rec.last_var_fid = 0;
            rec.end_of_fixed = rec.data.len();
            rec.var_data_start = rec.data.len();
            rec.tagged_start = rec.data.len();
            return rec;
        }

        let var_count = rec.last_var_fid.saturating_sub(FID_VARIABLE_FIRST - 1) as usize;
        let offsets_end = rec.end_of_fixed + var_count * 2;
        if offsets_end <= rec.data.len() {
            rec.var_offsets = rec.data[rec.end_of_fixed..offsets_end]
                .chunks_exact(2)
                .map(LittleEndian::read_u16)
                .collect();
            rec.var_data_start = offsets_end;
        } else {
            rec.var_data_start = rec.data.len();
        }

        let var_data_len = rec
            .var_offsets
            .last()
            .map(|&end| (end & VAR_OFFSET_MASK) as usize)
            .unwrap_or(0);
        rec.tagged_start = (rec.var_data_start + var_data_len).min(rec.data.len());

        if rec.data.len() >= rec.tagged_start + 4 {
            let first = TagField::read(&rec.data[rec.tagged_start..], small_page);
            if first.offset >= 4 && first.offset % 4 == 0 {
                let count = first.offset / 4;
                if rec.tagged_start + count * 4 <= rec.data.len() {
                    rec.tagged_count = count;
                }
            }
        }

        rec
    }

    /// Decode one column of this record
    pub fn value(&self, ctx: &DecodeContext<'_>, col: &ColumnMeta) -> Result<Value> {
        let result = if col.is_fixed() {
            self.fixed_value(col)
        } else if col.is_variable() {
            self.variable_value(col)
        } else {
            self.tagged_value(ctx, col)
        };

        result.map_err(|e| match e {
            e @ (Error::MissingLongValue { .. } | Error::ColumnDecode { .. }) => e,
            e => Error::ColumnDecode { column: col.name.clone(), details: e.to_string() },
        })
    }

    fn fixed_value(&self, col: &ColumnMeta) -> Result<Value> {
        if col.fid > self.last_fixed_fid {
            return self.default_or_null(col);
        }

        // Null bitmap sits immediately before the end of the fixed data
        let bitmap_len = (self.last_fixed_fid as usize + 7) / 8;
        let bitmap_start = self
            .end_of_fixed
            .checked_sub(bitmap_len)
            .ok_or(Error::Truncated("fixed column null bitmap"))?;
        let bit = col.fid as usize - 1;
        let null = self.data[bitmap_start + bit / 8] & (1 << (bit % 8)) != 0;
        if null {
            return Ok(Value::Null);
        }

        let start = RECHDR_SIZE + col.fixed_offset;
        let end = start + col.size;
        if end > bitmap_start {
            return Err(Error::Truncated("fixed column data"));
        }
        value::decode(col.coltyp, col.codepage, &self.data[start..end])
    }

    fn variable_value(&self, col: &ColumnMeta) -> Result<Value> {
        if col.fid > self.last_var_fid {
            return self.default_or_null(col);
        }

        let idx = (col.fid - FID_VARIABLE_FIRST) as usize;
        if idx >= self.var_offsets.len() {
            return Err(Error::Truncated("variable column offset array"));
        }

        let raw_end = self.var_offsets[idx];
        if raw_end & VAR_NULL != 0 {
            return Ok(Value::Null);
        }
        let start = if idx == 0 {
            0
        } else {
            (self.var_offsets[idx - 1] & VAR_OFFSET_MASK) as usize
        };
        let end = (raw_end & VAR_OFFSET_MASK) as usize;

        let abs_start = self.var_data_start + start;
        let abs_end = self.var_data_start + end;
        if abs_start > abs_end || abs_end > self.data.len() {
            return Err(Error::Truncated("variable column data"));
        }
        value::decode(col.coltyp, col.codepage, &self.data[abs_start..abs_end])
    }

    fn tagged_value(&self, ctx: &DecodeContext<'_>, col: &ColumnMeta) -> Result<Value> {
        let Some(idx) = self.find_tagged(col.fid)? else {
            return self.default_or_null(col);
        };
        if !self.new_format {
            return Err(Error::UnsupportedFormat("old (pre-tagfld) tagged record format"));
        }

        let field = self.tag_field(idx);
        let (bytes, flags) = self.tagged_bytes(idx, &field)?;
        if field.null_bit || flags.contains(TaggedFlags::NULL) {
            return Ok(Value::Null);
        }
        if flags.contains(TaggedFlags::ENCRYPTED) {
            return Err(Error::UnsupportedFormat("encrypted column data"));
        }

        if flags.intersects(TaggedFlags::TWO_VALUES | TaggedFlags::MULTI_VALUES) {
            return self.multi_value(ctx, col, bytes, flags);
        }

        let bytes = if flags.contains(TaggedFlags::SEPARATED) {
            // Payload is the key of the value in the long value tree;
            // chunk-level decompression happens during reassembly
            self.fetch_separated(ctx, bytes)?
        } else if flags.contains(TaggedFlags::COMPRESSED) {
            compression::decompress(bytes)?
        } else {
            bytes.to_vec()
        };
        value::decode(col.coltyp, col.codepage, &bytes)
    }

    /// Split and decode a multi-valued tagged column
    fn multi_value(
        &self,
        ctx: &DecodeContext<'_>,
        col: &ColumnMeta,
        bytes: &[u8],
        flags: TaggedFlags,
    ) -> Result<Value> {
        // (instance bytes, stored separately)
        let mut parts: Vec<(&[u8], bool)> = Vec::new();

        if flags.contains(TaggedFlags::TWO_VALUES) {
            // First byte is the size of the first instance; the second
            // instance is the remainder
            let first_len = *bytes.first().ok_or(Error::Truncated("two-value header"))? as usize;
            if 1 + first_len > bytes.len() {
                return Err(Error::Truncated("two-value data"));
            }
            parts.push((&bytes[1..1 + first_len], false));
            parts.push((&bytes[1 + first_len..], false));
        } else {
            if bytes.len() < 2 {
                return Err(Error::Truncated("multi-value offset array"));
            }
            let first = LittleEndian::read_u16(bytes);
            let count = ((first & VAR_OFFSET_MASK) / 2) as usize;
            if count == 0 || count * 2 > bytes.len() {
                return Err(Error::Truncated("multi-value offset array"));
            }
            for i in 0..count {
                let raw = LittleEndian::read_u16(&bytes[i * 2..]);
                let start = (raw & VAR_OFFSET_MASK) as usize;
                let end = if i + 1 < count {
                    (LittleEndian::read_u16(&bytes[(i + 1) * 2..]) & VAR_OFFSET_MASK) as usize
                } else {
                    bytes.len()
                };
                if start > end || end > bytes.len() {
                    return Err(Error::Truncated("multi-value instance"));
                }
                parts.push((&bytes[start..end], raw & VAR_NULL != 0));
            }
        }

        let mut values = Vec::with_capacity(parts.len());
        for (i, (part, separated)) in parts.into_iter().enumerate() {
            let bytes = if separated {
                self.fetch_separated(ctx, part)?
            } else if flags.contains(TaggedFlags::COMPRESSED) && i == 0 {
                // Only the first instance of a multi-value is compressed
                compression::decompress(part)?
            } else {
                part.to_vec()
            };
            values.push(value::decode(col.coltyp, col.codepage, &bytes)?);
        }
        Ok(Value::Multi(values))
    }

    fn fetch_separated(&self, ctx: &DecodeContext<'_>, key: &[u8]) -> Result<Vec<u8>> {
        match ctx.table.lv_root {
            Some(root) => LongValueStore::new(ctx.store, root, ctx.strict).fetch(key),
            None => Err(Error::MissingLongValue { key: key.to_vec() }),
        }
    }

    /// Binary search the TAGFLD array. Derived (template-table) fields
    /// sort before plain ones, so comparisons flip the derived bit to
    /// order both ranges by identifier (TAGFLD::CmpTagfld2).
    fn find_tagged(&self, fid: u32) -> Result<Option<usize>> {
        if self.tagged_count == 0 {
            return Ok(None);
        }
        let target = tagfld_cmp_key(fid, false);
        let mut lo = 0;
        let mut hi = self.tagged_count - 1;
        while lo != hi {
            let mid = lo + (hi - lo) / 2;
            let field = self.tag_field(mid);
            let key = tagfld_cmp_key(field.ident, field.derived);
            match key.cmp(&target) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Equal => {
                    lo = mid;
                    break;
                }
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        if self.tag_field(lo).ident == fid {
            Ok(Some(lo))
        } else {
            Ok(None)
        }
    }

    fn tag_field(&self, idx: usize) -> TagField {
        TagField::read(&self.data[self.tagged_start + idx * 4..], self.small_page)
    }

    /// Resolve the data range and flags byte of tagged field `idx`
    fn tagged_bytes(&self, idx: usize, field: &TagField) -> Result<(&[u8], TaggedFlags)> {
        let start = self.tagged_start + field.offset;
        let end = if idx + 1 < self.tagged_count {
            self.tagged_start + self.tag_field(idx + 1).offset
        } else {
            self.data.len()
        };
        if start > end || end > self.data.len() {
            return Err(Error::Truncated("tagged column data"));
        }

        if field.extended {
            if start >= end {
                return Err(Error::Truncated("tagged column flags byte"));
            }
            let flags = TaggedFlags::from_bits_retain(self.data[start]);
            Ok((&self.data[start + 1..end], flags))
        } else {
            Ok((&self.data[start..end], TaggedFlags::empty()))
        }
    }

    fn default_or_null(&self, col: &ColumnMeta) -> Result<Value> {
        match &col.default {
            Some(bytes) => value::decode(col.coltyp, col.codepage, bytes),
            None => Ok(Value::Null),
        }
    }
}

/// One entry of the TAGFLD array
struct TagField {
    ident: u32,
    offset: usize,
    extended: bool,
    null_bit: bool,
    derived: bool,
}

impl TagField {
    /// Small pages pack null/extended bits into the offset word; large
    /// pages widen the offset and always carry the flags byte. The
    /// derived bit occupies the top of the word on both layouts.
    fn read(buf: &[u8], small_page: bool) -> Self {
        let raw = LittleEndian::read_u32(buf);
        let ident = raw & 0xFFFF;
        let word = (raw >> 16) as u16;
        let derived = word & 0x8000 != 0;
        if small_page {
            Self {
                ident,
                offset: (word & 0x1FFF) as usize,
                extended: word & 0x4000 != 0,
                null_bit: word & 0x2000 != 0,
                derived,
            }
        } else {
            Self {
                ident,
                offset: (word & 0x7FFF) as usize,
                extended: true,
                null_bit: false,
                derived,
            }
        }
    }
}

/// Comparison key of a TAGFLD entry with the derived bit flipped, so that
/// derived fields compare below every plain identifier
fn tagfld_cmp_key(ident: u32, derived: bool) -> u32 {
    ((!derived as u32) << 16) | (ident & 0xFFFF)
}
