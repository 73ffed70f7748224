//! Long value trees
//!
//! Column data too large for a record is "separated" into the table's long
//! value tree. The record keeps a long value id; the tree stores, under
//! the byte-reversed id, a header node with the total size followed by
//! segment nodes whose keys append the big-endian byte offset of the
//! segment. Individual segments may be compressed, detectable because the
//! stored length then disagrees with the offset delta.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::warn;

use crate::btree::BTree;
use crate::compression;
use crate::error::{Error, Result};
use crate::store::PageStore;

/// Size of a long value header node payload
const LV_HEADER_SIZE: usize = 8;

/// Reader for one table's long value tree
pub struct LongValueStore<'s> {
    store: &'s PageStore,
    root: u32,
    strict: bool,
}

impl<'s> LongValueStore<'s> {
    /// Create a reader over the tree rooted at `root`
    pub fn new(store: &'s PageStore, root: u32, strict: bool) -> Self {
        Self { store, root, strict }
    }

    /// Fetch and reassemble the value stored under the long value id
    /// `key` (as found in the record payload).
    ///
    /// In best-effort mode a value whose header or trailing segments are
    /// gone comes back as the partial prefix that is still present, with a
    /// warning; strict mode fails instead.
    pub fn fetch(&self, key: &[u8]) -> Result<Vec<u8>> {
        let lv_key: Vec<u8> = key.iter().rev().copied().collect();

        let tree = BTree::open(self.store, self.root)?;
        let mut cursor = tree.cursor();
        let exact = cursor.seek(&lv_key)?;

        let mut total: Option<usize> = None;
        if exact {
            let header = cursor
                .next()?
                .ok_or_else(|| Error::MissingLongValue { key: key.to_vec() })?;
            if header.data.len() >= LV_HEADER_SIZE {
                total = Some(LittleEndian::read_u32(&header.data[4..]) as usize);
            }
        }

        // Segment keys are the id followed by a big-endian byte offset
        let mut segments: Vec<(usize, Vec<u8>)> = Vec::new();
        while let Some(entry) = cursor.next()? {
            if entry.key.len() != lv_key.len() + 4 || !entry.key.starts_with(&lv_key) {
                break;
            }
            let offset = BigEndian::read_u32(&entry.key[lv_key.len()..]) as usize;
            segments.push((offset, entry.data));
        }

        if !exact && segments.is_empty() {
            return Err(Error::MissingLongValue { key: key.to_vec() });
        }
        if !exact {
            if self.strict {
                return Err(Error::MissingLongValue { key: key.to_vec() });
            }
            warn!(root = self.root, "long value header missing, reassembling orphan segments");
        }

        let mut out = Vec::with_capacity(total.unwrap_or(0));
        for (i, (offset, data)) in segments.iter().enumerate() {
            let next_offset = segments
                .get(i + 1)
                .map(|(o, _)| *o)
                .or(total)
                .unwrap_or(offset + data.len());

            // A segment whose stored length disagrees with the offset
            // delta is compressed
            let chunk = if next_offset.saturating_sub(*offset) != data.len() {
                compression::decompress(data)?
            } else {
                data.clone()
            };

            if *offset != out.len() {
                if self.strict {
                    return Err(Error::Truncated("discontiguous long value segments"));
                }
                warn!(root = self.root, offset, have = out.len(), "long value segment gap");
                out.resize(*offset, 0);
            }
            out.extend_from_slice(&chunk);
        }

        if let Some(total) = total {
            match out.len() {
                n if n < total => {
                    if self.strict {
                        return Err(Error::Truncated("long value shorter than declared size"));
                    }
                    warn!(root = self.root, have = n, total, "long value truncated");
                }
                n if n > total => out.truncate(total),
                _ => {}
            }
        }

        Ok(out)
    }
}
