//! Page parsing
//!
//! A page is the fixed-size unit the whole file is carved into. Every page
//! starts with a PGHDR (large pages append a PGHDR2 with extended checksums
//! and an embedded page number), and carries an array of 4-byte tags growing
//! backwards from the page tail. Tag 0 is the external header; the remaining
//! tags are the B-tree nodes.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::format::{PageFlags, TagFlags, SMALL_PAGE_LIMIT};
use crate::header::checksum_xor;

/// Size of the common page header (PGHDR)
pub const PGHDR_SIZE: usize = 40;

/// Size of the extended large-page header (PGHDR2)
pub const PGHDR2_SIZE: usize = 40;

/// Size of one tag entry
pub const TAG_SIZE: usize = 4;

/// Page-header layout, resolved once at open time from the declared page
/// size and applied uniformly afterwards.
#[derive(Debug, Clone, Copy)]
pub struct PageLayout {
    /// Page size in bytes
    pub page_size: usize,
    /// Small pages (≤ 8 KiB) keep tag flags in the tag entry and use
    /// 13-bit tag offsets; large pages use 15 bits and move the flags
    /// into the node data
    pub small: bool,
}

impl PageLayout {
    /// Resolve the layout for a page size
    pub fn new(page_size: u32) -> Self {
        Self { page_size: page_size as usize, small: page_size <= SMALL_PAGE_LIMIT }
    }

    /// Offset where node data starts
    pub fn data_start(&self) -> usize {
        if self.small {
            PGHDR_SIZE
        } else {
            PGHDR_SIZE + PGHDR2_SIZE
        }
    }

    /// Mask for tag size/offset fields
    pub fn tag_mask(&self) -> u16 {
        if self.small {
            0x1FFF
        } else {
            0x7FFF
        }
    }
}

/// A parsed database page
pub struct Page {
    /// Logical page number
    pub num: u32,
    buf: Vec<u8>,
    layout: PageLayout,
    /// Stored page checksum (XECHECKSUM)
    pub checksum: u64,
    /// Database time the page was last dirtied
    pub dbtime: i64,
    /// Previous leaf sibling (0 = none)
    pub prev_page: u32,
    /// Next leaf sibling (0 = none)
    pub next_page: u32,
    /// Object id of the owning B-tree (objidFDP)
    pub objid_fdp: u32,
    /// Free bytes on the page (cbFree)
    pub free_bytes: u16,
    /// Uncommitted free bytes (cbUncommittedFree)
    pub uncommitted_free: u16,
    /// First available data offset, i.e. end of node data (ibMicFree)
    data_end: u16,
    /// Number of tags in use (itagMicFree)
    pub tag_count: u16,
    /// Page flags
    pub flags: PageFlags,
    /// Byte range of the page key prefix inside the data region
    key_prefix: Option<(usize, usize)>,
}

impl Page {
    /// Parse a page from its raw buffer.
    ///
    /// Fails with `CorruptPage` when the declared data end or tag array
    /// does not fit the buffer.
    pub fn parse(num: u32, buf: Vec<u8>, layout: PageLayout) -> Result<Self> {
        let corrupt = |details: &str| Error::CorruptPage { pgno: num, details: details.into() };

        if buf.len() != layout.page_size {
            return Err(corrupt("short page buffer"));
        }
        if buf.len() < layout.data_start() {
            return Err(corrupt("page smaller than header"));
        }

        let data_end = LittleEndian::read_u16(&buf[32..]);
        let tag_count = LittleEndian::read_u16(&buf[34..]);
        let flags = PageFlags::from_bits_retain(LittleEndian::read_u32(&buf[36..]));

        let tag_space = tag_count as usize * TAG_SIZE;
        if tag_space > buf.len() - layout.data_start() {
            return Err(corrupt("tag array overruns page"));
        }
        if layout.data_start() + data_end as usize > buf.len() - tag_space {
            return Err(corrupt("data region overlaps tag array"));
        }

        let mut page = Self {
            num,
            checksum: LittleEndian::read_u64(&buf[0..]),
            dbtime: LittleEndian::read_i64(&buf[8..]),
            prev_page: LittleEndian::read_u32(&buf[16..]),
            next_page: LittleEndian::read_u32(&buf[20..]),
            objid_fdp: LittleEndian::read_u32(&buf[24..]),
            free_bytes: LittleEndian::read_u16(&buf[28..]),
            uncommitted_free: LittleEndian::read_u16(&buf[30..]),
            data_end,
            tag_count,
            flags,
            key_prefix: None,
            buf,
            layout,
        };

        // Tag 0 of a non-root page holds the common key prefix shared by
        // the page's compressed node keys.
        if !page.is_root() && page.tag_count > 0 {
            if let Ok(tag) = page.tag(0) {
                page.key_prefix = Some((tag.offset, tag.offset + tag.size));
            }
        }

        Ok(page)
    }

    /// Whether this is a B-tree root page
    pub fn is_root(&self) -> bool {
        self.flags.contains(PageFlags::ROOT)
    }

    /// Whether this is a leaf page
    pub fn is_leaf(&self) -> bool {
        self.flags.contains(PageFlags::LEAF)
    }

    /// Whether this is a branch page
    pub fn is_branch(&self) -> bool {
        !self.is_leaf()
    }

    /// Whether the page holds no nodes
    pub fn is_empty(&self) -> bool {
        self.flags.contains(PageFlags::EMPTY)
    }

    /// Whether the page belongs to a space tree
    pub fn is_space_tree(&self) -> bool {
        self.flags.contains(PageFlags::SPACE_TREE)
    }

    /// Whether the page belongs to a long value tree
    pub fn is_long_value(&self) -> bool {
        self.flags.contains(PageFlags::LONG_VALUE)
    }

    /// Node data region of the page
    fn data(&self) -> &[u8] {
        let start = self.layout.data_start();
        &self.buf[start..start + self.data_end as usize]
    }

    /// The common key prefix of this page, if any
    pub fn key_prefix(&self) -> Option<&[u8]> {
        self.key_prefix.map(|(start, end)| &self.data()[start..end])
    }

    /// Number of nodes on the page (tags minus the external header)
    pub fn node_count(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (self.tag_count as usize).saturating_sub(1)
    }

    /// Parse tag `num` (0 = external header)
    pub fn tag(&self, num: usize) -> Result<Tag<'_>> {
        if num >= self.tag_count as usize {
            return Err(Error::CorruptPage {
                pgno: self.num,
                details: format!("tag {num} out of bounds (0-{})", self.tag_count),
            });
        }

        let tag_offset = self.buf.len() - (num + 1) * TAG_SIZE;
        let cb = LittleEndian::read_u16(&self.buf[tag_offset..]);
        let ib = LittleEndian::read_u16(&self.buf[tag_offset + 2..]);

        let mask = self.layout.tag_mask();
        let size = (cb & mask) as usize;
        let offset = (ib & mask) as usize;

        let data = self.data();
        if offset + size > data.len() {
            return Err(Error::CorruptPage {
                pgno: self.num,
                details: format!("tag {num} data out of bounds ({offset}+{size})"),
            });
        }
        let data = &data[offset..offset + size];

        // Small pages keep the flags in the tag entry; large pages store
        // them in the 3 high bits of the node's first word.
        let flags = if self.layout.small {
            TagFlags::from_bits_retain(ib >> 13)
        } else if data.len() >= 2 {
            TagFlags::from_bits_retain((data[1] >> 5) as u16)
        } else {
            TagFlags::empty()
        };

        Ok(Tag { offset, size, flags, data })
    }

    /// Parse node `num` (tag `num + 1`)
    pub fn node(&self, num: usize) -> Result<Node<'_>> {
        if num >= self.node_count() {
            return Err(Error::CorruptPage {
                pgno: self.num,
                details: format!("node {num} out of bounds (0-{})", self.node_count()),
            });
        }
        Node::parse(self, self.tag(num + 1)?)
    }

    /// Verify the page checksum when the page uses the new checksum format.
    /// The XOR half of the XECHECKSUM covers the page past the checksum
    /// field, seeded with the logical page number.
    pub fn verify_checksum(&self) -> Result<()> {
        if !self.flags.contains(PageFlags::NEW_CHECKSUM_FORMAT) {
            return Ok(());
        }
        let expected = self.checksum as u32;
        let actual = checksum_xor(&self.buf[8..], self.num);
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                expected: expected as u64,
                actual: actual as u64,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("num", &self.num)
            .field("flags", &self.flags)
            .field("nodes", &self.node_count())
            .field("next_page", &self.next_page)
            .finish()
    }
}

/// A raw tag entry: the physical data slot of a page
#[derive(Debug)]
pub struct Tag<'p> {
    /// Data offset inside the page data region
    pub offset: usize,
    /// Data size
    pub size: usize,
    /// Tag flags
    pub flags: TagFlags,
    /// Tag payload
    pub data: &'p [u8],
}

/// A decoded B-tree node: full key plus payload
#[derive(Debug)]
pub struct Node<'p> {
    /// Reconstructed key (page prefix + local suffix)
    pub key: Vec<u8>,
    /// Node payload; for branch nodes the first u32 is the child pgno
    pub data: &'p [u8],
    /// Tag flags of the node
    pub flags: TagFlags,
}

/// Key size fields mask out the flag bits large pages keep in the
/// first word
const KEY_SIZE_MASK: u16 = 0x1FFF;

impl<'p> Node<'p> {
    fn parse(page: &'p Page, tag: Tag<'p>) -> Result<Node<'p>> {
        let buf = tag.data;
        let mut offset = 0;

        let mut key = Vec::new();
        if buf.len() >= 2 && tag.flags.contains(TagFlags::COMPRESSED) {
            let prefix_size = (LittleEndian::read_u16(&buf[..2]) & KEY_SIZE_MASK) as usize;
            let prefix = page.key_prefix().unwrap_or(&[]);
            key.extend_from_slice(&prefix[..prefix_size.min(prefix.len())]);
            // A prefix length past the stored prefix is zero-padded
            key.resize(prefix_size, 0);
            offset += 2;
        }

        if buf.len() >= offset + 2 {
            let suffix_size = (LittleEndian::read_u16(&buf[offset..]) & KEY_SIZE_MASK) as usize;
            offset += 2;
            let end = (offset + suffix_size).min(buf.len());
            key.extend_from_slice(&buf[offset..end]);
            offset = end;
        }

        Ok(Node { key, data: &buf[offset.min(buf.len())..], flags: tag.flags })
    }

    /// Child page number of a branch node
    pub fn child(&self, pgno: u32) -> Result<u32> {
        if self.data.len() < 4 {
            return Err(Error::CorruptTree {
                pgno,
                details: "branch node without child page number".into(),
            });
        }
        Ok(LittleEndian::read_u32(&self.data[..4]))
    }
}
