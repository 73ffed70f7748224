//! Shared fixture builders: synthetic single- and multi-page database
//! images assembled byte by byte.
#![allow(dead_code)]

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use esedb::format::{PageFlags, TagFlags, JET_MAGIC};
use esedb::header::checksum_xor;
use esedb::{Database, Options};

pub const PAGE_SIZE: usize = 4096;

/// Logical page numbers used by the fixtures
pub const CATALOG_PAGE: u32 = 4;

/// Build a valid database header page (checksummed, clean shutdown)
pub fn make_header() -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_SIZE];
    LittleEndian::write_u32(&mut buf[4..], JET_MAGIC);
    LittleEndian::write_u32(&mut buf[8..], 0x620); // ulVersion
    LittleEndian::write_u32(&mut buf[52..], 3); // clean shutdown
    LittleEndian::write_u32(&mut buf[232..], 20); // format revision
    LittleEndian::write_u32(&mut buf[236..], PAGE_SIZE as u32);
    let sum = checksum_xor(&buf[4..], JET_MAGIC);
    LittleEndian::write_u32(&mut buf[0..], sum);
    buf
}

/// Assembles a whole file image from logical pages. Pages not supplied
/// are zero-filled.
#[derive(Default)]
pub struct ImageBuilder {
    pages: BTreeMap<u32, Vec<u8>>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, pgno: u32, buf: Vec<u8>) -> Self {
        assert_eq!(buf.len(), PAGE_SIZE);
        assert!(pgno >= 1);
        self.pages.insert(pgno, buf);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let last = self.pages.keys().max().copied().unwrap_or(0);
        // Physical pages 0 and 1 are the header and its shadow
        let mut image = vec![0u8; (last as usize + 2) * PAGE_SIZE];
        let header = make_header();
        image[..PAGE_SIZE].copy_from_slice(&header);
        image[PAGE_SIZE..2 * PAGE_SIZE].copy_from_slice(&header);
        for (pgno, buf) in self.pages {
            let start = (pgno as usize + 1) * PAGE_SIZE;
            image[start..start + PAGE_SIZE].copy_from_slice(&buf);
        }
        image
    }
}

/// Builds one small-format page: node data packed from the front of the
/// data region, 4-byte tags growing from the tail. Tag 0 (the external
/// header) must be added first.
pub struct PageBuilder {
    buf: Vec<u8>,
    data_offset: usize,
    tags: usize,
}

impl PageBuilder {
    pub fn new(flags: PageFlags, next_page: u32) -> Self {
        let mut buf = vec![0u8; PAGE_SIZE];
        LittleEndian::write_u32(&mut buf[20..], next_page);
        LittleEndian::write_u32(&mut buf[36..], flags.bits());
        Self { buf, data_offset: 0, tags: 0 }
    }

    /// Add the external header tag, with `prefix` as the page key prefix
    pub fn external_header(self, prefix: &[u8]) -> Self {
        assert_eq!(self.tags, 0);
        self.tag(prefix, TagFlags::empty())
    }

    pub fn tag(mut self, payload: &[u8], flags: TagFlags) -> Self {
        let start = 40 + self.data_offset;
        self.buf[start..start + payload.len()].copy_from_slice(payload);

        let tag_offset = self.buf.len() - (self.tags + 1) * 4;
        LittleEndian::write_u16(&mut self.buf[tag_offset..], payload.len() as u16);
        LittleEndian::write_u16(
            &mut self.buf[tag_offset + 2..],
            self.data_offset as u16 | (flags.bits() << 13),
        );

        self.data_offset += payload.len();
        self.tags += 1;
        self
    }

    /// Add a leaf node: `[suffix len][suffix][record bytes]`
    pub fn leaf_node(self, key: &[u8], data: &[u8]) -> Self {
        let mut payload = Vec::new();
        payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
        payload.extend_from_slice(key);
        payload.extend_from_slice(data);
        self.tag(&payload, TagFlags::empty())
    }

    /// Add a branch node pointing at `child`
    pub fn branch_node(self, key: &[u8], child: u32) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&child.to_le_bytes());
        self.leaf_node(key, &data)
    }

    pub fn build(mut self) -> Vec<u8> {
        LittleEndian::write_u16(&mut self.buf[32..], self.data_offset as u16);
        LittleEndian::write_u16(&mut self.buf[34..], self.tags as u16);
        self.buf
    }

    /// Like `build`, but flags the page as carrying the new checksum
    /// format and stamps a valid checksum
    pub fn build_checksummed(mut self, pgno: u32) -> Vec<u8> {
        let flags = LittleEndian::read_u32(&self.buf[36..])
            | PageFlags::NEW_CHECKSUM_FORMAT.bits();
        LittleEndian::write_u32(&mut self.buf[36..], flags);
        LittleEndian::write_u16(&mut self.buf[32..], self.data_offset as u16);
        LittleEndian::write_u16(&mut self.buf[34..], self.tags as u16);
        let sum = checksum_xor(&self.buf[8..], pgno);
        LittleEndian::write_u32(&mut self.buf[0..], sum);
        self.buf
    }
}

/// Leaf pages holding records must advertise the new record format
pub fn data_leaf_flags() -> PageFlags {
    PageFlags::LEAF | PageFlags::ROOT | PageFlags::NEW_RECORD_FORMAT
}

/// Builds record bytes from typed column sections. Fixed and variable
/// columns must be added in fid order without gaps, matching how a real
/// schema lays them out.
#[derive(Default)]
pub struct RecordBuilder {
    fixed: Vec<(u8, Option<Vec<u8>>, usize)>,
    vars: Vec<(u8, Option<Vec<u8>>)>,
    tagged: Vec<(u16, Option<u8>, Vec<u8>)>,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixed(mut self, fid: u8, bytes: &[u8]) -> Self {
        self.fixed.push((fid, Some(bytes.to_vec()), bytes.len()));
        self
    }

    pub fn fixed_null(mut self, fid: u8, width: usize) -> Self {
        self.fixed.push((fid, None, width));
        self
    }

    pub fn var(mut self, fid: u8, bytes: &[u8]) -> Self {
        self.vars.push((fid, Some(bytes.to_vec())));
        self
    }

    pub fn var_null(mut self, fid: u8) -> Self {
        self.vars.push((fid, None));
        self
    }

    /// Tagged field; `flags` adds the extended-info byte in front of the
    /// data
    pub fn tagged(mut self, fid: u16, flags: Option<u8>, bytes: &[u8]) -> Self {
        self.tagged.push((fid, flags, bytes.to_vec()));
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        self.fixed.sort_by_key(|&(fid, _, _)| fid);
        self.vars.sort_by_key(|&(fid, _)| fid);
        self.tagged.sort_by_key(|&(fid, _, _)| fid);

        for (i, &(fid, _, _)) in self.fixed.iter().enumerate() {
            assert_eq!(fid as usize, i + 1, "fixed fids must be contiguous from 1");
        }
        for (i, &(fid, _)) in self.vars.iter().enumerate() {
            assert_eq!(fid as usize, i + 128, "variable fids must be contiguous from 128");
        }

        let last_fixed = self.fixed.last().map(|&(fid, _, _)| fid).unwrap_or(0);
        let last_var = self.vars.last().map(|&(fid, _)| fid).unwrap_or(0);

        let mut fixed_data = Vec::new();
        let mut bitmap = vec![0u8; (last_fixed as usize + 7) / 8];
        for &(fid, ref value, width) in &self.fixed {
            match value {
                Some(bytes) => fixed_data.extend_from_slice(bytes),
                None => {
                    fixed_data.extend(std::iter::repeat(0).take(width));
                    let bit = fid as usize - 1;
                    bitmap[bit / 8] |= 1 << (bit % 8);
                }
            }
        }

        let mut out = Vec::new();
        out.push(last_fixed);
        out.push(last_var);
        let end_of_fixed = 4 + fixed_data.len() + bitmap.len();
        out.extend_from_slice(&(end_of_fixed as u16).to_le_bytes());
        out.extend_from_slice(&fixed_data);
        out.extend_from_slice(&bitmap);

        let mut var_data = Vec::new();
        for &(_, ref value) in &self.vars {
            let end = match value {
                Some(bytes) => {
                    var_data.extend_from_slice(bytes);
                    var_data.len() as u16
                }
                None => var_data.len() as u16 | 0x8000,
            };
            out.extend_from_slice(&end.to_le_bytes());
        }
        out.extend_from_slice(&var_data);

        if !self.tagged.is_empty() {
            let mut blobs = Vec::new();
            let mut array = Vec::new();
            let base = self.tagged.len() * 4;
            for &(fid, flags, ref bytes) in &self.tagged {
                let offset = (base + blobs.len()) as u16;
                let word = offset | if flags.is_some() { 0x4000 } else { 0 };
                array.extend_from_slice(&fid.to_le_bytes());
                array.extend_from_slice(&word.to_le_bytes());
                if let Some(f) = flags {
                    blobs.push(f);
                }
                blobs.extend_from_slice(bytes);
            }
            out.extend_from_slice(&array);
            out.extend_from_slice(&blobs);
        }

        out
    }
}

/// One row of the catalog table
pub struct CatRow {
    pub objid: u32,
    pub typ: i16,
    pub id: u32,
    pub coltyp_or_pgno: u32,
    pub space: u32,
    pub flags: u32,
    pub locale: u32,
    pub name: Option<&'static str>,
    pub key_fld_ids: Option<Vec<u8>>,
}

impl CatRow {
    pub fn table(objid: u32, name: &'static str, root_page: u32) -> Self {
        Self {
            objid,
            typ: 1,
            id: objid,
            coltyp_or_pgno: root_page,
            space: 0,
            flags: 0,
            locale: 0,
            name: Some(name),
            key_fld_ids: None,
        }
    }

    pub fn column(objid: u32, fid: u32, name: &'static str, coltyp: u32, locale: u32) -> Self {
        Self {
            objid,
            typ: 2,
            id: fid,
            coltyp_or_pgno: coltyp,
            space: 255,
            flags: 0,
            locale,
            name: Some(name),
            key_fld_ids: None,
        }
    }

    pub fn index(objid: u32, id: u32, name: &'static str, root_page: u32, fids: &[u16]) -> Self {
        let mut key_fld_ids = Vec::new();
        for &fid in fids {
            key_fld_ids.extend_from_slice(&0u16.to_le_bytes());
            key_fld_ids.extend_from_slice(&fid.to_le_bytes());
        }
        Self {
            objid,
            typ: 3,
            id,
            coltyp_or_pgno: root_page,
            space: 0,
            flags: 0,
            locale: 0,
            name: Some(name),
            key_fld_ids: Some(key_fld_ids),
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn long_value(objid: u32, id: u32, root_page: u32) -> Self {
        Self {
            objid,
            typ: 4,
            id,
            coltyp_or_pgno: root_page,
            space: 0,
            flags: 0,
            locale: 0,
            name: None,
            key_fld_ids: None,
        }
    }

    /// Key bytes ordering rows by (objid, type, id)
    pub fn key(&self) -> Vec<u8> {
        let mut key = Vec::new();
        key.extend_from_slice(&self.objid.to_be_bytes());
        key.push(self.typ as u8);
        key.extend_from_slice(&self.id.to_be_bytes());
        key
    }

    pub fn record(&self) -> Vec<u8> {
        let mut builder = RecordBuilder::new()
            .fixed(1, &(self.objid as i32).to_le_bytes())
            .fixed(2, &self.typ.to_le_bytes())
            .fixed(3, &(self.id as i32).to_le_bytes())
            .fixed(4, &(self.coltyp_or_pgno as i32).to_le_bytes())
            .fixed(5, &(self.space as i32).to_le_bytes())
            .fixed(6, &(self.flags as i32).to_le_bytes())
            .fixed(7, &(self.locale as i32).to_le_bytes());

        match (&self.name, &self.key_fld_ids) {
            (name, Some(fids)) => {
                builder = match name {
                    Some(n) => builder.var(128, n.as_bytes()),
                    None => builder.var_null(128),
                };
                builder = builder
                    .var_null(129)
                    .var_null(130)
                    .var_null(131)
                    .var(132, fids);
            }
            (Some(n), None) => builder = builder.var(128, n.as_bytes()),
            (None, None) => {}
        }

        builder.build()
    }
}

/// Build a catalog page from rows; rows are sorted by catalog key
pub fn catalog_page(rows: &[CatRow]) -> Vec<u8> {
    let mut sorted: Vec<&CatRow> = rows.iter().collect();
    sorted.sort_by_key(|r| r.key());
    let mut page = PageBuilder::new(data_leaf_flags(), 0).external_header(&[]);
    for row in sorted {
        page = page.leaf_node(&row.key(), &row.record());
    }
    page.build()
}

/// A database with one user table `People(id: Long, name: Text[1252])`
/// rooted at page 5, holding rows (1, "alice"), (2, "bob"), (3, "carol").
pub fn people_image() -> Vec<u8> {
    let rows = [
        CatRow::table(10, "People", 5),
        CatRow::column(10, 1, "id", 4, 0),
        CatRow::column(10, 128, "name", 10, 1252),
    ];

    let data = PageBuilder::new(data_leaf_flags(), 0)
        .external_header(&[])
        .leaf_node(b"\x7f\x01", &people_record(1, b"alice"))
        .leaf_node(b"\x7f\x02", &people_record(2, b"bob"))
        .leaf_node(b"\x7f\x03", &people_record(3, b"carol"))
        .build();

    ImageBuilder::new()
        .page(CATALOG_PAGE, catalog_page(&rows))
        .page(5, data)
        .build()
}

pub fn people_record(id: i32, name: &[u8]) -> Vec<u8> {
    RecordBuilder::new().fixed(1, &id.to_le_bytes()).var(128, name).build()
}

pub fn open(image: Vec<u8>) -> Database {
    Database::from_bytes(image, Options::new()).expect("open fixture image")
}

pub fn open_strict(image: Vec<u8>) -> esedb::Result<Database> {
    Database::from_bytes(image, Options::new().strict(true))
}
