//! Database facade
//!
//! `Database::open` maps the file, locates the header, and assembles the
//! catalog; everything after that is lazy. Table handles borrow the
//! database, and row iterators open a fresh cursor per call, so iterating
//! a table twice yields the same rows.

use std::path::Path;

use tracing::{debug, warn};

use crate::btree::{BTree, Cursor};
use crate::catalog::{Catalog, ColumnMeta, IndexMeta, TableMeta};
use crate::error::{Error, Result};
use crate::format::{PageFlags, CATALOG_PAGE_NUMBER, CATALOG_SHADOW_PAGE_NUMBER};
use crate::header::DbHeader;
use crate::record::{DecodeContext, RecordData};
use crate::store::{ByteSource, MmapSource, PageStore, DEFAULT_PAGE_CACHE_SIZE};
use crate::value::Value;

/// Bytes of the file head scanned for the primary and shadow headers
const HEADER_SCAN_LEN: usize = 0x8000 + 4096;

/// Open options
#[derive(Debug, Clone)]
pub struct Options {
    /// Fail on checksum mismatches and unreadable catalog rows instead of
    /// warning and degrading
    pub strict: bool,
    /// Decoded pages kept in the page cache
    pub page_cache_size: usize,
}

impl Options {
    /// Best-effort defaults
    pub fn new() -> Self {
        Self { strict: false, page_cache_size: DEFAULT_PAGE_CACHE_SIZE }
    }

    /// Set strict mode
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the page cache capacity
    pub fn page_cache_size(mut self, pages: usize) -> Self {
        self.page_cache_size = pages;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only ESE database
pub struct Database {
    store: PageStore,
    header: DbHeader,
    catalog: Catalog,
    strict: bool,
}

impl Database {
    /// Open a database file with default options
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Options::new())
    }

    /// Open a database file
    pub fn open_with(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let source = MmapSource::open(path)?;
        Self::from_source(Box::new(source), options)
    }

    /// Open a database from an in-memory image
    pub fn from_bytes(bytes: Vec<u8>, options: Options) -> Result<Self> {
        Self::from_source(Box::new(bytes), options)
    }

    /// Open a database from any byte source
    pub fn from_source(source: Box<dyn ByteSource>, options: Options) -> Result<Self> {
        let head_len = (source.len() as usize).min(HEADER_SCAN_LEN);
        let mut head = vec![0u8; head_len];
        source.read_at(0, &mut head)?;
        let header = DbHeader::locate(&head, options.strict)?;

        let store =
            PageStore::new(source, header.page_size, options.strict, options.page_cache_size);

        let catalog = match Catalog::build(&store, CATALOG_PAGE_NUMBER, options.strict) {
            Ok(catalog) => catalog,
            Err(e) if !options.strict => {
                warn!(error = %e, "catalog unreadable, falling back to shadow catalog");
                Catalog::build(&store, CATALOG_SHADOW_PAGE_NUMBER, false)?
            }
            Err(e) => return Err(e),
        };

        debug!(
            page_size = header.page_size,
            tables = catalog.tables().len(),
            strict = options.strict,
            "database opened"
        );
        Ok(Self { store, header, catalog, strict: options.strict })
    }

    /// The parsed file header
    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    /// Page size of the database
    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    /// All tables, including the system (MSys*) tables
    pub fn tables(&self) -> impl Iterator<Item = Table<'_>> {
        self.catalog.tables().iter().map(move |meta| Table { db: self, meta })
    }

    /// Look up a table by name, case-insensitively
    pub fn table(&self, name: &str) -> Result<Table<'_>> {
        self.catalog
            .find(name)
            .map(|meta| Table { db: self, meta })
            .ok_or_else(|| Error::NoSuchTable(name.to_string()))
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("page_size", &self.header.page_size)
            .field("state", &self.header.state)
            .field("tables", &self.catalog.tables().len())
            .finish()
    }
}

/// A handle on one table of an open database
#[derive(Clone, Copy)]
pub struct Table<'d> {
    db: &'d Database,
    meta: &'d TableMeta,
}

impl<'d> Table<'d> {
    /// Table name
    pub fn name(&self) -> &'d str {
        &self.meta.name
    }

    /// Schema of the table's columns
    pub fn columns(&self) -> &'d [ColumnMeta] {
        self.meta.columns()
    }

    /// The table's secondary indexes
    pub fn indexes(&self) -> &'d [IndexMeta] {
        self.meta.indexes()
    }

    /// Look up an index by name
    pub fn index(&self, name: &str) -> Result<&'d IndexMeta> {
        self.meta.index(name).ok_or_else(|| Error::NoSuchIndex(name.to_string()))
    }

    /// Root page of the data tree
    pub fn root_page(&self) -> u32 {
        self.meta.root_page
    }

    /// Iterate the records in primary key order. Each call starts a fresh
    /// scan.
    pub fn records(&self) -> Records<'d> {
        Records { db: self.db, meta: self.meta, cursor: None, done: false }
    }

    /// Iterate the records in the order of an index. The primary index is
    /// the data tree itself; secondary index entries point at primary
    /// keys, and entries whose record is gone are skipped in best-effort
    /// mode.
    pub fn records_by_index(&self, name: &str) -> Result<IndexRecords<'d>> {
        let index = self.index(name)?;
        Ok(IndexRecords {
            db: self.db,
            meta: self.meta,
            index_root: index.root_page,
            primary: index.is_primary(),
            cursor: None,
            done: false,
        })
    }

    /// Fetch one record by its exact primary key
    pub fn record_by_key(&self, key: &[u8]) -> Result<Record<'d>> {
        let tree = BTree::open(&self.db.store, self.meta.root_page)?;
        let mut cursor = tree.cursor();
        if !cursor.seek(key)? {
            return Err(Error::KeyNotFound);
        }
        let entry = cursor.current()?.ok_or(Error::KeyNotFound)?;
        Ok(Record::from_entry(self.db, self.meta, entry.data, entry.page_flags))
    }
}

impl std::fmt::Debug for Table<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.meta.name)
            .field("root_page", &self.meta.root_page)
            .field("columns", &self.meta.columns().len())
            .finish()
    }
}

/// Iterator over the records of a table
pub struct Records<'d> {
    db: &'d Database,
    meta: &'d TableMeta,
    cursor: Option<Cursor<'d>>,
    done: bool,
}

impl<'d> Iterator for Records<'d> {
    type Item = Result<Record<'d>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cursor.is_none() {
            match BTree::open(&self.db.store, self.meta.root_page) {
                Ok(tree) => self.cursor = Some(tree.cursor()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        match self.cursor.as_mut().and_then(|c| c.next().transpose()) {
            Some(Ok(entry)) => {
                Some(Ok(Record::from_entry(self.db, self.meta, entry.data, entry.page_flags)))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Iterator over records in secondary index order
pub struct IndexRecords<'d> {
    db: &'d Database,
    meta: &'d TableMeta,
    index_root: u32,
    primary: bool,
    cursor: Option<Cursor<'d>>,
    done: bool,
}

impl<'d> Iterator for IndexRecords<'d> {
    type Item = Result<Record<'d>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cursor.is_none() {
            match BTree::open(&self.db.store, self.index_root) {
                Ok(tree) => self.cursor = Some(tree.cursor()),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        loop {
            let entry = match self.cursor.as_mut().and_then(|c| c.next().transpose()) {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            // The primary index tree holds the records themselves
            if self.primary {
                return Some(Ok(Record::from_entry(
                    self.db,
                    self.meta,
                    entry.data,
                    entry.page_flags,
                )));
            }

            // A secondary index leaf entry's payload is the primary key
            let table = Table { db: self.db, meta: self.meta };
            match table.record_by_key(&entry.data) {
                Ok(record) => return Some(Ok(record)),
                Err(Error::KeyNotFound) if !self.db.strict => {
                    warn!(table = %self.meta.name, "index entry without a record, skipping");
                }
                Err(Error::KeyNotFound) => {
                    self.done = true;
                    return Some(Err(Error::KeyNotFound));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// One decoded record of a table
pub struct Record<'d> {
    db: &'d Database,
    meta: &'d TableMeta,
    data: RecordData,
}

impl<'d> Record<'d> {
    fn from_entry(
        db: &'d Database,
        meta: &'d TableMeta,
        data: Vec<u8>,
        page_flags: PageFlags,
    ) -> Self {
        let data = RecordData::parse(
            data,
            page_flags.contains(PageFlags::NEW_RECORD_FORMAT),
            db.store.layout().small,
        );
        Self { db, meta, data }
    }

    /// Decode one column by name.
    ///
    /// Absent columns decode as `Value::Null` (or the column default); a
    /// malformed column fails without affecting the rest of the record.
    pub fn get(&self, column: &str) -> Result<Value> {
        let col = self
            .meta
            .column(column)
            .ok_or_else(|| Error::NoSuchColumn(column.to_string()))?;
        let ctx = DecodeContext { store: &self.db.store, table: self.meta, strict: self.db.strict };
        self.data.value(&ctx, col)
    }

    /// Decode every column, yielding `(name, value-or-error)` pairs in
    /// schema order
    pub fn values(&self) -> impl Iterator<Item = (&str, Result<Value>)> + '_ {
        self.meta.columns().iter().map(move |col| {
            let ctx =
                DecodeContext { store: &self.db.store, table: self.meta, strict: self.db.strict };
            (col.name.as_str(), self.data.value(&ctx, col))
        })
    }
}

impl std::fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("Record");
        for (name, value) in self.values() {
            match value {
                Ok(v) => dbg.field(name, &v),
                Err(e) => dbg.field(name, &format_args!("<{e}>")),
            };
        }
        dbg.finish()
    }
}
