//! Catalog (MSysObjects)
//!
//! The schema of every user table is itself stored in a table, rooted at a
//! fixed page. Its own schema is hardcoded here to break the circularity.
//! Rows are keyed so that a table's row sorts before its column, index and
//! long value rows, which lets one sequential scan assemble the whole
//! schema; rows are still attached by object id so a reordered or damaged
//! catalog degrades to dropped rows instead of misattributed columns.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::btree::BTree;
use crate::error::{Error, Result};
use crate::format::{
    Codepage, ColumnType, IndexFlags, ObjectType, PageFlags, FID_TAGGED_FIRST, FID_VARIABLE_FIRST,
};
use crate::record::{DecodeContext, RecordData};
use crate::store::PageStore;
use crate::value::Value;

/// Schema of one column
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    /// Field id; the id range decides fixed/variable/tagged storage
    pub fid: u32,
    /// Column name
    pub name: String,
    /// Column type
    pub coltyp: ColumnType,
    /// Declared size (bytes) for fixed columns
    pub size: usize,
    /// Raw grbit flags from the catalog
    pub flags: u32,
    /// Text codepage
    pub codepage: Codepage,
    /// Default value in raw record encoding
    pub default: Option<Vec<u8>>,
    /// Byte offset inside the fixed data region, accumulated in schema order
    pub(crate) fixed_offset: usize,
}

impl ColumnMeta {
    /// Fixed columns live at computed offsets in every record
    pub fn is_fixed(&self) -> bool {
        self.fid < FID_VARIABLE_FIRST
    }

    /// Variable columns are addressed through the end-offset array
    pub fn is_variable(&self) -> bool {
        (FID_VARIABLE_FIRST..FID_TAGGED_FIRST).contains(&self.fid)
    }

    /// Tagged columns are present only when set
    pub fn is_tagged(&self) -> bool {
        self.fid >= FID_TAGGED_FIRST
    }
}

/// Schema of one secondary index
#[derive(Debug, Clone)]
pub struct IndexMeta {
    /// Index name
    pub name: String,
    /// Root page of the index B-tree
    pub root_page: u32,
    /// Index flags
    pub flags: IndexFlags,
    /// Field ids of the key columns, in key order
    pub key_fids: Vec<u16>,
}

impl IndexMeta {
    /// Whether this is the primary (clustered) index
    pub fn is_primary(&self) -> bool {
        self.flags.contains(IndexFlags::PRIMARY)
    }
}

/// Schema of one table
#[derive(Debug, Clone)]
pub struct TableMeta {
    /// Table name
    pub name: String,
    /// Object id
    pub objid: u32,
    /// Root page of the data B-tree
    pub root_page: u32,
    /// Raw flags from the catalog
    pub flags: u32,
    /// Root page of the long value tree, if the table has one
    pub lv_root: Option<u32>,
    columns: Vec<ColumnMeta>,
    indexes: Vec<IndexMeta>,
    by_name: HashMap<String, usize>,
    by_fid: HashMap<u32, usize>,
    fixed_end: usize,
}

impl TableMeta {
    fn new(name: String, objid: u32, root_page: u32, flags: u32) -> Self {
        Self {
            name,
            objid,
            root_page,
            flags,
            lv_root: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            by_name: HashMap::new(),
            by_fid: HashMap::new(),
            fixed_end: 0,
        }
    }

    fn add_column(&mut self, mut col: ColumnMeta) {
        if col.is_fixed() {
            col.fixed_offset = self.fixed_end;
            self.fixed_end += col.size;
        }
        self.by_name.insert(col.name.to_lowercase(), self.columns.len());
        self.by_fid.insert(col.fid, self.columns.len());
        self.columns.push(col);
    }

    fn add_index(&mut self, index: IndexMeta) {
        self.indexes.push(index);
    }

    /// All columns in schema order
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// All secondary indexes
    pub fn indexes(&self) -> &[IndexMeta] {
        &self.indexes
    }

    /// Look up a column by name, case-insensitively
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.by_name.get(&name.to_lowercase()).map(|&i| &self.columns[i])
    }

    /// Look up a column by field id
    pub fn column_by_fid(&self, fid: u32) -> Option<&ColumnMeta> {
        self.by_fid.get(&fid).map(|&i| &self.columns[i])
    }

    /// Look up an index by name, case-insensitively
    pub fn index(&self, name: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.name.eq_ignore_ascii_case(name))
    }
}

/// The assembled database schema
pub struct Catalog {
    tables: Vec<TableMeta>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Walk the catalog tree rooted at `root` and assemble all table
    /// schemas. Unreadable rows are dropped in best-effort mode and fatal
    /// in strict mode.
    pub fn build(store: &PageStore, root: u32, strict: bool) -> Result<Self> {
        let schema = catalog_table();
        let small = store.layout().small;

        let tree = BTree::open(store, root).map_err(catalog_err)?;
        let mut cursor = tree.cursor();

        let mut tables: Vec<TableMeta> = Vec::new();
        let mut by_objid: HashMap<u32, usize> = HashMap::new();

        loop {
            let entry = match cursor.next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => return Err(catalog_err(e)),
            };

            let rec = RecordData::parse(
                entry.data,
                entry.page_flags.contains(PageFlags::NEW_RECORD_FORMAT),
                small,
            );
            let ctx = DecodeContext { store, table: &schema, strict };

            if let Err(e) = apply_row(&rec, &ctx, &mut tables, &mut by_objid) {
                if strict {
                    return Err(catalog_err(e));
                }
                warn!(error = %e, "dropping unreadable catalog row");
            }
        }

        let by_name = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.to_lowercase(), i))
            .collect();

        debug!(tables = tables.len(), "catalog assembled");
        Ok(Self { tables, by_name })
    }

    /// All tables, including the system (MSys*) tables
    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    /// Look up a table by name, case-insensitively
    pub fn find(&self, name: &str) -> Option<&TableMeta> {
        self.by_name.get(&name.to_lowercase()).map(|&i| &self.tables[i])
    }
}

/// Apply one catalog row to the schema under construction
fn apply_row(
    rec: &RecordData,
    ctx: &DecodeContext<'_>,
    tables: &mut Vec<TableMeta>,
    by_objid: &mut HashMap<u32, usize>,
) -> Result<()> {
    let get = |name: &str| -> Result<Value> {
        let col = ctx
            .table
            .column(name)
            .ok_or_else(|| Error::CorruptCatalog(format!("no catalog column {name}")))?;
        rec.value(ctx, col)
    };
    let required = |name: &'static str, v: Option<u32>| {
        v.ok_or_else(|| Error::CorruptCatalog(format!("catalog row without {name}")))
    };

    let objid = required("ObjidTable", get("ObjidTable")?.as_u32())?;
    let raw_type = required("Type", get("Type")?.as_i64().map(|v| v as u32))?;
    let id = required("Id", get("Id")?.as_u32())?;
    let coltyp_or_pgno = get("ColtypOrPgnoFDP")?.as_i64().unwrap_or(0) as u32;
    let flags = get("Flags")?.as_i64().unwrap_or(0) as u32;

    let Some(object_type) = ObjectType::from_raw(raw_type as i16) else {
        warn!(objid, raw_type, "unknown catalog object type");
        return Ok(());
    };

    // Long value rows carry no name; everything else must
    let name = get("Name")?.as_str().map(str::to_owned);

    match object_type {
        ObjectType::Table => {
            let name =
                name.ok_or_else(|| Error::CorruptCatalog("table row without name".into()))?;
            by_objid.insert(objid, tables.len());
            tables.push(TableMeta::new(name, objid, coltyp_or_pgno, flags));
        }
        ObjectType::Column => {
            let name =
                name.ok_or_else(|| Error::CorruptCatalog("column row without name".into()))?;
            let table = attach(tables, by_objid, objid)?;
            let coltyp = ColumnType::from_raw(coltyp_or_pgno).unwrap_or(ColumnType::Nil);
            let codepage = get("PagesOrLocale")?
                .as_u32()
                .and_then(Codepage::from_raw)
                .unwrap_or(Codepage::Western);
            let declared = get("SpaceUsage")?.as_u32().unwrap_or(0) as usize;
            let default = get("DefaultValue")?.as_bytes().map(|b| b.to_vec());
            table.add_column(ColumnMeta {
                fid: id,
                name,
                coltyp,
                size: coltyp.fixed_size().unwrap_or(declared),
                flags,
                codepage,
                default,
                fixed_offset: 0,
            });
        }
        ObjectType::Index => {
            let name =
                name.ok_or_else(|| Error::CorruptCatalog("index row without name".into()))?;
            let table = attach(tables, by_objid, objid)?;
            let key_fids = match get("KeyFldIDs")? {
                Value::Binary(bytes) => bytes
                    .chunks_exact(4)
                    .map(|chunk| LittleEndian::read_u16(&chunk[2..]))
                    .collect(),
                _ => Vec::new(),
            };
            table.add_index(IndexMeta {
                name,
                root_page: coltyp_or_pgno,
                flags: IndexFlags::from_bits_retain(flags),
                key_fids,
            });
        }
        ObjectType::LongValue => {
            let table = attach(tables, by_objid, objid)?;
            table.lv_root = Some(coltyp_or_pgno);
        }
        ObjectType::Callback => {}
    }

    Ok(())
}

/// Find the owning table of a non-table row. A row whose table was never
/// seen is an orphan and cannot be attached.
fn attach<'t>(
    tables: &'t mut [TableMeta],
    by_objid: &HashMap<u32, usize>,
    objid: u32,
) -> Result<&'t mut TableMeta> {
    by_objid
        .get(&objid)
        .map(|&i| &mut tables[i])
        .ok_or_else(|| Error::CorruptCatalog(format!("orphan catalog row for objid {objid}")))
}

fn catalog_err(e: Error) -> Error {
    match e {
        e @ Error::CorruptCatalog(_) => e,
        e => Error::CorruptCatalog(e.to_string()),
    }
}

/// The hardcoded schema of the catalog table itself
pub(crate) fn catalog_table() -> TableMeta {
    use ColumnType::*;

    let mut table = TableMeta::new("MSysObjects".to_string(), 2, crate::format::CATALOG_PAGE_NUMBER, 0);

    let fixed: &[(u32, &str, ColumnType)] = &[
        (1, "ObjidTable", Long),
        (2, "Type", Short),
        (3, "Id", Long),
        (4, "ColtypOrPgnoFDP", Long),
        (5, "SpaceUsage", Long),
        (6, "Flags", Long),
        (7, "PagesOrLocale", Long),
        (8, "RootFlag", Bit),
        (9, "RecordOffset", Short),
        (10, "LCMapFlags", Long),
        (11, "KeyMost", UnsignedShort),
        (12, "LVChunkMax", Long),
    ];
    let variable: &[(u32, &str, ColumnType)] = &[
        (128, "Name", Text),
        (129, "Stats", Binary),
        (130, "TemplateTable", Text),
        (131, "DefaultValue", Binary),
        (132, "KeyFldIDs", Binary),
        (133, "VarSegMac", Binary),
        (134, "ConditionalColumns", Binary),
        (135, "TupleLimits", Binary),
        (136, "Version", Binary),
        (137, "SortID", Binary),
    ];
    let tagged: &[(u32, &str, ColumnType)] = &[
        (256, "CallbackData", LongBinary),
        (257, "CallbackDependencies", LongBinary),
        (258, "SeparateLV", LongBinary),
        (259, "SpaceHints", LongBinary),
        (260, "SpaceDeferredLVHints", LongBinary),
        (261, "LocaleName", LongBinary),
    ];

    for &(fid, name, coltyp) in fixed.iter().chain(variable).chain(tagged) {
        table.add_column(ColumnMeta {
            fid,
            name: name.to_string(),
            coltyp,
            size: coltyp.fixed_size().unwrap_or(0),
            flags: 0,
            codepage: Codepage::Ascii,
            default: None,
            fixed_offset: 0,
        });
    }

    table
}
