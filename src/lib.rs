//! Read-only decoder for Microsoft's Extensible Storage Engine ("ESE",
//! "Jet Blue") database files, the format behind `NTDS.dit`, the Windows
//! Update store, Exchange mailboxes and the SRUM telemetry database.
//!
//! The decoder is forensic-grade: by default it is best-effort and keeps
//! decoding what it can out of dirty or damaged files, degrading per page,
//! per row and per column with `tracing` warnings. Strict mode
//! ([`Options::strict`]) turns those degradations into errors.
//!
//! # Quick start
//!
//! ```no_run
//! use esedb::Database;
//!
//! # fn main() -> esedb::Result<()> {
//! let db = Database::open("Windows.edb")?;
//! for table in db.tables() {
//!     println!("{}", table.name());
//! }
//!
//! let table = db.table("MSysObjects")?;
//! for record in table.records() {
//!     let record = record?;
//!     println!("{:?} (type {:?})", record.get("Name")?, record.get("Type")?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Layers
//!
//! - [`header`]: the DBFILEHDR, its shadow copy and checksum
//! - [`store`]: byte sources, logical page addressing and the page cache
//! - [`page`]: page structure, tags and key prefix decompression
//! - [`btree`]: cursor traversal over the page trees
//! - [`catalog`]: table, column and index schemas from the catalog tree
//! - [`record`]: fixed/variable/tagged column extraction
//! - [`longvalue`]: reassembly of values separated out of records
//! - [`compression`]: 7-bit and XPRESS column compression
//! - [`db`]: the `Database`/`Table`/`Record` facade

pub mod btree;
pub mod catalog;
pub mod compression;
pub mod db;
pub mod error;
pub mod format;
pub mod header;
pub mod longvalue;
pub mod page;
pub mod record;
pub mod store;
pub mod value;

pub use catalog::{Catalog, ColumnMeta, IndexMeta, TableMeta};
pub use db::{Database, IndexRecords, Options, Record, Records, Table};
pub use error::{Error, Result};
pub use format::{Codepage, ColumnType, DatabaseState, IndexFlags, ObjectType, PageFlags};
pub use header::DbHeader;
pub use longvalue::LongValueStore;
pub use store::{ByteSource, MmapSource, PageStore};
pub use value::{Guid, Value};
