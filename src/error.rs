//! Error types for esedb

use thiserror::Error;

/// The main error type for esedb operations
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(String),

    /// The file is not an ESE database
    #[error("Invalid database: {0}")]
    InvalidDatabase(&'static str),

    /// The header declares a page size outside the supported set
    #[error("Unsupported page size: {0}")]
    UnsupportedPageSize(u32),

    /// Checksum validation failed
    #[error("Checksum mismatch: expected 0x{expected:x}, got 0x{actual:x}")]
    ChecksumMismatch {
        /// Checksum stored on disk
        expected: u64,
        /// Checksum calculated over the data
        actual: u64,
    },

    /// A page failed structural validation
    #[error("Corrupt page {pgno}: {details}")]
    CorruptPage {
        /// Logical page number
        pgno: u32,
        /// Description of the corruption
        details: String,
    },

    /// A B-tree traversal hit an unreadable or inconsistent page
    #[error("Corrupt tree at page {pgno}: {details}")]
    CorruptTree {
        /// Logical page number where the traversal failed
        pgno: u32,
        /// Description of the corruption
        details: String,
    },

    /// The catalog could not be decoded
    #[error("Corrupt catalog: {0}")]
    CorruptCatalog(String),

    /// No table with the given name
    #[error("No table with name: {0}")]
    NoSuchTable(String),

    /// No column with the given name
    #[error("No column with name: {0}")]
    NoSuchColumn(String),

    /// No index with the given name
    #[error("No index with name: {0}")]
    NoSuchIndex(String),

    /// Key not found in a B-tree
    #[error("Key not found")]
    KeyNotFound,

    /// A separated long value has no entry in the long value tree
    #[error("Missing long value for key {key:02x?}")]
    MissingLongValue {
        /// The long value id key (as stored in the record)
        key: Vec<u8>,
    },

    /// A buffer ended before a declared structure did
    #[error("Truncated data: {0}")]
    Truncated(&'static str),

    /// Data is compressed with a scheme we cannot reverse
    #[error("Unsupported compression scheme: {0}")]
    UnsupportedCompression(u8),

    /// A single column failed to decode; the rest of the record is unaffected
    #[error("Cannot decode column {column}: {details}")]
    ColumnDecode {
        /// Column name
        column: String,
        /// Description of the failure
        details: String,
    },

    /// The database uses an on-disk format we do not implement
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(&'static str),
}

/// Result type alias for esedb operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
