//! On-disk format constants
//!
//! Flag sets, column types and fixed page numbers of the ESE ("Jet Blue")
//! file format. Field names follow the Microsoft ESE sources where the
//! mapping is direct (fFlags, ibMicFree, objidFDP, ...).

use bitflags::bitflags;

/// Magic number of an ESE database file (ulDAEMagic)
pub const JET_MAGIC: u32 = 0x89AB_CDEF;

/// Logical page number of the catalog root (pgnoFDPMSO, the MSysObjects FDP)
pub const CATALOG_PAGE_NUMBER: u32 = 4;

/// Logical page number of the shadow catalog root (pgnoFDPMSOShadow)
pub const CATALOG_SHADOW_PAGE_NUMBER: u32 = 24;

/// Page sizes a database header may declare
pub const SUPPORTED_PAGE_SIZES: [u32; 5] = [2048, 4096, 8192, 16384, 32768];

/// Pages up to this size use the small-page layout (40-byte header,
/// 13-bit tag offsets). Larger pages append an extended header and move the
/// tag flag bits into the node data.
pub const SMALL_PAGE_LIMIT: u32 = 8192;

bitflags! {
    /// Page flags (fFlags in PGHDR)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Root page of a B-tree
        const ROOT = 0x0000_0001;
        /// Leaf page
        const LEAF = 0x0000_0002;
        /// Direct parent of leaf pages
        const PARENT = 0x0000_0004;
        /// Page holds no nodes
        const EMPTY = 0x0000_0008;
        /// Page was rebuilt by repair
        const REPAIR = 0x0000_0010;
        /// Page belongs to a space tree
        const SPACE_TREE = 0x0000_0020;
        /// Page belongs to a secondary index tree
        const INDEX = 0x0000_0040;
        /// Page belongs to a long value tree
        const LONG_VALUE = 0x0000_0080;
        /// Keys in this tree are not unique
        const NON_UNIQUE_KEYS = 0x0000_0400;
        /// Records use the new (tagged TAGFLD array) format
        const NEW_RECORD_FORMAT = 0x0000_0800;
        /// Page checksum is the new XOR/ECC format
        const NEW_CHECKSUM_FORMAT = 0x0000_2000;
        /// Page has been scrubbed
        const SCRUBBED = 0x0000_4000;
    }
}

bitflags! {
    /// Per-tag flags (the 3 high bits of a tag entry on small pages,
    /// or of the node's first word on large pages)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TagFlags: u16 {
        /// Node has an uncommitted version
        const VERSION = 0x1;
        /// Node is flagged deleted
        const DELETED = 0x2;
        /// Node key is prefix-compressed against the page key prefix
        const COMPRESSED = 0x4;
    }
}

bitflags! {
    /// Flags byte of a tagged field (TAGFLD_HEADER)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaggedFlags: u8 {
        /// Column type is LongText or LongBinary
        const LONG_VALUE = 0x01;
        /// Data is compressed
        const COMPRESSED = 0x02;
        /// Data lives in the long value tree; payload is the LV key
        const SEPARATED = 0x04;
        /// Data is a multi-value array
        const MULTI_VALUES = 0x08;
        /// Optimized two-value multi-value storage
        const TWO_VALUES = 0x10;
        /// Value is null
        const NULL = 0x20;
        /// Data is encrypted
        const ENCRYPTED = 0x40;
    }
}

bitflags! {
    /// Index flags (JET_bitIndex) from the catalog Flags column
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IndexFlags: u32 {
        /// Index keys are unique
        const UNIQUE = 0x0000_0001;
        /// Primary (clustered) index
        const PRIMARY = 0x0000_0002;
        /// Null keys are not allowed
        const DISALLOW_NULL = 0x0000_0004;
        /// Rows with all-null keys are not indexed
        const IGNORE_NULL = 0x0000_0008;
        /// Rows with any null key segment are not indexed
        const IGNORE_ANY_NULL = 0x0000_0020;
        /// Rows with a null first key segment are not indexed
        const IGNORE_FIRST_NULL = 0x0000_0040;
        /// Nulls sort after data
        const SORT_NULLS_HIGH = 0x0000_0400;
        /// Unicode normalization applies to key text
        const UNICODE = 0x0000_0800;
        /// Substring tuple index
        const TUPLES = 0x0000_1000;
        /// Cross product over multi-valued columns
        const CROSS_PRODUCT = 0x0000_4000;
    }
}

/// Object types in the catalog (SYSOBJ)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ObjectType {
    /// A table definition
    Table = 1,
    /// A column definition
    Column = 2,
    /// An index definition
    Index = 3,
    /// The long value tree of a table
    LongValue = 4,
    /// A callback registration
    Callback = 5,
}

impl ObjectType {
    /// Map the catalog Type column value, if known
    pub fn from_raw(raw: i16) -> Option<Self> {
        match raw {
            1 => Some(Self::Table),
            2 => Some(Self::Column),
            3 => Some(Self::Index),
            4 => Some(Self::LongValue),
            5 => Some(Self::Callback),
            _ => None,
        }
    }
}

/// Column types (JET_coltyp)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ColumnType {
    /// Invalid/absent
    Nil = 0,
    /// Boolean stored as a byte (0xFF = true)
    Bit = 1,
    /// Unsigned 8-bit integer
    UnsignedByte = 2,
    /// Signed 16-bit integer
    Short = 3,
    /// Signed 32-bit integer
    Long = 4,
    /// Signed 64-bit integer (currency)
    Currency = 5,
    /// 32-bit IEEE float
    IeeeSingle = 6,
    /// 64-bit IEEE float
    IeeeDouble = 7,
    /// 64-bit timestamp; interpretation is application defined
    DateTime = 8,
    /// Raw bytes, up to 255
    Binary = 9,
    /// Text in a declared codepage, up to 255 bytes
    Text = 10,
    /// Raw bytes, may overflow to the long value tree
    LongBinary = 11,
    /// Text, may overflow to the long value tree
    LongText = 12,
    /// Obsolete streaming file type
    Slv = 13,
    /// Unsigned 32-bit integer
    UnsignedLong = 14,
    /// Signed 64-bit integer
    LongLong = 15,
    /// 16-byte GUID
    Guid = 16,
    /// Unsigned 16-bit integer
    UnsignedShort = 17,
}

impl ColumnType {
    /// Map the catalog ColtypOrPgnoFDP value, if known
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Nil),
            1 => Some(Self::Bit),
            2 => Some(Self::UnsignedByte),
            3 => Some(Self::Short),
            4 => Some(Self::Long),
            5 => Some(Self::Currency),
            6 => Some(Self::IeeeSingle),
            7 => Some(Self::IeeeDouble),
            8 => Some(Self::DateTime),
            9 => Some(Self::Binary),
            10 => Some(Self::Text),
            11 => Some(Self::LongBinary),
            12 => Some(Self::LongText),
            13 => Some(Self::Slv),
            14 => Some(Self::UnsignedLong),
            15 => Some(Self::LongLong),
            16 => Some(Self::Guid),
            17 => Some(Self::UnsignedShort),
            _ => None,
        }
    }

    /// Declared byte width for fixed-size types, `None` for variable-size
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Bit | Self::UnsignedByte => Some(1),
            Self::Short | Self::UnsignedShort => Some(2),
            Self::Long | Self::UnsignedLong | Self::IeeeSingle => Some(4),
            Self::Currency | Self::IeeeDouble | Self::DateTime | Self::LongLong => Some(8),
            Self::Guid => Some(16),
            _ => None,
        }
    }

    /// Whether the type decodes as text
    pub fn is_text(self) -> bool {
        matches!(self, Self::Text | Self::LongText)
    }
}

/// Text codepages a column may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codepage {
    /// UTF-16-LE
    Unicode,
    /// Windows-1252
    Western,
    /// 7-bit ASCII
    Ascii,
}

impl Codepage {
    /// Map the catalog PagesOrLocale value, if known
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1200 => Some(Self::Unicode),
            1252 => Some(Self::Western),
            20127 => Some(Self::Ascii),
            _ => None,
        }
    }
}

/// Compression scheme selector (high 5 bits of the first data byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionScheme {
    /// Not compressed
    None,
    /// 7-bit packed ASCII
    SevenBitAscii,
    /// 7-bit packed UTF-16
    SevenBitUnicode,
    /// MS-XCA LZ77 "plain"
    Xpress,
    /// Scrubbed (zeroed) data
    Scrub,
    /// XPRESS9 (not implemented)
    Xpress9,
    /// XPRESS10 (not implemented)
    Xpress10,
}

impl CompressionScheme {
    /// Read the scheme selector from the first byte of a compressed buffer
    pub fn from_selector(byte: u8) -> Option<Self> {
        match byte >> 3 {
            0 => Some(Self::None),
            1 => Some(Self::SevenBitAscii),
            2 => Some(Self::SevenBitUnicode),
            3 => Some(Self::Xpress),
            4 => Some(Self::Scrub),
            5 => Some(Self::Xpress9),
            6 => Some(Self::Xpress10),
            _ => None,
        }
    }
}

/// Database state from the file header (dbstate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseState {
    /// Freshly created, never attached
    JustCreated,
    /// Dirty shutdown; log replay would be required for consistency
    DirtyShutdown,
    /// Clean shutdown
    CleanShutdown,
    /// Mid format conversion
    BeingConverted,
    /// Force-detached
    ForceDetach,
    /// Unrecognized state value
    Unknown(u32),
}

impl DatabaseState {
    /// Map the raw dbstate value
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::JustCreated,
            2 => Self::DirtyShutdown,
            3 => Self::CleanShutdown,
            4 => Self::BeingConverted,
            5 => Self::ForceDetach,
            other => Self::Unknown(other),
        }
    }
}

/// First fid of the variable column range
pub const FID_VARIABLE_FIRST: u32 = 128;

/// First fid of the tagged column range
pub const FID_TAGGED_FIRST: u32 = 256;
