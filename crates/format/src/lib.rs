//! # Format — table file header and schema
//!
//! On-disk constants, the [`TableHeader`], and the header codec for the
//! tabfile fixed-record table format.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER                                        │
//! │                                               │
//! │ version (u8) | reserved (u8)                  │
//! │ record_count (u32) | header_len (u16)         │
//! │ record_len (u16) | column_count (u16)         │
//! │ descriptors: name [u8;11] | kind (u8) | len   │
//! │ terminator (u8 = 0x0D)                        │
//! ├───────────────────────────────────────────────┤
//! │ RECORDS (record_count × record_len bytes)     │
//! │                                               │
//! │ marker (' ' live, '*' deleted) | fields ...   │
//! ├───────────────────────────────────────────────┤
//! │ EOF marker (u8 = 0x1A)                        │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte integers are little-endian. Memo-capable columns hold a
//! `u32` byte offset into the companion memo file (`0` = no memo); they are
//! only legal in files whose version byte advertises memo support.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Sentinel byte terminating a well-formed table file.
pub const EOF_MARKER: u8 = 0x1A;
/// Record marker byte for a live record.
pub const LIVE_MARKER: u8 = b' ';
/// Record marker byte for a record flagged deleted.
pub const DELETED_MARKER: u8 = b'*';
/// Byte closing the header's descriptor list.
pub const HEADER_TERMINATOR: u8 = 0x0D;

/// Size of the fixed header prefix before the column descriptors.
pub const HEADER_PREFIX_BYTES: u16 = 12;
/// Size of one column descriptor.
pub const DESCRIPTOR_BYTES: u16 = 13;
/// Maximum column name length (NUL-padded on disk).
pub const COLUMN_NAME_BYTES: usize = 11;
/// On-disk width of a memo pointer field.
pub const MEMO_FIELD_BYTES: u8 = 4;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported file version: {0:#04x}")]
    BadVersion(u8),
    #[error("bad header terminator: {0:#04x}")]
    BadTerminator(u8),
    #[error("unknown column kind: {0:#04x}")]
    BadColumnKind(u8),
    #[error("column name too long: {0:?}")]
    NameTooLong(String),
    #[error("memo column {0:?} requires a memo-capable file version")]
    MemoUnsupported(String),
    #[error("header field {field} holds {stored}, schema implies {computed}")]
    LengthMismatch {
        field: &'static str,
        stored: u16,
        computed: u16,
    },
}

/// Table file version byte. The version determines whether memo-capable
/// column kinds may appear in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileVersion {
    /// Fixed-length records only, no companion memo store.
    Plain,
    /// Records may carry memo pointer fields into a companion store.
    WithMemo,
}

impl FileVersion {
    pub fn as_byte(self) -> u8 {
        match self {
            FileVersion::Plain => 0x03,
            FileVersion::WithMemo => 0x83,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, FormatError> {
        match b {
            0x03 => Ok(FileVersion::Plain),
            0x83 => Ok(FileVersion::WithMemo),
            other => Err(FormatError::BadVersion(other)),
        }
    }

    pub fn supports_memo(self) -> bool {
        matches!(self, FileVersion::WithMemo)
    }
}

/// Column kind tag as stored in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Character,
    Numeric,
    Logical,
    Date,
    Memo,
}

impl ColumnKind {
    pub fn as_byte(self) -> u8 {
        match self {
            ColumnKind::Character => b'C',
            ColumnKind::Numeric => b'N',
            ColumnKind::Logical => b'L',
            ColumnKind::Date => b'D',
            ColumnKind::Memo => b'M',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, FormatError> {
        match b {
            b'C' => Ok(ColumnKind::Character),
            b'N' => Ok(ColumnKind::Numeric),
            b'L' => Ok(ColumnKind::Logical),
            b'D' => Ok(ColumnKind::Date),
            b'M' => Ok(ColumnKind::Memo),
            other => Err(FormatError::BadColumnKind(other)),
        }
    }

    /// `true` for kinds whose stored value is a pointer into the memo store.
    pub fn is_memo(self) -> bool {
        matches!(self, ColumnKind::Memo)
    }
}

/// One column definition: name, kind, and fixed on-disk field width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    kind: ColumnKind,
    len: u8,
}

impl Column {
    /// Creates a column. Memo columns always use the pointer width
    /// regardless of the requested length.
    pub fn new(name: &str, kind: ColumnKind, len: u8) -> Result<Self, FormatError> {
        if name.len() > COLUMN_NAME_BYTES {
            return Err(FormatError::NameTooLong(name.to_string()));
        }
        let len = if kind.is_memo() { MEMO_FIELD_BYTES } else { len };
        Ok(Self {
            name: name.to_string(),
            kind,
            len,
        })
    }

    /// Shorthand for a memo pointer column.
    pub fn memo(name: &str) -> Result<Self, FormatError> {
        Self::new(name, ColumnKind::Memo, MEMO_FIELD_BYTES)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn len(&self) -> u8 {
        self.len
    }
}

/// Ordered column list; order matches the on-disk field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_count(&self) -> u16 {
        self.columns.len() as u16
    }

    /// Position of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of all memo-capable columns, in declaration order.
    pub fn memo_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_memo())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_memo(&self) -> bool {
        self.columns.iter().any(|c| c.kind.is_memo())
    }

    /// Fixed record width: one marker byte plus every field width.
    pub fn record_len(&self) -> u16 {
        1 + self.columns.iter().map(|c| c.len as u16).sum::<u16>()
    }

    /// Header width: fixed prefix + descriptors + terminator byte.
    pub fn header_len(&self) -> u16 {
        HEADER_PREFIX_BYTES + DESCRIPTOR_BYTES * self.column_count() + 1
    }
}

/// In-memory table file header.
///
/// `record_count` is the authoritative count of logical records, including
/// records flagged deleted; it is mutated only by append and pack.
/// `header_len` and `record_len` are fixed at file creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    version: FileVersion,
    pub record_count: u32,
    header_len: u16,
    record_len: u16,
}

impl TableHeader {
    /// Builds the header for a fresh, empty table over `schema`.
    pub fn new(version: FileVersion, schema: &Schema) -> Result<Self, FormatError> {
        if schema.has_memo() && !version.supports_memo() {
            let name = schema
                .columns()
                .iter()
                .find(|c| c.kind().is_memo())
                .map(|c| c.name().to_string())
                .unwrap_or_default();
            return Err(FormatError::MemoUnsupported(name));
        }
        Ok(Self {
            version,
            record_count: 0,
            header_len: schema.header_len(),
            record_len: schema.record_len(),
        })
    }

    pub fn version(&self) -> FileVersion {
        self.version
    }

    pub fn header_len(&self) -> u16 {
        self.header_len
    }

    pub fn record_len(&self) -> u16 {
        self.record_len
    }

    /// Byte offset of record `index`: `header_len + index * record_len`.
    ///
    /// Passing `record_count` yields the end of the record region, which is
    /// also where the EOF marker byte lives.
    pub fn record_offset(&self, index: u32) -> u64 {
        self.header_len as u64 + index as u64 * self.record_len as u64
    }
}

/// Serializes `header` and the column descriptors at the stream's current
/// position (callers seek to offset 0 first). Writes exactly
/// `header.header_len()` bytes.
pub fn write_header<W: Write>(
    w: &mut W,
    header: &TableHeader,
    schema: &Schema,
) -> Result<(), FormatError> {
    w.write_u8(header.version.as_byte())?;
    w.write_u8(0)?; // reserved
    w.write_u32::<LittleEndian>(header.record_count)?;
    w.write_u16::<LittleEndian>(header.header_len)?;
    w.write_u16::<LittleEndian>(header.record_len)?;
    w.write_u16::<LittleEndian>(schema.column_count())?;

    for col in schema.columns() {
        let mut name = [0u8; COLUMN_NAME_BYTES];
        name[..col.name().len()].copy_from_slice(col.name().as_bytes());
        w.write_all(&name)?;
        w.write_u8(col.kind().as_byte())?;
        w.write_u8(col.len())?;
    }

    w.write_u8(HEADER_TERMINATOR)?;
    Ok(())
}

/// Reads the header and schema from the stream's current position (the
/// start of the file). Consumes exactly `header_len` bytes and cross-checks
/// the stored length fields against the schema actually read.
pub fn read_header<R: Read>(r: &mut R) -> Result<(TableHeader, Schema), FormatError> {
    let version = FileVersion::from_byte(r.read_u8()?)?;
    let _reserved = r.read_u8()?;
    let record_count = r.read_u32::<LittleEndian>()?;
    let header_len = r.read_u16::<LittleEndian>()?;
    let record_len = r.read_u16::<LittleEndian>()?;
    let column_count = r.read_u16::<LittleEndian>()?;

    let mut columns = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let mut name = [0u8; COLUMN_NAME_BYTES];
        r.read_exact(&mut name)?;
        let end = name.iter().position(|&b| b == 0).unwrap_or(COLUMN_NAME_BYTES);
        let name = String::from_utf8_lossy(&name[..end]).into_owned();
        let kind = ColumnKind::from_byte(r.read_u8()?)?;
        let len = r.read_u8()?;
        columns.push(Column::new(&name, kind, len)?);
    }

    let terminator = r.read_u8()?;
    if terminator != HEADER_TERMINATOR {
        return Err(FormatError::BadTerminator(terminator));
    }

    let schema = Schema::new(columns);
    if schema.header_len() != header_len {
        return Err(FormatError::LengthMismatch {
            field: "header_len",
            stored: header_len,
            computed: schema.header_len(),
        });
    }
    if schema.record_len() != record_len {
        return Err(FormatError::LengthMismatch {
            field: "record_len",
            stored: record_len,
            computed: schema.record_len(),
        });
    }

    let mut header = TableHeader::new(version, &schema)?;
    header.record_count = record_count;
    Ok((header, schema))
}
