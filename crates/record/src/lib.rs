//! # Record — fixed-length record values and codec
//!
//! A [`Record`] is one logical row: a zero-based index, a deleted flag, and
//! the raw stored value of every column. For memo-capable columns the raw
//! value is a pointer into the companion memo store, never the decoded
//! content itself.
//!
//! The codec maps a record to/from its on-disk buffer of exactly
//! `record_len` bytes: a leading marker byte (`' '` live, `'*'` deleted)
//! followed by each field at its fixed width. Memo pointers are stored as a
//! little-endian `u32` with `0` meaning "no memo".

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use format::{ColumnKind, Schema, DELETED_MARKER, LIVE_MARKER};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("unknown column: {0:?}")]
    UnknownColumn(String),
    #[error("column {0:?} is not a memo column")]
    NotMemo(String),
    #[error("column {0:?} is a memo column, use the memo accessors")]
    IsMemo(String),
    #[error("value for column {column:?} is {got} bytes, field width is {width}")]
    ValueTooLong {
        column: String,
        got: usize,
        width: u8,
    },
    #[error("record buffer is {got} bytes, expected {expected}")]
    BufferLength { expected: usize, got: usize },
    #[error("bad record marker byte: {0:#04x}")]
    BadMarker(u8),
    #[error("record holds {got} values, schema has {expected} columns")]
    Arity { expected: usize, got: usize },
}

/// Raw ("genuine") stored value of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// Fixed-width field bytes, space-padded to the column width.
    Bytes(Vec<u8>),
    /// Memo pointer: byte offset into the memo store, `None` when unset.
    MemoPtr(Option<u32>),
}

/// One logical row. Records are transient values produced per operation;
/// the session never retains them as shared state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Zero-based logical position; determines the on-disk byte offset.
    pub index: u32,
    /// Deletion flag, stored as the record's leading marker byte.
    pub deleted: bool,
    values: Vec<RawValue>,
}

impl Record {
    /// A blank record for `schema`: space-filled fields, unset memo pointers.
    pub fn fresh(index: u32, schema: &Schema) -> Self {
        let values = schema
            .columns()
            .iter()
            .map(|c| {
                if c.kind().is_memo() {
                    RawValue::MemoPtr(None)
                } else {
                    RawValue::Bytes(vec![b' '; c.len() as usize])
                }
            })
            .collect();
        Self {
            index,
            deleted: false,
            values,
        }
    }

    pub fn raw(&self, column: usize) -> &RawValue {
        &self.values[column]
    }

    /// Field bytes of a non-memo column, looked up by name.
    pub fn bytes(&self, schema: &Schema, name: &str) -> Result<&[u8], RecordError> {
        let i = schema
            .index_of(name)
            .ok_or_else(|| RecordError::UnknownColumn(name.to_string()))?;
        match &self.values[i] {
            RawValue::Bytes(b) => Ok(b),
            RawValue::MemoPtr(_) => Err(RecordError::IsMemo(name.to_string())),
        }
    }

    /// Stores `value` into a non-memo column, space-padding to the field
    /// width. Values longer than the width are rejected, never silently cut.
    pub fn set_bytes(&mut self, schema: &Schema, name: &str, value: &[u8]) -> Result<(), RecordError> {
        let i = schema
            .index_of(name)
            .ok_or_else(|| RecordError::UnknownColumn(name.to_string()))?;
        let col = &schema.columns()[i];
        if col.kind().is_memo() {
            return Err(RecordError::IsMemo(name.to_string()));
        }
        let width = col.len();
        if value.len() > width as usize {
            return Err(RecordError::ValueTooLong {
                column: name.to_string(),
                got: value.len(),
                width,
            });
        }
        let mut field = vec![b' '; width as usize];
        field[..value.len()].copy_from_slice(value);
        self.values[i] = RawValue::Bytes(field);
        Ok(())
    }

    /// Memo pointer of column `i`, which must be memo-capable.
    pub fn memo_ptr(&self, column: usize) -> Result<Option<u32>, RecordError> {
        match &self.values[column] {
            RawValue::MemoPtr(p) => Ok(*p),
            RawValue::Bytes(_) => Err(RecordError::NotMemo(format!("#{column}"))),
        }
    }

    pub fn set_memo_ptr(&mut self, column: usize, ptr: Option<u32>) -> Result<(), RecordError> {
        match &mut self.values[column] {
            RawValue::MemoPtr(p) => {
                *p = ptr;
                Ok(())
            }
            RawValue::Bytes(_) => Err(RecordError::NotMemo(format!("#{column}"))),
        }
    }

    pub fn values(&self) -> &[RawValue] {
        &self.values
    }
}

/// Encodes `record` into its on-disk buffer of exactly
/// `schema.record_len()` bytes.
pub fn encode_record(schema: &Schema, record: &Record) -> Result<Vec<u8>, RecordError> {
    if record.values.len() != schema.columns().len() {
        return Err(RecordError::Arity {
            expected: schema.columns().len(),
            got: record.values.len(),
        });
    }

    let expected = schema.record_len() as usize;
    let mut buf = Vec::with_capacity(expected);
    buf.push(if record.deleted { DELETED_MARKER } else { LIVE_MARKER });

    for (col, value) in schema.columns().iter().zip(&record.values) {
        match value {
            RawValue::Bytes(b) => {
                if b.len() != col.len() as usize {
                    return Err(RecordError::ValueTooLong {
                        column: col.name().to_string(),
                        got: b.len(),
                        width: col.len(),
                    });
                }
                buf.extend_from_slice(b);
            }
            RawValue::MemoPtr(p) => {
                // infallible: writing into a Vec
                buf.write_u32::<LittleEndian>(p.unwrap_or(0)).expect("vec write");
            }
        }
    }

    debug_assert_eq!(buf.len(), expected);
    Ok(buf)
}

/// Decodes the on-disk buffer of record `index` back into a [`Record`].
pub fn decode_record(schema: &Schema, index: u32, buf: &[u8]) -> Result<Record, RecordError> {
    let expected = schema.record_len() as usize;
    if buf.len() != expected {
        return Err(RecordError::BufferLength {
            expected,
            got: buf.len(),
        });
    }

    let deleted = match buf[0] {
        LIVE_MARKER => false,
        DELETED_MARKER => true,
        other => return Err(RecordError::BadMarker(other)),
    };

    let mut pos = 1usize;
    let mut values = Vec::with_capacity(schema.columns().len());
    for col in schema.columns() {
        let width = col.len() as usize;
        let field = &buf[pos..pos + width];
        pos += width;
        match col.kind() {
            ColumnKind::Memo => {
                // buffer length already validated, read cannot fail
                let ptr = (&field[..]).read_u32::<LittleEndian>().expect("slice read");
                values.push(RawValue::MemoPtr(if ptr == 0 { None } else { Some(ptr) }));
            }
            _ => values.push(RawValue::Bytes(field.to_vec())),
        }
    }

    Ok(Record {
        index,
        deleted,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::Column;

    fn memo_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", ColumnKind::Character, 5).unwrap(),
            Column::new("code", ColumnKind::Character, 5).unwrap(),
            Column::new("tag", ColumnKind::Character, 5).unwrap(),
            Column::memo("note").unwrap(),
        ])
    }

    // -------------------- Fresh records --------------------

    #[test]
    fn fresh_record_is_blank() {
        let schema = memo_schema();
        let rec = Record::fresh(3, &schema);
        assert_eq!(rec.index, 3);
        assert!(!rec.deleted);
        assert_eq!(rec.bytes(&schema, "name").unwrap(), b"     ");
        assert_eq!(rec.memo_ptr(3).unwrap(), None);
    }

    #[test]
    fn set_bytes_pads_to_width() {
        let schema = memo_schema();
        let mut rec = Record::fresh(0, &schema);
        rec.set_bytes(&schema, "name", b"ab").unwrap();
        assert_eq!(rec.bytes(&schema, "name").unwrap(), b"ab   ");
    }

    #[test]
    fn set_bytes_rejects_overflow() {
        let schema = memo_schema();
        let mut rec = Record::fresh(0, &schema);
        let result = rec.set_bytes(&schema, "name", b"too-long");
        assert!(matches!(result, Err(RecordError::ValueTooLong { .. })));
    }

    #[test]
    fn unknown_column_rejected() {
        let schema = memo_schema();
        let mut rec = Record::fresh(0, &schema);
        assert!(matches!(
            rec.set_bytes(&schema, "nope", b"x"),
            Err(RecordError::UnknownColumn(_))
        ));
        assert!(matches!(
            rec.bytes(&schema, "nope"),
            Err(RecordError::UnknownColumn(_))
        ));
    }

    #[test]
    fn memo_accessors_guard_column_kind() {
        let schema = memo_schema();
        let mut rec = Record::fresh(0, &schema);
        // "name" is column 0, a character field
        assert!(matches!(rec.memo_ptr(0), Err(RecordError::NotMemo(_))));
        assert!(matches!(
            rec.set_memo_ptr(0, Some(8)),
            Err(RecordError::NotMemo(_))
        ));
        assert!(matches!(
            rec.bytes(&schema, "note"),
            Err(RecordError::IsMemo(_))
        ));
    }

    // -------------------- Codec round trip --------------------

    #[test]
    fn encode_decode_roundtrip() {
        let schema = memo_schema();
        let mut rec = Record::fresh(2, &schema);
        rec.set_bytes(&schema, "name", b"alice").unwrap();
        rec.set_bytes(&schema, "code", b"A1").unwrap();
        rec.set_memo_ptr(3, Some(200)).unwrap();

        let buf = encode_record(&schema, &rec).unwrap();
        assert_eq!(buf.len(), 20);
        assert_eq!(buf[0], LIVE_MARKER);

        let back = decode_record(&schema, 2, &buf).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn deleted_flag_encodes_as_star_marker() {
        let schema = memo_schema();
        let mut rec = Record::fresh(0, &schema);
        rec.deleted = true;

        let buf = encode_record(&schema, &rec).unwrap();
        assert_eq!(buf[0], DELETED_MARKER);
        assert!(decode_record(&schema, 0, &buf).unwrap().deleted);
    }

    #[test]
    fn null_memo_ptr_encodes_as_zero() {
        let schema = memo_schema();
        let rec = Record::fresh(0, &schema);
        let buf = encode_record(&schema, &rec).unwrap();
        // memo field is the last 4 bytes
        assert_eq!(&buf[16..20], &[0, 0, 0, 0]);

        let back = decode_record(&schema, 0, &buf).unwrap();
        assert_eq!(back.memo_ptr(3).unwrap(), None);
    }

    // -------------------- Validation errors --------------------

    #[test]
    fn wrong_buffer_length_rejected() {
        let schema = memo_schema();
        let result = decode_record(&schema, 0, &[b' '; 7]);
        assert!(matches!(
            result,
            Err(RecordError::BufferLength { expected: 20, got: 7 })
        ));
    }

    #[test]
    fn bad_marker_rejected() {
        let schema = memo_schema();
        let mut buf = encode_record(&schema, &Record::fresh(0, &schema)).unwrap();
        buf[0] = b'?';
        assert!(matches!(
            decode_record(&schema, 0, &buf),
            Err(RecordError::BadMarker(_))
        ));
    }
}
