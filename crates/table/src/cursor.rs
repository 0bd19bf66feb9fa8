use anyhow::Result;
use format::{Schema, TableHeader};
use record::Record;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Positions the engine at a logical record index and moves one record's
/// fixed-length buffer between memory and the file.
///
/// The cursor only knows the file geometry; it holds no file handle and no
/// record state, so the session can lend it the stream per operation.
#[derive(Debug, Clone, Copy)]
pub struct RecordCursor {
    header_len: u64,
    record_len: u64,
}

impl RecordCursor {
    pub fn new(header: &TableHeader) -> Self {
        Self {
            header_len: header.header_len() as u64,
            record_len: header.record_len() as u64,
        }
    }

    /// Byte offset of record `index`: `header_len + index * record_len`.
    pub fn offset(&self, index: u32) -> u64 {
        self.header_len + index as u64 * self.record_len
    }

    /// Reads and decodes the record at `index`.
    pub fn read(&self, file: &mut File, schema: &Schema, index: u32) -> Result<Record> {
        let mut buf = vec![0u8; self.record_len as usize];
        file.seek(SeekFrom::Start(self.offset(index)))?;
        file.read_exact(&mut buf)?;
        Ok(record::decode_record(schema, index, &buf)?)
    }

    /// Encodes `rec` and writes it at the offset implied by its index.
    pub fn write(&self, file: &mut File, schema: &Schema, rec: &Record) -> Result<()> {
        let buf = record::encode_record(schema, rec)?;
        file.seek(SeekFrom::Start(self.offset(rec.index)))?;
        file.write_all(&buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::{write_header, Column, ColumnKind, FileVersion};
    use std::fs::OpenOptions;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("name", ColumnKind::Character, 5).unwrap(),
            Column::new("code", ColumnKind::Character, 5).unwrap(),
            Column::new("tag", ColumnKind::Character, 5).unwrap(),
            Column::memo("note").unwrap(),
        ])
    }

    #[test]
    fn offset_is_header_plus_index_times_record_len() {
        let schema = schema();
        let header = TableHeader::new(FileVersion::WithMemo, &schema).unwrap();
        let cursor = RecordCursor::new(&header);

        assert_eq!(cursor.offset(0), 65);
        assert_eq!(cursor.offset(1), 85);
        assert_eq!(cursor.offset(10), 65 + 10 * 20);
    }

    #[test]
    fn write_then_read_yields_same_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.tbl");
        let schema = schema();
        let header = TableHeader::new(FileVersion::WithMemo, &schema).unwrap();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        write_header(&mut file, &header, &schema)?;

        let cursor = RecordCursor::new(&header);
        let mut rec = Record::fresh(2, &schema);
        rec.set_bytes(&schema, "name", b"bob")?;
        rec.set_memo_ptr(3, Some(120))?;
        rec.deleted = true;

        cursor.write(&mut file, &schema, &rec)?;
        let back = cursor.read(&mut file, &schema, 2)?;
        assert_eq!(back, rec);
        Ok(())
    }
}
