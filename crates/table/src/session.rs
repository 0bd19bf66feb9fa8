use anyhow::{bail, Result};
use format::{
    read_header, write_header, FileVersion, Schema, TableHeader, EOF_MARKER, LIVE_MARKER,
};
use memo::MemoFile;
use record::Record;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::cursor::RecordCursor;
use crate::strategy::{sibling, EditMode, EditStrategy};

/// A single-writer editing session over one table file.
///
/// The session owns the open stream and the in-memory header exclusively
/// for its whole lifetime. Records are transient values: operations hand
/// them out and take them back, nothing is shared.
pub struct EditSession {
    pub(crate) source: PathBuf,
    pub(crate) file: File,
    pub(crate) header: TableHeader,
    pub(crate) schema: Schema,
    pub(crate) cursor: RecordCursor,
    pub(crate) memo: Option<MemoFile>,
    /// Memo-capable column positions, resolved once at open.
    pub(crate) memo_columns: Vec<usize>,
    pub(crate) current: Option<Record>,
    /// `true` while `current` is an appended record not yet written.
    pub(crate) pending: bool,
    pub(crate) strategy: Box<dyn EditStrategy>,
    mode: EditMode,
}

impl EditSession {
    /// Writes a fresh, empty, well-formed table file (header + EOF marker)
    /// at `path` via a temp file and atomic rename.
    pub fn create(path: &Path, version: FileVersion, schema: &Schema) -> Result<()> {
        let header = TableHeader::new(version, schema)?;
        let tmp = sibling(path, ".tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        write_header(&mut file, &header, schema)?;
        file.write_all(&[EOF_MARKER])?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Opens `path` for editing in the given mode.
    ///
    /// In copy-on-write mode this duplicates the file first and all edits
    /// go to the duplicate. The memo store is only opened when the file
    /// version is memo-capable and the schema actually declares memo
    /// columns.
    pub fn open<P: AsRef<Path>>(path: P, mode: EditMode) -> Result<Self> {
        let source = path.as_ref().to_path_buf();
        let strategy = mode.strategy(&source);

        let opened = (|| {
            let mut file = strategy.open(&source)?;
            file.seek(SeekFrom::Start(0))?;
            let (header, schema) = read_header(&mut file)?;
            let memo_columns = schema.memo_columns();
            let memo = if header.version().supports_memo() && !memo_columns.is_empty() {
                Some(MemoFile::open_or_create(source.with_extension("mem"))?)
            } else {
                None
            };
            Ok::<_, anyhow::Error>((file, header, schema, memo_columns, memo))
        })();

        let (file, header, schema, memo_columns, memo) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                // do not leak a half-made working copy
                strategy.cleanup(&source);
                return Err(e);
            }
        };

        let cursor = RecordCursor::new(&header);
        Ok(Self {
            source,
            file,
            header,
            schema,
            cursor,
            memo,
            memo_columns,
            current: None,
            pending: false,
            strategy,
            mode,
        })
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn mode(&self) -> EditMode {
        self.mode
    }

    pub fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    /// Positions the session at `index` and materializes that record,
    /// which also becomes the session's current record. Out-of-range
    /// indexes yield `Ok(None)`.
    pub fn record(&mut self, index: u32) -> Result<Option<Record>> {
        if index >= self.header.record_count {
            return Ok(None);
        }
        let rec = self.cursor.read(&mut self.file, &self.schema, index)?;
        self.pending = false;
        self.current = Some(rec.clone());
        Ok(Some(rec))
    }

    /// Starts a new record at index `record_count`. Nothing is written and
    /// the count does not move until the record is actually written.
    pub fn append(&mut self) -> &mut Record {
        let rec = Record::fresh(self.header.record_count, &self.schema);
        self.pending = true;
        self.current.insert(rec)
    }

    /// Writes a record's buffer at its offset, defaulting to the session's
    /// current record. A missing target is a silent no-op. Writing a
    /// pending append bumps `record_count` exactly once; in in-place mode
    /// a fresh insertion is saved through to disk immediately.
    pub fn write(&mut self, rec: Option<&Record>) -> Result<()> {
        match rec {
            Some(rec) => {
                let fresh = self.pending && rec.index == self.header.record_count;
                self.cursor.write(&mut self.file, &self.schema, rec)?;
                self.file.flush()?;
                if fresh {
                    // the caller's copy is the real record now, not the
                    // blank one append left behind
                    self.current = Some(rec.clone());
                    self.finish_append()?;
                }
            }
            None => {
                let rec = match self.current.take() {
                    Some(r) => r,
                    None => return Ok(()),
                };
                let fresh = self.pending;
                self.cursor.write(&mut self.file, &self.schema, &rec)?;
                self.file.flush()?;
                self.current = Some(rec);
                if fresh {
                    self.finish_append()?;
                }
            }
        }
        Ok(())
    }

    fn finish_append(&mut self) -> Result<()> {
        self.header.record_count += 1;
        self.pending = false;
        if self.strategy.autosaves() {
            self.save()?;
        }
        Ok(())
    }

    /// Flags a record deleted and persists the flag, defaulting to the
    /// current record. Deleting a pending append simply discards it — an
    /// append that dies before its first write never touches the file.
    /// A missing target is a silent no-op.
    pub fn delete(&mut self, rec: Option<&mut Record>) -> Result<()> {
        match rec {
            Some(rec) => {
                if self.pending && rec.index == self.header.record_count {
                    self.pending = false;
                    self.current = None;
                    return Ok(());
                }
                rec.deleted = true;
                self.write(Some(&*rec))
            }
            None => {
                if self.pending {
                    self.pending = false;
                    self.current = None;
                    return Ok(());
                }
                let mut rec = match self.current.take() {
                    Some(r) => r,
                    None => return Ok(()),
                };
                rec.deleted = true;
                self.cursor.write(&mut self.file, &self.schema, &rec)?;
                self.file.flush()?;
                self.current = Some(rec);
                Ok(())
            }
        }
    }

    /// Clears a record's deletion flag. Instead of rewriting the whole
    /// record this writes only the marker byte at the record's start — the
    /// rest of the buffer is already correct on disk. No-op when the
    /// target is absent or not deleted.
    pub fn undelete(&mut self, rec: Option<&mut Record>) -> Result<()> {
        let rec = match rec {
            Some(r) => Some(r),
            None => self.current.as_mut(),
        };
        let rec = match rec {
            Some(r) if r.deleted => r,
            _ => return Ok(()),
        };
        rec.deleted = false;
        let offset = self.cursor.offset(rec.index);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&[LIVE_MARKER])?;
        self.file.flush()?;
        Ok(())
    }

    /// Stores `content` in the memo store and points `rec`'s memo column
    /// at it. Any block the column pointed to before is deleted first.
    pub fn set_memo(&mut self, rec: &mut Record, column: &str, content: &[u8]) -> Result<()> {
        let col = self.memo_column(column)?;
        let memo = match self.memo.as_mut() {
            Some(m) => m,
            None => bail!("table has no memo store"),
        };
        if let Some(old) = rec.memo_ptr(col)? {
            memo.delete(old)?;
        }
        let ptr = memo.allocate(content)?;
        rec.set_memo_ptr(col, Some(ptr))?;
        Ok(())
    }

    /// Resolves a record's memo pointer back to the stored bytes.
    /// `Ok(None)` when the column holds no memo.
    pub fn memo_content(&mut self, rec: &Record, column: &str) -> Result<Option<Vec<u8>>> {
        let col = self.memo_column(column)?;
        let ptr = match rec.memo_ptr(col)? {
            Some(p) => p,
            None => return Ok(None),
        };
        let memo = match self.memo.as_mut() {
            Some(m) => m,
            None => bail!("table has no memo store"),
        };
        Ok(Some(memo.read(ptr)?))
    }

    fn memo_column(&self, column: &str) -> Result<usize> {
        let col = match self.schema.index_of(column) {
            Some(i) => i,
            None => bail!("unknown column: {column:?}"),
        };
        if !self.memo_columns.contains(&col) {
            bail!("column {column:?} is not a memo column");
        }
        Ok(col)
    }

    /// Flushes everything in the load-bearing order: memo store, header,
    /// EOF marker check, then (copy-on-write) replacement of the original.
    pub fn save(&mut self) -> Result<()> {
        if let Some(memo) = self.memo.as_mut() {
            memo.save()?;
        }
        self.file.seek(SeekFrom::Start(0))?;
        write_header(&mut self.file, &self.header, &self.schema)?;
        self.heal_eof_marker()?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.strategy.commit(&self.source)?;
        Ok(())
    }

    /// Ensures the byte right after the record region is the EOF marker
    /// and that nothing trails it, writing/truncating only when needed.
    fn heal_eof_marker(&mut self) -> Result<()> {
        let end = self.header.record_offset(self.header.record_count);
        let len = self.file.metadata()?.len();
        if len == end + 1 {
            self.file.seek(SeekFrom::Start(end))?;
            let mut marker = [0u8; 1];
            self.file.read_exact(&mut marker)?;
            if marker[0] == EOF_MARKER {
                return Ok(());
            }
        }
        self.file.seek(SeekFrom::Start(end))?;
        self.file.write_all(&[EOF_MARKER])?;
        self.file.set_len(end + 1)?;
        Ok(())
    }

    /// Ends the session. The file handle is released and, in copy-on-write
    /// mode, the working copy is removed (best-effort).
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
        // Drop releases the handle and cleans up the working copy
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.strategy.cleanup(&self.source);
    }
}
