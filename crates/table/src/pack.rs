//! Pack: physically remove records flagged deleted.

use anyhow::Result;
use std::io::Write;

use crate::session::EditSession;

impl EditSession {
    /// Rewrites the record region without deleted records, renumbering the
    /// survivors and truncating the file to exactly
    /// `header_len + new_count * record_len`.
    ///
    /// Survivors are written backward into the scanned prefix, so the
    /// rewrite is safe in place: the new index is never ahead of the index
    /// being visited. Memo blocks referenced only by dropped records are
    /// deleted, the store is compacted, and every surviving record's
    /// pointers are shifted accordingly.
    ///
    /// In in-place mode the result is saved immediately; in copy-on-write
    /// mode the caller still has to [`save`](EditSession::save) to commit.
    pub fn pack(&mut self) -> Result<()> {
        let old_count = self.header.record_count;
        let mut new_count: u32 = 0;

        for index in 0..old_count {
            let mut rec = self.cursor.read(&mut self.file, &self.schema, index)?;
            if rec.deleted {
                // release the dropped record's memo blocks
                if let Some(memo) = self.memo.as_mut() {
                    for &col in &self.memo_columns {
                        if let Some(ptr) = rec.memo_ptr(col)? {
                            memo.delete(ptr)?;
                        }
                    }
                }
                continue;
            }
            rec.index = new_count;
            self.cursor.write(&mut self.file, &self.schema, &rec)?;
            new_count += 1;
        }

        self.header.record_count = new_count;
        let end = self.header.record_offset(new_count);
        self.file.set_len(end)?;
        self.file.flush()?;

        // any materialized record may now carry a stale index
        self.current = None;
        self.pending = false;

        self.collect_memo_garbage()?;

        if self.strategy.autosaves() {
            self.save()?;
        }
        Ok(())
    }

    /// Compacts the memo store and remaps every record's pointers over the
    /// reclaimed blocks. Usable mid-session, independently of [`pack`].
    ///
    /// No-op when there is no memo store or nothing was deleted.
    pub fn collect_memo_garbage(&mut self) -> Result<()> {
        let reclaimed = match self.memo.as_mut() {
            Some(memo) => memo.compact()?,
            None => return Ok(()),
        };
        if reclaimed.is_empty() {
            return Ok(());
        }
        self.remap_memo_pointers(&reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::EditMode;
    use format::{Column, ColumnKind, FileVersion, Schema};
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn memo_schema() -> Schema {
        Schema::new(vec![
            Column::new("name", ColumnKind::Character, 5).unwrap(),
            Column::new("code", ColumnKind::Character, 5).unwrap(),
            Column::new("tag", ColumnKind::Character, 5).unwrap(),
            Column::memo("note").unwrap(),
        ])
    }

    fn create_table(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        EditSession::create(&path, FileVersion::WithMemo, &memo_schema()).unwrap();
        path
    }

    fn append_row(session: &mut EditSession, name: &[u8]) -> Result<()> {
        let schema = session.schema().clone();
        let rec = session.append();
        rec.set_bytes(&schema, "name", name)?;
        session.write(None)?;
        Ok(())
    }

    fn names(session: &mut EditSession) -> Vec<Vec<u8>> {
        let schema = session.schema().clone();
        let count = session.header().record_count;
        (0..count)
            .map(|i| {
                let rec = session.record(i).unwrap().unwrap();
                rec.bytes(&schema, "name").unwrap().to_vec()
            })
            .collect()
    }

    // -------------------- Basic pack --------------------

    #[test]
    fn pack_removes_deleted_and_renumbers() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");
        let mut session = EditSession::open(&path, EditMode::InPlace)?;

        append_row(&mut session, b"a")?;
        append_row(&mut session, b"b")?;
        append_row(&mut session, b"c")?;

        session.record(1)?;
        session.delete(None)?;
        assert_eq!(session.header().record_count, 3);

        session.pack()?;
        assert_eq!(session.header().record_count, 2);
        assert_eq!(names(&mut session), vec![b"a    ".to_vec(), b"c    ".to_vec()]);

        // survivor indexes are contiguous from zero
        assert_eq!(session.record(0)?.unwrap().index, 0);
        assert_eq!(session.record(1)?.unwrap().index, 1);
        assert!(session.record(2)?.is_none());
        Ok(())
    }

    #[test]
    fn pack_all_deleted_leaves_header_only_file() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");
        let mut session = EditSession::open(&path, EditMode::InPlace)?;

        for name in [b"a", b"b"] {
            append_row(&mut session, name)?;
        }
        for i in 0..2 {
            session.record(i)?;
            session.delete(None)?;
        }

        session.pack()?;
        assert_eq!(session.header().record_count, 0);
        session.close()?;

        // header (65) + EOF marker
        assert_eq!(std::fs::metadata(&path)?.len(), 66);
        Ok(())
    }

    #[test]
    fn pack_without_deletions_is_byte_stable() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");
        let mut session = EditSession::open(&path, EditMode::InPlace)?;

        append_row(&mut session, b"a")?;
        append_row(&mut session, b"b")?;
        let before = std::fs::read(&path)?;

        session.pack()?;
        assert_eq!(std::fs::read(&path)?, before);

        // and a second pack is a no-op too
        session.pack()?;
        assert_eq!(std::fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn pack_trims_trailing_slack_bytes() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");
        {
            let mut session = EditSession::open(&path, EditMode::InPlace)?;
            append_row(&mut session, b"a")?;
            session.close()?;
        }

        // simulate a torn writer leaving garbage after the marker
        let mut raw = std::fs::read(&path)?;
        raw.extend_from_slice(b"JUNKJUNK");
        std::fs::write(&path, &raw)?;

        let mut session = EditSession::open(&path, EditMode::InPlace)?;
        session.pack()?;
        session.close()?;

        assert_eq!(std::fs::metadata(&path)?.len(), 65 + 20 + 1);
        Ok(())
    }

    // -------------------- Pack + memo interaction --------------------

    #[test]
    fn pack_deletes_orphaned_memo_blocks_and_shifts_pointers() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");
        let mut session = EditSession::open(&path, EditMode::InPlace)?;

        let schema = session.schema().clone();
        for (name, note) in [(b"a", b"first".as_slice()), (b"b", b"second".as_slice())] {
            let mut rec = session.append().clone();
            rec.set_bytes(&schema, "name", name)?;
            session.set_memo(&mut rec, "note", note)?;
            session.write(Some(&rec))?;
        }

        // record 0 holds the only reference to the first memo block
        session.record(0)?;
        session.delete(None)?;
        session.pack()?;

        assert_eq!(session.header().record_count, 1);
        let survivor = session.record(0)?.unwrap();
        assert_eq!(survivor.bytes(&schema, "name")?, b"b    ");

        // the first block was reclaimed, the survivor's pointer shifted
        // down to the start of the store and still resolves
        assert_eq!(session.memo_content(&survivor, "note")?.as_deref(), Some(b"second".as_slice()));
        assert_eq!(survivor.memo_ptr(3)?, Some(8));
        Ok(())
    }

    // -------------------- End to end --------------------

    #[test]
    fn delete_save_reopen_pack_scenario() -> Result<()> {
        let dir = tempdir()?;
        let path = create_table(dir.path(), "t.tbl");

        // seed three records
        {
            let mut session = EditSession::open(&path, EditMode::InPlace)?;
            for name in [b"a", b"b", b"c"] {
                append_row(&mut session, name)?;
            }
            session.close()?;
        }

        // delete record 1 in a copy-on-write session and commit
        {
            let mut session = EditSession::open(&path, EditMode::CopyOnWrite)?;
            session.record(1)?;
            session.delete(None)?;
            session.save()?;
            session.close()?;
        }

        // the flag is committed but the record is still there
        {
            let mut session = EditSession::open(&path, EditMode::CopyOnWrite)?;
            assert_eq!(session.header().record_count, 3);
            assert!(session.record(1)?.unwrap().deleted);

            session.pack()?;
            assert_eq!(session.header().record_count, 2);
            session.save()?;
            session.close()?;
        }

        // header (65) + 2 records (40) + EOF marker
        assert_eq!(std::fs::metadata(&path)?.len(), 65 + 2 * 20 + 1);
        Ok(())
    }
}
