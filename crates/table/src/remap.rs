//! Pointer remapping after memo-store compaction.

use anyhow::Result;
use memo::MemoReclaim;
use std::io::Write;

use crate::session::EditSession;

impl EditSession {
    /// Restores pointer correctness after the memo store reclaimed blocks.
    ///
    /// Every record is visited by index — deleted ones included, since
    /// their pointers may still be undeleted later. For each memo column
    /// holding a pointer `p`, the new value is `p` minus the total size of
    /// all reclaimed blocks strictly before `p`; blocks at or after `p`
    /// leave it untouched. A pointer sitting exactly on a reclaimed
    /// block's start is the caller's problem: it should have been cleared
    /// or deleted before compaction.
    ///
    /// Only records with at least one shifted pointer are rewritten.
    pub fn remap_memo_pointers(&mut self, reclaimed: &[MemoReclaim]) -> Result<()> {
        if reclaimed.is_empty() || self.memo_columns.is_empty() {
            return Ok(());
        }

        for index in 0..self.header.record_count {
            let mut rec = self.cursor.read(&mut self.file, &self.schema, index)?;
            let mut dirty = false;

            for &col in &self.memo_columns {
                let ptr = match rec.memo_ptr(col)? {
                    Some(p) => p,
                    None => continue,
                };
                let shift: u32 = reclaimed
                    .iter()
                    .filter(|r| r.offset < ptr)
                    .map(|r| r.len)
                    .sum();
                if shift > 0 {
                    rec.set_memo_ptr(col, Some(ptr - shift))?;
                    dirty = true;
                }
            }

            if dirty {
                self.cursor.write(&mut self.file, &self.schema, &rec)?;
            }
        }

        self.file.flush()?;
        Ok(())
    }
}
