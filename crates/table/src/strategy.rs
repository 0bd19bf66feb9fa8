use anyhow::Result;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Session-level edit policy, fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditMode {
    /// Mutations target a private working copy; the original file is only
    /// replaced by an explicit save.
    #[default]
    CopyOnWrite,
    /// Mutations target the original file directly and fresh appends are
    /// persisted immediately.
    InPlace,
}

impl EditMode {
    pub(crate) fn strategy(self, source: &Path) -> Box<dyn EditStrategy> {
        match self {
            EditMode::CopyOnWrite => Box::new(WorkingCopy {
                work: sibling(source, ".edit"),
            }),
            EditMode::InPlace => Box::new(Direct),
        }
    }
}

/// The effect of the edit mode on open/save/close, factored out of the
/// session so each policy is testable in isolation instead of being a
/// branch inside every operation.
pub(crate) trait EditStrategy {
    /// Opens the stream all mutations will target.
    fn open(&self, source: &Path) -> Result<File>;

    /// Save step 4: publish the working state to the original file.
    fn commit(&self, source: &Path) -> Result<()>;

    /// Close-time cleanup. Best-effort: a working copy that is already
    /// gone is not an error.
    fn cleanup(&self, source: &Path);

    /// Whether mutations that change the file's shape (a finished append,
    /// a pack) must be saved through immediately.
    fn autosaves(&self) -> bool;
}

/// Copy-on-write: duplicate the source next to it and edit the duplicate.
pub(crate) struct WorkingCopy {
    work: PathBuf,
}

impl EditStrategy for WorkingCopy {
    fn open(&self, source: &Path) -> Result<File> {
        fs::copy(source, &self.work)?;
        let file = OpenOptions::new().read(true).write(true).open(&self.work)?;
        Ok(file)
    }

    fn commit(&self, source: &Path) -> Result<()> {
        // copy to a sibling temp file, fsync, then atomically rename over
        // the original
        let tmp = sibling(source, ".commit");
        fs::copy(&self.work, &tmp)?;
        let f = OpenOptions::new().write(true).open(&tmp)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, source)?;
        Ok(())
    }

    fn cleanup(&self, _source: &Path) {
        let _ = fs::remove_file(&self.work);
    }

    fn autosaves(&self) -> bool {
        false
    }
}

/// In-place: edit the original file directly.
pub(crate) struct Direct;

impl EditStrategy for Direct {
    fn open(&self, source: &Path) -> Result<File> {
        let file = OpenOptions::new().read(true).write(true).open(source)?;
        Ok(file)
    }

    fn commit(&self, _source: &Path) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self, _source: &Path) {}

    fn autosaves(&self) -> bool {
        true
    }
}

/// `"data.tbl"` + `".edit"` → `"data.tbl.edit"` in the same directory.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
