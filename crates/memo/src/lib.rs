//! # Memo — companion variable-length block store
//!
//! Records in the table file hold fixed-width fields only; anything
//! variable-length lives here, addressed by the byte offset of its block.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (8 bytes)                              │
//! │   magic (u32 LE = "TMEM") | reserved (u32)    │
//! ├───────────────────────────────────────────────┤
//! │ BLOCKS                                        │
//! │   payload_len (u32) | crc32 (u32) | payload   │
//! │   ... repeated ...                            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Block pointers are the byte offset of a block's `payload_len` field, so
//! a valid pointer is never 0 (the header occupies the first 8 bytes) and
//! the table format can use 0 as its "no memo" sentinel.
//!
//! Deletion is two-phase: [`MemoFile::delete`] only marks a block freed;
//! [`MemoFile::compact`] rewrites the file without the freed blocks and
//! reports every reclaimed `{offset, len}` as a [`MemoReclaim`]. Pointers
//! held inside table records go stale at that moment, which is exactly why
//! the table layer consumes the reclaim set to shift them back into place.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::collections::BTreeMap;
use std::fs::{rename, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic number identifying memo v1 files (ASCII "TMEM", little-endian).
pub const MEMO_MAGIC: u32 = 0x4D45_4D54;

/// Size of the file header in bytes.
pub const MEMO_HEADER_BYTES: u64 = 8;

/// Size of one block's framing: `payload_len` + `crc32`.
pub const BLOCK_HEADER_BYTES: u64 = 8;

#[derive(Debug, Error)]
pub enum MemoError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid memo magic: {0:x}")]
    BadMagic(u32),
    #[error("no memo block at offset {0}")]
    BadPointer(u32),
    #[error("corrupt memo block at offset {0}")]
    Corrupt(u32),
}

/// Notification that the block at `offset` was physically removed during
/// compaction, reclaiming `len` bytes (framing included). Every pointer
/// strictly greater than `offset` shifted down by `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoReclaim {
    pub offset: u32,
    pub len: u32,
}

/// Append-only block store with mark-and-compact reclamation.
pub struct MemoFile {
    file: File,
    path: PathBuf,
    /// File length; new blocks are always allocated here.
    end: u64,
    /// Blocks marked deleted but not yet reclaimed: offset → full block size.
    freed: BTreeMap<u32, u32>,
}

impl MemoFile {
    /// Opens an existing memo file, or creates an empty one.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, MemoError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut end = file.metadata()?.len();
        if end == 0 {
            file.write_u32::<LittleEndian>(MEMO_MAGIC)?;
            file.write_u32::<LittleEndian>(0)?; // reserved
            file.sync_all()?;
            end = MEMO_HEADER_BYTES;
        } else {
            file.seek(SeekFrom::Start(0))?;
            let magic = file.read_u32::<LittleEndian>()?;
            if magic != MEMO_MAGIC {
                return Err(MemoError::BadMagic(magic));
            }
        }

        Ok(Self {
            file,
            path,
            end,
            freed: BTreeMap::new(),
        })
    }

    /// Appends a new block and returns its pointer.
    pub fn allocate(&mut self, content: &[u8]) -> Result<u32, MemoError> {
        let offset = self.end;

        let mut hasher = Crc32::new();
        hasher.update(content);
        let crc = hasher.finalize();

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_u32::<LittleEndian>(content.len() as u32)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(content)?;
        self.file.flush()?;

        self.end = offset + BLOCK_HEADER_BYTES + content.len() as u64;
        Ok(offset as u32)
    }

    /// Reads the payload of the block at `ptr`, verifying its checksum.
    pub fn read(&mut self, ptr: u32) -> Result<Vec<u8>, MemoError> {
        let (len, crc) = self.block_frame(ptr)?;
        let mut payload = vec![0u8; len as usize];
        self.file.read_exact(&mut payload)?;

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != crc {
            return Err(MemoError::Corrupt(ptr));
        }
        Ok(payload)
    }

    /// Marks the block at `ptr` freed. The bytes stay on disk until
    /// [`compact`](MemoFile::compact) runs; deleting twice is harmless.
    pub fn delete(&mut self, ptr: u32) -> Result<(), MemoError> {
        let (len, _crc) = self.block_frame(ptr)?;
        self.freed.insert(ptr, BLOCK_HEADER_BYTES as u32 + len);
        Ok(())
    }

    /// Rewrites the file without freed blocks and returns the reclaim set,
    /// ordered by ascending offset. Returns an empty set (and performs no
    /// I/O) when nothing was deleted.
    ///
    /// The rewrite goes to a sibling temp file which is fsynced and then
    /// atomically renamed into place.
    pub fn compact(&mut self) -> Result<Vec<MemoReclaim>, MemoError> {
        if self.freed.is_empty() {
            return Ok(Vec::new());
        }

        let tmp_path = sibling(&self.path, ".compact");
        let mut out = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        out.write_u32::<LittleEndian>(MEMO_MAGIC)?;
        out.write_u32::<LittleEndian>(0)?;

        let mut offset = MEMO_HEADER_BYTES;
        while offset < self.end {
            self.file.seek(SeekFrom::Start(offset))?;
            let len = self.file.read_u32::<LittleEndian>()?;
            let crc = self.file.read_u32::<LittleEndian>()?;
            let mut payload = vec![0u8; len as usize];
            self.file.read_exact(&mut payload)?;

            if !self.freed.contains_key(&(offset as u32)) {
                out.write_u32::<LittleEndian>(len)?;
                out.write_u32::<LittleEndian>(crc)?;
                out.write_all(&payload)?;
            }
            offset += BLOCK_HEADER_BYTES + len as u64;
        }

        out.flush()?;
        out.sync_all()?;
        rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.end = self.file.metadata()?.len();

        let reclaimed = std::mem::take(&mut self.freed)
            .into_iter()
            .map(|(offset, len)| MemoReclaim { offset, len })
            .collect();
        Ok(reclaimed)
    }

    /// Flushes and fsyncs the store.
    pub fn save(&mut self) -> Result<(), MemoError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn len(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == MEMO_HEADER_BYTES
    }

    /// Seeks to `ptr`, validates it points at a plausible block, and returns
    /// `(payload_len, crc)` with the cursor left at the payload start.
    fn block_frame(&mut self, ptr: u32) -> Result<(u32, u32), MemoError> {
        let offset = ptr as u64;
        if offset < MEMO_HEADER_BYTES || offset + BLOCK_HEADER_BYTES > self.end {
            return Err(MemoError::BadPointer(ptr));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let len = self.file.read_u32::<LittleEndian>()?;
        let crc = self.file.read_u32::<LittleEndian>()?;
        if offset + BLOCK_HEADER_BYTES + len as u64 > self.end {
            return Err(MemoError::Corrupt(ptr));
        }
        Ok((len, crc))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
