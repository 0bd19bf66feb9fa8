//! # Table — the mutation engine
//!
//! Turns logical edits (append, update, delete, undelete, pack) into
//! byte-level changes to a fixed-record table file and its companion memo
//! store.
//!
//! An [`EditSession`] exclusively owns the open file and the in-memory
//! header for its lifetime. It is opened in one of two modes:
//!
//! - [`EditMode::CopyOnWrite`] (the default): every mutation targets a
//!   private working copy of the file; the original is only replaced by an
//!   explicit [`EditSession::save`].
//! - [`EditMode::InPlace`]: mutations hit the original directly and each
//!   fresh append is persisted immediately, so the on-disk header is never
//!   more than one write behind the record content.
//!
//! ## Save ordering
//!
//! `save` flushes in a fixed order that is load-bearing: memo store first,
//! then the header, then the trailing EOF marker check, then (copy-on-write
//! only) the atomic replacement of the original. Memo pointers must be
//! final before the header that describes them is written, and the marker
//! check has to run against the fully written file.
//!
//! ## Pack and pointer remapping
//!
//! [`EditSession::pack`] physically removes deleted records, renumbers the
//! survivors and truncates the file; memo blocks owned only by dropped
//! records are deleted and the store compacted. Compaction shifts every
//! surviving block, so the resulting [`memo::MemoReclaim`] set is fed
//! through [`EditSession::remap_memo_pointers`], which rewrites exactly the
//! records whose stored pointers moved.

mod cursor;
mod pack;
mod remap;
mod session;
mod strategy;

pub use cursor::RecordCursor;
pub use session::EditSession;
pub use strategy::EditMode;
