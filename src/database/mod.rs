// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ordered key/value store boundary.
//!
//! The index core does not implement durable storage itself; it
//! consumes any store that provides byte-lexicographic ordering,
//! atomic write batches and snapshot-consistent cursor reads. The
//! [`mem`] module ships an ordered in-memory reference implementation
//! used by the tests and the CLI tools.

pub mod mem;

use crate::{Result, Slice};

/// Key/value pair as returned by cursors
pub type KvPair = (Slice, Slice);

/// Options for cursor creation
#[derive(Copy, Clone, Debug, Default)]
pub struct CursorOptions {
    /// Whether reads through this cursor should populate the store's
    /// own read cache (if it has one)
    pub use_cache: bool,
}

/// Handle on an open ordered key/value store
pub trait DatabaseClient: Send + Sync {
    /// Point lookup of a single value.
    fn read_value(&self, key: &[u8]) -> Result<Option<Slice>>;

    /// Creates a write batch.
    fn create_transaction(&self) -> Result<Box<dyn DatabaseTransaction>>;

    /// Creates a seekable cursor.
    ///
    /// Cursors are strictly per-thread; they are never shared.
    fn create_cursor(&self, opts: CursorOptions) -> Result<Box<dyn DatabaseCursor>>;

    /// Creates a cursor walking a full snapshot of the store key by key.
    fn create_backup_cursor(&self) -> Result<Box<dyn DatabaseBackupCursor>>;

    /// Asks the store to compact itself.
    fn compact(&self) -> Result<()>;

    /// Releases the handle.
    fn close(&self) -> Result<()>;
}

/// A pending atomic write batch
pub trait DatabaseTransaction {
    /// Stages a put.
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Stages a single-key delete.
    fn delete(&mut self, key: &[u8]);

    /// Stages deletion of every key starting with `prefix`.
    fn delete_subtree(&mut self, prefix: &[u8]);

    /// Atomically applies the batch.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the batch.
    fn rollback(self: Box<Self>);
}

/// A seekable cursor over the store
///
/// Every positioning call pins the cursor to a key-prefix domain; the
/// relative moves (`seek_next`, `seek_prev`) stay inside that domain.
pub trait DatabaseCursor {
    /// Positions on the first key with the given prefix.
    fn seek_first(&mut self, prefix: &[u8]) -> Result<Option<KvPair>>;

    /// Positions on the last key with the given prefix.
    fn seek_last(&mut self, prefix: &[u8]) -> Result<Option<KvPair>>;

    /// Positions on the smallest key `>= key` that shares the first
    /// `prefix_len` bytes with `key`.
    fn seek_upper_bound(&mut self, key: &[u8], prefix_len: usize) -> Result<Option<KvPair>>;

    /// Moves to the next key inside the pinned domain.
    fn seek_next(&mut self) -> Result<Option<KvPair>>;

    /// Moves to the previous key inside the pinned domain.
    fn seek_prev(&mut self) -> Result<Option<KvPair>>;
}

/// Cursor over a full snapshot, used for backups and storage checking
pub trait DatabaseBackupCursor {
    /// Fetches the next key/value pair, or `None` at the end.
    fn fetch(&mut self) -> Result<Option<KvPair>>;
}

/// Returns the smallest byte string greater than every string starting
/// with `prefix`, or `None` if no such bound exists.
#[must_use]
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(bound);
        }
        bound.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::prefix_upper_bound;
    use test_log::test;

    #[test]
    fn upper_bound_simple() {
        assert_eq!(Some(vec![b'p' + 1]), prefix_upper_bound(b"p"));
        assert_eq!(Some(vec![b'p', b'a' + 1]), prefix_upper_bound(b"pa"));
    }

    #[test]
    fn upper_bound_carries() {
        assert_eq!(Some(vec![b'p' + 1]), prefix_upper_bound(&[b'p', 0xFF, 0xFF]));
        assert_eq!(None, prefix_upper_bound(&[0xFF, 0xFF]));
        assert_eq!(None, prefix_upper_bound(&[]));
    }
}
