// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Ordered in-memory reference implementation of the database
//! boundary.
//!
//! Backed by a `BTreeMap` behind an `RwLock`. Cursor moves take a
//! short read lock per seek instead of materializing snapshots; under
//! the crate's single-writer discipline this gives the same guarantees
//! as snapshot reads. The backup cursor materializes a real snapshot.

use super::{
    prefix_upper_bound, CursorOptions, DatabaseBackupCursor, DatabaseClient, DatabaseCursor,
    DatabaseTransaction, KvPair,
};
use crate::{Result, Slice};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::{Arc, RwLock};

type Map = BTreeMap<Vec<u8>, Slice>;

/// Ordered in-memory key/value store
#[derive(Clone, Default)]
pub struct MemDatabase {
    map: Arc<RwLock<Map>>,
}

impl MemDatabase {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a full snapshot as a length-prefixed key/value image,
    /// the format the CLI tools operate on.
    pub fn save_image<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
        let mut cursor = self.create_backup_cursor()?;
        let mut buf = vec![];
        while let Some((key, value)) = cursor.fetch()? {
            buf.clear();
            crate::coding::pack_uint64(&mut buf, key.len() as u64);
            buf.extend_from_slice(&key);
            crate::coding::pack_uint64(&mut buf, value.len() as u64);
            buf.extend_from_slice(&value);
            writer.write_all(&buf)?;
        }
        Ok(())
    }

    /// Loads a key/value image written by [`Self::save_image`].
    pub fn load_image<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = vec![];
        reader.read_to_end(&mut bytes)?;

        let db = Self::new();
        let mut tail = &bytes[..];
        let mut map = db.lock_write();
        while !tail.is_empty() {
            let klen = usize::try_from(crate::coding::unpack_uint64(&mut tail)?)
                .map_err(|_| crate::Error::KeyMalformed)?;
            if tail.len() < klen {
                return Err(crate::Error::KeyMalformed);
            }
            let key = tail[..klen].to_vec();
            tail = &tail[klen..];

            let vlen = usize::try_from(crate::coding::unpack_uint64(&mut tail)?)
                .map_err(|_| crate::Error::KeyMalformed)?;
            if tail.len() < vlen {
                return Err(crate::Error::KeyMalformed);
            }
            map.insert(key, Slice::from(&tail[..vlen]));
            tail = &tail[vlen..];
        }
        drop(map);
        Ok(db)
    }

    #[allow(clippy::expect_used)]
    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Map> {
        self.map.read().expect("lock is poisoned")
    }

    #[allow(clippy::expect_used)]
    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Map> {
        self.map.write().expect("lock is poisoned")
    }
}

impl DatabaseClient for MemDatabase {
    fn read_value(&self, key: &[u8]) -> Result<Option<Slice>> {
        Ok(self.lock_read().get(key).cloned())
    }

    fn create_transaction(&self) -> Result<Box<dyn DatabaseTransaction>> {
        Ok(Box::new(MemTransaction {
            db: self.clone(),
            ops: vec![],
        }))
    }

    fn create_cursor(&self, _opts: CursorOptions) -> Result<Box<dyn DatabaseCursor>> {
        Ok(Box::new(MemCursor {
            db: self.clone(),
            domain: vec![],
            current: None,
        }))
    }

    fn create_backup_cursor(&self) -> Result<Box<dyn DatabaseBackupCursor>> {
        let snapshot = self
            .lock_read()
            .iter()
            .map(|(k, v)| (Slice::from(k), v.clone()))
            .collect::<Vec<_>>();

        Ok(Box::new(MemBackupCursor { snapshot, pos: 0 }))
    }

    fn compact(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

enum BatchOp {
    Put(Vec<u8>, Slice),
    Delete(Vec<u8>),
    DeleteSubtree(Vec<u8>),
}

struct MemTransaction {
    db: MemDatabase,
    ops: Vec<BatchOp>,
}

impl DatabaseTransaction for MemTransaction {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops
            .push(BatchOp::Put(key.to_vec(), Slice::from(value)));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push(BatchOp::Delete(key.to_vec()));
    }

    fn delete_subtree(&mut self, prefix: &[u8]) {
        self.ops.push(BatchOp::DeleteSubtree(prefix.to_vec()));
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut map = self.db.lock_write();

        for op in self.ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
                BatchOp::DeleteSubtree(prefix) => {
                    let doomed = match prefix_upper_bound(&prefix) {
                        Some(end) => map.range::<[u8], _>((
                            Included(prefix.as_slice()),
                            Excluded(end.as_slice()),
                        )),
                        None => map.range::<[u8], _>((Included(prefix.as_slice()), Unbounded)),
                    }
                    .map(|(k, _)| k.clone())
                    .collect::<Vec<_>>();

                    for key in doomed {
                        map.remove(&key);
                    }
                }
            }
        }

        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

struct MemCursor {
    db: MemDatabase,
    domain: Vec<u8>,
    current: Option<Vec<u8>>,
}

impl MemCursor {
    fn found(&mut self, hit: Option<(&Vec<u8>, &Slice)>) -> Option<KvPair> {
        match hit {
            Some((k, v)) if k.starts_with(&self.domain) => {
                self.current = Some(k.clone());
                Some((Slice::from(k), v.clone()))
            }
            _ => {
                self.current = None;
                None
            }
        }
    }
}

impl DatabaseCursor for MemCursor {
    fn seek_first(&mut self, prefix: &[u8]) -> Result<Option<KvPair>> {
        self.domain = prefix.to_vec();
        let db = self.db.clone();
        let map = db.lock_read();
        let hit = map
            .range::<[u8], _>((Included(prefix), Unbounded))
            .next();
        Ok(self.found(hit))
    }

    fn seek_last(&mut self, prefix: &[u8]) -> Result<Option<KvPair>> {
        self.domain = prefix.to_vec();
        let db = self.db.clone();
        let map = db.lock_read();
        let hit = match prefix_upper_bound(prefix) {
            Some(end) => map
                .range::<[u8], _>((Included(prefix), Excluded(end.as_slice())))
                .next_back(),
            None => map.range::<[u8], _>((Included(prefix), Unbounded)).next_back(),
        };
        Ok(self.found(hit))
    }

    fn seek_upper_bound(&mut self, key: &[u8], prefix_len: usize) -> Result<Option<KvPair>> {
        self.domain = key.get(..prefix_len).unwrap_or(key).to_vec();
        let db = self.db.clone();
        let map = db.lock_read();
        let hit = map.range::<[u8], _>((Included(key), Unbounded)).next();
        Ok(self.found(hit))
    }

    fn seek_next(&mut self) -> Result<Option<KvPair>> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };
        let db = self.db.clone();
        let map = db.lock_read();
        let hit = map
            .range::<[u8], _>((Excluded(current.as_slice()), Unbounded))
            .next();
        Ok(self.found(hit))
    }

    fn seek_prev(&mut self) -> Result<Option<KvPair>> {
        let Some(current) = self.current.clone() else {
            return Ok(None);
        };
        let db = self.db.clone();
        let map = db.lock_read();
        let hit = map
            .range::<[u8], _>((Unbounded, Excluded(current.as_slice())))
            .next_back();
        Ok(self.found(hit))
    }
}

struct MemBackupCursor {
    snapshot: Vec<KvPair>,
    pos: usize,
}

impl DatabaseBackupCursor for MemBackupCursor {
    fn fetch(&mut self) -> Result<Option<KvPair>> {
        let item = self.snapshot.get(self.pos).cloned();
        self.pos += 1;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn put(db: &MemDatabase, key: &[u8], value: &[u8]) {
        let mut tx = db.create_transaction().expect("transaction");
        tx.put(key, value);
        tx.commit().expect("commit");
    }

    #[test]
    fn batch_is_atomic() {
        let db = MemDatabase::new();
        let mut tx = db.create_transaction().expect("transaction");
        tx.put(b"a", b"1");
        tx.put(b"b", b"2");
        assert!(db.is_empty());
        tx.commit().expect("commit");
        assert_eq!(2, db.len());
    }

    #[test]
    fn rollback_discards() {
        let db = MemDatabase::new();
        let mut tx = db.create_transaction().expect("transaction");
        tx.put(b"a", b"1");
        tx.rollback();
        assert!(db.is_empty());
    }

    #[test]
    fn upper_bound_seek_respects_prefix() {
        let db = MemDatabase::new();
        put(&db, b"pa", b"1");
        put(&db, b"pc", b"2");
        put(&db, b"q", b"3");

        let mut cursor = db.create_cursor(CursorOptions::default()).expect("cursor");

        let (k, _) = cursor
            .seek_upper_bound(b"pb", 1)
            .expect("seek")
            .expect("should hit");
        assert_eq!(b"pc", &*k);

        // past the last key of the family -> domain miss
        assert!(cursor.seek_upper_bound(b"pd", 1).expect("seek").is_none());
    }

    #[test]
    fn next_stays_inside_domain() {
        let db = MemDatabase::new();
        put(&db, b"pa", b"1");
        put(&db, b"pb", b"2");
        put(&db, b"q", b"3");

        let mut cursor = db.create_cursor(CursorOptions::default()).expect("cursor");
        let (k, _) = cursor.seek_first(b"p").expect("seek").expect("hit");
        assert_eq!(b"pa", &*k);

        let (k, _) = cursor.seek_next().expect("seek").expect("hit");
        assert_eq!(b"pb", &*k);

        assert!(cursor.seek_next().expect("seek").is_none());
    }

    #[test]
    fn last_and_prev() {
        let db = MemDatabase::new();
        put(&db, b"pa", b"1");
        put(&db, b"pb", b"2");
        put(&db, b"q", b"3");

        let mut cursor = db.create_cursor(CursorOptions::default()).expect("cursor");
        let (k, _) = cursor.seek_last(b"p").expect("seek").expect("hit");
        assert_eq!(b"pb", &*k);

        let (k, _) = cursor.seek_prev().expect("seek").expect("hit");
        assert_eq!(b"pa", &*k);

        assert!(cursor.seek_prev().expect("seek").is_none());
    }

    #[test]
    fn delete_subtree() {
        let db = MemDatabase::new();
        put(&db, b"pa", b"1");
        put(&db, b"pb", b"2");
        put(&db, b"q", b"3");

        let mut tx = db.create_transaction().expect("transaction");
        tx.delete_subtree(b"p");
        tx.commit().expect("commit");

        assert_eq!(1, db.len());
        assert!(db.read_value(b"q").expect("read").is_some());
    }

    #[test]
    fn image_roundtrip() {
        let db = MemDatabase::new();
        put(&db, b"a", b"1");
        put(&db, b"bb", b"22");

        let mut image = vec![];
        db.save_image(&mut image).expect("save");

        let back = MemDatabase::load_image(&mut &image[..]).expect("load");
        assert_eq!(2, back.len());
        assert_eq!(
            Some(crate::Slice::from("22")),
            back.read_value(b"bb").expect("read")
        );
    }

    #[test]
    fn backup_cursor_is_a_snapshot() {
        let db = MemDatabase::new();
        put(&db, b"a", b"1");

        let mut backup = db.create_backup_cursor().expect("cursor");
        put(&db, b"b", b"2");

        assert!(backup.fetch().expect("fetch").is_some());
        assert!(backup.fetch().expect("fetch").is_none());
    }
}
