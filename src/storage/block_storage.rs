// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Cursor over all blocks of one key-prefix family.
//!
//! A family is the table prefix plus the fixed leading key components
//! (e.g. `(typeno, termno)` for posinfo blocks); the variable last
//! component is the block anchor. `load(id)` is an upper-bound seek
//! within the family.

use super::block_cache::BlockCache;
use crate::block::{BlockType, DataBlock};
use crate::coding::unpack_uint;
use crate::database::{CursorOptions, DatabaseClient, DatabaseCursor, DatabaseTransaction};
use crate::key::{DatabaseKey, KeyPrefix};
use crate::{Error, Index, Result, Slice};
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed block cursor scoped to one key family
pub struct BlockStorage<B> {
    db: Arc<dyn DatabaseClient>,
    cache: Option<Arc<BlockCache>>,
    key: DatabaseKey,
    family_len: usize,
    cursor: Option<Box<dyn DatabaseCursor>>,
    _marker: PhantomData<B>,
}

// cloning re-creates the cursor lazily, so clones hold independent
// positions over the same blocks
impl<B> Clone for BlockStorage<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            cache: self.cache.clone(),
            key: self.key.clone(),
            family_len: self.family_len,
            cursor: None,
            _marker: PhantomData,
        }
    }
}

impl<B: BlockType> BlockStorage<B> {
    /// Creates a cursor over the family `prefix ∙ elems…`.
    pub fn new(
        db: Arc<dyn DatabaseClient>,
        prefix: KeyPrefix,
        elems: &[Index],
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let key = DatabaseKey::with_elems(prefix, elems)?;
        let family_len = key.len();
        Ok(Self {
            db,
            cache,
            key,
            family_len,
            cursor: None,
            _marker: PhantomData,
        })
    }

    fn cursor(&mut self) -> Result<&mut dyn DatabaseCursor> {
        if self.cursor.is_none() {
            self.cursor = Some(self.db.create_cursor(CursorOptions {
                use_cache: self.cache.is_some(),
            })?);
        }
        Ok(self
            .cursor
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!()))
    }

    fn decode(&self, key: &Slice, value: Slice) -> Result<B> {
        let mut tail = key
            .get(self.family_len..)
            .ok_or(Error::KeyMalformed)?;
        let anchor = unpack_uint(&mut tail)?;
        if !tail.is_empty() {
            return Err(Error::KeyMalformed);
        }

        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(key) {
                return Ok(B::from_block(block));
            }
            let block = DataBlock::new(anchor, value);
            cache.insert(key, block.clone());
            return Ok(B::from_block(block));
        }
        Ok(B::from_block(DataBlock::new(anchor, value)))
    }

    /// Loads the first block whose anchor is `>= id`.
    pub fn load(&mut self, id: Index) -> Result<Option<B>> {
        let mut key = self.key.clone();
        key.resize(self.family_len);
        key.add_elem(id)?;

        let family_len = self.family_len;
        let hit = self.cursor()?.seek_upper_bound(key.as_bytes(), family_len)?;
        match hit {
            Some((k, v)) => Ok(Some(self.decode(&k, v)?)),
            None => Ok(None),
        }
    }

    /// Loads the first block of the family.
    pub fn load_first(&mut self) -> Result<Option<B>> {
        let prefix = self.key.as_bytes()[..self.family_len].to_vec();
        let hit = self.cursor()?.seek_first(&prefix)?;
        match hit {
            Some((k, v)) => Ok(Some(self.decode(&k, v)?)),
            None => Ok(None),
        }
    }

    /// Loads the last block of the family.
    pub fn load_last(&mut self) -> Result<Option<B>> {
        let prefix = self.key.as_bytes()[..self.family_len].to_vec();
        let hit = self.cursor()?.seek_last(&prefix)?;
        match hit {
            Some((k, v)) => Ok(Some(self.decode(&k, v)?)),
            None => Ok(None),
        }
    }

    /// Loads the block following the last loaded one.
    pub fn load_next(&mut self) -> Result<Option<B>> {
        let hit = self.cursor()?.seek_next()?;
        match hit {
            Some((k, v)) => Ok(Some(self.decode(&k, v)?)),
            None => Ok(None),
        }
    }

    /// Stages a block write into the batch.
    pub fn store(&self, block: &B, batch: &mut dyn DatabaseTransaction) -> Result<()> {
        let id = block.id();
        if id == 0 {
            return Err(Error::BlockCorrupt("block anchor must not be 0"));
        }
        let mut key = self.key.clone();
        key.resize(self.family_len);
        key.add_elem(id)?;

        if let Some(cache) = &self.cache {
            cache.remove(key.as_bytes());
        }
        batch.put(key.as_bytes(), block.block().data());
        Ok(())
    }

    /// Stages deletion of the block with the given anchor.
    pub fn dispose(&self, id: Index, batch: &mut dyn DatabaseTransaction) -> Result<()> {
        let mut key = self.key.clone();
        key.resize(self.family_len);
        key.add_elem(id)?;

        if let Some(cache) = &self.cache {
            cache.remove(key.as_bytes());
        }
        batch.delete(key.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::posinfo::{PosinfoBlock, PosinfoBlockBuilder};
    use crate::database::mem::MemDatabase;
    use test_log::test;

    fn store_block(
        db: &MemDatabase,
        storage: &BlockStorage<PosinfoBlock>,
        records: &[(u32, &[u32])],
    ) {
        let mut builder = PosinfoBlockBuilder::new();
        for (docno, positions) in records {
            builder.push(*docno, positions);
        }
        let block = builder.freeze();
        let mut batch = db.create_transaction().expect("transaction");
        storage.store(&block, batch.as_mut()).expect("store");
        batch.commit().expect("commit");
    }

    #[test]
    fn load_upper_bound_and_next() {
        let db = MemDatabase::new();
        let mut storage: BlockStorage<PosinfoBlock> = BlockStorage::new(
            Arc::new(db.clone()),
            KeyPrefix::PosinfoBlock,
            &[1, 7],
            None,
        )
        .expect("storage");

        store_block(&db, &storage, &[(1, &[1]), (5, &[2])]);
        store_block(&db, &storage, &[(8, &[1]), (12, &[3])]);

        let block = storage.load(3).expect("load").expect("should hit");
        assert_eq!(5, block.id());

        let block = storage.load_next().expect("load").expect("should hit");
        assert_eq!(12, block.id());

        assert!(storage.load(13).expect("load").is_none());

        let block = storage.load_first().expect("load").expect("should hit");
        assert_eq!(5, block.id());
        let block = storage.load_last().expect("load").expect("should hit");
        assert_eq!(12, block.id());
    }

    #[test]
    fn families_are_isolated() {
        let db = MemDatabase::new();
        let storage_a: BlockStorage<PosinfoBlock> = BlockStorage::new(
            Arc::new(db.clone()),
            KeyPrefix::PosinfoBlock,
            &[1, 7],
            None,
        )
        .expect("storage");
        let mut storage_b: BlockStorage<PosinfoBlock> = BlockStorage::new(
            Arc::new(db.clone()),
            KeyPrefix::PosinfoBlock,
            &[1, 8],
            None,
        )
        .expect("storage");

        store_block(&db, &storage_a, &[(5, &[1])]);

        assert!(storage_b.load(1).expect("load").is_none());
        assert!(storage_b.load_first().expect("load").is_none());
    }

    #[test]
    fn cached_load_roundtrip() {
        let db = MemDatabase::new();
        let cache = Arc::new(BlockCache::with_capacity_bytes(1 << 20));
        let mut storage: BlockStorage<PosinfoBlock> = BlockStorage::new(
            Arc::new(db.clone()),
            KeyPrefix::PosinfoBlock,
            &[2, 2],
            Some(cache.clone()),
        )
        .expect("storage");

        store_block(&db, &storage, &[(5, &[1, 4])]);

        let block = storage.load(1).expect("load").expect("should hit");
        assert_eq!(5, block.id());
        assert!(!cache.is_empty());

        // second load is served from the cache
        let block = storage.load(1).expect("load").expect("should hit");
        assert_eq!(vec![(5, vec![1, 4])], block.decode_all().expect("decode"));
    }

    #[test]
    fn dispose_removes() {
        let db = MemDatabase::new();
        let mut storage: BlockStorage<PosinfoBlock> =
            BlockStorage::new(Arc::new(db.clone()), KeyPrefix::PosinfoBlock, &[1, 1], None)
                .expect("storage");

        store_block(&db, &storage, &[(5, &[1])]);
        let mut batch = db.create_transaction().expect("transaction");
        storage.dispose(5, batch.as_mut()).expect("dispose");
        batch.commit().expect("commit");

        assert!(storage.load(1).expect("load").is_none());
    }
}
