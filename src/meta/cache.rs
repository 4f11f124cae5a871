// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Shared snapshot cache over metadata blocks.
//!
//! The cache holds slots of shared references to immutable 256-record
//! blocks, indexed by block number. Readers briefly acquire the slot
//! lock to clone the `Arc`, then use the snapshot without further
//! synchronization; a reader-held block is never mutated. Writers
//! publish new references: a reload races with concurrent reloads and
//! the first publication wins, losing publishers discard their copy.
//! Stale reads are permitted only between commit and `refresh`; the
//! transaction guarantees that ordering.

use super::block::MetaDataBlock;
use super::descr::MetaDataDescription;
use crate::database::DatabaseClient;
use crate::key::{DatabaseKey, KeyPrefix};
use crate::variant::NumericVariant;
use crate::{meta, Docno, Index, Result};
use std::sync::{Arc, Mutex, RwLock};

/// Read view on one document's metadata record
pub struct MetaDataSnapshot {
    descr: Arc<MetaDataDescription>,
    block: Arc<MetaDataBlock>,
    idx: usize,
}

impl MetaDataSnapshot {
    /// Reads a column by handle.
    pub fn get(&self, handle: usize) -> Result<NumericVariant> {
        meta::get_value(&self.descr, self.block.record(self.idx)?, handle)
    }

    /// Reads a column by name.
    pub fn get_by_name(&self, name: &str) -> Result<NumericVariant> {
        self.get(self.descr.handle(name)?)
    }

    /// The description the snapshot was read under.
    #[must_use]
    pub fn description(&self) -> &MetaDataDescription {
        &self.descr
    }

    /// Raw record bytes.
    pub fn record_bytes(&self) -> Result<&[u8]> {
        self.block.record(self.idx)
    }
}

/// Cache of shared references to immutable metadata blocks
pub struct MetaDataBlockCache {
    db: Arc<dyn DatabaseClient>,
    descr: RwLock<Arc<MetaDataDescription>>,
    slots: RwLock<Vec<Option<Arc<MetaDataBlock>>>>,
    voided: Mutex<Vec<Index>>,
}

impl MetaDataBlockCache {
    /// Creates an empty cache for the given description.
    pub fn new(db: Arc<dyn DatabaseClient>, descr: Arc<MetaDataDescription>) -> Self {
        Self {
            db,
            descr: RwLock::new(descr),
            slots: RwLock::new(vec![]),
            voided: Mutex::new(vec![]),
        }
    }

    /// The current metadata description.
    #[allow(clippy::expect_used)]
    pub fn description(&self) -> Arc<MetaDataDescription> {
        self.descr.read().expect("lock is poisoned").clone()
    }

    /// Returns the record view for a docno, loading and publishing the
    /// block snapshot on a cache miss.
    pub fn get(&self, docno: Docno) -> Result<MetaDataSnapshot> {
        debug_assert!(docno > 0, "docnos are 1-based");
        let descr = self.description();
        let blockno = MetaDataBlock::blockno(docno);
        let slot = (blockno - 1) as usize;

        if let Some(block) = self.load_slot(slot) {
            return Ok(MetaDataSnapshot {
                descr,
                block,
                idx: MetaDataBlock::index(docno),
            });
        }

        // miss: read outside any lock, then publish first-wins
        let block = Arc::new(self.read_block(&descr, blockno)?);
        let block = self.publish_slot(slot, block);

        Ok(MetaDataSnapshot {
            descr,
            block,
            idx: MetaDataBlock::index(docno),
        })
    }

    /// Marks a block number dirty for the next [`Self::refresh`].
    #[allow(clippy::expect_used)]
    pub fn declare_void(&self, blockno: Index) {
        self.voided.lock().expect("lock is poisoned").push(blockno);
    }

    /// Nulls all dirty slots; subsequent readers reload from the store.
    #[allow(clippy::expect_used)]
    pub fn refresh(&self) {
        let voided = std::mem::take(&mut *self.voided.lock().expect("lock is poisoned"));
        if voided.is_empty() {
            return;
        }
        let mut slots = self.slots.write().expect("lock is poisoned");
        for blockno in voided {
            let slot = (blockno - 1) as usize;
            if let Some(entry) = slots.get_mut(slot) {
                *entry = None;
            }
        }
        log::debug!("metadata cache refreshed");
    }

    /// Swaps the whole cache backing to a new description (after an
    /// alter-table commit).
    #[allow(clippy::expect_used)]
    pub fn reset(&self, descr: Arc<MetaDataDescription>) {
        let mut slots = self.slots.write().expect("lock is poisoned");
        let mut current = self.descr.write().expect("lock is poisoned");
        slots.clear();
        *current = descr;
        self.voided.lock().expect("lock is poisoned").clear();
    }

    #[allow(clippy::expect_used)]
    fn load_slot(&self, slot: usize) -> Option<Arc<MetaDataBlock>> {
        self.slots
            .read()
            .expect("lock is poisoned")
            .get(slot)
            .and_then(Clone::clone)
    }

    #[allow(clippy::expect_used)]
    fn publish_slot(&self, slot: usize, block: Arc<MetaDataBlock>) -> Arc<MetaDataBlock> {
        let mut slots = self.slots.write().expect("lock is poisoned");
        if slots.len() <= slot {
            slots.resize(slot + 1, None);
        }
        match &slots[slot] {
            // a concurrent reader published first; use theirs
            Some(existing) => existing.clone(),
            None => {
                slots[slot] = Some(block.clone());
                block
            }
        }
    }

    fn read_block(&self, descr: &MetaDataDescription, blockno: Index) -> Result<MetaDataBlock> {
        let mut key = DatabaseKey::new(KeyPrefix::DocMetaData);
        key.add_elem(blockno)?;

        match self.db.read_value(key.as_bytes())? {
            Some(value) => MetaDataBlock::from_bytes(descr, blockno, value.to_vec()),
            // documents without stored metadata read as zeroes
            None => Ok(MetaDataBlock::new_zeroed(descr, blockno)),
        }
    }
}
