// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::block::DataBlock;
use quick_cache::sync::Cache as QuickCache;
use quick_cache::Weighter;

#[derive(Clone)]
struct BlockWeighter;

impl Weighter<Vec<u8>, DataBlock> for BlockWeighter {
    fn weight(&self, key: &Vec<u8>, block: &DataBlock) -> u64 {
        (key.len() + block.size()) as u64
    }
}

/// Cache of decoded blocks keyed by their full database key.
///
/// Shared between the block cursors of one storage so consecutive
/// queries over nearby posting ranges skip the copy out of the
/// key/value store.
pub struct BlockCache {
    // NOTE: rustc_hash performed best: https://fjall-rs.github.io/post/fjall-2-1
    data: QuickCache<Vec<u8>, DataBlock, BlockWeighter, rustc_hash::FxBuildHasher>,
    capacity: u64,
}

impl BlockCache {
    /// Creates a cache with roughly `bytes` of capacity.
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        use quick_cache::sync::DefaultLifecycle;

        #[allow(clippy::default_trait_access)]
        let data = QuickCache::with(
            100_000,
            bytes,
            BlockWeighter,
            Default::default(),
            DefaultLifecycle::default(),
        );

        Self {
            data,
            capacity: bytes,
        }
    }

    /// Returns the amount of cached bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.weight()
    }

    /// Returns the cache capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns the number of cached blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if there are no cached blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn insert(&self, key: &[u8], block: DataBlock) {
        if self.capacity > 0 {
            self.data.insert(key.to_vec(), block);
        }
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<DataBlock> {
        self.data.get(key)
    }

    pub(crate) fn remove(&self, key: &[u8]) {
        self.data.remove(key);
    }
}
