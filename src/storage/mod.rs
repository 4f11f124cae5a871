// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The storage layer: client handle, transactions, block cursors and
//! the forward iterator.

mod block_cache;
mod block_storage;
mod client;
pub mod dump;
mod forward_iterator;
mod metadata_transaction;
mod transaction;
pub mod variables;

pub use block_cache::BlockCache;
pub use block_storage::BlockStorage;
pub use client::{create_storage, StorageClient};
pub use forward_iterator::ForwardIterator;
pub use metadata_transaction::MetaDataTransaction;
pub use transaction::{Document, DocumentPatch, DocumentTerm, Transaction};
