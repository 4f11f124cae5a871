// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Storage and query-execution core for structured full-text search.
//!
//! ##### NOTE
//!
//! > This crate only provides the index core, not a full search
//! > engine: it persists an inverted index, forward index, document
//! > metadata, attributes and access control lists on top of an
//! > ordered key/value store, and exposes the posting iterator
//! > algebra that boolean retrieval, ranking and summarization are
//! > composed from. Tokenization, query parsing and ranking live in
//! > higher layers; callers supply already-tokenized terms.
//!
//! ##### About
//!
//! All index data lives in packed variable-size blocks keyed by
//! `(kind, term type, term value, anchor)` so that "first block that
//! may contain id X" is a single upper-bound seek. Writes are staged
//! in a [`storage::Transaction`] and published as one atomic batch;
//! reads go through lock-free snapshots and lazy iterators.
//!
//! # Example usage
//!
//! ```
//! use std::sync::Arc;
//! use term_index::database::mem::MemDatabase;
//! use term_index::iterator::PostingIteratorOps;
//! use term_index::storage::{create_storage, Document, DocumentTerm, StorageClient};
//!
//! let db = MemDatabase::new();
//! create_storage(&db, "metadata=date UInt32")?;
//! let client = StorageClient::open(Arc::new(db), "")?;
//!
//! // index a document
//! let mut tx = client.transaction();
//! let doc = Document {
//!     search: vec![
//!         DocumentTerm::new("word", "hello", 1),
//!         DocumentTerm::new("word", "world", 2),
//!     ],
//!     ..Document::default()
//! };
//! tx.insert_document("doc-1", &doc)?;
//! tx.commit()?;
//!
//! // stream its postings
//! let mut it = client.posting_iterator("word", "hello")?;
//! assert_eq!(1, it.skip_doc(0));
//! assert_eq!(1, it.skip_pos(0));
//! #
//! # Ok::<(), term_index::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::cargo)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::module_name_repetitions)]

pub mod block;
pub mod coding;
pub mod config;
pub mod database;
pub mod dict;
mod error;
pub mod float16;
pub mod iterator;
pub mod key;
pub mod lsh;
pub mod meta;
mod slice;
pub mod statistics;
pub mod storage;
mod variant;

/// Internal identifier; 0 is reserved as "unassigned / end of stream"
pub type Index = u32;

/// 1-based document number
pub type Docno = Index;
/// Term value number
pub type Termno = Index;
/// Term type number
pub type Typeno = Index;
/// Attribute name number
pub type Attribno = Index;
/// User name number
pub type Userno = Index;
/// 1-based token position inside a document
pub type Position = Index;

pub use {
    error::{Error, Result},
    slice::Slice,
    variant::NumericVariant,
};
