// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Global collection statistics for a distributed index.
//!
//! Each peer storage emits a statistics blob per commit; the map
//! aggregates the document-count and per-term df changes of all peers.
//! Counters live in a lock-free skip-list map so readers never block;
//! a per-peer monotonic timestamp gates replays, making redelivery of
//! a blob idempotent.

use crate::{Error, Result};
use byteorder::{ByteOrder, LE};
use crossbeam_skiplist::SkipMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Global counter value
pub type GlobalCounter = i64;

/// One df change decoded out of a statistics blob
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TermStatisticsChange {
    pub termtype: String,
    pub termvalue: String,
    pub increment: i64,
}

/// Decoder of one statistics blob.
///
/// The map itself treats blobs as opaque; any transport format works
/// as long as a viewer can replay its changes.
pub trait StatisticsViewer {
    /// Monotonic per-peer timestamp of the blob.
    fn timestamp(&self) -> u64;

    /// Change of the number of documents inserted.
    fn nof_documents_inserted_change(&self) -> i64;

    /// Yields the next df change, or `None` at the end.
    fn next_df_change(&mut self) -> Result<Option<TermStatisticsChange>>;
}

/// Receiver of statistics blobs emitted at commit
pub trait StatisticsSink: Send + Sync {
    /// Publishes one blob to the peers.
    fn publish(&self, blob: &[u8]);
}

fn term_key(termtype: &str, termvalue: &str) -> String {
    format!("{termtype}\u{1}{termvalue}")
}

/// Aggregated global statistics of all peers
pub struct StatisticsMap {
    df: SkipMap<String, AtomicI64>,
    nof_documents: AtomicI64,
    peer_timestamps: Mutex<rustc_hash::FxHashMap<String, u64>>,
}

impl Default for StatisticsMap {
    fn default() -> Self {
        Self {
            df: SkipMap::new(),
            nof_documents: AtomicI64::new(0),
            peer_timestamps: Mutex::new(rustc_hash::FxHashMap::default()),
        }
    }
}

impl StatisticsMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a local document-count change.
    pub fn add_nof_documents_inserted_change(&self, increment: i64) {
        self.nof_documents.fetch_add(increment, Ordering::Relaxed);
    }

    /// Applies a local df change.
    pub fn add_df_change(&self, termtype: &str, termvalue: &str, increment: i64) {
        self.df
            .get_or_insert_with(term_key(termtype, termvalue), || AtomicI64::new(0))
            .value()
            .fetch_add(increment, Ordering::Relaxed);
    }

    /// Applies a peer blob through its viewer. A blob whose timestamp
    /// is not newer than the stored timestamp of its peer is dropped
    /// and `false` is returned.
    #[allow(clippy::expect_used)]
    pub fn apply(&self, peer_id: &str, viewer: &mut dyn StatisticsViewer) -> Result<bool> {
        {
            let mut timestamps = self.peer_timestamps.lock().expect("lock is poisoned");
            let stored = timestamps.get(peer_id).copied().unwrap_or(0);
            if viewer.timestamp() <= stored {
                log::debug!(
                    "dropping replayed statistics blob of peer {peer_id} (timestamp {})",
                    viewer.timestamp(),
                );
                return Ok(false);
            }
            timestamps.insert(peer_id.to_string(), viewer.timestamp());
        }

        self.nof_documents
            .fetch_add(viewer.nof_documents_inserted_change(), Ordering::Relaxed);

        while let Some(change) = viewer.next_df_change()? {
            self.add_df_change(&change.termtype, &change.termvalue, change.increment);
        }
        Ok(true)
    }

    /// Global document count.
    #[must_use]
    pub fn nof_documents(&self) -> GlobalCounter {
        self.nof_documents.load(Ordering::Relaxed)
    }

    /// Global df of a term, 0 when unknown.
    #[must_use]
    pub fn df(&self, termtype: &str, termvalue: &str) -> GlobalCounter {
        self.df
            .get(&term_key(termtype, termvalue))
            .map_or(0, |e| e.value().load(Ordering::Relaxed))
    }

    /// All term types seen so far.
    #[must_use]
    pub fn types_seen(&self) -> Vec<String> {
        let mut types = BTreeSet::new();
        for entry in self.df.iter() {
            if let Some((t, _)) = entry.key().split_once('\u{1}') {
                types.insert(t.to_string());
            }
        }
        types.into_iter().collect()
    }
}

/// Builder of the crate's packed statistics blob format:
/// `[timestamp:u64le][nof_docs_delta:i64le][records…]` with records
/// `[typelen:u16le][type][valuelen:u16le][value][df_delta:i64le]`.
#[derive(Debug)]
pub struct StatisticsBuilder {
    buf: Vec<u8>,
}

impl StatisticsBuilder {
    #[must_use]
    pub fn new(timestamp: u64, nof_docs_delta: i64) -> Self {
        let mut buf = vec![0u8; 16];
        LE::write_u64(&mut buf[..8], timestamp);
        LE::write_i64(&mut buf[8..], nof_docs_delta);
        Self { buf }
    }

    /// Appends one df change.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_df_change(&mut self, termtype: &str, termvalue: &str, increment: i64) {
        let mut len = [0u8; 2];
        LE::write_u16(&mut len, termtype.len().min(usize::from(u16::MAX)) as u16);
        self.buf.extend_from_slice(&len);
        self.buf.extend_from_slice(termtype.as_bytes());
        LE::write_u16(&mut len, termvalue.len().min(usize::from(u16::MAX)) as u16);
        self.buf.extend_from_slice(&len);
        self.buf.extend_from_slice(termvalue.as_bytes());
        let mut inc = [0u8; 8];
        LE::write_i64(&mut inc, increment);
        self.buf.extend_from_slice(&inc);
    }

    /// Finishes the blob.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Viewer over the packed blob format of [`StatisticsBuilder`]
pub struct PackedStatisticsViewer<'a> {
    timestamp: u64,
    nof_docs_delta: i64,
    tail: &'a [u8],
}

impl<'a> PackedStatisticsViewer<'a> {
    /// Parses the blob header.
    pub fn new(blob: &'a [u8]) -> Result<Self> {
        if blob.len() < 16 {
            return Err(Error::Database("statistics blob too small".to_string()));
        }
        Ok(Self {
            timestamp: LE::read_u64(&blob[..8]),
            nof_docs_delta: LE::read_i64(&blob[8..16]),
            tail: &blob[16..],
        })
    }

    fn read_string(&mut self) -> Result<String> {
        if self.tail.len() < 2 {
            return Err(Error::Database("statistics blob truncated".to_string()));
        }
        let len = usize::from(LE::read_u16(&self.tail[..2]));
        self.tail = &self.tail[2..];
        if self.tail.len() < len {
            return Err(Error::Database("statistics blob truncated".to_string()));
        }
        let s = String::from_utf8(self.tail[..len].to_vec())
            .map_err(|_| Error::Database("statistics blob not utf-8".to_string()))?;
        self.tail = &self.tail[len..];
        Ok(s)
    }
}

impl StatisticsViewer for PackedStatisticsViewer<'_> {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn nof_documents_inserted_change(&self) -> i64 {
        self.nof_docs_delta
    }

    fn next_df_change(&mut self) -> Result<Option<TermStatisticsChange>> {
        if self.tail.is_empty() {
            return Ok(None);
        }
        let termtype = self.read_string()?;
        let termvalue = self.read_string()?;
        if self.tail.len() < 8 {
            return Err(Error::Database("statistics blob truncated".to_string()));
        }
        let increment = LE::read_i64(&self.tail[..8]);
        self.tail = &self.tail[8..];
        Ok(Some(TermStatisticsChange {
            termtype,
            termvalue,
            increment,
        }))
    }
}
