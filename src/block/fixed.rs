// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-size record blocks.
//!
//! Payload: a plain array of fixed-width records, anchored at the id
//! of the last record. Because records are small and blocks are
//! capped at a few hundred entries, `upper_bound` uses a few steps of
//! midpoint halving and then falls back to a linear scan; a fully
//! logarithmic search does not win at these sizes.

use super::{BlockBuilder, BlockType, DataBlock};
use crate::{Error, Index, Result};
use std::marker::PhantomData;

/// A fixed-width record inside a record-array block
pub trait FixedRecord: Copy {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Decodes one record.
    fn decode(buf: &[u8]) -> Self;

    /// Appends the encoded record.
    fn encode(&self, out: &mut Vec<u8>);

    /// The ordering id of the record.
    fn id(&self) -> Index;
}

/// Block holding an array of fixed-width records
#[derive(Clone, Debug)]
pub struct FixedSizeRecordBlock<R> {
    block: DataBlock,
    _marker: PhantomData<R>,
}

impl<R: FixedRecord> BlockType for FixedSizeRecordBlock<R> {
    fn from_block(block: DataBlock) -> Self {
        Self {
            block,
            _marker: PhantomData,
        }
    }

    fn block(&self) -> &DataBlock {
        &self.block
    }
}

impl<R: FixedRecord> FixedSizeRecordBlock<R> {
    /// Number of records in the block.
    #[must_use]
    pub fn nof_elements(&self) -> usize {
        self.block.size() / R::SIZE
    }

    /// Decodes the record at `idx`.
    pub fn record(&self, idx: usize) -> Result<R> {
        let ofs = idx * R::SIZE;
        let buf = self
            .block
            .data()
            .get(ofs..ofs + R::SIZE)
            .ok_or(Error::BlockCorrupt("record index out of bounds"))?;
        Ok(R::decode(buf))
    }

    /// Validates that the payload is a whole number of records and
    /// that ids ascend up to the anchor.
    pub fn check(&self) -> Result<()> {
        if self.block.size() % R::SIZE != 0 {
            return Err(Error::BlockCorrupt("truncated fixed-size record"));
        }
        let mut prev = 0;
        for i in 0..self.nof_elements() {
            let id = self.record(i)?.id();
            if id <= prev {
                return Err(Error::BlockCorrupt("record ids not strictly ascending"));
            }
            if id > self.id() {
                return Err(Error::BlockCorrupt("record id exceeds block anchor"));
            }
            prev = id;
        }
        Ok(())
    }

    /// Index of the smallest record with id `>= id`, starting the
    /// search at `lo`: 4 halving steps, then linear.
    pub fn upper_bound(&self, id: Index, lo: usize) -> Result<Option<usize>> {
        let mut first = lo;
        let mut last = self.nof_elements();
        let mut mid = first + ((last - first) >> 4);

        let mut steps = 0;
        while first + 4 < last && steps < 4 {
            let rec_id = self.record(mid)?.id();
            if rec_id < id {
                first = mid + 1;
            } else if rec_id > id {
                last = mid + 1;
            } else {
                return Ok(Some(mid));
            }
            mid = (first + last) >> 1;
            steps += 1;
        }
        for i in first..last.min(self.nof_elements()) {
            if self.record(i)?.id() >= id {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// The record with exactly this id, if present.
    pub fn find(&self, id: Index, lo: usize) -> Result<Option<R>> {
        match self.upper_bound(id, lo)? {
            Some(idx) => {
                let rec = self.record(idx)?;
                Ok((rec.id() == id).then_some(rec))
            }
            None => Ok(None),
        }
    }

    /// Decodes the whole block.
    pub fn decode_all(&self) -> Result<Vec<R>> {
        (0..self.nof_elements()).map(|i| self.record(i)).collect()
    }
}

/// Builds fixed-size record blocks.
#[derive(Debug)]
pub struct FixedBlockBuilder<R> {
    builder: BlockBuilder,
    last_id: Index,
    count: usize,
    _marker: PhantomData<R>,
}

impl<R: FixedRecord> Default for FixedBlockBuilder<R> {
    fn default() -> Self {
        Self {
            builder: BlockBuilder::new(),
            last_id: 0,
            count: 0,
            _marker: PhantomData,
        }
    }
}

impl<R: FixedRecord> FixedBlockBuilder<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when records are pushed out of order.
    pub fn push(&mut self, record: &R) {
        debug_assert!(record.id() > self.last_id, "ids must be strictly ascending");
        record.encode(self.builder.bytes_mut());
        self.last_id = record.id();
        self.count += 1;
    }

    /// Number of records pushed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Freezes into a block anchored at the last pushed id.
    #[must_use]
    pub fn freeze(mut self) -> FixedSizeRecordBlock<R> {
        self.builder.set_id(self.last_id);
        FixedSizeRecordBlock::from_block(self.builder.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    struct TestRecord(Index);

    impl FixedRecord for TestRecord {
        const SIZE: usize = 4;

        fn decode(buf: &[u8]) -> Self {
            let mut id = [0u8; 4];
            id.copy_from_slice(buf);
            Self(Index::from_le_bytes(id))
        }

        fn encode(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&self.0.to_le_bytes());
        }

        fn id(&self) -> Index {
            self.0
        }
    }

    fn build(ids: &[Index]) -> FixedSizeRecordBlock<TestRecord> {
        let mut builder = FixedBlockBuilder::new();
        for &id in ids {
            builder.push(&TestRecord(id));
        }
        builder.freeze()
    }

    #[test]
    fn roundtrip() {
        let block = build(&[1, 5, 9]);
        assert_eq!(9, block.id());
        assert_eq!(3, block.nof_elements());
        block.check().expect("should be well-formed");
    }

    #[test]
    fn upper_bound_matches_linear_scan() {
        let ids = (1..=100).map(|i| i * 3).collect::<Vec<_>>();
        let block = build(&ids);

        for target in 0..=310 {
            let expected = ids.iter().position(|&i| i >= target);
            let got = block.upper_bound(target, 0).expect("ok");
            assert_eq!(expected, got, "target {target}");
        }
    }

    #[test]
    fn find_exact_only() {
        let block = build(&[2, 4, 6]);
        assert_eq!(Some(TestRecord(4)), block.find(4, 0).expect("ok"));
        assert_eq!(None, block.find(5, 0).expect("ok"));
    }
}
