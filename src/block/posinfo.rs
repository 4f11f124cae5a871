// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Positional posting blocks.
//!
//! Payload: a sequence of `[docno delta][ff][pos][pos delta …]`
//! records. Docnos are delta-coded from the previous record (first
//! record absolute), positions are delta-coded within their record.
//! Invariants: docnos strictly ascending within and across blocks of
//! the same `(typeno, termno)`, `ff` equals the number of positions,
//! positions strictly ascending, anchor equals the last docno.

use super::{BlockBuilder, BlockType, DataBlock};
use crate::coding::{pack_uint, unpack_uint};
use crate::{Docno, Error, Position, Result};

/// Positional postings of one `(typeno, termno)` key range
#[derive(Clone, Debug)]
pub struct PosinfoBlock(DataBlock);

impl BlockType for PosinfoBlock {
    fn from_block(block: DataBlock) -> Self {
        Self(block)
    }

    fn block(&self) -> &DataBlock {
        &self.0
    }
}

/// Decoded position of a reader inside a posinfo block.
///
/// Cursors hold plain offsets so the block itself stays immutable and
/// cheaply shareable; re-positioning restarts from the record start.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosinfoCursor {
    /// Byte offset of the record after the current one
    next_ofs: usize,
    /// Byte offset of the current record's position list
    pos_ofs: usize,
    /// Docno of the current record, 0 when unpositioned
    pub docno: Docno,
    /// Position count of the current record
    pub ff: u32,
}

impl PosinfoBlock {
    /// Target maximum of docno/position tokens per block
    pub const MAX_BLOCK_TOKENS: usize = 1024;

    /// `true` if `docno` lies inside this block's id range.
    #[must_use]
    pub fn is_this_block_address(&self, docno: Docno, first_docno: Docno) -> bool {
        docno <= self.id() && docno > first_docno
    }

    /// `true` if `docno` most likely lies in the next block of the
    /// family, so a `seek_next` suffices instead of a fresh seek.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_follow_block_address(&self, docno: Docno) -> bool {
        docno > self.id() && u64::from(docno) < u64::from(self.id()) + Self::MAX_BLOCK_TOKENS as u64
    }

    /// Positions the cursor on the first record.
    pub fn first(&self, cursor: &mut PosinfoCursor) -> Result<Option<Docno>> {
        *cursor = PosinfoCursor::default();
        self.advance(cursor)
    }

    /// Advances the cursor to the next record.
    pub fn advance(&self, cursor: &mut PosinfoCursor) -> Result<Option<Docno>> {
        let data = self.0.data();
        if cursor.next_ofs >= data.len() {
            cursor.docno = 0;
            return Ok(None);
        }

        let mut tail = data.get(cursor.next_ofs..).ok_or(Error::KeyMalformed)?;
        let before = tail.len();

        let delta = unpack_uint(&mut tail)?;
        let docno = cursor
            .docno
            .checked_add(delta)
            .ok_or(Error::BlockCorrupt("docno overflows u32"))?;
        if docno <= cursor.docno {
            return Err(Error::BlockCorrupt("docnos not strictly ascending"));
        }
        let ff = unpack_uint(&mut tail)?;
        if ff == 0 {
            return Err(Error::BlockCorrupt("record without positions"));
        }

        cursor.pos_ofs = cursor.next_ofs + (before - tail.len());

        // skip over the position list to find the next record
        for _ in 0..ff {
            unpack_uint(&mut tail)?;
        }
        cursor.next_ofs = data.len() - tail.len();
        cursor.docno = docno;
        cursor.ff = ff;

        Ok(Some(docno))
    }

    /// Finds the smallest record docno `>= docno`, scanning forward
    /// from the cursor (restarting when the cursor is past the target).
    pub fn upper_bound(&self, docno: Docno, cursor: &mut PosinfoCursor) -> Result<Option<Docno>> {
        if cursor.docno == 0 || cursor.docno > docno {
            if self.first(cursor)?.is_none() {
                return Ok(None);
            }
        }
        while cursor.docno < docno {
            if self.advance(cursor)?.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(cursor.docno))
    }

    /// Smallest position `>= pos` of the record under the cursor, or 0.
    pub fn skip_pos(&self, cursor: &PosinfoCursor, pos: Position) -> Result<Position> {
        if cursor.docno == 0 {
            return Ok(0);
        }
        let mut tail = self
            .0
            .data()
            .get(cursor.pos_ofs..)
            .ok_or(Error::BlockCorrupt("position list out of bounds"))?;

        let mut current: Position = 0;
        for _ in 0..cursor.ff {
            let delta = unpack_uint(&mut tail)?;
            current = current
                .checked_add(delta)
                .ok_or(Error::BlockCorrupt("position overflows u32"))?;
            if current >= pos {
                return Ok(current);
            }
        }
        Ok(0)
    }

    /// Positions of the record under the cursor.
    pub fn positions(&self, cursor: &PosinfoCursor) -> Result<Vec<Position>> {
        if cursor.docno == 0 {
            return Ok(vec![]);
        }
        let mut tail = self
            .0
            .data()
            .get(cursor.pos_ofs..)
            .ok_or(Error::BlockCorrupt("position list out of bounds"))?;

        let mut out = Vec::with_capacity(cursor.ff as usize);
        let mut current: Position = 0;
        for _ in 0..cursor.ff {
            let delta = unpack_uint(&mut tail)?;
            current = current
                .checked_add(delta)
                .ok_or(Error::BlockCorrupt("position overflows u32"))?;
            out.push(current);
        }
        Ok(out)
    }

    /// Docno of the first record.
    pub fn first_docno(&self) -> Result<Docno> {
        let mut cursor = PosinfoCursor::default();
        Ok(self.first(&mut cursor)?.unwrap_or(0))
    }

    /// Decodes the whole block.
    pub fn decode_all(&self) -> Result<Vec<(Docno, Vec<Position>)>> {
        let mut out = vec![];
        let mut cursor = PosinfoCursor::default();
        while self.advance(&mut cursor)?.is_some() {
            out.push((cursor.docno, self.positions(&cursor)?));
        }
        Ok(out)
    }
}

/// Builds posinfo blocks, splitting at the token target.
#[derive(Debug, Default)]
pub struct PosinfoBlockBuilder {
    builder: BlockBuilder,
    last_docno: Docno,
    tokens: usize,
}

impl PosinfoBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one record.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when records are pushed out of order or
    /// without positions.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, docno: Docno, positions: &[Position]) {
        debug_assert!(docno > self.last_docno, "docnos must be strictly ascending");
        debug_assert!(!positions.is_empty(), "deleted records must not be pushed");

        let buf = self.builder.bytes_mut();
        pack_uint(buf, docno - self.last_docno);
        pack_uint(buf, positions.len() as u32);
        let mut prev = 0;
        for &p in positions {
            debug_assert!(p > prev, "positions must be strictly ascending");
            pack_uint(buf, p - prev);
            prev = p;
        }

        self.last_docno = docno;
        self.tokens += 1 + positions.len();
    }

    /// Whether the block reached its target size.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tokens >= PosinfoBlock::MAX_BLOCK_TOKENS
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Freezes into a block anchored at the last pushed docno.
    #[must_use]
    pub fn freeze(mut self) -> PosinfoBlock {
        self.builder.set_id(self.last_docno);
        PosinfoBlock::from_block(self.builder.freeze())
    }
}

/// Two-way ordered merge of staged changes into decoded old records.
///
/// For a docno present on both sides the staged record wins; a staged
/// record with no positions deletes the docno.
#[must_use]
pub fn merge(
    new: &std::collections::BTreeMap<Docno, Vec<Position>>,
    old: Vec<(Docno, Vec<Position>)>,
) -> Vec<(Docno, Vec<Position>)> {
    let mut out = Vec::with_capacity(old.len() + new.len());
    let mut old_itr = old.into_iter().peekable();
    let mut new_itr = new.iter().peekable();

    loop {
        match (old_itr.peek(), new_itr.peek()) {
            (Some((od, _)), Some((nd, _))) => {
                if **nd <= *od {
                    if **nd == *od {
                        // defined twice, the new record shadows the old
                        old_itr.next();
                    }
                    let (nd, np) = new_itr.next().unwrap_or_else(|| unreachable!());
                    if !np.is_empty() {
                        out.push((*nd, np.clone()));
                    }
                } else {
                    out.push(old_itr.next().unwrap_or_else(|| unreachable!()));
                }
            }
            (None, Some(_)) => {
                let (nd, np) = new_itr.next().unwrap_or_else(|| unreachable!());
                if !np.is_empty() {
                    out.push((*nd, np.clone()));
                }
            }
            (Some(_), None) => {
                out.push(old_itr.next().unwrap_or_else(|| unreachable!()));
            }
            (None, None) => return out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use test_log::test;

    fn build(records: &[(Docno, &[Position])]) -> PosinfoBlock {
        let mut builder = PosinfoBlockBuilder::new();
        for (docno, positions) in records {
            builder.push(*docno, positions);
        }
        builder.freeze()
    }

    #[test]
    fn roundtrip_and_anchor() {
        let block = build(&[(1, &[2, 5, 9]), (7, &[1]), (300, &[4, 8])]);

        assert_eq!(300, block.id());
        assert_eq!(
            vec![(1, vec![2, 5, 9]), (7, vec![1]), (300, vec![4, 8])],
            block.decode_all().expect("should decode")
        );
    }

    #[test]
    fn upper_bound_scans_forward() {
        let block = build(&[(2, &[1]), (5, &[1]), (9, &[1])]);
        let mut cursor = PosinfoCursor::default();

        assert_eq!(Some(2), block.upper_bound(1, &mut cursor).expect("ok"));
        assert_eq!(Some(5), block.upper_bound(3, &mut cursor).expect("ok"));
        assert_eq!(Some(5), block.upper_bound(5, &mut cursor).expect("ok"));
        assert_eq!(None, block.upper_bound(10, &mut cursor).expect("ok"));

        // restart behind the cursor
        let mut cursor = PosinfoCursor::default();
        block.upper_bound(9, &mut cursor).expect("ok");
        assert_eq!(Some(2), block.upper_bound(1, &mut cursor).expect("ok"));
    }

    #[test]
    fn skip_pos_walks_record() {
        let block = build(&[(1, &[2, 5, 9])]);
        let mut cursor = PosinfoCursor::default();
        block.upper_bound(1, &mut cursor).expect("ok");

        assert_eq!(2, block.skip_pos(&cursor, 0).expect("ok"));
        assert_eq!(5, block.skip_pos(&cursor, 3).expect("ok"));
        assert_eq!(9, block.skip_pos(&cursor, 6).expect("ok"));
        assert_eq!(9, block.skip_pos(&cursor, 9).expect("ok"));
        assert_eq!(0, block.skip_pos(&cursor, 10).expect("ok"));
    }

    #[test]
    fn follow_block_address() {
        let block = build(&[(5, &[1]), (10, &[2])]);

        assert!(block.is_this_block_address(7, 5));
        assert!(block.is_this_block_address(10, 5));
        assert!(!block.is_this_block_address(5, 5));
        assert!(block.is_follow_block_address(11));
        assert!(!block.is_follow_block_address(10_000));
    }

    #[test]
    fn merge_new_wins_and_deletes() {
        let old = vec![(1, vec![2u32, 5]), (4, vec![1]), (9, vec![3])];
        let mut new = BTreeMap::new();
        new.insert(1, vec![7u32]);
        new.insert(4, vec![]);
        new.insert(6, vec![2]);

        assert_eq!(
            vec![(1, vec![7]), (6, vec![2]), (9, vec![3])],
            merge(&new, old)
        );
    }

    #[test]
    fn corrupt_block_is_detected() {
        // docno delta of 0 on the second record makes docnos non-ascending
        let mut buf = vec![];
        crate::coding::pack_uint(&mut buf, 5); // docno 5
        crate::coding::pack_uint(&mut buf, 1); // ff
        crate::coding::pack_uint(&mut buf, 1); // pos
        crate::coding::pack_uint(&mut buf, 0); // delta 0 -> corrupt
        crate::coding::pack_uint(&mut buf, 1);
        crate::coding::pack_uint(&mut buf, 1);

        let block = PosinfoBlock::from_block(DataBlock::new(5, crate::Slice::from(buf)));
        assert!(block.decode_all().is_err());
    }
}
