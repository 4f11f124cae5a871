// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Forward index blocks.
//!
//! Per `(typeno, docno)` the forward index stores the original token
//! values by position, split into blocks anchored at their last
//! position. Payload: `[pos delta][value len][value bytes]` records,
//! positions delta-coded (first absolute), so a position lookup is an
//! upper-bound seek on the family followed by a local scan.

use super::{BlockBuilder, BlockType, DataBlock};
use crate::coding::{pack_uint, unpack_uint};
use crate::{Error, Position, Result};

/// One block of a document's forward index
#[derive(Clone, Debug)]
pub struct ForwardIndexBlock(DataBlock);

impl BlockType for ForwardIndexBlock {
    fn from_block(block: DataBlock) -> Self {
        Self(block)
    }

    fn block(&self) -> &DataBlock {
        &self.0
    }
}

/// Reader position inside a forward index block
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardCursor {
    next_ofs: usize,
    value_ofs: usize,
    value_len: usize,
    /// Position of the current record, 0 when unpositioned
    pub pos: Position,
}

impl ForwardIndexBlock {
    /// Target maximum of tokens per block
    pub const MAX_BLOCK_TOKENS: usize = 1024;

    /// Position of the first record.
    pub fn first_position(&self) -> Result<Position> {
        let mut cursor = ForwardCursor::default();
        Ok(self.advance(&mut cursor)?.unwrap_or(0))
    }

    /// Advances the cursor to the next record.
    pub fn advance(&self, cursor: &mut ForwardCursor) -> Result<Option<Position>> {
        let data = self.0.data();
        if cursor.next_ofs >= data.len() {
            cursor.pos = 0;
            return Ok(None);
        }

        let mut tail = data.get(cursor.next_ofs..).ok_or(Error::KeyMalformed)?;
        let before = tail.len();

        let delta = unpack_uint(&mut tail)?;
        let pos = cursor
            .pos
            .checked_add(delta)
            .ok_or(Error::BlockCorrupt("position overflows u32"))?;
        if pos <= cursor.pos {
            return Err(Error::BlockCorrupt("positions not strictly ascending"));
        }
        let len = unpack_uint(&mut tail)? as usize;
        if len > tail.len() {
            return Err(Error::BlockCorrupt("token value exceeds payload"));
        }

        let header_len = before - tail.len();
        cursor.value_ofs = cursor.next_ofs + header_len;
        cursor.value_len = len;
        cursor.next_ofs = cursor.value_ofs + len;
        cursor.pos = pos;

        Ok(Some(pos))
    }

    /// Smallest record position `>= pos`, scanning forward from the
    /// cursor (restarting when the cursor is past the target).
    pub fn upper_bound(&self, pos: Position, cursor: &mut ForwardCursor) -> Result<Option<Position>> {
        if cursor.pos == 0 || cursor.pos > pos {
            *cursor = ForwardCursor::default();
            if self.advance(cursor)?.is_none() {
                return Ok(None);
            }
        }
        while cursor.pos < pos {
            if self.advance(cursor)?.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(cursor.pos))
    }

    /// Token value under the cursor.
    pub fn value_at(&self, cursor: &ForwardCursor) -> Result<&[u8]> {
        if cursor.pos == 0 {
            return Err(Error::ForwardIteratorUnpositioned);
        }
        self.0
            .data()
            .get(cursor.value_ofs..cursor.value_ofs + cursor.value_len)
            .ok_or(Error::BlockCorrupt("token value out of bounds"))
    }

    /// Decodes the whole block.
    pub fn decode_all(&self) -> Result<Vec<(Position, Vec<u8>)>> {
        let mut out = vec![];
        let mut cursor = ForwardCursor::default();
        while self.advance(&mut cursor)?.is_some() {
            out.push((cursor.pos, self.value_at(&cursor)?.to_vec()));
        }
        Ok(out)
    }
}

/// Builds forward index blocks, splitting at the token target.
#[derive(Debug, Default)]
pub struct ForwardBlockBuilder {
    builder: BlockBuilder,
    last_pos: Position,
    tokens: usize,
}

impl ForwardBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one `(position, value)` record.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when positions are pushed out of order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, pos: Position, value: &[u8]) {
        debug_assert!(pos > self.last_pos, "positions must be strictly ascending");

        let buf = self.builder.bytes_mut();
        pack_uint(buf, pos - self.last_pos);
        pack_uint(buf, value.len() as u32);
        buf.extend_from_slice(value);

        self.last_pos = pos;
        self.tokens += 1;
    }

    /// Whether the block reached its target size.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tokens >= ForwardIndexBlock::MAX_BLOCK_TOKENS
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Freezes into a block anchored at the last pushed position.
    #[must_use]
    pub fn freeze(mut self) -> ForwardIndexBlock {
        self.builder.set_id(self.last_pos);
        ForwardIndexBlock::from_block(self.builder.freeze())
    }
}
