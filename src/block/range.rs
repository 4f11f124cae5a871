// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Membership blocks: doclist and ACL families.
//!
//! Payload: run-length encoded ordered id ranges, per range
//! `[first delta from previous last][span]`. Ranges are strictly
//! ascending, non-overlapping, non-adjacent (adjacent ranges are
//! coalesced by the builder), and every id is `<= anchor`.

use super::{BlockBuilder, BlockType, DataBlock};
use crate::coding::{pack_uint, unpack_uint};
use crate::{Error, Index, Result};
use std::collections::BTreeMap;

/// Ordered id-range block (doclist, user ACL, inverted ACL)
#[derive(Clone, Debug)]
pub struct RangeBlock(DataBlock);

impl BlockType for RangeBlock {
    fn from_block(block: DataBlock) -> Self {
        Self(block)
    }

    fn block(&self) -> &DataBlock {
        &self.0
    }
}

impl RangeBlock {
    /// Target maximum of ranges per block
    pub const MAX_BLOCK_RANGES: usize = 1024;

    /// Decodes all ranges of the block.
    pub fn decode_ranges(&self) -> Result<Vec<(Index, Index)>> {
        let mut out = vec![];
        let mut tail = self.0.data();
        let mut prev_last: Index = 0;

        while !tail.is_empty() {
            let delta = unpack_uint(&mut tail)?;
            if delta == 0 {
                return Err(Error::BlockCorrupt("ranges overlap"));
            }
            let first = prev_last
                .checked_add(delta)
                .ok_or(Error::BlockCorrupt("range start overflows u32"))?;
            let span = unpack_uint(&mut tail)?;
            let last = first
                .checked_add(span)
                .ok_or(Error::BlockCorrupt("range end overflows u32"))?;
            if last > self.id() {
                return Err(Error::BlockCorrupt("range exceeds block anchor"));
            }
            out.push((first, last));
            prev_last = last;
        }
        Ok(out)
    }

    /// `true` if `id` lies inside this block's id range.
    #[must_use]
    pub fn is_this_block_address(&self, id: Index, first_id: Index) -> bool {
        id <= self.id() && id > first_id
    }

    /// `true` if `id` most likely lies in the next block of the family.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn is_follow_block_address(&self, id: Index) -> bool {
        id > self.id() && u64::from(id) < u64::from(self.id()) + Self::MAX_BLOCK_RANGES as u64
    }
}

/// Membership test over decoded ranges (binary search).
#[must_use]
pub fn contains(ranges: &[(Index, Index)], id: Index) -> bool {
    upper_bound(ranges, id) == Some(id)
}

/// Smallest contained id `>= id` over decoded ranges, or `None`.
#[must_use]
pub fn upper_bound(ranges: &[(Index, Index)], id: Index) -> Option<Index> {
    let idx = ranges.partition_point(|&(_, last)| last < id);
    let &(first, _) = ranges.get(idx)?;
    Some(if id > first { id } else { first })
}

/// Builds range blocks, coalescing adjacent ids.
#[derive(Debug, Default)]
pub struct RangeBlockBuilder {
    builder: BlockBuilder,
    pending: Option<(Index, Index)>,
    prev_last: Index,
    ranges: usize,
}

impl RangeBlockBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a range, merging it with the pending one when adjacent
    /// or overlapping.
    ///
    /// # Panics
    ///
    /// Panics in debug mode when ranges are pushed out of order.
    pub fn push_range(&mut self, first: Index, last: Index) {
        debug_assert!(first <= last, "range must be ordered");

        if let Some((pf, pl)) = self.pending {
            debug_assert!(first > pf, "ranges must be pushed in ascending order");
            if first <= pl.saturating_add(1) {
                self.pending = Some((pf, last.max(pl)));
                return;
            }
            self.flush_pending();
        }
        self.pending = Some((first, last));
    }

    /// Appends a single id.
    pub fn push_id(&mut self, id: Index) {
        self.push_range(id, id);
    }

    fn flush_pending(&mut self) {
        if let Some((first, last)) = self.pending.take() {
            let prev_last = self.prev_last;
            let buf = self.builder.bytes_mut();
            pack_uint(buf, first - prev_last);
            pack_uint(buf, last - first);
            self.prev_last = last;
            self.ranges += 1;
        }
    }

    /// Whether the block reached its target size.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.ranges >= RangeBlock::MAX_BLOCK_RANGES
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builder.is_empty() && self.pending.is_none()
    }

    /// Freezes into a block anchored at the highest contained id.
    #[must_use]
    pub fn freeze(mut self) -> RangeBlock {
        self.flush_pending();
        self.builder.set_id(self.prev_last);
        RangeBlock::from_block(self.builder.freeze())
    }
}

/// Applies staged membership changes (`true` = insert, `false` =
/// remove) to decoded old ranges, producing the merged range list.
#[must_use]
pub fn merge(new: &BTreeMap<Index, bool>, old: Vec<(Index, Index)>) -> Vec<(Index, Index)> {
    let removes = new
        .iter()
        .filter_map(|(&id, &ins)| (!ins).then_some(id))
        .collect::<Vec<_>>();
    let inserts = new
        .iter()
        .filter_map(|(&id, &ins)| ins.then_some(id))
        .collect::<Vec<_>>();

    // subtract removed ids, splitting ranges; the sweep position is
    // tracked as u64 so a removed Index::MAX cannot wrap around
    let mut split = vec![];
    let mut rem = removes.iter().copied().peekable();
    for (first, last) in old {
        while rem.peek().is_some_and(|&r| r < first) {
            rem.next();
        }
        let mut cur = u64::from(first);
        while let Some(&r) = rem.peek() {
            if r > last {
                break;
            }
            rem.next();
            if u64::from(r) > cur {
                #[allow(clippy::cast_possible_truncation)]
                split.push((cur as Index, r - 1));
            }
            cur = u64::from(r) + 1;
        }
        if cur <= u64::from(last) {
            #[allow(clippy::cast_possible_truncation)]
            split.push((cur as Index, last));
        }
    }

    // union with the inserted ids, coalescing
    let mut out: Vec<(Index, Index)> = vec![];
    let mut si = split.into_iter().peekable();
    let mut ii = inserts.into_iter().peekable();

    loop {
        let next = match (si.peek(), ii.peek()) {
            (Some(&(sf, sl)), Some(&id)) => {
                if sf <= id {
                    si.next();
                    (sf, sl)
                } else {
                    ii.next();
                    (id, id)
                }
            }
            (Some(_), None) => si.next().unwrap_or_else(|| unreachable!()),
            (None, Some(&id)) => {
                ii.next();
                (id, id)
            }
            (None, None) => break,
        };

        match out.last_mut() {
            Some((_, ol)) if next.0 <= ol.saturating_add(1) => {
                *ol = (*ol).max(next.1);
            }
            _ => out.push(next),
        }
    }
    out
}
