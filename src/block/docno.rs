// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Docno blocks: fixed 8-byte `(docno, ff, weight)` records for
//! ranking-friendly streaming over a term's posting list. The weight
//! is stored half-precision.

use super::fixed::{FixedBlockBuilder, FixedRecord, FixedSizeRecordBlock};
use crate::float16::{f16_bits_to_f32, f32_to_f16_bits};
use crate::{Docno, Index};
use byteorder::{ByteOrder, LE};
use std::collections::BTreeMap;

/// One `(docno, ff, weight)` entry
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DocnoRecord {
    pub docno: Docno,
    /// Feature frequency, saturated to u16
    pub ff: u16,
    weight_bits: u16,
}

impl DocnoRecord {
    /// Creates a record, saturating `ff` and narrowing the weight to
    /// half precision.
    #[must_use]
    pub fn new(docno: Docno, ff: u32, weight: f32) -> Self {
        Self {
            docno,
            ff: ff.min(u32::from(u16::MAX)) as u16,
            weight_bits: f32_to_f16_bits(weight),
        }
    }

    /// The stored weight widened back to single precision.
    #[must_use]
    pub fn weight(&self) -> f32 {
        f16_bits_to_f32(self.weight_bits)
    }

    /// A record that deletes its docno when merged.
    #[must_use]
    pub fn tombstone(docno: Docno) -> Self {
        Self {
            docno,
            ff: 0,
            weight_bits: 0,
        }
    }

    /// Whether the record is a deletion marker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ff == 0
    }
}

impl FixedRecord for DocnoRecord {
    const SIZE: usize = 8;

    fn decode(buf: &[u8]) -> Self {
        Self {
            docno: LE::read_u32(buf),
            ff: LE::read_u16(&buf[4..]),
            weight_bits: LE::read_u16(&buf[6..]),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; Self::SIZE];
        LE::write_u32(&mut buf, self.docno);
        LE::write_u16(&mut buf[4..], self.ff);
        LE::write_u16(&mut buf[6..], self.weight_bits);
        out.extend_from_slice(&buf);
    }

    fn id(&self) -> Index {
        self.docno
    }
}

/// Record-array block over [`DocnoRecord`]s
pub type DocnoBlock = FixedSizeRecordBlock<DocnoRecord>;

/// Number of records per docno block
pub const NOF_BLOCK_ELEMENTS: usize = 128;

/// Two-way ordered merge of staged records into an old block's
/// records. For a docno present on both sides the staged record wins;
/// an empty staged record (`ff == 0`) deletes the docno.
#[must_use]
pub fn merge(new: &BTreeMap<Docno, DocnoRecord>, old: Vec<DocnoRecord>) -> Vec<DocnoRecord> {
    let mut out = Vec::with_capacity(old.len() + new.len());
    let mut old_itr = old.into_iter().peekable();
    let mut new_itr = new.values().peekable();

    loop {
        match (old_itr.peek(), new_itr.peek()) {
            (Some(o), Some(n)) => {
                if n.docno <= o.docno {
                    if n.docno == o.docno {
                        // defined twice, the new record shadows the old
                        old_itr.next();
                    }
                    let n = new_itr.next().unwrap_or_else(|| unreachable!());
                    if !n.is_empty() {
                        out.push(*n);
                    }
                } else {
                    let o = old_itr.next().unwrap_or_else(|| unreachable!());
                    out.push(o);
                }
            }
            (None, Some(_)) => {
                let n = new_itr.next().unwrap_or_else(|| unreachable!());
                if !n.is_empty() {
                    out.push(*n);
                }
            }
            (Some(_), None) => {
                let o = old_itr.next().unwrap_or_else(|| unreachable!());
                out.push(o);
            }
            (None, None) => return out,
        }
    }
}

/// Builds docno blocks split at [`NOF_BLOCK_ELEMENTS`].
#[must_use]
pub fn build_blocks(records: &[DocnoRecord]) -> Vec<DocnoBlock> {
    let mut out = vec![];
    for chunk in records.chunks(NOF_BLOCK_ELEMENTS) {
        let mut builder = FixedBlockBuilder::new();
        for rec in chunk {
            builder.push(rec);
        }
        out.push(builder.freeze());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use test_log::test;

    #[test]
    fn record_roundtrip() {
        let rec = DocnoRecord::new(42, 7, 0.5);
        let mut buf = vec![];
        rec.encode(&mut buf);

        let back = DocnoRecord::decode(&buf);
        assert_eq!(rec, back);
        assert_eq!(0.5, back.weight());
    }

    #[test]
    fn ff_saturates() {
        let rec = DocnoRecord::new(1, 1_000_000, 1.0);
        assert_eq!(u16::MAX, rec.ff);
    }

    #[test]
    fn merge_prefers_new_and_deletes() {
        let old = vec![
            DocnoRecord::new(1, 2, 0.1),
            DocnoRecord::new(4, 1, 0.2),
            DocnoRecord::new(9, 3, 0.3),
        ];
        let mut new = BTreeMap::new();
        new.insert(1, DocnoRecord::new(1, 5, 0.9));
        new.insert(4, DocnoRecord::tombstone(4));
        new.insert(6, DocnoRecord::new(6, 1, 0.4));

        let merged = merge(&new, old);
        let docnos = merged.iter().map(|r| r.docno).collect::<Vec<_>>();
        assert_eq!(vec![1, 6, 9], docnos);
        assert_eq!(5, merged[0].ff);
    }

    #[test]
    fn blocks_split_at_capacity() {
        let records = (1..=300u32)
            .map(|d| DocnoRecord::new(d, 1, 1.0))
            .collect::<Vec<_>>();
        let blocks = build_blocks(&records);

        assert_eq!(3, blocks.len());
        assert_eq!(128, blocks[0].nof_elements());
        assert_eq!(128, blocks[0].id());
        assert_eq!(300, blocks[2].id());
    }
}
