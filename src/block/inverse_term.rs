// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Inverse term blocks.
//!
//! One block per document, keyed by docno, listing every
//! `(typeno, termno)` the document contributed to the inverted index
//! together with its feature frequency and first position. Deleting a
//! document reads this block to discover which posting lists to purge.
//!
//! Payload: records sorted by `(typeno, termno)`, per record
//! `[typeno delta][termno or termno delta][ff][firstpos]`; the termno
//! is delta-coded against the previous record when the typeno did not
//! change, absolute otherwise.

use super::{BlockBuilder, BlockType, DataBlock};
use crate::coding::{pack_uint, unpack_uint};
use crate::{Error, Position, Result, Termno, Typeno};

/// The term set of a single document
#[derive(Clone, Debug)]
pub struct InverseTermBlock(DataBlock);

impl BlockType for InverseTermBlock {
    fn from_block(block: DataBlock) -> Self {
        Self(block)
    }

    fn block(&self) -> &DataBlock {
        &self.0
    }
}

/// One inverse term record
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InverseTerm {
    pub typeno: Typeno,
    pub termno: Termno,
    /// Number of occurrences in the document
    pub ff: u32,
    /// First occurrence position
    pub firstpos: Position,
}

impl InverseTermBlock {
    /// Decodes all records of the block.
    pub fn decode_all(&self) -> Result<Vec<InverseTerm>> {
        let mut out = vec![];
        let mut tail = self.0.data();
        let mut prev_typeno: Typeno = 0;
        let mut prev_termno: Termno = 0;

        while !tail.is_empty() {
            let typeno_delta = unpack_uint(&mut tail)?;
            let typeno = prev_typeno
                .checked_add(typeno_delta)
                .ok_or(Error::BlockCorrupt("typeno overflows u32"))?;

            let termno = if typeno_delta == 0 {
                let delta = unpack_uint(&mut tail)?;
                if delta == 0 {
                    return Err(Error::BlockCorrupt("duplicate inverse term record"));
                }
                prev_termno
                    .checked_add(delta)
                    .ok_or(Error::BlockCorrupt("termno overflows u32"))?
            } else {
                unpack_uint(&mut tail)?
            };

            let ff = unpack_uint(&mut tail)?;
            let firstpos = unpack_uint(&mut tail)?;

            out.push(InverseTerm {
                typeno,
                termno,
                ff,
                firstpos,
            });
            prev_typeno = typeno;
            prev_termno = termno;
        }
        Ok(out)
    }
}

/// Builds the inverse term block of one document.
///
/// # Panics
///
/// Panics in debug mode when records are not sorted by
/// `(typeno, termno)`.
#[must_use]
pub fn build(docno: crate::Docno, records: &[InverseTerm]) -> InverseTermBlock {
    let mut builder = BlockBuilder::new();
    builder.set_id(docno);

    let buf = builder.bytes_mut();
    let mut prev_typeno: Typeno = 0;
    let mut prev_termno: Termno = 0;

    for rec in records {
        debug_assert!(
            (rec.typeno, rec.termno) > (prev_typeno, prev_termno) || prev_typeno == 0,
            "records must be sorted by (typeno, termno)"
        );
        pack_uint(buf, rec.typeno - prev_typeno);
        if rec.typeno == prev_typeno {
            pack_uint(buf, rec.termno - prev_termno);
        } else {
            pack_uint(buf, rec.termno);
        }
        pack_uint(buf, rec.ff);
        pack_uint(buf, rec.firstpos);

        prev_typeno = rec.typeno;
        prev_termno = rec.termno;
    }

    InverseTermBlock::from_block(builder.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip() {
        let records = vec![
            InverseTerm {
                typeno: 1,
                termno: 5,
                ff: 3,
                firstpos: 2,
            },
            InverseTerm {
                typeno: 1,
                termno: 9,
                ff: 1,
                firstpos: 10,
            },
            InverseTerm {
                typeno: 2,
                termno: 4,
                ff: 2,
                firstpos: 1,
            },
        ];

        let block = build(42, &records);
        assert_eq!(42, block.id());
        assert_eq!(records, block.decode_all().expect("should decode"));
    }

    #[test]
    fn empty_block() {
        let block = build(7, &[]);
        assert!(block.decode_all().expect("should decode").is_empty());
    }
}
