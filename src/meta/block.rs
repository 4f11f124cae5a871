// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::descr::MetaDataDescription;
use crate::{Docno, Error, Index, Result};

/// A block of 256 fixed-width metadata records.
///
/// Block number `b` covers docnos `(b-1)*256 + 1 ..= b*256`; the
/// record index of a docno inside its block is `(docno - 1) % 256`.
#[derive(Clone, Debug)]
pub struct MetaDataBlock {
    blockno: Index,
    record_size: usize,
    data: Vec<u8>,
}

impl MetaDataBlock {
    /// Records per block
    pub const BLOCK_SIZE: usize = 256;

    /// Block number covering a docno.
    #[must_use]
    pub fn blockno(docno: Docno) -> Index {
        (docno - 1) / (Self::BLOCK_SIZE as Index) + 1
    }

    /// Record index of a docno inside its block.
    #[must_use]
    pub fn index(docno: Docno) -> usize {
        ((docno - 1) as usize) % Self::BLOCK_SIZE
    }

    /// First docno covered by a block.
    #[must_use]
    pub fn first_docno(blockno: Index) -> Docno {
        (blockno - 1) * (Self::BLOCK_SIZE as Index) + 1
    }

    /// Creates a zeroed block.
    #[must_use]
    pub fn new_zeroed(descr: &MetaDataDescription, blockno: Index) -> Self {
        let record_size = descr.bytesize();
        Self {
            blockno,
            record_size,
            data: vec![0; record_size * Self::BLOCK_SIZE],
        }
    }

    /// Wraps loaded block bytes, validating the size.
    pub fn from_bytes(
        descr: &MetaDataDescription,
        blockno: Index,
        data: Vec<u8>,
    ) -> Result<Self> {
        let record_size = descr.bytesize();
        if data.len() != record_size * Self::BLOCK_SIZE {
            return Err(Error::BlockCorrupt("metadata block size mismatch"));
        }
        Ok(Self {
            blockno,
            record_size,
            data,
        })
    }

    #[must_use]
    pub fn number(&self) -> Index {
        self.blockno
    }

    /// Raw bytes of the whole block.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// One record's bytes.
    pub fn record(&self, idx: usize) -> Result<&[u8]> {
        let ofs = idx * self.record_size;
        self.data
            .get(ofs..ofs + self.record_size)
            .ok_or(Error::BlockCorrupt("metadata record index out of range"))
    }

    /// One record's bytes, mutable.
    pub fn record_mut(&mut self, idx: usize) -> Result<&mut [u8]> {
        let ofs = idx * self.record_size;
        self.data
            .get_mut(ofs..ofs + self.record_size)
            .ok_or(Error::BlockCorrupt("metadata record index out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn addressing() {
        assert_eq!(1, MetaDataBlock::blockno(1));
        assert_eq!(1, MetaDataBlock::blockno(256));
        assert_eq!(2, MetaDataBlock::blockno(257));
        assert_eq!(0, MetaDataBlock::index(1));
        assert_eq!(255, MetaDataBlock::index(256));
        assert_eq!(0, MetaDataBlock::index(257));
        assert_eq!(257, MetaDataBlock::first_docno(2));
    }

    #[test]
    fn size_validation() {
        let descr = MetaDataDescription::from_string("x UInt32").expect("parse");
        assert!(MetaDataBlock::from_bytes(&descr, 1, vec![0; 16]).is_err());
        assert!(MetaDataBlock::from_bytes(&descr, 1, vec![0; 4 * 256]).is_ok());
    }
}
