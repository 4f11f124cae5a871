// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::PostingIteratorOps;
use crate::block::range::{self, RangeBlock};
use crate::block::BlockType;
use crate::storage::BlockStorage;
use crate::{Docno, Index, Position, Result};

/// Leaf iterator over a range block family (doclist or ACL).
///
/// Emits each id contained in a range in ascending order. Membership
/// postings carry no real positions; a positioned iterator reports the
/// single position 1.
#[derive(Clone)]
pub struct MembershipIterator {
    storage: BlockStorage<RangeBlock>,
    // decoded ranges of the current block plus its anchor
    block: Option<(Index, Vec<(Index, Index)>)>,
    docno: Docno,
    df: u64,
    feature_id: String,
    error: bool,
}

impl MembershipIterator {
    /// Creates the iterator; blocks are loaded lazily on the first
    /// skip.
    #[must_use]
    pub fn new(storage: BlockStorage<RangeBlock>, df: u64, feature_id: String) -> Self {
        Self {
            storage,
            block: None,
            docno: 0,
            df,
            feature_id,
            error: false,
        }
    }

    fn load(&mut self, target: Index) -> Result<()> {
        self.block = match self.storage.load(target)? {
            Some(block) => Some((block.id(), block.decode_ranges()?)),
            None => None,
        };
        Ok(())
    }

    fn try_skip_doc(&mut self, target: Docno) -> Result<Docno> {
        let in_block = match &self.block {
            Some((anchor, ranges)) => {
                let first = ranges.first().map_or(0, |&(f, _)| f);
                target >= first && target <= *anchor
            }
            None => false,
        };
        if !in_block {
            self.load(target)?;
        }
        match &self.block {
            Some((_, ranges)) => Ok(range::upper_bound(ranges, target).unwrap_or(0)),
            None => Ok(0),
        }
    }
}

impl PostingIteratorOps for MembershipIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        if self.error {
            return 0;
        }
        let target = docno.max(1);
        match self.try_skip_doc(target) {
            Ok(d) => {
                self.docno = d;
                d
            }
            Err(e) => {
                log::error!("membership iterator skip_doc failed: {e}");
                self.error = true;
                self.docno = 0;
                0
            }
        }
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        if self.docno != 0 && pos <= 1 {
            1
        } else {
            0
        }
    }

    fn doc_frequency(&mut self) -> u64 {
        self.df
    }

    fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn docno(&self) -> Docno {
        self.docno
    }

    fn had_error(&self) -> bool {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::range::RangeBlockBuilder;
    use crate::database::mem::MemDatabase;
    use crate::database::DatabaseClient;
    use crate::key::KeyPrefix;
    use std::sync::Arc;
    use test_log::test;

    fn fixture(blocks: &[&[(Index, Index)]]) -> MembershipIterator {
        let db = MemDatabase::new();
        let storage: BlockStorage<RangeBlock> = BlockStorage::new(
            Arc::new(db.clone()),
            KeyPrefix::UserAclBlock,
            &[9],
            None,
        )
        .expect("storage");

        for ranges in blocks {
            let mut builder = RangeBlockBuilder::new();
            for &(first, last) in *ranges {
                builder.push_range(first, last);
            }
            let mut batch = db.create_transaction().expect("transaction");
            storage
                .store(&builder.freeze(), batch.as_mut())
                .expect("store");
            batch.commit().expect("commit");
        }

        MembershipIterator::new(storage, 0, "acl\u{1}test".to_string())
    }

    #[test]
    fn emits_range_members_in_order() {
        let mut it = fixture(&[&[(2, 4), (7, 7)], &[(10, 11)]]);

        let mut got = vec![];
        let mut d = it.skip_doc(0);
        while d != 0 {
            got.push(d);
            d = it.skip_doc(d + 1);
        }
        assert_eq!(vec![2, 3, 4, 7, 10, 11], got);
    }

    #[test]
    fn skip_is_idempotent() {
        let mut it = fixture(&[&[(2, 4)]]);
        assert_eq!(3, it.skip_doc(3));
        assert_eq!(3, it.skip_doc(3));
    }

    #[test]
    fn positions_are_degenerate() {
        let mut it = fixture(&[&[(2, 4)]]);
        assert_eq!(0, it.skip_pos(0));
        it.skip_doc(2);
        assert_eq!(1, it.skip_pos(0));
        assert_eq!(1, it.skip_pos(1));
        assert_eq!(0, it.skip_pos(2));
    }
}
