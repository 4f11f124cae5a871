// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::PostingIteratorOps;
use crate::block::posinfo::{PosinfoBlock, PosinfoCursor};
use crate::block::BlockType;
use crate::storage::BlockStorage;
use crate::{Docno, Position, Result};

/// Leaf iterator over the posinfo blocks of one `(typeno, termno)`
#[derive(Clone)]
pub struct PosinfoIterator {
    storage: BlockStorage<PosinfoBlock>,
    block: Option<PosinfoBlock>,
    cursor: PosinfoCursor,
    docno: Docno,
    df: u64,
    feature_id: String,
    error: bool,
}

impl PosinfoIterator {
    /// Creates the iterator; blocks are loaded lazily on the first
    /// skip.
    #[must_use]
    pub fn new(storage: BlockStorage<PosinfoBlock>, df: u64, feature_id: String) -> Self {
        Self {
            storage,
            block: None,
            cursor: PosinfoCursor::default(),
            docno: 0,
            df,
            feature_id,
            error: false,
        }
    }

    fn try_skip_doc(&mut self, target: Docno) -> Result<Docno> {
        if let Some(block) = &self.block {
            let first = block.first_docno()?;
            if target >= first && target <= block.id() {
                // target lies inside the current block
                return Ok(block.upper_bound(target, &mut self.cursor)?.unwrap_or(0));
            }
            if block.is_follow_block_address(target) {
                // a freshly cloned iterator has no cursor yet; a miss
                // here falls through to a fresh seek either way
                if let Some(next) = self.storage.load_next()? {
                    if next.id() >= target {
                        self.block = Some(next);
                        self.cursor = PosinfoCursor::default();
                        let block = self.block.as_ref().unwrap_or_else(|| unreachable!());
                        return Ok(block.upper_bound(target, &mut self.cursor)?.unwrap_or(0));
                    }
                }
            }
        }

        // fresh upper-bound seek on the family
        self.cursor = PosinfoCursor::default();
        self.block = self.storage.load(target)?;
        match &self.block {
            Some(block) => Ok(block.upper_bound(target, &mut self.cursor)?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}

impl PostingIteratorOps for PosinfoIterator {
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
                log::error!("posting iterator skip_doc failed: {e}");
                self.error = true;
                self.docno = 0;
                0
            }
        }
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        if self.error || self.docno == 0 {
            return 0;
        }
        let block = match &self.block {
            Some(b) => b,
            None => return 0,
        };
        match block.skip_pos(&self.cursor, pos) {
            Ok(p) => p,
            Err(e) => {
                log::error!("posting iterator skip_pos failed: {e}");
                self.error = true;
                0
            }
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
    use crate::iterator::test_util::leaf;
    use crate::iterator::PostingIteratorOps;
    use test_log::test;

    #[test]
    fn skip_doc_walks_blocks() {
        // the fixture splits every 2 records into a separate block
        let mut it = leaf(&[(1, &[1]), (3, &[1]), (7, &[1]), (9, &[1]), (20, &[1])]);

        assert_eq!(1, it.skip_doc(0));
        assert_eq!(3, it.skip_doc(2));
        assert_eq!(7, it.skip_doc(4)); // crosses into the next block
        assert_eq!(9, it.skip_doc(8));
        assert_eq!(20, it.skip_doc(10));
        assert_eq!(0, it.skip_doc(21));

        // backwards seek re-seeks the family
        assert_eq!(3, it.skip_doc(2));
    }

    #[test]
    fn skip_doc_is_idempotent() {
        let mut it = leaf(&[(2, &[1]), (5, &[1])]);
        assert_eq!(5, it.skip_doc(3));
        assert_eq!(5, it.skip_doc(3));
        assert_eq!(5, it.docno());
    }

    #[test]
    fn skip_pos_in_current_doc() {
        let mut it = leaf(&[(1, &[2, 5, 9])]);
        assert_eq!(1, it.skip_doc(0));
        assert_eq!(2, it.skip_pos(0));
        assert_eq!(5, it.skip_pos(3));
        assert_eq!(5, it.skip_pos(3));
        assert_eq!(9, it.skip_pos(6));
        assert_eq!(0, it.skip_pos(10));
    }

    #[test]
    fn clone_has_independent_position() {
        let mut it = leaf(&[(1, &[1]), (5, &[1]), (9, &[1])]);
        assert_eq!(1, it.skip_doc(0));

        let mut fork = it.clone();
        assert_eq!(9, fork.skip_doc(6));
        assert_eq!(1, it.docno());
        assert_eq!(5, it.skip_doc(2));
    }
}
