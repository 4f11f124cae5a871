// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{PostingIterator, PostingIteratorOps};
use crate::{Docno, Position};

/// Predecessor operator: matches one position before every position
/// of the inner stream (`skip_pos(p)` = `inner.skip_pos(p+1) - 1`).
#[derive(Clone)]
pub struct PredIterator {
    inner: Box<PostingIterator>,
    feature_id: String,
}

impl PredIterator {
    #[must_use]
    pub fn new(inner: PostingIterator) -> Self {
        let feature_id = format!("{}P", inner.feature_id());
        Self {
            inner: Box::new(inner),
            feature_id,
        }
    }
}

impl PostingIteratorOps for PredIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        self.inner.skip_doc(docno)
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        let p = self.inner.skip_pos(pos + 1);
        if p == 0 {
            0
        } else {
            p - 1
        }
    }

    fn doc_frequency(&mut self) -> u64 {
        self.inner.doc_frequency()
    }

    fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn docno(&self) -> Docno {
        self.inner.docno()
    }

    fn had_error(&self) -> bool {
        self.inner.had_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::test_util::leaf;
    use test_log::test;

    #[test]
    fn positions_shift_down_by_one() {
        let inner = leaf(&[(1, &[3, 7])]);
        let mut it = PostingIterator::from(PredIterator::new(inner));

        assert_eq!(1, it.skip_doc(0));
        assert_eq!(2, it.skip_pos(0));
        assert_eq!(2, it.skip_pos(2));
        assert_eq!(6, it.skip_pos(3));
        assert_eq!(0, it.skip_pos(7));
    }
}
