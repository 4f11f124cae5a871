// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{PostingIterator, PostingIteratorOps};
use crate::{Docno, Position};

/// Difference of two posting streams (`positive \ negative`).
///
/// Yields every docno of the positive input; at position level, a
/// position is suppressed when the negative input matches the same
/// docno at the same position.
#[derive(Clone)]
pub struct DifferenceIterator {
    positive: Box<PostingIterator>,
    negative: Box<PostingIterator>,
    docno: Docno,
    docno_neg: Docno,
    feature_id: String,
}

impl DifferenceIterator {
    #[must_use]
    pub fn new(positive: PostingIterator, negative: PostingIterator) -> Self {
        let feature_id = format!("{}{}N", positive.feature_id(), negative.feature_id());
        Self {
            positive: Box::new(positive),
            negative: Box::new(negative),
            docno: 0,
            docno_neg: 0,
            feature_id,
        }
    }
}

impl PostingIteratorOps for DifferenceIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        self.docno = self.positive.skip_doc(docno);
        if self.docno != 0 {
            self.docno_neg = self.negative.skip_doc(self.docno);
        }
        self.docno
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        if self.docno == 0 {
            return 0;
        }
        let mut pos_iter = pos;
        loop {
            let pos_positive = self.positive.skip_pos(pos_iter);
            if pos_positive == 0 {
                return 0;
            }
            if self.docno_neg == self.docno {
                let pos_negative = self.negative.skip_pos(pos_positive);
                if pos_negative == pos_positive {
                    pos_iter = pos_positive + 1;
                    continue;
                }
            }
            return pos_positive;
        }
    }

    fn doc_frequency(&mut self) -> u64 {
        self.positive.doc_frequency()
    }

    fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn docno(&self) -> Docno {
        self.docno
    }

    fn had_error(&self) -> bool {
        self.positive.had_error() || self.negative.had_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::test_util::leaf;
    use test_log::test;

    #[test]
    fn docnos_follow_the_positive_input() {
        let pos = leaf(&[(1, &[1]), (3, &[1]), (5, &[1])]);
        let neg = leaf(&[(3, &[1]), (9, &[1])]);

        let mut it = PostingIterator::from(DifferenceIterator::new(pos, neg));
        assert_eq!(1, it.skip_doc(0));
        assert_eq!(3, it.skip_doc(2));
        assert_eq!(5, it.skip_doc(4));
    }

    #[test]
    fn negative_positions_are_suppressed() {
        let pos = leaf(&[(1, &[2, 5, 9])]);
        let neg = leaf(&[(1, &[5])]);

        let mut it = PostingIterator::from(DifferenceIterator::new(pos, neg));
        assert_eq!(1, it.skip_doc(0));
        assert_eq!(2, it.skip_pos(0));
        // 5 is matched by the negative input, the next surviving one is 9
        assert_eq!(9, it.skip_pos(3));
        assert_eq!(0, it.skip_pos(10));
    }

    #[test]
    fn unrelated_docno_keeps_all_positions() {
        let pos = leaf(&[(2, &[4])]);
        let neg = leaf(&[(7, &[4])]);

        let mut it = PostingIterator::from(DifferenceIterator::new(pos, neg));
        assert_eq!(2, it.skip_doc(0));
        assert_eq!(4, it.skip_pos(0));
    }
}
