// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{first_all_match_docno, PostingIterator, PostingIteratorOps};
use crate::{Docno, Position};

/// Intersection of N posting streams.
///
/// Yields docnos matched by every input; `skip_pos` returns the
/// largest of the inputs' next positions so window operators can
/// bound a match.
#[derive(Clone)]
pub struct IntersectIterator {
    args: Vec<PostingIterator>,
    docno: Docno,
    feature_id: String,
}

impl IntersectIterator {
    #[must_use]
    pub fn new(args: Vec<PostingIterator>) -> Self {
        let mut feature_id = args.iter().map(PostingIteratorOps::feature_id).collect::<String>();
        feature_id.push('A');
        Self {
            args,
            docno: 0,
            feature_id,
        }
    }
}

impl PostingIteratorOps for IntersectIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        self.docno = first_all_match_docno(&mut self.args, docno);
        self.docno
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        if self.docno == 0 {
            return 0;
        }
        let mut max_pos = 0;
        for it in &mut self.args {
            let p = it.skip_pos(pos);
            if p == 0 {
                return 0;
            }
            max_pos = max_pos.max(p);
        }
        max_pos
    }

    fn doc_frequency(&mut self) -> u64 {
        self.args
            .iter_mut()
            .map(PostingIteratorOps::doc_frequency)
            .min()
            .unwrap_or(0)
    }

    fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn docno(&self) -> Docno {
        self.docno
    }

    fn had_error(&self) -> bool {
        self.args.iter().any(PostingIteratorOps::had_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::test_util::leaf;
    use test_log::test;

    #[test]
    fn intersection_aligns_all_inputs() {
        let a = leaf(&[(1, &[1]), (2, &[1]), (3, &[1])]);
        let b = leaf(&[(2, &[1]), (3, &[1]), (4, &[1])]);

        let mut it = PostingIterator::from(IntersectIterator::new(vec![a, b]));
        assert_eq!(2, it.skip_doc(0));
        assert_eq!(3, it.skip_doc(3));
        assert_eq!(0, it.skip_doc(4));
    }

    #[test]
    fn skip_doc_is_idempotent() {
        let a = leaf(&[(2, &[1]), (7, &[1])]);
        let b = leaf(&[(2, &[1]), (7, &[1])]);

        let mut it = PostingIterator::from(IntersectIterator::new(vec![a, b]));
        assert_eq!(7, it.skip_doc(3));
        assert_eq!(7, it.skip_doc(3));
    }

    #[test]
    fn skip_pos_is_the_max() {
        let a = leaf(&[(1, &[2, 9])]);
        let b = leaf(&[(1, &[4, 6])]);

        let mut it = PostingIterator::from(IntersectIterator::new(vec![a, b]));
        assert_eq!(1, it.skip_doc(0));
        assert_eq!(4, it.skip_pos(0));
        assert_eq!(9, it.skip_pos(5));
        assert_eq!(0, it.skip_pos(10));
    }
}
