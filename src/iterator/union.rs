// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{PostingIterator, PostingIteratorOps};
use crate::{Docno, Position};

fn smaller_not_null(a: u32, b: u32) -> u32 {
    if a == 0 {
        b
    } else if b == 0 {
        a
    } else {
        a.min(b)
    }
}

/// Union of two posting streams.
///
/// Yields every docno matched by either input, in strictly ascending
/// order; positions come from the inputs positioned on the current
/// docno.
#[derive(Clone)]
pub struct UnionIterator {
    first: Box<PostingIterator>,
    second: Box<PostingIterator>,
    docno: Docno,
    open_first: bool,
    open_second: bool,
    feature_id: String,
}

impl UnionIterator {
    #[must_use]
    pub fn new(first: PostingIterator, second: PostingIterator) -> Self {
        let feature_id = format!("{}{}U", first.feature_id(), second.feature_id());
        Self {
            first: Box::new(first),
            second: Box::new(second),
            docno: 0,
            open_first: false,
            open_second: false,
            feature_id,
        }
    }
}

impl PostingIteratorOps for UnionIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        let docno_first = self.first.skip_doc(docno);
        let docno_second = self.second.skip_doc(docno);

        let rt = smaller_not_null(docno_first, docno_second);
        if rt != 0 {
            self.docno = rt;
            self.open_first = docno_first == rt;
            self.open_second = docno_second == rt;
        } else {
            self.docno = 0;
        }
        rt
    }

    fn skip_pos(&mut self, pos: Position) -> Position {
        let pos_first = if self.open_first {
            self.first.skip_pos(pos)
        } else {
            0
        };
        let pos_second = if self.open_second {
            self.second.skip_pos(pos)
        } else {
            0
        };
        smaller_not_null(pos_first, pos_second)
    }

    fn doc_frequency(&mut self) -> u64 {
        self.first
            .doc_frequency()
            .saturating_add(self.second.doc_frequency())
    }

    fn feature_id(&self) -> &str {
        &self.feature_id
    }

    fn docno(&self) -> Docno {
        self.docno
    }

    fn had_error(&self) -> bool {
        self.first.had_error() || self.second.had_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::test_util::leaf;
    use test_log::test;

    fn collect(it: &mut PostingIterator) -> Vec<Docno> {
        let mut out = vec![];
        let mut d = it.skip_doc(0);
        while d != 0 {
            out.push(d);
            d = it.skip_doc(d + 1);
        }
        out
    }

    #[test]
    fn union_is_sorted_dedup_merge() {
        let a = leaf(&[(1, &[1]), (3, &[1]), (5, &[1])]);
        let b = leaf(&[(2, &[1]), (3, &[1]), (9, &[1])]);

        let mut it = PostingIterator::from(UnionIterator::new(a, b));
        assert_eq!(vec![1, 2, 3, 5, 9], collect(&mut it));
    }

    #[test]
    fn positions_come_from_open_inputs() {
        let a = leaf(&[(1, &[2, 8])]);
        let b = leaf(&[(1, &[5]), (2, &[3])]);

        let mut it = PostingIterator::from(UnionIterator::new(a, b));
        assert_eq!(1, it.skip_doc(0));
        assert_eq!(2, it.skip_pos(0));
        assert_eq!(5, it.skip_pos(3));
        assert_eq!(8, it.skip_pos(6));

        assert_eq!(2, it.skip_doc(2));
        // only the second input is open on docno 2
        assert_eq!(3, it.skip_pos(0));
        assert_eq!(0, it.skip_pos(4));
    }
}
