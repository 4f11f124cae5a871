// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Lazy posting iterators.
//!
//! Every iterator yields docnos in strictly ascending order through
//! `skip_doc` and positions inside the current document through
//! `skip_pos`; both return `0` on a miss and are idempotent. Join
//! operators compose iterators into boolean retrieval trees. Iterator
//! advance never panics and never returns a `Result`; database
//! failures park the iterator at the end and set a sticky status flag
//! queried through `had_error`.

mod difference;
mod intersect;
mod membership;
mod posinfo;
mod pred;
mod sequence;
mod union;

pub use difference::DifferenceIterator;
pub use intersect::IntersectIterator;
pub use membership::MembershipIterator;
pub use posinfo::PosinfoIterator;
pub use pred::PredIterator;
pub use sequence::SequenceIterator;
pub use union::UnionIterator;

use crate::{Docno, Position};
use enum_dispatch::enum_dispatch;

/// Common contract of all posting iterators
#[enum_dispatch]
pub trait PostingIteratorOps {
    /// Smallest matching docno `>= docno`, or 0 if none.
    fn skip_doc(&mut self, docno: Docno) -> Docno;

    /// Smallest matching position `>= pos` in the current document,
    /// or 0. Only valid after a successful [`Self::skip_doc`].
    fn skip_pos(&mut self, pos: Position) -> Position;

    /// Advisory global document frequency.
    fn doc_frequency(&mut self) -> u64;

    /// Stable string uniquely representing the iterator tree.
    fn feature_id(&self) -> &str;

    /// The docno the iterator is currently positioned on, 0 if none.
    fn docno(&self) -> Docno;

    /// Whether a database failure parked this iterator.
    fn had_error(&self) -> bool;
}

/// Sum type over all concrete posting iterators
#[enum_dispatch(PostingIteratorOps)]
#[derive(Clone)]
pub enum PostingIterator {
    Posinfo(PosinfoIterator),
    Membership(MembershipIterator),
    Union(UnionIterator),
    Intersect(IntersectIterator),
    Difference(DifferenceIterator),
    Sequence(SequenceIterator),
    Pred(PredIterator),
    Empty(EmptyIterator),
}

/// Iterator over nothing, used for unknown terms
#[derive(Clone, Debug, Default)]
pub struct EmptyIterator;

impl PostingIteratorOps for EmptyIterator {
    fn skip_doc(&mut self, _docno: Docno) -> Docno {
        0
    }

    fn skip_pos(&mut self, _pos: Position) -> Position {
        0
    }

    fn doc_frequency(&mut self) -> u64 {
        0
    }

    fn feature_id(&self) -> &str {
        ""
    }

    fn docno(&self) -> Docno {
        0
    }

    fn had_error(&self) -> bool {
        false
    }
}

/// Advances all iterators to the first docno they all match, starting
/// at `docno`. Shared by the intersection and sequence operators.
pub(crate) fn first_all_match_docno(args: &mut [PostingIterator], docno: Docno) -> Docno {
    if args.is_empty() {
        return 0;
    }
    let mut target = docno.max(1);
    'align: loop {
        let (head, tail) = args.split_first_mut().unwrap_or_else(|| unreachable!());
        let first = head.skip_doc(target);
        if first == 0 {
            return 0;
        }
        target = first;
        for it in tail {
            let d = it.skip_doc(target);
            if d == 0 {
                return 0;
            }
            if d != target {
                // diverged: restart the alignment at the larger docno
                target = d;
                continue 'align;
            }
        }
        return target;
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Builds a posinfo leaf over an in-memory database seeded with
    /// the given `(docno, positions)` records.
    pub fn leaf(records: &[(Docno, &[Position])]) -> PostingIterator {
        use crate::block::posinfo::PosinfoBlockBuilder;
        use crate::database::mem::MemDatabase;
        use crate::key::KeyPrefix;
        use crate::storage::BlockStorage;
        use std::sync::Arc;

        let db = MemDatabase::new();
        let storage: BlockStorage<crate::block::posinfo::PosinfoBlock> =
            BlockStorage::new(Arc::new(db.clone()), KeyPrefix::PosinfoBlock, &[1, 1], None)
                .expect("storage");

        // split every 2 records to exercise the block-skip paths
        use crate::database::DatabaseClient;
        for chunk in records.chunks(2) {
            let mut builder = PosinfoBlockBuilder::new();
            for (docno, positions) in chunk {
                builder.push(*docno, positions);
            }
            let mut batch = db.create_transaction().expect("transaction");
            storage
                .store(&builder.freeze(), batch.as_mut())
                .expect("store");
            batch.commit().expect("commit");
        }

        #[allow(clippy::cast_possible_truncation)]
        PostingIterator::from(PosinfoIterator::new(
            storage,
            records.len() as u64,
            "test\u{1}leaf".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::leaf;
    use super::*;
    use test_log::test;

    #[test]
    fn empty_iterator_yields_nothing() {
        let mut it = PostingIterator::from(EmptyIterator);
        assert_eq!(0, it.skip_doc(0));
        assert_eq!(0, it.skip_pos(0));
        assert_eq!(0, it.doc_frequency());
        assert!(!it.had_error());
    }

    #[test]
    fn all_match_alignment() {
        let mut args = vec![
            leaf(&[(1, &[1]), (2, &[1]), (3, &[1])]),
            leaf(&[(2, &[1]), (3, &[1]), (4, &[1])]),
        ];

        assert_eq!(2, first_all_match_docno(&mut args, 0));
        assert_eq!(3, first_all_match_docno(&mut args, 3));
        assert_eq!(0, first_all_match_docno(&mut args, 4));
    }
}
