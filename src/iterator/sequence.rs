// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{first_all_match_docno, PostingIterator, PostingIteratorOps};
use crate::coding::pack_uint;
use crate::{Docno, Position};

/// Ordered sequence of N postings within a position range, optionally
/// forbidding a cutter between the first and last element.
///
/// At docno level this is the intersection of all sequence elements
/// (and nothing else); at position level a rolling window anchors at
/// the first element's next position and requires every following
/// element within `|range|` of it, in order. When a cut posting falls
/// inside the window the window advances by one. A non-negative range
/// yields the start position of the match, a negative range the end
/// position.
#[derive(Clone)]
pub struct SequenceIterator {
    seq: Vec<PostingIterator>,
    cut: Option<Box<PostingIterator>>,
    range: i32,
    docno: Docno,
    docno_cut: Docno,
    feature_id: String,
}

impl SequenceIterator {
    #[must_use]
    pub fn new(seq: Vec<PostingIterator>, cut: Option<PostingIterator>, range: i32) -> Self {
        let mut feature_id = seq.iter().map(PostingIteratorOps::feature_id).collect::<String>();
        if let Some(cut) = &cut {
            feature_id.push_str(cut.feature_id());
            feature_id.push('C');
        }
        if range != 0 {
            let mut packed = vec![];
            pack_uint(&mut packed, range.unsigned_abs());
            for b in packed {
                feature_id.push(char::from(b));
            }
            if range < 0 {
                feature_id.push('-');
            }
            feature_id.push('R');
        }
        feature_id.push('S');

        Self {
            seq,
            cut: cut.map(Box::new),
            range,
            docno: 0,
            docno_cut: 0,
            feature_id,
        }
    }
}

impl PostingIteratorOps for SequenceIterator {
    fn skip_doc(&mut self, docno: Docno) -> Docno {
        self.docno = first_all_match_docno(&mut self.seq, docno);
        self.docno_cut = 0;
        if self.docno != 0 {
            if let Some(cut) = &mut self.cut {
                if cut.skip_doc(self.docno) == self.docno {
                    self.docno_cut = self.docno;
                }
            }
        }
        self.docno
    }

    #[allow(clippy::cast_sign_loss)]
    fn skip_pos(&mut self, pos: Position) -> Position {
        if self.docno == 0 || self.seq.is_empty() {
            return 0;
        }
        let rangenum = self.range.unsigned_abs();
        let mut pos_iter = pos;

        'window: loop {
            let (head, tail) = match self.seq.split_first_mut() {
                Some(split) => split,
                None => return 0,
            };

            let min_pos = head.skip_pos(pos_iter);
            if min_pos == 0 {
                return 0;
            }
            let mut max_pos = min_pos;

            for it in tail {
                max_pos = it.skip_pos(max_pos + 1);
                if max_pos == 0 {
                    return 0;
                }
                if max_pos - min_pos > rangenum {
                    // window too wide: restart one past its anchor
                    pos_iter = min_pos + 1;
                    continue 'window;
                }
            }

            if self.docno_cut == self.docno {
                let cut = self.cut.as_mut().unwrap_or_else(|| unreachable!());
                let pos_cut = cut.skip_pos(min_pos);
                if pos_cut != 0 && pos_cut <= max_pos {
                    pos_iter = pos_cut + 1;
                    continue 'window;
                }
            }

            return if self.range >= 0 { min_pos } else { max_pos };
        }
    }

    fn doc_frequency(&mut self) -> u64 {
        self.seq
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
        self.seq.iter().any(PostingIteratorOps::had_error)
            || self.cut.as_deref().is_some_and(PostingIteratorOps::had_error)
    }
}
