// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block_storage::BlockStorage;
use crate::block::forward::{ForwardCursor, ForwardIndexBlock};
use crate::block::BlockType;
use crate::database::DatabaseClient;
use crate::key::KeyPrefix;
use crate::{Docno, Error, Position, Result, Typeno};
use std::sync::Arc;

/// Per-document positional lookup of the original token values of one
/// term type, backed by the forward index blocks.
pub struct ForwardIterator {
    db: Arc<dyn DatabaseClient>,
    typeno: Typeno,
    storage: Option<BlockStorage<ForwardIndexBlock>>,
    block: Option<ForwardIndexBlock>,
    block_first_pos: Position,
    cursor: ForwardCursor,
    docno: Docno,
}

impl ForwardIterator {
    pub(crate) fn new(db: Arc<dyn DatabaseClient>, typeno: Typeno) -> Self {
        Self {
            db,
            typeno,
            storage: None,
            block: None,
            block_first_pos: 0,
            cursor: ForwardCursor::default(),
            docno: 0,
        }
    }

    /// Selects the document to read from. Resets the position state.
    pub fn skip_doc(&mut self, docno: Docno) -> Result<()> {
        if self.docno != docno || self.storage.is_none() {
            self.storage = Some(BlockStorage::new(
                self.db.clone(),
                KeyPrefix::ForwardIndex,
                &[self.typeno, docno],
                None,
            )?);
            self.docno = docno;
            self.block = None;
            self.block_first_pos = 0;
            self.cursor = ForwardCursor::default();
        }
        Ok(())
    }

    /// Smallest token position `>= pos` of the selected document, or 0.
    pub fn skip_pos(&mut self, pos: Position) -> Result<Position> {
        let Some(storage) = &mut self.storage else {
            return Ok(0);
        };
        if self.docno == 0 {
            return Ok(0);
        }

        let out_of_block = match &self.block {
            Some(block) => pos < self.block_first_pos || pos > block.id(),
            None => true,
        };
        if out_of_block {
            match storage.load(pos)? {
                Some(block) => {
                    self.block_first_pos = block.first_position()?;
                    self.block = Some(block);
                    self.cursor = ForwardCursor::default();
                }
                None => {
                    self.block = None;
                    self.block_first_pos = 0;
                    self.cursor = ForwardCursor::default();
                    return Ok(0);
                }
            }
        }

        let block = self.block.as_ref().unwrap_or_else(|| unreachable!());
        Ok(block.upper_bound(pos, &mut self.cursor)?.unwrap_or(0))
    }

    /// Returns the token value at the current position.
    pub fn fetch(&self) -> Result<String> {
        let Some(block) = &self.block else {
            return Err(Error::ForwardIteratorUnpositioned);
        };
        let value = block.value_at(&self.cursor)?;
        String::from_utf8(value.to_vec())
            .map_err(|_| Error::BlockCorrupt("forward value is not utf-8"))
    }
}
