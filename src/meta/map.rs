// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block::MetaDataBlock;
use super::descr::MetaDataDescription;
use crate::database::{DatabaseClient, DatabaseTransaction};
use crate::key::{DatabaseKey, KeyPrefix};
use crate::variant::NumericVariant;
use crate::{meta, Docno, Index, Result};
use std::collections::BTreeMap;

/// Staged metadata writes of one transaction.
///
/// Writes are buffered as `(docno, column handle) -> value` and
/// flushed in block-number order at commit; every touched block number
/// is reported back for the cache refresh list.
#[derive(Debug, Default)]
pub struct MetaDataMap {
    writes: BTreeMap<(Docno, usize), NumericVariant>,
}

impl MetaDataMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages one field write.
    pub fn define(&mut self, docno: Docno, handle: usize, value: NumericVariant) {
        self.writes.insert((docno, handle), value);
    }

    /// Stages clearing a whole record, keeping fields already staged
    /// (a replacing insert wins over the purge of the old document).
    pub fn clear_record(&mut self, docno: Docno, descr: &MetaDataDescription) {
        for handle in 0..descr.nof_elements() {
            self.writes
                .entry((docno, handle))
                .or_insert(NumericVariant::Null);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Reads a staged value back (used so a transaction sees its own
    /// writes).
    #[must_use]
    pub fn get(&self, docno: Docno, handle: usize) -> Option<NumericVariant> {
        self.writes.get(&(docno, handle)).copied()
    }

    /// Applies all staged writes to the batch, returning the touched
    /// block numbers in ascending order.
    pub fn flush(
        &self,
        db: &dyn DatabaseClient,
        batch: &mut dyn DatabaseTransaction,
        descr: &MetaDataDescription,
    ) -> Result<Vec<Index>> {
        let mut touched = vec![];
        let mut current: Option<MetaDataBlock> = None;

        for (&(docno, handle), &value) in &self.writes {
            let blockno = MetaDataBlock::blockno(docno);

            let need_load = current.as_ref().is_none_or(|b| b.number() != blockno);
            if need_load {
                if let Some(done) = current.take() {
                    Self::write_block(batch, &done)?;
                }
                current = Some(Self::read_block(db, descr, blockno)?);
                touched.push(blockno);
            }

            let block = current.as_mut().unwrap_or_else(|| unreachable!());
            let record = block.record_mut(MetaDataBlock::index(docno))?;
            meta::set_value(descr, record, handle, value)?;
        }

        if let Some(done) = current.take() {
            Self::write_block(batch, &done)?;
        }
        Ok(touched)
    }

    fn read_block(
        db: &dyn DatabaseClient,
        descr: &MetaDataDescription,
        blockno: Index,
    ) -> Result<MetaDataBlock> {
        let mut key = DatabaseKey::new(KeyPrefix::DocMetaData);
        key.add_elem(blockno)?;
        match db.read_value(key.as_bytes())? {
            Some(value) => MetaDataBlock::from_bytes(descr, blockno, value.to_vec()),
            None => Ok(MetaDataBlock::new_zeroed(descr, blockno)),
        }
    }

    fn write_block(batch: &mut dyn DatabaseTransaction, block: &MetaDataBlock) -> Result<()> {
        let mut key = DatabaseKey::new(KeyPrefix::DocMetaData);
        key.add_elem(block.number())?;
        batch.put(key.as_bytes(), block.bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::mem::MemDatabase;
    use test_log::test;

    #[test]
    fn flush_groups_by_block() {
        let db = MemDatabase::new();
        let descr = MetaDataDescription::from_string("date UInt32").expect("parse");

        let mut map = MetaDataMap::new();
        map.define(1, 0, NumericVariant::UInt(11));
        map.define(2, 0, NumericVariant::UInt(22));
        map.define(300, 0, NumericVariant::UInt(33));

        let mut batch = db.create_transaction().expect("transaction");
        let touched = map.flush(&db, batch.as_mut(), &descr).expect("flush");
        batch.commit().expect("commit");

        assert_eq!(vec![1, 2], touched);

        let block = MetaDataMap::read_block(&db, &descr, 1).expect("read");
        assert_eq!(
            NumericVariant::UInt(11),
            meta::get_value(&descr, block.record(0).expect("rec"), 0).expect("get")
        );
        assert_eq!(
            NumericVariant::UInt(22),
            meta::get_value(&descr, block.record(1).expect("rec"), 0).expect("get")
        );

        let block = MetaDataMap::read_block(&db, &descr, 2).expect("read");
        assert_eq!(
            NumericVariant::UInt(33),
            meta::get_value(&descr, block.record(MetaDataBlock::index(300)).expect("rec"), 0)
                .expect("get")
        );
    }

    #[test]
    fn updates_preserve_other_records() {
        let db = MemDatabase::new();
        let descr = MetaDataDescription::from_string("date UInt32").expect("parse");

        let mut map = MetaDataMap::new();
        map.define(1, 0, NumericVariant::UInt(11));
        map.define(2, 0, NumericVariant::UInt(22));
        let mut batch = db.create_transaction().expect("transaction");
        map.flush(&db, batch.as_mut(), &descr).expect("flush");
        batch.commit().expect("commit");

        let mut map = MetaDataMap::new();
        map.define(2, 0, NumericVariant::UInt(99));
        let mut batch = db.create_transaction().expect("transaction");
        map.flush(&db, batch.as_mut(), &descr).expect("flush");
        batch.commit().expect("commit");

        let block = MetaDataMap::read_block(&db, &descr, 1).expect("read");
        assert_eq!(
            NumericVariant::UInt(11),
            meta::get_value(&descr, block.record(0).expect("rec"), 0).expect("get")
        );
        assert_eq!(
            NumericVariant::UInt(99),
            meta::get_value(&descr, block.record(1).expect("rec"), 0).expect("get")
        );
    }
}
