// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Alter-metadata-table transactions.
//!
//! Schema changes are staged as a description delta plus a reset list
//! and committed as a full block rewrite: every metadata block is
//! read, translated record by record into the new description and
//! written back, together with the new schema blob, in one batch. The
//! storage-wide writer lock serializes the rewrite against all other
//! transactions.

use super::client::StorageClient;
use crate::coding::unpack_uint;
use crate::database::CursorOptions;
use crate::key::{name_key, KeyPrefix};
use crate::meta::{self, MetaDataBlock, MetaDataDescription, MetaDataType};
use crate::{Error, Result};
use std::sync::Arc;

struct AlterColumn {
    name: String,
    type_: MetaDataType,
    /// Name the column had in the old description, `None` for added
    /// columns
    origin: Option<String>,
    reset: bool,
}

/// A pending alter-metadata-table transaction
pub struct MetaDataTransaction<'a> {
    client: &'a StorageClient,
    src: Arc<MetaDataDescription>,
    columns: Vec<AlterColumn>,
}

impl<'a> MetaDataTransaction<'a> {
    pub(crate) fn new(client: &'a StorageClient) -> Self {
        let src = client.metadata_cache.description();
        let columns = src
            .iter()
            .map(|(name, elem)| AlterColumn {
                name: name.to_string(),
                type_: elem.type_(),
                origin: Some(name.to_string()),
                reset: false,
            })
            .collect();
        Self {
            client,
            src,
            columns,
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        let lower = name.to_ascii_lowercase();
        self.columns
            .iter()
            .position(|c| c.name == lower)
            .ok_or_else(|| Error::MetaDataUnknownColumn(name.to_string()))
    }

    /// Appends a new column.
    pub fn add_column(&mut self, name: &str, type_: MetaDataType) -> Result<()> {
        let lower = name.to_ascii_lowercase();
        if self.columns.iter().any(|c| c.name == lower) {
            return Err(Error::Config(format!("duplicate column '{name}'")));
        }
        self.columns.push(AlterColumn {
            name: lower,
            type_,
            origin: None,
            reset: false,
        });
        Ok(())
    }

    /// Renames a column, keeping its values.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        let lower = new.to_ascii_lowercase();
        if self.columns.iter().any(|c| c.name == lower) {
            return Err(Error::Config(format!("duplicate column '{new}'")));
        }
        let idx = self.position(old)?;
        self.columns[idx].name = lower;
        Ok(())
    }

    /// Removes a column and its values.
    pub fn delete_column(&mut self, name: &str) -> Result<()> {
        let idx = self.position(name)?;
        self.columns.remove(idx);
        Ok(())
    }

    /// Changes a column's type; values are cast on rewrite.
    pub fn alter_column_type(&mut self, name: &str, type_: MetaDataType) -> Result<()> {
        let idx = self.position(name)?;
        self.columns[idx].type_ = type_;
        Ok(())
    }

    /// Zeroes all values of a column on rewrite.
    pub fn clear_column(&mut self, name: &str) -> Result<()> {
        let idx = self.position(name)?;
        self.columns[idx].reset = true;
        Ok(())
    }

    /// Rewrites every metadata block under the new description and
    /// publishes the new schema.
    #[allow(clippy::expect_used)]
    pub fn commit(self) -> Result<()> {
        let mut dst = MetaDataDescription::new();
        let mut origin = vec![];
        let mut resets = vec![];
        for col in &self.columns {
            dst.add(col.type_, &col.name)?;
            origin.push(col.origin.clone());
            if col.reset {
                resets.push(col.name.clone());
            }
        }

        let map = dst.translation_from(&self.src, &origin, &resets)?;

        let client = self.client;
        let _guard = client.transaction_lock.lock().expect("lock is poisoned");
        let mut batch = client.db.create_transaction()?;

        // rewrite all blocks
        let mut cursor = client.db.create_cursor(CursorOptions::default())?;
        let prefix = [KeyPrefix::DocMetaData as u8];
        let mut hit = cursor.seek_first(&prefix)?;
        let mut rewritten = 0usize;

        while let Some((key, value)) = hit {
            let mut tail = key.get(1..).ok_or(Error::KeyMalformed)?;
            let blockno = unpack_uint(&mut tail)?;

            let src_block = MetaDataBlock::from_bytes(&self.src, blockno, value.to_vec())?;
            let mut dst_block = MetaDataBlock::new_zeroed(&dst, blockno);

            for idx in 0..MetaDataBlock::BLOCK_SIZE {
                let src_rec = src_block.record(idx)?.to_vec();
                meta::translate_record(
                    &dst,
                    dst_block.record_mut(idx)?,
                    &self.src,
                    &src_rec,
                    &map,
                )?;
            }

            batch.put(&key, dst_block.bytes());
            rewritten += 1;
            hit = cursor.seek_next()?;
        }

        // the schema blob is replaced inside the same batch
        let schema_key = name_key(KeyPrefix::MetaDataDescr, b"")?;
        batch.put(schema_key.as_bytes(), dst.to_string_repr().as_bytes());

        batch.commit()?;
        client.metadata_cache.reset(Arc::new(dst));
        log::debug!("altered metadata table, rewrote {rewritten} blocks");
        Ok(())
    }
}
