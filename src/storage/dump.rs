// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Decode-and-describe helpers over the raw key space, shared by the
//! dump/check/resize CLI tools and the consistency tests.

use super::block_storage::BlockStorage;
use crate::block::forward::{ForwardBlockBuilder, ForwardIndexBlock};
use crate::block::inverse_term::InverseTermBlock;
use crate::block::posinfo::{PosinfoBlock, PosinfoBlockBuilder};
use crate::block::range::RangeBlock;
use crate::block::{BlockType, DataBlock};
use crate::coding::{unpack_uint, unpack_uint64};
use crate::database::{CursorOptions, DatabaseClient};
use crate::key::KeyPrefix;
use crate::meta::{MetaDataBlock, MetaDataDescription};
use crate::{Docno, Error, Index, Result, Slice};
use std::sync::Arc;

/// Renders one key/value pair through its typed reader.
///
/// Fails with the decoding error when the pair violates its format,
/// which is what the check tool counts.
pub fn describe_entry(
    descr: &MetaDataDescription,
    key: &[u8],
    value: &[u8],
) -> Result<String> {
    let (&first, _) = key.split_first().ok_or(Error::KeyMalformed)?;
    let prefix = KeyPrefix::try_from(first)?;
    let mut parser = crate::key::KeyParser::new(key, prefix)?;

    match prefix {
        KeyPrefix::TermType
        | KeyPrefix::TermValue
        | KeyPrefix::DocId
        | KeyPrefix::AttributeKey
        | KeyPrefix::UserName => {
            let name = String::from_utf8_lossy(parser.remainder()).into_owned();
            let mut tail = value;
            let id = unpack_uint(&mut tail)?;
            Ok(format!("{} '{}' -> {}", prefix.name(), name, id))
        }
        KeyPrefix::Variable => {
            let name = String::from_utf8_lossy(parser.remainder()).into_owned();
            let mut tail = value;
            let v = unpack_uint64(&mut tail)?;
            Ok(format!("{} '{}' -> {}", prefix.name(), name, v))
        }
        KeyPrefix::ForwardIndex => {
            let typeno = parser.elem()?;
            let docno = parser.elem()?;
            let anchor = parser.elem()?;
            parser.expect_end()?;
            let block =
                ForwardIndexBlock::from_block(DataBlock::new(anchor, Slice::from(value)));
            let tokens = block.decode_all()?;
            Ok(format!(
                "{} [typeno={typeno} docno={docno} anchor={anchor}] -> {} tokens",
                prefix.name(),
                tokens.len()
            ))
        }
        KeyPrefix::PosinfoBlock => {
            let typeno = parser.elem()?;
            let termno = parser.elem()?;
            let anchor = parser.elem()?;
            parser.expect_end()?;
            let block = PosinfoBlock::from_block(DataBlock::new(anchor, Slice::from(value)));
            let records = block.decode_all()?;
            if records.last().is_some_and(|(d, _)| *d != anchor) {
                return Err(Error::BlockCorrupt("anchor is not the last docno"));
            }
            Ok(format!(
                "{} [typeno={typeno} termno={termno} anchor={anchor}] -> {} documents",
                prefix.name(),
                records.len()
            ))
        }
        KeyPrefix::InverseTerm => {
            let docno = parser.elem()?;
            parser.expect_end()?;
            let block = InverseTermBlock::from_block(DataBlock::new(docno, Slice::from(value)));
            let records = block.decode_all()?;
            Ok(format!(
                "{} [docno={docno}] -> {} terms",
                prefix.name(),
                records.len()
            ))
        }
        KeyPrefix::UserAclBlock | KeyPrefix::AclBlock | KeyPrefix::DocListBlock => {
            let mut elems = vec![parser.elem()?];
            let mut rest = parser.remainder();
            while !rest.is_empty() {
                elems.push(unpack_uint(&mut rest)?);
            }
            let anchor = *elems.last().unwrap_or(&0);
            let block = RangeBlock::from_block(DataBlock::new(anchor, Slice::from(value)));
            let ranges = block.decode_ranges()?;
            Ok(format!(
                "{} {elems:?} -> {} ranges",
                prefix.name(),
                ranges.len()
            ))
        }
        KeyPrefix::DocMetaData => {
            let blockno = parser.elem()?;
            parser.expect_end()?;
            MetaDataBlock::from_bytes(descr, blockno, value.to_vec())?;
            Ok(format!(
                "{} [blockno={blockno}] -> {} records",
                prefix.name(),
                MetaDataBlock::BLOCK_SIZE
            ))
        }
        KeyPrefix::DocAttribute => {
            let docno = parser.elem()?;
            let attribno = parser.elem()?;
            parser.expect_end()?;
            let text = std::str::from_utf8(value)
                .map_err(|_| Error::BlockCorrupt("attribute value is not utf-8"))?;
            Ok(format!(
                "{} [docno={docno} attribno={attribno}] -> '{text}'",
                prefix.name()
            ))
        }
        KeyPrefix::DocFrequency => {
            let typeno = parser.elem()?;
            let termno = parser.elem()?;
            parser.expect_end()?;
            let mut tail = value;
            let df = unpack_uint64(&mut tail)?;
            Ok(format!(
                "{} [typeno={typeno} termno={termno}] -> {df}",
                prefix.name()
            ))
        }
        KeyPrefix::MetaDataDescr => {
            parser.expect_end()?;
            let text = String::from_utf8_lossy(value);
            Ok(format!("{} -> '{}'", prefix.name(), text))
        }
    }
}

/// Walks a key family (or the whole store) and renders every record.
/// Returns the rendered lines.
pub fn dump_storage(
    db: &dyn DatabaseClient,
    descr: &MetaDataDescription,
    prefix: Option<KeyPrefix>,
) -> Result<Vec<String>> {
    let mut out = vec![];
    let mut cursor = db.create_backup_cursor()?;
    while let Some((key, value)) = cursor.fetch()? {
        if let Some(p) = prefix {
            if key.first() != Some(&(p as u8)) {
                continue;
            }
        }
        out.push(describe_entry(descr, &key, &value)?);
    }
    Ok(out)
}

/// Walks the entire key space decoding each pair through its typed
/// reader; returns the number of undecodable entries.
pub fn check_storage(db: &dyn DatabaseClient, descr: &MetaDataDescription) -> Result<usize> {
    let mut errors = 0usize;
    let mut cursor = db.create_backup_cursor()?;
    while let Some((key, value)) = cursor.fetch()? {
        if let Err(e) = describe_entry(descr, &key, &value) {
            log::warn!("corrupt entry at key {:02x?}: {e}", &key[..key.len().min(16)]);
            errors += 1;
        }
    }
    Ok(errors)
}

/// Which block family a resize applies to
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResizeBlockType {
    Posinfo,
    Forward,
}

/// Options of a block resize run
#[derive(Clone, Debug)]
pub struct ResizeOptions {
    pub block_type: ResizeBlockType,
    /// New target token count per block
    pub new_size: usize,
    /// Families rewritten per commit
    pub commit_chunk: usize,
    /// Restricts the rewrite to docnos within the range
    pub docno_range: Option<(Docno, Docno)>,
    /// Restricts the rewrite to one term type
    pub typeno: Option<Index>,
}

fn family_of(key: &[u8]) -> Result<Vec<Index>> {
    let mut tail = key.get(1..).ok_or(Error::KeyMalformed)?;
    let mut elems = vec![];
    while !tail.is_empty() {
        elems.push(unpack_uint(&mut tail)?);
    }
    elems.pop(); // the anchor is not part of the family
    Ok(elems)
}

/// Rebuilds the blocks of a family with a new size target, committing
/// in chunks. Returns the number of families rewritten.
pub fn resize_blocks(db: &Arc<dyn DatabaseClient>, opts: &ResizeOptions) -> Result<usize> {
    if opts.new_size == 0 {
        return Err(Error::Config("block size must not be 0".to_string()));
    }
    let prefix = match opts.block_type {
        ResizeBlockType::Posinfo => KeyPrefix::PosinfoBlock,
        ResizeBlockType::Forward => KeyPrefix::ForwardIndex,
    };

    // collect the distinct families first; each family is rewritten
    // through its own typed cursor
    let mut families = vec![];
    {
        let mut cursor = db.create_cursor(CursorOptions::default())?;
        let mut hit = cursor.seek_first(&[prefix as u8])?;
        while let Some((key, _)) = hit {
            let family = family_of(&key)?;
            if families.last() != Some(&family) {
                families.push(family);
            }
            hit = cursor.seek_next()?;
        }
    }

    let mut rewritten = 0usize;
    let mut batch = db.create_transaction()?;
    let mut in_batch = 0usize;

    for family in families {
        if let Some(typeno) = opts.typeno {
            if family.first() != Some(&typeno) {
                continue;
            }
        }
        if opts.block_type == ResizeBlockType::Forward {
            if let (Some((lo, hi)), Some(docno)) = (opts.docno_range, family.get(1)) {
                if *docno < lo || *docno > hi {
                    continue;
                }
            }
        }

        match opts.block_type {
            ResizeBlockType::Posinfo => {
                resize_posinfo_family(db.clone(), batch.as_mut(), &family, opts)?;
            }
            ResizeBlockType::Forward => {
                resize_forward_family(db.clone(), batch.as_mut(), &family, opts)?;
            }
        }

        rewritten += 1;
        in_batch += 1;
        if in_batch >= opts.commit_chunk.max(1) {
            batch.commit()?;
            batch = db.create_transaction()?;
            in_batch = 0;
        }
    }
    batch.commit()?;

    log::debug!("resized {rewritten} {:?} families", opts.block_type);
    Ok(rewritten)
}

fn resize_posinfo_family(
    db: Arc<dyn DatabaseClient>,
    batch: &mut dyn crate::database::DatabaseTransaction,
    family: &[Index],
    opts: &ResizeOptions,
) -> Result<()> {
    let mut storage: BlockStorage<PosinfoBlock> =
        BlockStorage::new(db, KeyPrefix::PosinfoBlock, family, None)?;

    let mut records = vec![];
    let mut to_dispose = vec![];
    let mut block = storage.load_first()?;
    while let Some(b) = block {
        let in_range = opts
            .docno_range
            .is_none_or(|(lo, hi)| b.id() >= lo && b.id() <= hi);
        if in_range {
            records.extend(b.decode_all()?);
            to_dispose.push(b.id());
        }
        block = storage.load_next()?;
    }

    for id in to_dispose {
        storage.dispose(id, batch)?;
    }

    let mut builder = PosinfoBlockBuilder::new();
    let mut tokens = 0usize;
    for (docno, positions) in &records {
        builder.push(*docno, positions);
        tokens += 1 + positions.len();
        if tokens >= opts.new_size {
            let done = std::mem::take(&mut builder);
            storage.store(&done.freeze(), batch)?;
            tokens = 0;
        }
    }
    if !builder.is_empty() {
        storage.store(&builder.freeze(), batch)?;
    }
    Ok(())
}

fn resize_forward_family(
    db: Arc<dyn DatabaseClient>,
    batch: &mut dyn crate::database::DatabaseTransaction,
    family: &[Index],
    opts: &ResizeOptions,
) -> Result<()> {
    let mut storage: BlockStorage<ForwardIndexBlock> =
        BlockStorage::new(db, KeyPrefix::ForwardIndex, family, None)?;

    let mut records = vec![];
    let mut to_dispose = vec![];
    let mut block = storage.load_first()?;
    while let Some(b) = block {
        records.extend(b.decode_all()?);
        to_dispose.push(b.id());
        block = storage.load_next()?;
    }

    for id in to_dispose {
        storage.dispose(id, batch)?;
    }

    let mut builder = ForwardBlockBuilder::new();
    let mut tokens = 0usize;
    for (pos, value) in &records {
        builder.push(*pos, value);
        tokens += 1;
        if tokens >= opts.new_size {
            let done = std::mem::take(&mut builder);
            storage.store(&done.freeze(), batch)?;
            tokens = 0;
        }
    }
    if !builder.is_empty() {
        storage.store(&builder.freeze(), batch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::mem::MemDatabase;
    use crate::storage::{create_storage, Document, DocumentTerm, StorageClient};
    use test_log::test;

    fn fixture() -> (MemDatabase, StorageClient) {
        let db = MemDatabase::new();
        create_storage(&db, "metadata=date UInt32").expect("create");
        let client = StorageClient::open(Arc::new(db.clone()), "").expect("open");

        let mut tx = client.transaction();
        for i in 1..=30u32 {
            let doc = Document {
                search: (1..=5)
                    .map(|p| DocumentTerm::new("word", "cat", p))
                    .collect(),
                forward: (1..=5)
                    .map(|p| DocumentTerm::new("word", &format!("tok{p}"), p))
                    .collect(),
                ..Document::default()
            };
            tx.insert_document(&format!("doc-{i}"), &doc).expect("insert");
        }
        tx.commit().expect("commit");
        (db, client)
    }

    #[test]
    fn check_storage_is_clean() {
        let (db, client) = fixture();
        let errors = check_storage(&db, &client.metadata_description()).expect("check");
        assert_eq!(0, errors);
    }

    #[test]
    fn dump_covers_all_families() {
        let (db, client) = fixture();
        let all = dump_storage(&db, &client.metadata_description(), None).expect("dump");
        assert!(!all.is_empty());

        let posinfo =
            dump_storage(&db, &client.metadata_description(), Some(KeyPrefix::PosinfoBlock))
                .expect("dump");
        assert!(posinfo.iter().all(|l| l.contains("posinfo")));
        assert!(!posinfo.is_empty());
    }

    #[test]
    fn check_detects_corruption() {
        let (db, client) = fixture();

        use crate::database::DatabaseTransaction;
        let mut batch = db.create_transaction().expect("transaction");
        batch.put(&[KeyPrefix::PosinfoBlock as u8, 1, 1, 1], &[0x80]);
        batch.commit().expect("commit");

        let errors = check_storage(&db, &client.metadata_description()).expect("check");
        assert!(errors > 0);
    }

    #[test]
    fn resize_posinfo_rebuilds_smaller_blocks() {
        let (db, client) = fixture();
        let db: Arc<dyn DatabaseClient> = Arc::new(db);

        // 30 docs x 6 tokens at a target of 12 tokens -> many blocks
        let opts = ResizeOptions {
            block_type: ResizeBlockType::Posinfo,
            new_size: 12,
            commit_chunk: 2,
            docno_range: None,
            typeno: None,
        };
        let rewritten = resize_blocks(&db, &opts).expect("resize");
        assert_eq!(1, rewritten);

        // the posting stream is unchanged
        use crate::iterator::PostingIteratorOps;
        let mut it = client.posting_iterator("word", "cat").expect("iterator");
        let mut count = 0;
        let mut d = it.skip_doc(0);
        while d != 0 {
            count += 1;
            d = it.skip_doc(d + 1);
        }
        assert_eq!(30, count);

        let errors = check_storage(&*db, &client.metadata_description()).expect("check");
        assert_eq!(0, errors);
    }
}
