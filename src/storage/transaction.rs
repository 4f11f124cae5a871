// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Write transactions.
//!
//! A transaction stages dictionary allocations, posting, forward,
//! ACL, attribute and metadata changes in memory and publishes them
//! as one atomic write batch under the storage-wide writer lock. A
//! failed commit poisons the transaction; rollback (or drop) discards
//! everything staged.

use super::block_storage::BlockStorage;
use super::client::StorageClient;
use super::variables;
use crate::block::inverse_term::{self, InverseTerm, InverseTermBlock};
use crate::block::posinfo::{self, PosinfoBlock, PosinfoBlockBuilder};
use crate::block::range::{self, RangeBlock, RangeBlockBuilder};
use crate::block::forward::{ForwardBlockBuilder, ForwardIndexBlock};
use crate::block::BlockType;
use crate::coding::pack_uint64;
use crate::database::{DatabaseClient, DatabaseTransaction};
use crate::key::{name_key, DatabaseKey, KeyPrefix};
use crate::meta::MetaDataMap;
use crate::statistics::StatisticsBuilder;
use crate::variant::NumericVariant;
use crate::{Attribno, Docno, Error, Index, Position, Result, Termno, Typeno, Userno};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One token of a document, searchable or forward
#[derive(Clone, Debug)]
pub struct DocumentTerm {
    /// Term type name (e.g. `word`)
    pub type_: String,
    /// Term value
    pub value: String,
    /// 1-based token position
    pub pos: Position,
}

impl DocumentTerm {
    #[must_use]
    pub fn new(type_: &str, value: &str, pos: Position) -> Self {
        Self {
            type_: type_.to_string(),
            value: value.to_string(),
            pos,
        }
    }
}

/// Full content of one document to insert
#[derive(Clone, Debug, Default)]
pub struct Document {
    /// Terms of the inverted index
    pub search: Vec<DocumentTerm>,
    /// Tokens of the forward index (snippet source)
    pub forward: Vec<DocumentTerm>,
    /// Metadata column assignments
    pub metadata: Vec<(String, NumericVariant)>,
    /// Attribute assignments
    pub attributes: Vec<(String, String)>,
    /// User names allowed to read the document (ACL storages only)
    pub access: Vec<String>,
}

/// Partial, posting-free update of a document
#[derive(Clone, Debug, Default)]
pub struct DocumentPatch {
    /// Metadata column assignments
    pub metadata: Vec<(String, NumericVariant)>,
    /// Attribute assignments; `None` deletes
    pub attributes: Vec<(String, Option<String>)>,
    /// Users to grant access
    pub access_add: Vec<String>,
    /// Users to revoke access from
    pub access_remove: Vec<String>,
}

/// A pending write transaction on a [`StorageClient`]
pub struct Transaction<'a> {
    client: &'a StorageClient,

    new_types: BTreeMap<Vec<u8>, Typeno>,
    new_terms: BTreeMap<Vec<u8>, Termno>,
    new_docids: BTreeMap<Vec<u8>, Docno>,
    new_attribs: BTreeMap<Vec<u8>, Attribno>,
    new_users: BTreeMap<Vec<u8>, Userno>,

    postings: BTreeMap<(Typeno, Termno), BTreeMap<Docno, Vec<Position>>>,
    doc_terms: BTreeMap<Docno, BTreeMap<(Typeno, Termno), (u32, Position)>>,
    forwards: BTreeMap<(Typeno, Docno), BTreeMap<Position, String>>,
    user_acl: BTreeMap<Userno, BTreeMap<Docno, bool>>,
    doc_acl: BTreeMap<Docno, BTreeMap<Userno, bool>>,
    attributes: BTreeMap<(Docno, Attribno), Option<String>>,
    metadata: MetaDataMap,
    deletes: BTreeSet<Docno>,

    df_deltas: BTreeMap<(Typeno, Termno), i64>,
    term_names: FxHashMap<(Typeno, Termno), (String, String)>,
    nof_docs_delta: i64,

    aborted: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(client: &'a StorageClient) -> Self {
        Self {
            client,
            new_types: BTreeMap::new(),
            new_terms: BTreeMap::new(),
            new_docids: BTreeMap::new(),
            new_attribs: BTreeMap::new(),
            new_users: BTreeMap::new(),
            postings: BTreeMap::new(),
            doc_terms: BTreeMap::new(),
            forwards: BTreeMap::new(),
            user_acl: BTreeMap::new(),
            doc_acl: BTreeMap::new(),
            attributes: BTreeMap::new(),
            metadata: MetaDataMap::new(),
            deletes: BTreeSet::new(),
            df_deltas: BTreeMap::new(),
            term_names: FxHashMap::default(),
            nof_docs_delta: 0,
            aborted: false,
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.aborted {
            return Err(Error::TransactionAborted);
        }
        Ok(())
    }

    fn alloc_typeno(&mut self, name: &str) -> Result<Typeno> {
        if let Some(&n) = self.new_types.get(name.as_bytes()) {
            return Ok(n);
        }
        if let Some(n) = self.client.typeno(name)? {
            return Ok(n);
        }
        let n = self.client.counters.typeno.fetch_add(1, Ordering::SeqCst);
        self.new_types.insert(name.as_bytes().to_vec(), n);
        Ok(n)
    }

    fn alloc_termno(&mut self, value: &str) -> Result<Termno> {
        if let Some(&n) = self.new_terms.get(value.as_bytes()) {
            return Ok(n);
        }
        if let Some(n) = self.client.termno(value)? {
            return Ok(n);
        }
        let n = self.client.counters.termno.fetch_add(1, Ordering::SeqCst);
        self.new_terms.insert(value.as_bytes().to_vec(), n);
        Ok(n)
    }

    fn alloc_attribno(&mut self, name: &str) -> Result<Attribno> {
        if let Some(&n) = self.new_attribs.get(name.as_bytes()) {
            return Ok(n);
        }
        if let Some(n) = self.client.attribno(name)? {
            return Ok(n);
        }
        let n = self.client.counters.attribno.fetch_add(1, Ordering::SeqCst);
        self.new_attribs.insert(name.as_bytes().to_vec(), n);
        Ok(n)
    }

    fn alloc_userno(&mut self, name: &str) -> Result<Userno> {
        if !self.client.with_acl {
            return Err(Error::Config(
                "storage was created without ACL support".to_string(),
            ));
        }
        if let Some(&n) = self.new_users.get(name.as_bytes()) {
            return Ok(n);
        }
        if let Some(n) = self.client.userno(name)? {
            return Ok(n);
        }
        let n = self.client.counters.userno.fetch_add(1, Ordering::SeqCst);
        self.new_users.insert(name.as_bytes().to_vec(), n);
        Ok(n)
    }

    fn resolve_docno(&self, docid: &str) -> Result<Option<Docno>> {
        if let Some(&n) = self.new_docids.get(docid.as_bytes()) {
            return Ok(Some(n));
        }
        self.client.document_number(docid)
    }

    /// Stages a full document insert. A prior document with the same
    /// id is replaced (its docno is reused).
    pub fn insert_document(&mut self, docid: &str, doc: &Document) -> Result<Docno> {
        self.check_alive()?;

        let docno = match self.resolve_docno(docid)? {
            Some(docno) => {
                self.stage_delete(docno);
                docno
            }
            None => {
                let docno = self.client.counters.docno.fetch_add(1, Ordering::SeqCst);
                self.new_docids.insert(docid.as_bytes().to_vec(), docno);
                docno
            }
        };
        self.nof_docs_delta += 1;

        // searchable terms, grouped by (type, value); positions are 1-based
        let mut grouped: BTreeMap<(String, String), BTreeSet<Position>> = BTreeMap::new();
        for term in &doc.search {
            if term.pos == 0 {
                log::warn!("dropping term '{}' with position 0", term.value);
                continue;
            }
            grouped
                .entry((term.type_.clone(), term.value.clone()))
                .or_default()
                .insert(term.pos);
        }

        for ((type_, value), positions) in grouped {
            let typeno = self.alloc_typeno(&type_)?;
            let termno = self.alloc_termno(&value)?;
            let positions = positions.into_iter().collect::<Vec<_>>();

            #[allow(clippy::cast_possible_truncation)]
            let ff = positions.len() as u32;
            let firstpos = positions.first().copied().unwrap_or(0);

            self.postings
                .entry((typeno, termno))
                .or_default()
                .insert(docno, positions);
            self.doc_terms
                .entry(docno)
                .or_default()
                .insert((typeno, termno), (ff, firstpos));
            *self.df_deltas.entry((typeno, termno)).or_default() += 1;
            self.term_names
                .insert((typeno, termno), (type_, value));
        }

        for term in &doc.forward {
            if term.pos == 0 {
                log::warn!("dropping forward token '{}' with position 0", term.value);
                continue;
            }
            let typeno = self.alloc_typeno(&term.type_)?;
            self.forwards
                .entry((typeno, docno))
                .or_default()
                .insert(term.pos, term.value.clone());
        }

        let descr = self.client.metadata_cache.description();
        for (name, value) in &doc.metadata {
            self.metadata.define(docno, descr.handle(name)?, *value);
        }

        for (name, value) in &doc.attributes {
            let attribno = self.alloc_attribno(name)?;
            self.attributes
                .insert((docno, attribno), Some(value.clone()));
        }

        for user in &doc.access {
            let userno = self.alloc_userno(user)?;
            self.user_acl
                .entry(userno)
                .or_default()
                .insert(docno, true);
            self.doc_acl
                .entry(docno)
                .or_default()
                .insert(userno, true);
        }

        Ok(docno)
    }

    /// Stages deletion of a document by id.
    pub fn delete_document(&mut self, docid: &str) -> Result<()> {
        self.check_alive()?;
        let Some(docno) = self.resolve_docno(docid)? else {
            return Ok(());
        };
        // deleting the same docno twice must not count twice
        let was_visible =
            self.doc_terms.contains_key(&docno) || !self.deletes.contains(&docno);
        self.stage_delete(docno);
        if was_visible {
            self.nof_docs_delta -= 1;
        }
        Ok(())
    }

    // Cancels everything staged for a docno in this transaction and
    // marks the committed state of the docno for purging.
    fn stage_delete(&mut self, docno: Docno) {
        if let Some(terms) = self.doc_terms.remove(&docno) {
            for (key, _) in terms {
                if let Some(map) = self.postings.get_mut(&key) {
                    map.remove(&docno);
                }
                *self.df_deltas.entry(key).or_default() -= 1;
            }
        }
        self.forwards.retain(|(_, d), _| *d != docno);
        self.attributes.retain(|(d, _), _| *d != docno);
        self.doc_acl.remove(&docno);
        for map in self.user_acl.values_mut() {
            map.remove(&docno);
        }
        self.deletes.insert(docno);
    }

    /// Stages a partial update of metadata, attributes and access
    /// rights; postings stay untouched.
    pub fn update_document(&mut self, docno: Docno, patch: &DocumentPatch) -> Result<()> {
        self.check_alive()?;
        for (name, value) in &patch.metadata {
            self.update_metadata(docno, name, *value)?;
        }
        for (name, value) in &patch.attributes {
            self.update_attribute(docno, name, value.clone())?;
        }
        for user in &patch.access_add {
            self.add_access(docno, user)?;
        }
        for user in &patch.access_remove {
            self.remove_access(docno, user)?;
        }
        Ok(())
    }

    /// Stages a metadata field update (no posting changes).
    pub fn update_metadata(
        &mut self,
        docno: Docno,
        name: &str,
        value: NumericVariant,
    ) -> Result<()> {
        self.check_alive()?;
        let descr = self.client.metadata_cache.description();
        self.metadata.define(docno, descr.handle(name)?, value);
        Ok(())
    }

    /// Stages an attribute update; `None` deletes the attribute.
    pub fn update_attribute(
        &mut self,
        docno: Docno,
        name: &str,
        value: Option<String>,
    ) -> Result<()> {
        self.check_alive()?;
        let attribno = self.alloc_attribno(name)?;
        self.attributes.insert((docno, attribno), value);
        Ok(())
    }

    /// Grants a user access to a document.
    pub fn add_access(&mut self, docno: Docno, username: &str) -> Result<()> {
        self.check_alive()?;
        let userno = self.alloc_userno(username)?;
        self.user_acl.entry(userno).or_default().insert(docno, true);
        self.doc_acl.entry(docno).or_default().insert(userno, true);
        Ok(())
    }

    /// Revokes a user's access to a document.
    pub fn remove_access(&mut self, docno: Docno, username: &str) -> Result<()> {
        self.check_alive()?;
        let userno = self.alloc_userno(username)?;
        self.user_acl
            .entry(userno)
            .or_default()
            .insert(docno, false);
        self.doc_acl
            .entry(docno)
            .or_default()
            .insert(userno, false);
        Ok(())
    }

    /// Discards the staged state.
    pub fn rollback(self) {
        log::debug!("transaction rolled back");
    }

    /// Publishes all staged changes as one atomic batch.
    #[allow(clippy::expect_used)]
    pub fn commit(mut self) -> Result<()> {
        self.check_alive()?;
        let client = self.client;
        let _guard = client.transaction_lock.lock().expect("lock is poisoned");

        self.expand_deletes()?;

        let mut batch = client.db.create_transaction()?;
        let result = self.assemble(batch.as_mut());

        let touched = match result {
            Ok(touched) => touched,
            Err(e) => {
                self.aborted = true;
                batch.rollback();
                return Err(e);
            }
        };

        if let Err(e) = batch.commit() {
            self.aborted = true;
            return Err(e);
        }

        // the batch is durable: void touched metadata blocks before
        // releasing the writer lock
        for blockno in touched {
            client.metadata_cache.declare_void(blockno);
        }
        client.metadata_cache.refresh();

        client
            .counters
            .nof_docs
            .fetch_add(self.nof_docs_delta, Ordering::SeqCst);
        let commitno = client.counters.commitno.fetch_add(1, Ordering::SeqCst) + 1;

        let sink = client
            .statistics_sink
            .read()
            .expect("lock is poisoned")
            .clone();
        if let Some(sink) = sink {
            let mut builder = StatisticsBuilder::new(commitno, self.nof_docs_delta);
            for (key, delta) in &self.df_deltas {
                if *delta == 0 {
                    continue;
                }
                if let Some((type_, value)) = self.term_names.get(key) {
                    builder.push_df_change(type_, value, *delta);
                }
            }
            sink.publish(&builder.finish());
        }

        log::debug!("commit {commitno} published");
        Ok(())
    }

    // Turns staged docno purges into posting/forward/acl/metadata and
    // dictionary-level deletions by reading the committed state.
    fn expand_deletes(&mut self) -> Result<()> {
        let deletes = std::mem::take(&mut self.deletes);
        let descr = self.client.metadata_cache.description();

        for docno in &deletes {
            let docno = *docno;

            // discover the document's terms through its inverse term block
            let mut storage: BlockStorage<InverseTermBlock> =
                BlockStorage::new(self.client.db.clone(), KeyPrefix::InverseTerm, &[], None)?;
            if let Some(block) = storage.load(docno)? {
                if block.id() == docno {
                    let mut typenos = BTreeSet::new();
                    for rec in block.decode_all()? {
                        let key = (rec.typeno, rec.termno);
                        self.postings
                            .entry(key)
                            .or_default()
                            .entry(docno)
                            .or_insert_with(Vec::new);
                        *self.df_deltas.entry(key).or_default() -= 1;
                        typenos.insert(rec.typeno);
                    }
                    for typeno in typenos {
                        // drop the whole forward index of the document
                        self.forwards.entry((typeno, docno)).or_default();
                    }
                }
            }

            // revoke all users that could read the document
            let mut acl_storage: BlockStorage<RangeBlock> = BlockStorage::new(
                self.client.db.clone(),
                KeyPrefix::AclBlock,
                &[docno],
                None,
            )?;
            let mut block = acl_storage.load_first()?;
            while let Some(b) = block {
                for (first, last) in b.decode_ranges()? {
                    for userno in first..=last {
                        self.user_acl
                            .entry(userno)
                            .or_default()
                            .entry(docno)
                            .or_insert(false);
                    }
                }
                block = acl_storage.load_next()?;
            }
            self.doc_acl.entry(docno).or_default();

            if descr.nof_elements() > 0 {
                self.metadata.clear_record(docno, &descr);
            }
        }

        self.deletes = deletes;
        Ok(())
    }

    // Assembles the whole batch; returns the touched metadata block
    // numbers for the cache refresh list.
    fn assemble(&mut self, batch: &mut dyn DatabaseTransaction) -> Result<Vec<Index>> {
        let client = self.client;
        let db = &client.db;

        // (a) dictionary insertions
        for (map, prefix) in [
            (&self.new_types, KeyPrefix::TermType),
            (&self.new_terms, KeyPrefix::TermValue),
            (&self.new_docids, KeyPrefix::DocId),
            (&self.new_attribs, KeyPrefix::AttributeKey),
            (&self.new_users, KeyPrefix::UserName),
        ] {
            for (name, id) in map {
                let key = name_key(prefix, name)?;
                let mut value = vec![];
                crate::coding::pack_uint(&mut value, *id);
                batch.put(key.as_bytes(), &value);
            }
        }

        // (b) posting and doclist block merges
        for ((typeno, termno), changes) in &self.postings {
            if changes.is_empty() {
                continue;
            }
            merge_posinfo_family(db.clone(), batch, *typeno, *termno, changes)?;

            let membership = changes
                .iter()
                .map(|(d, p)| (*d, !p.is_empty()))
                .collect::<BTreeMap<_, _>>();
            merge_range_family(
                db.clone(),
                batch,
                KeyPrefix::DocListBlock,
                &[*typeno, *termno],
                &membership,
            )?;
        }

        // (c) inverse term blocks
        let invterm_storage: BlockStorage<InverseTermBlock> =
            BlockStorage::new(db.clone(), KeyPrefix::InverseTerm, &[], None)?;
        for docno in &self.deletes {
            if !self.doc_terms.contains_key(docno) {
                invterm_storage.dispose(*docno, batch)?;
            }
        }
        for (docno, terms) in &self.doc_terms {
            let records = terms
                .iter()
                .map(|(&(typeno, termno), &(ff, firstpos))| InverseTerm {
                    typeno,
                    termno,
                    ff,
                    firstpos,
                })
                .collect::<Vec<_>>();
            invterm_storage.store(&inverse_term::build(*docno, &records), batch)?;
        }

        // (d) forward index: replace per (typeno, docno)
        for ((typeno, docno), tokens) in &self.forwards {
            let family = DatabaseKey::with_elems(KeyPrefix::ForwardIndex, &[*typeno, *docno])?;
            batch.delete_subtree(family.as_bytes());

            if tokens.is_empty() {
                continue;
            }
            let storage: BlockStorage<ForwardIndexBlock> =
                BlockStorage::new(db.clone(), KeyPrefix::ForwardIndex, &[*typeno, *docno], None)?;
            let mut builder = ForwardBlockBuilder::new();
            for (pos, value) in tokens {
                builder.push(*pos, value.as_bytes());
                if builder.is_full() {
                    let done = std::mem::take(&mut builder);
                    storage.store(&done.freeze(), batch)?;
                }
            }
            if !builder.is_empty() {
                storage.store(&builder.freeze(), batch)?;
            }
        }

        // (e) ACL blocks, both directions
        for (userno, changes) in &self.user_acl {
            if changes.is_empty() {
                continue;
            }
            merge_range_family(db.clone(), batch, KeyPrefix::UserAclBlock, &[*userno], changes)?;
        }
        for (docno, changes) in &self.doc_acl {
            if self.deletes.contains(docno) {
                // the committed ACL family of the document is purged;
                // a replacing insert rebuilds it from its staged grants
                let family = DatabaseKey::with_elems(KeyPrefix::AclBlock, &[*docno])?;
                batch.delete_subtree(family.as_bytes());

                let storage: BlockStorage<RangeBlock> =
                    BlockStorage::new(db.clone(), KeyPrefix::AclBlock, &[*docno], None)?;
                let mut builder = RangeBlockBuilder::new();
                for (userno, granted) in changes {
                    if *granted {
                        builder.push_id(*userno);
                    }
                }
                if !builder.is_empty() {
                    storage.store(&builder.freeze(), batch)?;
                }
                continue;
            }
            if changes.is_empty() {
                continue;
            }
            merge_range_family(db.clone(), batch, KeyPrefix::AclBlock, &[*docno], changes)?;
        }

        // (f) attributes: purge deleted documents first, then apply
        // the staged writes (batch operations apply in order)
        for docno in &self.deletes {
            let family = DatabaseKey::with_elems(KeyPrefix::DocAttribute, &[*docno])?;
            batch.delete_subtree(family.as_bytes());
        }
        for ((docno, attribno), value) in &self.attributes {
            let key = DatabaseKey::with_elems(KeyPrefix::DocAttribute, &[*docno, *attribno])?;
            match value {
                Some(v) => batch.put(key.as_bytes(), v.as_bytes()),
                None => batch.delete(key.as_bytes()),
            }
        }

        // (g) metadata
        let descr = client.metadata_cache.description();
        let touched = self.metadata.flush(&**db, batch, &descr)?;

        // (h) df counters
        for ((typeno, termno), delta) in &self.df_deltas {
            if *delta == 0 {
                continue;
            }
            let key = DatabaseKey::with_elems(KeyPrefix::DocFrequency, &[*typeno, *termno])?;
            let current = match db.read_value(key.as_bytes())? {
                Some(value) => {
                    let mut tail = &*value;
                    crate::coding::unpack_uint64(&mut tail)?
                }
                None => 0,
            };
            #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
            let updated = (current as i64 + delta).max(0) as u64;
            if updated == 0 {
                batch.delete(key.as_bytes());
            } else {
                let mut value = vec![];
                pack_uint64(&mut value, updated);
                batch.put(key.as_bytes(), &value);
            }
        }

        // (i) variables
        client.write_counters(batch)?;
        #[allow(clippy::cast_sign_loss)]
        variables::write(
            batch,
            variables::VAR_NOF_DOCS,
            (client.counters.nof_docs.load(Ordering::SeqCst) + self.nof_docs_delta).max(0) as u64,
        )?;
        variables::write(
            batch,
            variables::VAR_COMMITNO,
            client.counters.commitno.load(Ordering::SeqCst) + 1,
        )?;

        Ok(touched)
    }
}

/// Merges staged posinfo changes into the blocks of one
/// `(typeno, termno)` family: the affected block tail is loaded once,
/// merged (new wins, empty deletes) and rewritten split at the block
/// size target.
fn merge_posinfo_family(
    db: Arc<dyn DatabaseClient>,
    batch: &mut dyn DatabaseTransaction,
    typeno: Typeno,
    termno: Termno,
    changes: &BTreeMap<Docno, Vec<Position>>,
) -> Result<()> {
    let mut storage: BlockStorage<PosinfoBlock> =
        BlockStorage::new(db, KeyPrefix::PosinfoBlock, &[typeno, termno], None)?;

    let min = changes.keys().next().copied().unwrap_or(1);
    let mut old_records = vec![];
    let mut to_dispose = vec![];

    let mut block = storage.load(min)?;
    while let Some(b) = block {
        old_records.extend(b.decode_all()?);
        to_dispose.push(b.id());
        block = storage.load_next()?;
    }

    let merged = posinfo::merge(changes, old_records);

    for id in to_dispose {
        storage.dispose(id, batch)?;
    }

    let mut builder = PosinfoBlockBuilder::new();
    for (docno, positions) in &merged {
        builder.push(*docno, positions);
        if builder.is_full() {
            let done = std::mem::take(&mut builder);
            storage.store(&done.freeze(), batch)?;
        }
    }
    if !builder.is_empty() {
        storage.store(&builder.freeze(), batch)?;
    }
    Ok(())
}

/// Merges staged membership changes (`true` insert / `false` remove)
/// into the range blocks of one family.
fn merge_range_family(
    db: Arc<dyn DatabaseClient>,
    batch: &mut dyn DatabaseTransaction,
    prefix: KeyPrefix,
    elems: &[Index],
    changes: &BTreeMap<Index, bool>,
) -> Result<()> {
    let mut storage: BlockStorage<RangeBlock> = BlockStorage::new(db, prefix, elems, None)?;

    let min = changes.keys().next().copied().unwrap_or(1);
    let mut old_ranges = vec![];
    let mut to_dispose = vec![];

    let mut block = storage.load(min)?;
    while let Some(b) = block {
        old_ranges.extend(b.decode_ranges()?);
        to_dispose.push(b.id());
        block = storage.load_next()?;
    }

    let merged = range::merge(changes, old_ranges);

    for id in to_dispose {
        storage.dispose(id, batch)?;
    }

    let mut builder = RangeBlockBuilder::new();
    for (first, last) in merged {
        builder.push_range(first, last);
        if builder.is_full() {
            let done = std::mem::take(&mut builder);
            storage.store(&done.freeze(), batch)?;
        }
    }
    if !builder.is_empty() {
        storage.store(&builder.freeze(), batch)?;
    }
    Ok(())
}
