// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::block_cache::BlockCache;
use super::block_storage::BlockStorage;
use super::metadata_transaction::MetaDataTransaction;
use super::transaction::Transaction;
use super::variables;
use crate::block::posinfo::PosinfoBlock;
use crate::block::range::RangeBlock;
use crate::coding::unpack_uint;
use crate::config::ConfigMap;
use crate::database::DatabaseClient;
use crate::dict::VarSizeNodeTree;
use crate::iterator::{EmptyIterator, MembershipIterator, PosinfoIterator, PostingIterator};
use crate::key::{name_key, KeyPrefix};
use crate::meta::{MetaDataBlockCache, MetaDataDescription, MetaDataSnapshot};
use crate::statistics::StatisticsSink;
use crate::variant::NumericVariant;
use crate::{Attribno, Docno, Error, Index, Result, Termno, Typeno, Userno};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default capacity of the shared block cache
const DEFAULT_BLOCK_CACHE_BYTES: u64 = 8 * 1_000 * 1_000;

pub(crate) struct Counters {
    pub termno: AtomicU32,
    pub typeno: AtomicU32,
    pub docno: AtomicU32,
    pub attribno: AtomicU32,
    pub userno: AtomicU32,
    pub nof_docs: AtomicI64,
    pub commitno: AtomicU64,
}

/// Initializes a fresh storage inside an (empty) key/value store.
///
/// Create options: `acl=yes|no`, `metadata=<comma separated "name
/// type" columns>`.
pub fn create_storage(db: &dyn DatabaseClient, config: &str) -> Result<()> {
    let cfg = ConfigMap::parse(config, &["acl", "metadata"])?;
    let with_acl = cfg.get_bool("acl")?;
    let descr = MetaDataDescription::from_string(cfg.get("metadata").unwrap_or(""))?;

    let mut batch = db.create_transaction()?;
    variables::write(batch.as_mut(), variables::VAR_TERMNO, 1)?;
    variables::write(batch.as_mut(), variables::VAR_TYPENO, 1)?;
    variables::write(batch.as_mut(), variables::VAR_DOCNO, 1)?;
    variables::write(batch.as_mut(), variables::VAR_ATTRIBNO, 1)?;
    variables::write(batch.as_mut(), variables::VAR_NOF_DOCS, 0)?;
    variables::write(batch.as_mut(), variables::VAR_COMMITNO, 0)?;
    variables::write(
        batch.as_mut(),
        variables::VAR_BYTE_ORDER_MARK,
        u64::from(variables::byte_order_mark()),
    )?;
    variables::write(
        batch.as_mut(),
        variables::VAR_VERSION,
        u64::from(variables::STORAGE_VERSION_MAJOR * 1000 + variables::STORAGE_VERSION_MINOR),
    )?;
    if with_acl {
        variables::write(batch.as_mut(), variables::VAR_USERNO, 1)?;
    }

    let schema_key = name_key(KeyPrefix::MetaDataDescr, b"")?;
    batch.put(schema_key.as_bytes(), descr.to_string_repr().as_bytes());

    batch.commit()?;
    log::debug!("created storage (acl={with_acl})");
    Ok(())
}

/// Handle on an opened index storage.
///
/// Shared between reader threads; writes go through [`Transaction`]s
/// which serialize on the storage-wide writer lock.
pub struct StorageClient {
    pub(crate) db: Arc<dyn DatabaseClient>,
    pub(crate) metadata_cache: MetaDataBlockCache,
    pub(crate) block_cache: Arc<BlockCache>,
    pub(crate) counters: Counters,
    pub(crate) with_acl: bool,
    pub(crate) transaction_lock: Mutex<()>,
    pub(crate) statistics_sink: RwLock<Option<Arc<dyn StatisticsSink>>>,
    term_cache: RwLock<VarSizeNodeTree>,
}

impl StorageClient {
    /// Opens an existing storage.
    ///
    /// Client options: `cachedterms=<path of newline separated terms
    /// to warm the term cache>`.
    pub fn open(db: Arc<dyn DatabaseClient>, config: &str) -> Result<Self> {
        let cfg = ConfigMap::parse(config, &["cachedterms"])?;

        let bom = variables::read_required(&*db, variables::VAR_BYTE_ORDER_MARK)?;
        if bom != u64::from(variables::byte_order_mark()) {
            return Err(Error::ByteOrderMismatch);
        }

        #[allow(clippy::cast_possible_truncation)]
        let version = variables::read_required(&*db, variables::VAR_VERSION)? as u32;
        let supported = variables::STORAGE_VERSION_MAJOR * 1000 + variables::STORAGE_VERSION_MINOR;
        if version / 1000 != variables::STORAGE_VERSION_MAJOR {
            return Err(Error::VersionMismatch(version, supported));
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let counters = Counters {
            termno: AtomicU32::new(variables::read_required(&*db, variables::VAR_TERMNO)? as u32),
            typeno: AtomicU32::new(variables::read_required(&*db, variables::VAR_TYPENO)? as u32),
            docno: AtomicU32::new(variables::read_required(&*db, variables::VAR_DOCNO)? as u32),
            attribno: AtomicU32::new(
                variables::read_required(&*db, variables::VAR_ATTRIBNO)? as u32
            ),
            userno: AtomicU32::new(
                variables::read(&*db, variables::VAR_USERNO)?.unwrap_or(1) as u32,
            ),
            nof_docs: AtomicI64::new(
                variables::read_required(&*db, variables::VAR_NOF_DOCS)? as i64
            ),
            commitno: AtomicU64::new(variables::read(&*db, variables::VAR_COMMITNO)?.unwrap_or(0)),
        };
        let with_acl = variables::read(&*db, variables::VAR_USERNO)?.is_some();

        let schema_key = name_key(KeyPrefix::MetaDataDescr, b"")?;
        let descr = match db.read_value(schema_key.as_bytes())? {
            Some(blob) => MetaDataDescription::from_string(
                std::str::from_utf8(&blob)
                    .map_err(|_| Error::Database("metadata schema is not utf-8".to_string()))?,
            )?,
            None => MetaDataDescription::new(),
        };

        let client = Self {
            metadata_cache: MetaDataBlockCache::new(db.clone(), Arc::new(descr)),
            block_cache: Arc::new(BlockCache::with_capacity_bytes(DEFAULT_BLOCK_CACHE_BYTES)),
            counters,
            with_acl,
            transaction_lock: Mutex::new(()),
            statistics_sink: RwLock::new(None),
            term_cache: RwLock::new(VarSizeNodeTree::new()),
            db,
        };

        if let Some(path) = cfg.get("cachedterms") {
            let terms = std::fs::read_to_string(path)?;
            client.warm_term_cache(terms.lines())?;
        }

        Ok(client)
    }

    /// Preloads termno lookups for the given term values.
    #[allow(clippy::expect_used)]
    pub fn warm_term_cache<'a>(&self, terms: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut cache = self.term_cache.write().expect("lock is poisoned");
        let mut warmed = 0usize;
        for term in terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some(termno) = self.lookup_name(KeyPrefix::TermValue, term.as_bytes())? {
                cache.set(term.as_bytes(), termno)?;
                warmed += 1;
            }
        }
        log::debug!("warmed term cache with {warmed} terms");
        Ok(())
    }

    /// Attaches a sink receiving statistics blobs on commit.
    #[allow(clippy::expect_used)]
    pub fn set_statistics_sink(&self, sink: Arc<dyn StatisticsSink>) {
        *self.statistics_sink.write().expect("lock is poisoned") = Some(sink);
    }

    pub(crate) fn lookup_name(&self, prefix: KeyPrefix, name: &[u8]) -> Result<Option<Index>> {
        let key = name_key(prefix, name)?;
        match self.db.read_value(key.as_bytes())? {
            Some(value) => {
                let mut tail = &*value;
                Ok(Some(unpack_uint(&mut tail)?))
            }
            None => Ok(None),
        }
    }

    /// Number of the term type, if defined.
    pub fn typeno(&self, name: &str) -> Result<Option<Typeno>> {
        self.lookup_name(KeyPrefix::TermType, name.as_bytes())
    }

    /// Number of the term value, if defined (served from the warm
    /// cache when possible).
    #[allow(clippy::expect_used)]
    pub fn termno(&self, value: &str) -> Result<Option<Termno>> {
        if let Some(hit) = self
            .term_cache
            .read()
            .expect("lock is poisoned")
            .get(value.as_bytes())
            .unwrap_or(None)
        {
            return Ok(Some(hit));
        }
        self.lookup_name(KeyPrefix::TermValue, value.as_bytes())
    }

    /// Docno of a document id, if inserted.
    pub fn document_number(&self, docid: &str) -> Result<Option<Docno>> {
        self.lookup_name(KeyPrefix::DocId, docid.as_bytes())
    }

    /// Number of an attribute name, if defined.
    pub fn attribno(&self, name: &str) -> Result<Option<Attribno>> {
        self.lookup_name(KeyPrefix::AttributeKey, name.as_bytes())
    }

    /// Number of a user name, if defined.
    pub fn userno(&self, name: &str) -> Result<Option<Userno>> {
        self.lookup_name(KeyPrefix::UserName, name.as_bytes())
    }

    /// Local document frequency of a term.
    pub fn document_frequency(&self, type_: &str, value: &str) -> Result<u64> {
        let (Some(typeno), Some(termno)) = (self.typeno(type_)?, self.termno(value)?) else {
            return Ok(0);
        };
        self.df_by_ids(typeno, termno)
    }

    pub(crate) fn df_by_ids(&self, typeno: Typeno, termno: Termno) -> Result<u64> {
        let mut key = crate::key::DatabaseKey::new(KeyPrefix::DocFrequency);
        key.add_elem(typeno)?;
        key.add_elem(termno)?;
        match self.db.read_value(key.as_bytes())? {
            Some(value) => {
                let mut tail = &*value;
                crate::coding::unpack_uint64(&mut tail)
            }
            None => Ok(0),
        }
    }

    /// Number of documents in this storage.
    pub fn nof_documents(&self) -> i64 {
        self.counters.nof_docs.load(Ordering::Relaxed)
    }

    /// Whether the storage keeps per-user ACLs.
    #[must_use]
    pub fn with_acl(&self) -> bool {
        self.with_acl
    }

    /// Creates a positional posting iterator for a term.
    ///
    /// An unknown type or value yields the empty iterator.
    pub fn posting_iterator(&self, type_: &str, value: &str) -> Result<PostingIterator> {
        let (Some(typeno), Some(termno)) = (self.typeno(type_)?, self.termno(value)?) else {
            return Ok(PostingIterator::from(EmptyIterator));
        };
        let df = self.df_by_ids(typeno, termno)?;
        let storage: BlockStorage<PosinfoBlock> = BlockStorage::new(
            self.db.clone(),
            KeyPrefix::PosinfoBlock,
            &[typeno, termno],
            Some(self.block_cache.clone()),
        )?;
        Ok(PostingIterator::from(PosinfoIterator::new(
            storage,
            df,
            format!("{type_}\u{1}{value}"),
        )))
    }

    /// Creates a docno-only posting iterator for a term (no
    /// positions), served from the doclist blocks.
    pub fn doclist_iterator(&self, type_: &str, value: &str) -> Result<PostingIterator> {
        let (Some(typeno), Some(termno)) = (self.typeno(type_)?, self.termno(value)?) else {
            return Ok(PostingIterator::from(EmptyIterator));
        };
        let df = self.df_by_ids(typeno, termno)?;
        let storage: BlockStorage<RangeBlock> = BlockStorage::new(
            self.db.clone(),
            KeyPrefix::DocListBlock,
            &[typeno, termno],
            Some(self.block_cache.clone()),
        )?;
        Ok(PostingIterator::from(MembershipIterator::new(
            storage,
            df,
            format!("d\u{1}{type_}\u{1}{value}"),
        )))
    }

    /// Creates the iterator over the docnos a user may read.
    pub fn acl_iterator(&self, username: &str) -> Result<PostingIterator> {
        if !self.with_acl {
            return Err(Error::Config(
                "storage was created without ACL support".to_string(),
            ));
        }
        let Some(userno) = self.userno(username)? else {
            return Ok(PostingIterator::from(EmptyIterator));
        };
        let storage: BlockStorage<RangeBlock> = BlockStorage::new(
            self.db.clone(),
            KeyPrefix::UserAclBlock,
            &[userno],
            Some(self.block_cache.clone()),
        )?;
        Ok(PostingIterator::from(MembershipIterator::new(
            storage,
            0,
            format!("u\u{1}{username}"),
        )))
    }

    /// Creates a forward iterator over a term type.
    pub fn forward_iterator(&self, type_: &str) -> Result<super::ForwardIterator> {
        let typeno = self
            .typeno(type_)?
            .ok_or_else(|| Error::Config(format!("undefined term type '{type_}'")))?;
        Ok(super::ForwardIterator::new(self.db.clone(), typeno))
    }

    /// Reads one metadata column of a document.
    pub fn metadata(&self, docno: Docno, name: &str) -> Result<NumericVariant> {
        let snapshot = self.metadata_cache.get(docno)?;
        snapshot.get_by_name(name)
    }

    /// Reads the whole metadata record of a document.
    pub fn metadata_record(&self, docno: Docno) -> Result<MetaDataSnapshot> {
        self.metadata_cache.get(docno)
    }

    /// The current metadata table description.
    pub fn metadata_description(&self) -> Arc<MetaDataDescription> {
        self.metadata_cache.description()
    }

    /// Reads a document attribute.
    pub fn attribute(&self, docno: Docno, name: &str) -> Result<Option<String>> {
        let Some(attribno) = self.attribno(name)? else {
            return Ok(None);
        };
        let mut key = crate::key::DatabaseKey::new(KeyPrefix::DocAttribute);
        key.add_elem(docno)?;
        key.add_elem(attribno)?;
        match self.db.read_value(key.as_bytes())? {
            Some(value) => Ok(Some(
                String::from_utf8(value.to_vec())
                    .map_err(|_| Error::Database("attribute value is not utf-8".to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Starts a write transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Starts an alter-metadata-table transaction.
    pub fn alter_metadata_table(&self) -> MetaDataTransaction<'_> {
        MetaDataTransaction::new(self)
    }

    /// Flushes counters and releases the store handle.
    #[allow(clippy::expect_used)]
    pub fn close(&self) -> Result<()> {
        let _guard = self.transaction_lock.lock().expect("lock is poisoned");
        let mut batch = self.db.create_transaction()?;
        self.write_counters(batch.as_mut())?;
        batch.commit()?;
        self.db.close()
    }

    pub(crate) fn write_counters(
        &self,
        batch: &mut dyn crate::database::DatabaseTransaction,
    ) -> Result<()> {
        use super::variables as v;
        let c = &self.counters;
        v::write(batch, v::VAR_TERMNO, u64::from(c.termno.load(Ordering::SeqCst)))?;
        v::write(batch, v::VAR_TYPENO, u64::from(c.typeno.load(Ordering::SeqCst)))?;
        v::write(batch, v::VAR_DOCNO, u64::from(c.docno.load(Ordering::SeqCst)))?;
        v::write(
            batch,
            v::VAR_ATTRIBNO,
            u64::from(c.attribno.load(Ordering::SeqCst)),
        )?;
        if self.with_acl {
            v::write(batch, v::VAR_USERNO, u64::from(c.userno.load(Ordering::SeqCst)))?;
        }
        #[allow(clippy::cast_sign_loss)]
        v::write(
            batch,
            v::VAR_NOF_DOCS,
            c.nof_docs.load(Ordering::SeqCst).max(0) as u64,
        )?;
        v::write(batch, v::VAR_COMMITNO, c.commitno.load(Ordering::SeqCst))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::mem::MemDatabase;
    use test_log::test;

    #[test]
    fn create_and_open() {
        let db = MemDatabase::new();
        create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");

        let client = StorageClient::open(Arc::new(db), "").expect("open");
        assert!(client.with_acl());
        assert_eq!(0, client.nof_documents());
        assert_eq!(1, client.metadata_description().nof_elements());
    }

    #[test]
    fn open_without_create_fails() {
        let db = MemDatabase::new();
        assert!(StorageClient::open(Arc::new(db), "").is_err());
    }

    #[test]
    fn version_mismatch_refuses_open() {
        let db = MemDatabase::new();
        create_storage(&db, "").expect("create");

        let mut batch = db.create_transaction().expect("transaction");
        variables::write(batch.as_mut(), variables::VAR_VERSION, 1001).expect("write");
        batch.commit().expect("commit");

        assert!(matches!(
            StorageClient::open(Arc::new(db), "").err(),
            Some(Error::VersionMismatch(1001, _))
        ));
    }

    #[test]
    fn byte_order_mismatch_refuses_open() {
        let db = MemDatabase::new();
        create_storage(&db, "").expect("create");

        let mut batch = db.create_transaction().expect("transaction");
        let wrong = u64::from(u32::from_ne_bytes([4, 3, 2, 1]));
        variables::write(batch.as_mut(), variables::VAR_BYTE_ORDER_MARK, wrong).expect("write");
        batch.commit().expect("commit");

        assert!(matches!(
            StorageClient::open(Arc::new(db), "").err(),
            Some(Error::ByteOrderMismatch)
        ));
    }

    #[test]
    fn unknown_term_yields_empty_iterator() {
        let db = MemDatabase::new();
        create_storage(&db, "").expect("create");
        let client = StorageClient::open(Arc::new(db), "").expect("open");

        use crate::iterator::PostingIteratorOps;
        let mut it = client.posting_iterator("word", "nope").expect("iterator");
        assert_eq!(0, it.skip_doc(0));
    }

    #[test]
    fn acl_iterator_requires_acl_storage() {
        let db = MemDatabase::new();
        create_storage(&db, "acl=no").expect("create");
        let client = StorageClient::open(Arc::new(db), "").expect("open");
        assert!(client.acl_iterator("bob").is_err());
    }
}
