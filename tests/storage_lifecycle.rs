// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Arc;
use term_index::database::mem::MemDatabase;
use term_index::iterator::PostingIteratorOps;
use term_index::statistics::{PackedStatisticsViewer, StatisticsMap, StatisticsSink};
use term_index::storage::{create_storage, dump, Document, DocumentTerm, StorageClient};
use term_index::NumericVariant;
use test_log::test;

fn open(db: &MemDatabase, config: &str) -> StorageClient {
    StorageClient::open(Arc::new(db.clone()), config).expect("open")
}

fn sample_doc() -> Document {
    Document {
        search: vec![
            DocumentTerm::new("word", "hello", 1),
            DocumentTerm::new("word", "world", 2),
        ],
        forward: vec![
            DocumentTerm::new("word", "Hello", 1),
            DocumentTerm::new("word", "World", 2),
        ],
        metadata: vec![("date".to_string(), NumericVariant::UInt(20_200_101))],
        attributes: vec![("title".to_string(), "Greeting".to_string())],
        access: vec!["alice".to_string()],
    }
}

#[test]
fn commit_makes_everything_visible() {
    let db = MemDatabase::new();
    create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    let docno = tx.insert_document("doc-1", &sample_doc()).expect("insert");
    tx.commit().expect("commit");

    assert_eq!(Some(docno), client.document_number("doc-1").expect("lookup"));
    assert_eq!(1, client.nof_documents());
    assert_eq!(
        NumericVariant::UInt(20_200_101),
        client.metadata(docno, "date").expect("metadata")
    );
    assert_eq!(
        Some("Greeting".to_string()),
        client.attribute(docno, "title").expect("attribute")
    );

    let mut it = client.posting_iterator("word", "hello").expect("iterator");
    assert_eq!(docno, it.skip_doc(0));

    let mut acl = client.acl_iterator("alice").expect("iterator");
    assert_eq!(docno, acl.skip_doc(0));

    let mut fwd = client.forward_iterator("word").expect("iterator");
    fwd.skip_doc(docno).expect("skip_doc");
    assert_eq!(1, fwd.skip_pos(0).expect("skip_pos"));
    assert_eq!("Hello", fwd.fetch().expect("fetch"));
}

#[test]
fn rollback_leaves_no_trace() {
    let db = MemDatabase::new();
    create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    tx.insert_document("doc-1", &sample_doc()).expect("insert");
    tx.rollback();

    assert_eq!(None, client.document_number("doc-1").expect("lookup"));
    assert_eq!(0, client.nof_documents());

    let mut it = client.posting_iterator("word", "hello").expect("iterator");
    assert_eq!(0, it.skip_doc(0));
}

#[test]
fn delete_document_purges_postings_and_df() {
    let db = MemDatabase::new();
    create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    tx.insert_document("doc-1", &sample_doc()).expect("insert");
    let keep = Document {
        search: vec![DocumentTerm::new("word", "hello", 1)],
        ..Document::default()
    };
    tx.insert_document("doc-2", &keep).expect("insert");
    tx.commit().expect("commit");

    assert_eq!(2, client.document_frequency("word", "hello").expect("df"));

    let mut tx = client.transaction();
    tx.delete_document("doc-1").expect("delete");
    tx.commit().expect("commit");

    assert_eq!(1, client.nof_documents());
    assert_eq!(1, client.document_frequency("word", "hello").expect("df"));
    assert_eq!(0, client.document_frequency("word", "world").expect("df"));

    let mut it = client.posting_iterator("word", "hello").expect("iterator");
    let survivor = client
        .document_number("doc-2")
        .expect("lookup")
        .expect("should exist");
    assert_eq!(survivor, it.skip_doc(0));
    assert_eq!(0, it.skip_doc(survivor + 1));

    // the deleted docno no longer carries attributes or ACLs
    let deleted = 1u32;
    assert_eq!(None, client.attribute(deleted, "title").expect("attribute"));
    let mut acl = client.acl_iterator("alice").expect("iterator");
    assert_eq!(0, acl.skip_doc(0));

    // nothing undecodable was left behind
    let errors = dump::check_storage(&db, &client.metadata_description()).expect("check");
    assert_eq!(0, errors);
}

#[test]
fn reinsert_replaces_the_previous_document() {
    let db = MemDatabase::new();
    create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    let docno = tx.insert_document("doc-1", &sample_doc()).expect("insert");
    tx.commit().expect("commit");

    let replacement = Document {
        search: vec![DocumentTerm::new("word", "goodbye", 1)],
        metadata: vec![("date".to_string(), NumericVariant::UInt(20_210_101))],
        ..Document::default()
    };
    let mut tx = client.transaction();
    let docno2 = tx.insert_document("doc-1", &replacement).expect("insert");
    tx.commit().expect("commit");

    // the docno is reused, the content replaced
    assert_eq!(docno, docno2);
    assert_eq!(1, client.nof_documents());
    assert_eq!(0, client.document_frequency("word", "hello").expect("df"));
    assert_eq!(1, client.document_frequency("word", "goodbye").expect("df"));
    assert_eq!(
        NumericVariant::UInt(20_210_101),
        client.metadata(docno, "date").expect("metadata")
    );

    let mut it = client.posting_iterator("word", "hello").expect("iterator");
    assert_eq!(0, it.skip_doc(0));
    let mut it = client.posting_iterator("word", "goodbye").expect("iterator");
    assert_eq!(docno, it.skip_doc(0));
}

#[test]
fn metadata_survives_reopen() {
    let db = MemDatabase::new();
    create_storage(&db, "metadata=date UInt32").expect("create");

    {
        let client = open(&db, "");
        let mut tx = client.transaction();
        tx.insert_document("doc-1", &sample_doc()).expect("insert");
        tx.commit().expect("commit");
        client.close().expect("close");
    }

    let client = open(&db, "");
    assert_eq!(1, client.nof_documents());
    let docno = client
        .document_number("doc-1")
        .expect("lookup")
        .expect("should exist");
    assert_eq!(
        NumericVariant::UInt(20_200_101),
        client.metadata(docno, "date").expect("metadata")
    );

    // a new transaction continues the id sequence
    let mut tx = client.transaction();
    let next = tx
        .insert_document(
            "doc-2",
            &Document {
                search: vec![DocumentTerm::new("word", "more", 1)],
                ..Document::default()
            },
        )
        .expect("insert");
    tx.commit().expect("commit");
    assert!(next > docno);
}

#[test]
fn cached_metadata_record_matches_store() {
    // invariant: the cached record equals the one re-read directly
    let db = MemDatabase::new();
    create_storage(&db, "metadata=date UInt32, score Float32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    for i in 1..=600u32 {
        let doc = Document {
            metadata: vec![
                ("date".to_string(), NumericVariant::UInt(u64::from(i))),
                ("score".to_string(), NumericVariant::Float(f64::from(i) / 2.0)),
            ],
            ..Document::default()
        };
        tx.insert_document(&format!("doc-{i}"), &doc).expect("insert");
    }
    tx.commit().expect("commit");

    let fresh = open(&db, "");
    for docno in [1u32, 255, 256, 257, 599, 600] {
        let cached = client.metadata_record(docno).expect("cached");
        let direct = fresh.metadata_record(docno).expect("direct");
        assert_eq!(
            cached.record_bytes().expect("bytes"),
            direct.record_bytes().expect("bytes"),
            "docno {docno}"
        );
    }
}

#[test]
fn update_operations_change_no_postings() {
    let db = MemDatabase::new();
    create_storage(&db, "acl=yes; metadata=date UInt32").expect("create");
    let client = open(&db, "");

    let mut tx = client.transaction();
    let docno = tx.insert_document("doc-1", &sample_doc()).expect("insert");
    tx.commit().expect("commit");

    let mut tx = client.transaction();
    let patch = term_index::storage::DocumentPatch {
        metadata: vec![("date".to_string(), NumericVariant::UInt(7))],
        attributes: vec![("title".to_string(), Some("Updated".to_string()))],
        access_add: vec!["bob".to_string()],
        access_remove: vec!["alice".to_string()],
    };
    tx.update_document(docno, &patch).expect("update");
    tx.commit().expect("commit");

    assert_eq!(
        NumericVariant::UInt(7),
        client.metadata(docno, "date").expect("metadata")
    );
    assert_eq!(
        Some("Updated".to_string()),
        client.attribute(docno, "title").expect("attribute")
    );

    let mut bob = client.acl_iterator("bob").expect("iterator");
    assert_eq!(docno, bob.skip_doc(0));
    let mut alice = client.acl_iterator("alice").expect("iterator");
    assert_eq!(0, alice.skip_doc(0));

    // postings untouched
    assert_eq!(1, client.document_frequency("word", "hello").expect("df"));
    let mut it = client.posting_iterator("word", "hello").expect("iterator");
    assert_eq!(docno, it.skip_doc(0));
}

struct CollectingSink(std::sync::Mutex<Vec<Vec<u8>>>);

impl StatisticsSink for CollectingSink {
    fn publish(&self, blob: &[u8]) {
        self.0.lock().expect("lock").push(blob.to_vec());
    }
}

#[test]
fn commits_emit_statistics_blobs() {
    let db = MemDatabase::new();
    create_storage(&db, "").expect("create");
    let client = open(&db, "");

    let sink = Arc::new(CollectingSink(std::sync::Mutex::new(vec![])));
    client.set_statistics_sink(sink.clone());

    let mut tx = client.transaction();
    tx.insert_document(
        "doc-1",
        &Document {
            search: vec![DocumentTerm::new("word", "cat", 1)],
            ..Document::default()
        },
    )
    .expect("insert");
    tx.commit().expect("commit");

    let blobs = sink.0.lock().expect("lock").clone();
    assert_eq!(1, blobs.len());

    // a peer can replay the blob into its statistics map, replays
    // are idempotent
    let map = StatisticsMap::new();
    let mut viewer = PackedStatisticsViewer::new(&blobs[0]).expect("parse");
    assert!(map.apply("peer-1", &mut viewer).expect("apply"));
    assert_eq!(1, map.nof_documents());
    assert_eq!(1, map.df("word", "cat"));

    let mut viewer = PackedStatisticsViewer::new(&blobs[0]).expect("parse");
    assert!(!map.apply("peer-1", &mut viewer).expect("apply"));
    assert_eq!(1, map.df("word", "cat"));
}
