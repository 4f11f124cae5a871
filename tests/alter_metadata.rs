// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::Arc;
use term_index::database::mem::MemDatabase;
use term_index::meta::MetaDataType;
use term_index::storage::{create_storage, Document, StorageClient};
use term_index::NumericVariant;
use test_log::test;

#[test]
fn rename_add_and_clear_in_one_commit() {
    // schema `date UInt32`; insert docno 1 with date=20200101; then
    // rename date->dt, add score Float32, clear dt
    let db = MemDatabase::new();
    create_storage(&db, "metadata=date UInt32").expect("create");
    let client = StorageClient::open(Arc::new(db), "").expect("open");

    let mut tx = client.transaction();
    let docno = tx
        .insert_document(
            "doc-1",
            &Document {
                metadata: vec![("date".to_string(), NumericVariant::UInt(20_200_101))],
                ..Document::default()
            },
        )
        .expect("insert");
    tx.commit().expect("commit");

    let mut alter = client.alter_metadata_table();
    alter.rename_column("date", "dt").expect("rename");
    alter.add_column("score", MetaDataType::Float32).expect("add");
    alter.clear_column("dt").expect("clear");
    alter.commit().expect("commit");

    assert_eq!(
        NumericVariant::UInt(0),
        client.metadata(docno, "dt").expect("get")
    );
    assert_eq!(
        NumericVariant::Float(0.0),
        client.metadata(docno, "score").expect("get")
    );

    // the schema blob was replaced in the same batch
    let descr = client.metadata_description();
    assert_eq!(2, descr.nof_elements());
    assert!(descr.has("dt"));
    assert!(descr.has("score"));
    assert!(!descr.has("date"));
}

#[test]
fn untouched_columns_survive_the_rewrite() {
    // invariant: every column not reset keeps its value under the
    // numeric cast
    let db = MemDatabase::new();
    create_storage(&db, "metadata=a UInt16, b Int32, c Float32").expect("create");
    let client = StorageClient::open(Arc::new(db), "").expect("open");

    let mut tx = client.transaction();
    for i in 1..=300u32 {
        tx.insert_document(
            &format!("doc-{i}"),
            &Document {
                metadata: vec![
                    ("a".to_string(), NumericVariant::UInt(u64::from(i % 1000))),
                    ("b".to_string(), NumericVariant::Int(-i64::from(i))),
                    ("c".to_string(), NumericVariant::Float(f64::from(i) / 4.0)),
                ],
                ..Document::default()
            },
        )
        .expect("insert");
    }
    tx.commit().expect("commit");

    let mut alter = client.alter_metadata_table();
    alter.delete_column("a").expect("delete");
    alter.alter_column_type("b", MetaDataType::Int16).expect("alter");
    alter.commit().expect("commit");

    for docno in [1u32, 100, 256, 257, 300] {
        assert_eq!(
            NumericVariant::Int(-i64::from(docno)),
            client.metadata(docno, "b").expect("get"),
            "docno {docno}"
        );
        assert_eq!(
            NumericVariant::Float(f64::from(docno) / 4.0),
            client.metadata(docno, "c").expect("get"),
            "docno {docno}"
        );
        assert!(client.metadata(docno, "a").is_err());
    }
}

#[test]
fn narrowing_out_of_domain_values_zeroes_them() {
    let db = MemDatabase::new();
    create_storage(&db, "metadata=x Int32").expect("create");
    let client = StorageClient::open(Arc::new(db), "").expect("open");

    let mut tx = client.transaction();
    let big = tx
        .insert_document(
            "doc-big",
            &Document {
                metadata: vec![("x".to_string(), NumericVariant::Int(100_000))],
                ..Document::default()
            },
        )
        .expect("insert");
    let small = tx
        .insert_document(
            "doc-small",
            &Document {
                metadata: vec![("x".to_string(), NumericVariant::Int(77))],
                ..Document::default()
            },
        )
        .expect("insert");
    tx.commit().expect("commit");

    let mut alter = client.alter_metadata_table();
    alter.alter_column_type("x", MetaDataType::Int8).expect("alter");
    alter.commit().expect("commit");

    assert_eq!(NumericVariant::Int(0), client.metadata(big, "x").expect("get"));
    assert_eq!(NumericVariant::Int(77), client.metadata(small, "x").expect("get"));
}
