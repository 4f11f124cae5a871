// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Named storage variables under the `V` key family: monotonic id
//! counters, the global document count, the byte-order mark and the
//! storage format version, all stored as packed integers.

use crate::coding::{pack_uint64, unpack_uint64};
use crate::database::{DatabaseClient, DatabaseTransaction};
use crate::key::{name_key, KeyPrefix};
use crate::{Error, Result};

pub const VAR_TERMNO: &str = "TermNo";
pub const VAR_TYPENO: &str = "TypeNo";
pub const VAR_DOCNO: &str = "DocNo";
pub const VAR_ATTRIBNO: &str = "AttribNo";
pub const VAR_USERNO: &str = "UserNo";
pub const VAR_NOF_DOCS: &str = "NofDocs";
pub const VAR_BYTE_ORDER_MARK: &str = "ByteOrderMark";
pub const VAR_VERSION: &str = "Version";
pub const VAR_COMMITNO: &str = "CommitNo";

/// Storage format version, stored as `major * 1000 + minor`.
pub const STORAGE_VERSION_MAJOR: u32 = 0;
pub const STORAGE_VERSION_MINOR: u32 = 1;

/// The four bytes 0x01,0x02,0x03,0x04 read as a native u32; written
/// at create time and compared at open time to refuse storages
/// written with a different byte order.
#[must_use]
pub fn byte_order_mark() -> u32 {
    u32::from_ne_bytes([1, 2, 3, 4])
}

/// Reads a variable, or `None` if it was never written.
pub fn read(db: &dyn DatabaseClient, name: &str) -> Result<Option<u64>> {
    let key = name_key(KeyPrefix::Variable, name.as_bytes())?;
    match db.read_value(key.as_bytes())? {
        Some(value) => {
            let mut tail = &*value;
            let v = unpack_uint64(&mut tail)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

/// Reads a variable that must exist.
pub fn read_required(db: &dyn DatabaseClient, name: &str) -> Result<u64> {
    read(db, name)?.ok_or_else(|| Error::Database(format!("missing storage variable '{name}'")))
}

/// Stages a variable write into the batch.
pub fn write(batch: &mut dyn DatabaseTransaction, name: &str, value: u64) -> Result<()> {
    let key = name_key(KeyPrefix::Variable, name.as_bytes())?;
    let mut buf = vec![];
    pack_uint64(&mut buf, value);
    batch.put(key.as_bytes(), &buf);
    Ok(())
}
