// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Database key construction and parsing.
//!
//! A key is a single prefix byte identifying the table, followed by
//! packed unsigned integers and/or raw name bytes. Integer components
//! use the order-preserving codec from [`crate::coding`], so keys of
//! the same family compare byte-wise in tuple order.

use crate::coding::{pack_uint, unpack_uint};
use crate::{Error, Index, Result};

/// Maximum encoded key size in bytes
pub const MAX_KEY_SIZE: usize = 64;

/// Identifies the table a key belongs to
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum KeyPrefix {
    /// `[type string] -> [typeno]`
    TermType = b'T',
    /// `[term string] -> [termno]`
    TermValue = b'I',
    /// `[docid string] -> [docno]`
    DocId = b'D',
    /// `[variable string] -> [counter]`
    Variable = b'V',
    /// `[attribute string] -> [attribno]`
    AttributeKey = b'A',
    /// `[user string] -> [userno]`
    UserName = b'U',
    /// `[typeno, docno, anchor pos] -> [(pos, value)*]`
    ForwardIndex = b'r',
    /// `[typeno, termno, anchor docno] -> [(docno, ff, pos*)*]`
    PosinfoBlock = b'p',
    /// `[docno] -> [(typeno, termno, ff, firstpos)*]`
    InverseTerm = b'i',
    /// `[userno, anchor docno] -> [docno range*]`
    UserAclBlock = b'u',
    /// `[docno, anchor userno] -> [userno range*]`
    AclBlock = b'w',
    /// `[typeno, termno, anchor docno] -> [docno range*]`
    DocListBlock = b'd',
    /// `[blockno] -> [metadata record*]`
    DocMetaData = b'm',
    /// `[docno, attribno] -> [attribute string]`
    DocAttribute = b'a',
    /// `[typeno, termno] -> [df]`
    DocFrequency = b'f',
    /// `[] -> [schema string]`
    MetaDataDescr = b'M',
}

impl KeyPrefix {
    /// Human readable name of the key family (used by the dump/check tools).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TermType => "term type",
            Self::TermValue => "term value",
            Self::DocId => "docid",
            Self::Variable => "global variable",
            Self::AttributeKey => "attribute name",
            Self::UserName => "user name",
            Self::ForwardIndex => "forward index",
            Self::PosinfoBlock => "posinfo posting block",
            Self::InverseTerm => "inverse term block",
            Self::UserAclBlock => "user ACL block",
            Self::AclBlock => "inverted ACL block",
            Self::DocListBlock => "doc posting block",
            Self::DocMetaData => "metadata block",
            Self::DocAttribute => "document attribute",
            Self::DocFrequency => "term document frequency",
            Self::MetaDataDescr => "metadata description",
        }
    }

    /// All defined key families.
    pub const ALL: [Self; 16] = [
        Self::TermType,
        Self::TermValue,
        Self::DocId,
        Self::Variable,
        Self::AttributeKey,
        Self::UserName,
        Self::ForwardIndex,
        Self::PosinfoBlock,
        Self::InverseTerm,
        Self::UserAclBlock,
        Self::AclBlock,
        Self::DocListBlock,
        Self::DocMetaData,
        Self::DocAttribute,
        Self::DocFrequency,
        Self::MetaDataDescr,
    ];
}

impl TryFrom<u8> for KeyPrefix {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| *p as u8 == value)
            .ok_or(Error::KeyMalformed)
    }
}

/// A database key under construction.
///
/// Supports truncating back to an earlier size so that one buffer can
/// be reused for all keys of a family (the family part stays, the
/// last component is rewritten per operation).
#[derive(Clone, Debug)]
pub struct DatabaseKey {
    buf: Vec<u8>,
}

impl DatabaseKey {
    /// Creates a key holding only the table prefix.
    #[must_use]
    pub fn new(prefix: KeyPrefix) -> Self {
        Self {
            buf: vec![prefix as u8],
        }
    }

    /// Creates a key of `prefix` followed by packed integer components.
    pub fn with_elems(prefix: KeyPrefix, elems: &[Index]) -> Result<Self> {
        let mut key = Self::new(prefix);
        for &e in elems {
            key.add_elem(e)?;
        }
        Ok(key)
    }

    /// Appends a packed integer component.
    pub fn add_elem(&mut self, idx: Index) -> Result<()> {
        pack_uint(&mut self.buf, idx);
        if self.buf.len() > MAX_KEY_SIZE {
            return Err(Error::KeyOverflow);
        }
        Ok(())
    }

    /// Appends raw name bytes (always the last component of a key).
    pub fn add_name(&mut self, name: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(name);
        if self.buf.len() > MAX_KEY_SIZE {
            return Err(Error::KeyOverflow);
        }
        Ok(())
    }

    /// Truncates the key back to `n` bytes.
    pub fn resize(&mut self, n: usize) {
        self.buf.truncate(n);
    }

    #[must_use]
    pub fn prefix(&self) -> u8 {
        self.buf.first().copied().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for DatabaseKey {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

/// Parser over the components of a stored key.
pub struct KeyParser<'a> {
    data: &'a [u8],
}

impl<'a> KeyParser<'a> {
    /// Starts parsing after validating the expected table prefix.
    pub fn new(key: &'a [u8], expected: KeyPrefix) -> Result<Self> {
        let (&first, rest) = key.split_first().ok_or(Error::KeyMalformed)?;
        if first != expected as u8 {
            return Err(Error::KeyMalformed);
        }
        Ok(Self { data: rest })
    }

    /// Parses the next packed integer component.
    pub fn elem(&mut self) -> Result<Index> {
        unpack_uint(&mut self.data)
    }

    /// Consumes the rest of the key as a name.
    #[must_use]
    pub fn remainder(self) -> &'a [u8] {
        self.data
    }

    /// Returns an error if components remain unparsed.
    pub fn expect_end(self) -> Result<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(Error::KeyMalformed)
        }
    }
}

/// Builds the key of a dictionary entry (`T`, `I`, `D`, `V`, `A`, `U` families).
pub fn name_key(prefix: KeyPrefix, name: &[u8]) -> Result<DatabaseKey> {
    let mut key = DatabaseKey::new(prefix);
    key.add_name(name)?;
    Ok(key)
}
