// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::meta::MetaDataType;

/// Represents errors that can occur in the index storage
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// A database key could not be parsed back into its components
    KeyMalformed,

    /// A database key tuple exceeds the maximum encoded key size
    KeyOverflow,

    /// A block payload violates its encoding invariant
    BlockCorrupt(&'static str),

    /// A value was assigned to a metadata column that cannot represent it
    MetaDataOutOfRange(MetaDataType),

    /// A metadata column name is not part of the table description
    MetaDataUnknownColumn(String),

    /// The dictionary exceeded its addressable node space
    DictOverflow,

    /// A dictionary walk ended on an impossible node
    ///
    /// This happens when a non-UTF-8 key collides with the terminal
    /// sentinel byte.
    CorruptTrie,

    /// An input vector does not match the LSH model dimension (expected, got)
    DimensionMismatch(usize, usize),

    /// The transaction failed earlier and can no longer be used
    TransactionAborted,

    /// The underlying key/value store returned a failure
    Database(String),

    /// Missing or malformed configuration
    Config(String),

    /// The storage was created by an incompatible version (stored, supported)
    VersionMismatch(u32, u32),

    /// The storage was created on a platform with a different byte order
    ByteOrderMismatch,

    /// `fetch` was called on a forward iterator that is not positioned
    ForwardIteratorUnpositioned,

    /// A stubbed operation was invoked
    NotImplemented(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TermIndexError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Storage result
pub type Result<T> = std::result::Result<T, Error>;
