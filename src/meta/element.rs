// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Error, Result};

/// Column type of a metadata table
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MetaDataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float16,
    Float32,
}

impl MetaDataType {
    /// Field width in bytes.
    #[must_use]
    pub fn bytesize(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
        }
    }

    /// Canonical type name as used in schema strings.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8",
            Self::UInt8 => "UInt8",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Float16 => "Float16",
            Self::Float32 => "Float32",
        }
    }

    /// Parses a type name (case-insensitive).
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "int8" => Ok(Self::Int8),
            "uint8" => Ok(Self::UInt8),
            "int16" => Ok(Self::Int16),
            "uint16" => Ok(Self::UInt16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::UInt32),
            "float16" => Ok(Self::Float16),
            "float32" => Ok(Self::Float32),
            _ => Err(Error::Config(format!("unknown metadata type '{name}'"))),
        }
    }

    /// Whether the type holds integral values.
    #[must_use]
    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float16 | Self::Float32)
    }
}

impl std::fmt::Display for MetaDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One column of a metadata record: type plus byte offset inside the
/// record
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetaDataElement {
    type_: MetaDataType,
    ofs: usize,
}

impl MetaDataElement {
    pub(crate) fn new(type_: MetaDataType, ofs: usize) -> Self {
        Self { type_, ofs }
    }

    #[must_use]
    pub fn type_(&self) -> MetaDataType {
        self.type_
    }

    #[must_use]
    pub fn ofs(&self) -> usize {
        self.ofs
    }

    #[must_use]
    pub fn bytesize(&self) -> usize {
        self.type_.bytesize()
    }
}
