// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A typed numeric value as read from or written to a metadata column.
///
/// `Null` clears a field on write and is returned for empty records.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum NumericVariant {
    /// Undefined value
    #[default]
    Null,
    /// Signed integer
    Int(i64),
    /// Unsigned integer
    UInt(u64),
    /// Floating point
    Float(f64),
}

impl NumericVariant {
    /// Returns the value as a signed integer, with the natural lossy cast.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn to_int(self) -> i64 {
        match self {
            Self::Null => 0,
            Self::Int(v) => v,
            Self::UInt(v) => v as i64,
            Self::Float(v) => v as i64,
        }
    }

    /// Returns the value as an unsigned integer, with the natural lossy cast.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_uint(self) -> u64 {
        match self {
            Self::Null => 0,
            Self::Int(v) => v as u64,
            Self::UInt(v) => v,
            Self::Float(v) => v as u64,
        }
    }

    /// Returns the value as a float, with the natural lossy cast.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_float(self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Int(v) => v as f64,
            Self::UInt(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Whether the value is defined.
    #[must_use]
    pub fn is_defined(self) -> bool {
        !matches!(self, Self::Null)
    }
}

impl std::fmt::Display for NumericVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for NumericVariant {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for NumericVariant {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u32> for NumericVariant {
    fn from(value: u32) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<i32> for NumericVariant {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for NumericVariant {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for NumericVariant {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}
