// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::element::{MetaDataElement, MetaDataType};
use crate::{Error, Result};

/// Description of a metadata record structure: a named, ordered list
/// of typed columns.
///
/// Byte offsets are assigned so that wider fields precede narrower
/// ones, giving natural alignment inside the record. The record width
/// is rounded up to 4 bytes, minimum 1. Serialized as a
/// comma-separated `"<name> <type>"` list.
#[derive(Clone, Debug, Default)]
pub struct MetaDataDescription {
    // definition order; offsets are derived
    columns: Vec<(String, MetaDataElement)>,
    bytesize: usize,
}

/// Per-destination-column source handle used by the alter-table block
/// rewrite; `None` zeroes the column. Indexed by destination handle.
pub type TranslationMap = Vec<Option<usize>>;

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl MetaDataDescription {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a schema string like `"date UInt32, weight Float32"`.
    pub fn from_string(source: &str) -> Result<Self> {
        let mut descr = Self::new();
        for part in source.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, type_name)) = part.split_once(char::is_whitespace) else {
                return Err(Error::Config(format!(
                    "invalid metadata column definition '{part}'"
                )));
            };
            descr.add(MetaDataType::from_name(type_name.trim())?, name.trim())?;
        }
        Ok(descr)
    }

    /// Serializes the schema string.
    #[must_use]
    pub fn to_string_repr(&self) -> String {
        self.columns
            .iter()
            .map(|(name, elem)| format!("{name} {}", elem.type_().name()))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Appends a column and reassigns all offsets.
    ///
    /// Column names are case-insensitive identifiers (`[a-z0-9_]+`).
    pub fn add(&mut self, type_: MetaDataType, name: &str) -> Result<()> {
        let name = name.to_ascii_lowercase();
        if !is_identifier(&name) {
            return Err(Error::Config(format!("invalid column name '{name}'")));
        }
        if self.has(&name) {
            return Err(Error::Config(format!("duplicate column '{name}'")));
        }
        self.columns
            .push((name, MetaDataElement::new(type_, 0)));
        self.reassign_offsets();
        Ok(())
    }

    fn reassign_offsets(&mut self) {
        // wider fields first; the sort is stable so equally wide
        // fields keep definition order
        let mut order = (0..self.columns.len()).collect::<Vec<_>>();
        order.sort_by_key(|&i| std::cmp::Reverse(self.columns[i].1.bytesize()));

        let mut ofs = 0;
        for i in order {
            let type_ = self.columns[i].1.type_();
            self.columns[i].1 = MetaDataElement::new(type_, ofs);
            ofs += type_.bytesize();
        }
        self.bytesize = ofs;
    }

    /// Number of columns.
    #[must_use]
    pub fn nof_elements(&self) -> usize {
        self.columns.len()
    }

    /// Record width in bytes, 4-byte aligned, minimum 1.
    #[must_use]
    pub fn bytesize(&self) -> usize {
        if self.bytesize == 0 {
            1
        } else {
            (self.bytesize + 3) & !3
        }
    }

    /// Whether a column of this name exists.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.columns.iter().any(|(n, _)| *n == name)
    }

    /// Handle (index) of a column.
    pub fn handle(&self, name: &str) -> Result<usize> {
        let lower = name.to_ascii_lowercase();
        self.columns
            .iter()
            .position(|(n, _)| *n == lower)
            .ok_or_else(|| Error::MetaDataUnknownColumn(name.to_string()))
    }

    /// Column element by handle.
    pub fn element(&self, handle: usize) -> Result<&MetaDataElement> {
        self.columns
            .get(handle)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::MetaDataUnknownColumn(format!("#{handle}")))
    }

    /// Column name by handle.
    pub fn name(&self, handle: usize) -> Result<&str> {
        self.columns
            .get(handle)
            .map(|(n, _)| n.as_str())
            .ok_or_else(|| Error::MetaDataUnknownColumn(format!("#{handle}")))
    }

    /// Iterates `(name, element)` pairs in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaDataElement)> {
        self.columns.iter().map(|(n, e)| (n.as_str(), e))
    }

    /// Renames a column in place.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let new = new.to_ascii_lowercase();
        if !is_identifier(&new) {
            return Err(Error::Config(format!("invalid column name '{new}'")));
        }
        if self.has(&new) {
            return Err(Error::Config(format!("duplicate column '{new}'")));
        }
        let handle = self.handle(old)?;
        self.columns[handle].0 = new;
        Ok(())
    }

    /// Removes a column and reassigns all offsets.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let handle = self.handle(name)?;
        self.columns.remove(handle);
        self.reassign_offsets();
        Ok(())
    }

    /// Changes a column's type and reassigns all offsets.
    pub fn alter_type(&mut self, name: &str, type_: MetaDataType) -> Result<()> {
        let handle = self.handle(name)?;
        self.columns[handle].1 = MetaDataElement::new(type_, 0);
        self.reassign_offsets();
        Ok(())
    }

    /// Builds the per-column source mapping for a block rewrite from
    /// `src`. `origin` gives, per destination column, the name the
    /// column had in `src` (normally its own name, different after a
    /// rename); columns listed in `resets` are zeroed.
    pub fn translation_from(
        &self,
        src: &Self,
        origin: &[Option<String>],
        resets: &[String],
    ) -> Result<TranslationMap> {
        let mut map = vec![];
        for (handle, (name, _)) in self.columns.iter().enumerate() {
            let src_handle = if resets.contains(name) {
                None
            } else {
                match origin.get(handle).and_then(Option::as_deref) {
                    Some(src_name) if src.has(src_name) => Some(src.handle(src_name)?),
                    _ => None,
                }
            };
            map.push(src_handle);
        }
        Ok(map)
    }
}

// equal iff the same ordered list of (name, type) pairs
impl PartialEq for MetaDataDescription {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|((an, ae), (bn, be))| an == bn && ae.type_() == be.type_())
    }
}

impl Eq for MetaDataDescription {}
