// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Storage configuration strings.
//!
//! Options are `name=value` pairs separated by `;`, e.g.
//! `acl=yes;metadata=date UInt32, weight Float32`.

use crate::{Error, Result};

/// Parsed `name=value` option list.
#[derive(Debug, Default)]
pub struct ConfigMap {
    items: Vec<(String, String)>,
}

impl ConfigMap {
    /// Parses a semicolon-delimited option string, validating every key
    /// against `known`.
    pub fn parse(source: &str, known: &[&str]) -> Result<Self> {
        let mut items = vec![];

        for part in source.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, value)) = part.split_once('=') else {
                return Err(Error::Config(format!("expected name=value, got '{part}'")));
            };
            let name = name.trim().to_ascii_lowercase();
            if !known.contains(&name.as_str()) {
                return Err(Error::Config(format!("unknown option '{name}'")));
            }
            items.push((name, value.trim().to_string()));
        }

        Ok(Self { items })
    }

    /// Returns the string value of an option, if set.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns a yes/no option, defaulting to `false`.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.get(name) {
            None => Ok(false),
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "yes" | "true" | "1" => Ok(true),
                "no" | "false" | "0" => Ok(false),
                other => Err(Error::Config(format!(
                    "option '{name}' expects yes/no, got '{other}'"
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn parse_create_options() {
        let cfg = ConfigMap::parse(
            "acl=yes; metadata=date UInt32, weight Float32",
            &["acl", "metadata"],
        )
        .expect("should parse");

        assert!(cfg.get_bool("acl").expect("bool"));
        assert_eq!(Some("date UInt32, weight Float32"), cfg.get("metadata"));
        assert_eq!(None, cfg.get("cachedterms"));
    }

    #[test]
    fn unknown_option_is_rejected() {
        assert!(ConfigMap::parse("frobnicate=1", &["acl"]).is_err());
    }

    #[test]
    fn malformed_pair_is_rejected() {
        assert!(ConfigMap::parse("acl", &["acl"]).is_err());
    }
}
