//! Fully qualified CDM entity ids
//!
//! A FullID pins an entity to the exact index that stores it:
//! `<raw-id>@<schema-version>@<shard-key>`. Legacy entities carry an empty shard key.

use std::fmt;
use std::str::FromStr;

use super::index::{Collection, legacy_index, parse_index_name, shard_index};
use crate::domain::QueryError;

const SEPARATOR: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FullId {
    pub raw: String,
    pub version: String,
    pub shard: String,
}

impl FullId {
    pub fn new(raw: impl Into<String>, version: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            version: version.into(),
            shard: shard.into(),
        }
    }

    /// Build a FullID for an entity found in `index`
    ///
    /// Returns `None` when the index name is not a concrete CDM index.
    pub fn from_index(raw: &str, index: &str) -> Option<Self> {
        parse_index_name(index).map(|parsed| Self::new(raw, parsed.version, parsed.shard))
    }

    pub fn render(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.raw,
            self.version,
            self.shard,
            sep = SEPARATOR
        )
    }

    pub fn decode(text: &str) -> Result<Self, QueryError> {
        let parts: Vec<&str> = text.split(SEPARATOR).collect();
        match parts.as_slice() {
            [raw, version, shard] if !raw.is_empty() && !version.is_empty() => {
                Ok(Self::new(*raw, *version, *shard))
            }
            _ => Err(QueryError::not_found(format!("malformed id {:?}", text))),
        }
    }

    /// Whether an id string is in FullID form rather than a plain raw id
    pub fn is_full(text: &str) -> bool {
        text.contains(SEPARATOR)
    }

    pub fn is_legacy(&self) -> bool {
        self.shard.is_empty()
    }

    /// Exact index holding `collection` documents for this id's version and shard
    pub fn index_for(&self, collection: Collection) -> String {
        if self.is_legacy() {
            legacy_index(&self.version, collection)
        } else {
            shard_index(&self.version, collection, &self.shard)
        }
    }
}

impl fmt::Display for FullId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for FullId {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
