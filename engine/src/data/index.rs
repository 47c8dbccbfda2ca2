//! CDM index naming and resolution
//!
//! Two storage generations coexist:
//! - Legacy: one flat index per collection (`cdmv7dev-run`)
//! - Sharded: one index per collection per calendar month (`cdm-v9dev-run@2025.01`)
//!
//! The active generation is probed once when the service connects and threaded
//! through [`IndexResolver`].

use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;

use super::fullid::FullId;
use crate::domain::QueryError;

static SHARDED_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^cdm-(?P<version>[^-@]+)-(?P<collection>[a-z_]+)@(?P<shard>\d{4}\.\d{2})$")
        .expect("valid sharded index regex")
});

static LEGACY_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^cdm(?P<version>[^-@]+)-(?P<collection>[a-z_]+)$")
        .expect("valid legacy index regex")
});

/// CDM document collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Run,
    Iteration,
    Sample,
    Period,
    Tag,
    Param,
    MetricDesc,
    MetricData,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Iteration => "iteration",
            Self::Sample => "sample",
            Self::Period => "period",
            Self::Tag => "tag",
            Self::Param => "param",
            Self::MetricDesc => "metric_desc",
            Self::MetricData => "metric_data",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical storage layout of the CDM data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaGeneration {
    Legacy { version: String },
    Sharded { version: String },
}

impl SchemaGeneration {
    pub fn version(&self) -> &str {
        match self {
            Self::Legacy { version } | Self::Sharded { version } => version,
        }
    }

    pub fn is_sharded(&self) -> bool {
        matches!(self, Self::Sharded { .. })
    }
}

impl fmt::Display for SchemaGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy { version } => write!(f, "legacy ({})", version),
            Self::Sharded { version } => write!(f, "sharded ({})", version),
        }
    }
}

/// Index name for a legacy collection
pub fn legacy_index(version: &str, collection: Collection) -> String {
    format!("cdm{}-{}", version, collection)
}

/// Index name for one monthly shard of a collection
pub fn shard_index(version: &str, collection: Collection, shard: &str) -> String {
    format!("cdm-{}-{}@{}", version, collection, shard)
}

/// Wildcard matching every monthly shard of a collection
pub fn shard_pattern(version: &str, collection: Collection) -> String {
    format!("cdm-{}-{}@*", version, collection)
}

/// Shard key (`YYYY.MM`) for the month containing `date`
pub fn month_shard(date: NaiveDate) -> String {
    format!("{:04}.{:02}", date.year(), date.month())
}

/// Components recovered from a concrete index name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIndex {
    pub version: String,
    pub collection: String,
    /// Empty for legacy indices
    pub shard: String,
}

/// Parse a concrete (non-wildcard) CDM index name
pub fn parse_index_name(name: &str) -> Option<ParsedIndex> {
    if let Some(caps) = SHARDED_INDEX.captures(name) {
        return Some(ParsedIndex {
            version: caps["version"].to_string(),
            collection: caps["collection"].to_string(),
            shard: caps["shard"].to_string(),
        });
    }
    LEGACY_INDEX.captures(name).map(|caps| ParsedIndex {
        version: caps["version"].to_string(),
        collection: caps["collection"].to_string(),
        shard: String::new(),
    })
}

/// Concrete index, explicit shard list, or wildcard pattern to search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTarget {
    Single(String),
    Shards(Vec<String>),
    Pattern(String),
}

impl IndexTarget {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Single(name) | Self::Pattern(name) => vec![name.as_str()],
            Self::Shards(names) => names.iter().map(String::as_str).collect(),
        }
    }

    /// Comma-joined form used in the search URL path
    pub fn to_path(&self) -> String {
        self.names().join(",")
    }
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

/// Maps collections, date ranges and FullIDs to backend indices
#[derive(Debug, Clone)]
pub struct IndexResolver {
    generation: SchemaGeneration,
}

impl IndexResolver {
    pub fn new(generation: SchemaGeneration) -> Self {
        Self { generation }
    }

    pub fn generation(&self) -> &SchemaGeneration {
        &self.generation
    }

    /// Resolve the indices holding `collection`
    ///
    /// A FullID always wins: it names the exact version and shard. Otherwise
    /// legacy data lives in one index, and sharded data is selected by month.
    /// Without a start date every shard is searched; a missing end date
    /// extends the range to today.
    pub fn resolve(
        &self,
        collection: Collection,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        ref_id: Option<&FullId>,
    ) -> Result<IndexTarget, QueryError> {
        if let Some(id) = ref_id {
            return Ok(IndexTarget::Single(id.index_for(collection)));
        }

        let version = match &self.generation {
            SchemaGeneration::Legacy { version } => {
                return Ok(IndexTarget::Single(legacy_index(version, collection)));
            }
            SchemaGeneration::Sharded { version } => version,
        };

        let Some(start) = start else {
            return Ok(IndexTarget::Pattern(shard_pattern(version, collection)));
        };
        let end = end.unwrap_or_else(|| Utc::now().date_naive());
        if start > end {
            return Err(QueryError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }

        let shards = months_between(start, end)
            .into_iter()
            .map(|shard| shard_index(version, collection, &shard))
            .collect();
        Ok(IndexTarget::Shards(shards))
    }
}

/// Inclusive list of month shard keys from `start` to `end`
fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let (mut year, mut month) = (start.year(), start.month());
    let last = (end.year(), end.month());
    let mut shards = Vec::new();
    loop {
        shards.push(format!("{:04}.{:02}", year, month));
        if (year, month) >= last {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    shards
}
