//! Filter type definitions
//!
//! Terms parsed from the filter mini-language and the boolean query shape
//! they are compiled into.

use std::fmt;

use serde_json::{Map, Value, json};

/// Entity a filter term applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Param,
    Tag,
    Run,
}

impl Namespace {
    pub const ALL: &'static [&'static str] = &["param", "tag", "run"];

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "param" => Some(Self::Param),
            "tag" => Some(Self::Tag),
            "run" => Some(Self::Run),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Param => "param",
            Self::Tag => "tag",
            Self::Run => "run",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOp {
    /// `=`: exact keyword match
    Exact,
    /// `~`: substring regular expression
    Regex,
}

impl TermOp {
    pub fn from_delimiter(delimiter: char) -> Option<Self> {
        match delimiter {
            '=' => Some(Self::Exact),
            '~' => Some(Self::Regex),
            _ => None,
        }
    }

    /// Query clause matching `field` against `value`
    pub fn clause(&self, field: &str, value: &str) -> Value {
        match self {
            Self::Exact => json!({ "term": { field: value } }),
            Self::Regex => json!({ "regexp": { field: format!(".*{}.*", value) } }),
        }
    }
}

/// One parsed filter atom: `namespace:key<op>value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub namespace: Namespace,
    pub key: String,
    pub op: TermOp,
    pub value: String,
}

/// Boolean query: `filter` clauses are ANDed, `should` clauses ORed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub filter: Vec<Value>,
    pub must_not: Vec<Value>,
    pub should: Vec<Value>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an AND clause
    pub fn with_filter(mut self, clause: Value) -> Self {
        self.filter.push(clause);
        self
    }

    pub fn push_filter(&mut self, clause: Value) {
        self.filter.push(clause);
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.must_not.is_empty() && self.should.is_empty()
    }

    /// Render as a `{"bool": {...}}` query, omitting empty sections
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if !self.filter.is_empty() {
            body.insert("filter".to_string(), Value::Array(self.filter.clone()));
        }
        if !self.must_not.is_empty() {
            body.insert("must_not".to_string(), Value::Array(self.must_not.clone()));
        }
        if !self.should.is_empty() {
            body.insert("should".to_string(), Value::Array(self.should.clone()));
        }
        if let Some(msm) = self.minimum_should_match {
            body.insert("minimum_should_match".to_string(), json!(msm));
        }
        json!({ "bool": body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const ALL: &'static [&'static str] = &["asc", "desc"];

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Validated run sort key (`begin:desc`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortTerm {
    pub field: String,
    pub direction: SortDirection,
}

impl SortTerm {
    pub fn to_json(&self) -> Value {
        json!({ format!("run.{}", self.field): { "order": self.direction.as_str() } })
    }
}

/// Compiled filters, one query per namespace
///
/// `param` and `tag` are resolved against their own collections to run-id sets;
/// `run` applies directly to the run collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub run: BoolQuery,
    pub param: Option<BoolQuery>,
    pub tag: Option<BoolQuery>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bool_query_renders_empty_body() {
        assert_eq!(BoolQuery::new().to_json(), json!({ "bool": {} }));
        assert!(BoolQuery::new().is_empty());
    }

    #[test]
    fn bool_query_renders_sections() {
        let mut query = BoolQuery::new().with_filter(json!({ "term": { "run.id": "r1" } }));
        query.should.push(json!({ "term": { "tag.name": "a" } }));
        query.minimum_should_match = Some(1);
        assert_eq!(
            query.to_json(),
            json!({ "bool": {
                "filter": [{ "term": { "run.id": "r1" } }],
                "should": [{ "term": { "tag.name": "a" } }],
                "minimum_should_match": 1
            }})
        );
    }

    #[test]
    fn regex_op_wraps_value() {
        assert_eq!(
            TermOp::Regex.clause("run.name", "bob"),
            json!({ "regexp": { "run.name": ".*bob.*" } })
        );
        assert_eq!(
            TermOp::Exact.clause("run.name", "bob"),
            json!({ "term": { "run.name": "bob" } })
        );
    }

    #[test]
    fn sort_term_json() {
        let term = SortTerm {
            field: "begin".to_string(),
            direction: SortDirection::Desc,
        };
        assert_eq!(term.to_json(), json!({ "run.begin": { "order": "desc" } }));
    }
}
