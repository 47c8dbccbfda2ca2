//! Query error taxonomy
//!
//! Every public engine operation returns [`QueryError`]. Client-class variants describe
//! a problem with the request (bad filter syntax, unknown keys, ambiguous metric) and
//! carry enough context for the caller to fix it. Backend failures are wrapped from
//! [`DataError`] and are fatal for the operation.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::data::DataError;

/// Structured diagnostic returned when more than one metric descriptor matches
/// a request that did not opt into aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguityDiagnostic {
    pub message: String,
    /// Breakout dimensions whose values differ across the matches
    pub names: BTreeMap<String, Vec<String>>,
    /// Distinct period ids referenced by the matches
    pub periods: Vec<String>,
}

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Unterminated quote at {expression:?}[{position}]: {fragment:?}")]
    MalformedExpression {
        expression: String,
        position: usize,
        fragment: String,
    },

    #[error("Missing delimiter from {} after {token:?} in {expression:?}", .delimiters.join(","))]
    MissingDelimiter {
        expression: String,
        delimiters: Vec<String>,
        token: String,
    },

    #[error("Filter namespace {namespace:?} must be one of {}", .allowed.join(","))]
    UnknownNamespace {
        namespace: String,
        allowed: Vec<String>,
    },

    #[error("Filter key {key:?} must be one of {}", .allowed.join(","))]
    UnknownFilterKey { key: String, allowed: Vec<String> },

    #[error("Sort key {key:?} must be one of {}", .allowed.join(","))]
    UnknownSortKey { key: String, allowed: Vec<String> },

    #[error("Sort direction {direction:?} must be one of {}", .allowed.join(","))]
    UnknownSortDirection {
        direction: String,
        allowed: Vec<String>,
    },

    #[error("Filter item {0:?} must be '<name>=<value>'")]
    InvalidBreakoutFilter(String),

    #[error("Start date {start} is after end date {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("{0}")]
    MissingScope(String),

    #[error("No matches for {metric}{} with name filter {names:?} and period filter {periods:?}", aggregate_marker(.aggregate))]
    NoMatch {
        metric: String,
        names: Vec<String>,
        periods: Vec<String>,
        aggregate: bool,
    },

    #[error("{}", .0.message)]
    AmbiguousMetric(Box<AmbiguityDiagnostic>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Data(#[from] DataError),
}

fn aggregate_marker(aggregate: &bool) -> &'static str {
    if *aggregate { "+" } else { "" }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl QueryError {
    /// Unterminated quote; `position` is the byte offset of the opening quote
    pub fn malformed_expression(expression: &str, position: usize) -> Self {
        Self::MalformedExpression {
            expression: expression.to_string(),
            position,
            fragment: expression.get(position..).unwrap_or_default().to_string(),
        }
    }

    pub fn missing_delimiter(expression: &str, delimiters: &[char], token: &str) -> Self {
        Self::MissingDelimiter {
            expression: expression.to_string(),
            delimiters: delimiters.iter().map(|d| d.to_string()).collect(),
            token: token.to_string(),
        }
    }

    pub fn unknown_namespace(namespace: &str, allowed: &[&str]) -> Self {
        Self::UnknownNamespace {
            namespace: namespace.to_string(),
            allowed: owned(allowed),
        }
    }

    pub fn unknown_filter_key(key: &str, allowed: &[&str]) -> Self {
        Self::UnknownFilterKey {
            key: key.to_string(),
            allowed: owned(allowed),
        }
    }

    pub fn unknown_sort_key(key: &str, allowed: &[&str]) -> Self {
        Self::UnknownSortKey {
            key: key.to_string(),
            allowed: owned(allowed),
        }
    }

    pub fn unknown_sort_direction(direction: &str, allowed: &[&str]) -> Self {
        Self::UnknownSortDirection {
            direction: direction.to_string(),
            allowed: owned(allowed),
        }
    }

    pub fn missing_scope(message: impl Into<String>) -> Self {
        Self::MissingScope(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn no_match(metric: &str, names: &[String], periods: &[String], aggregate: bool) -> Self {
        Self::NoMatch {
            metric: metric.to_string(),
            names: names.to_vec(),
            periods: periods.to_vec(),
            aggregate,
        }
    }

    pub fn ambiguous(diagnostic: AmbiguityDiagnostic) -> Self {
        Self::AmbiguousMetric(Box::new(diagnostic))
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedExpression { .. } => "MALFORMED_EXPRESSION",
            Self::MissingDelimiter { .. } => "MISSING_DELIMITER",
            Self::UnknownNamespace { .. } => "UNKNOWN_NAMESPACE",
            Self::UnknownFilterKey { .. } => "UNKNOWN_FILTER_KEY",
            Self::UnknownSortKey { .. } => "UNKNOWN_SORT_KEY",
            Self::UnknownSortDirection { .. } => "UNKNOWN_SORT_DIRECTION",
            Self::InvalidBreakoutFilter(_) => "INVALID_BREAKOUT_FILTER",
            Self::InvalidDateRange { .. } => "INVALID_DATE_RANGE",
            Self::MissingScope(_) => "MISSING_SCOPE",
            Self::NoMatch { .. } => "NO_MATCH",
            Self::AmbiguousMetric(_) => "AMBIGUOUS_METRIC",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Data(DataError::BackendUnavailable { .. }) => "BACKEND_UNAVAILABLE",
            Self::Data(DataError::BackendShape { .. }) => "BACKEND_SHAPE",
            Self::Data(_) => "BACKEND_ERROR",
        }
    }

    /// Whether the error was caused by the request rather than the backend
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Data(_))
    }

    /// Structured payload for errors that carry more than a message
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::AmbiguousMetric(diagnostic) => serde_json::to_value(diagnostic).ok(),
            Self::MalformedExpression {
                position, fragment, ..
            } => Some(serde_json::json!({ "position": position, "fragment": fragment })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_expression_points_at_quote() {
        let err = QueryError::malformed_expression("tag:'abc", 4);
        assert_eq!(err.to_string(), r#"Unterminated quote at "tag:'abc"[4]: "'abc""#);
        assert_eq!(err.code(), "MALFORMED_EXPRESSION");
        assert!(err.is_client_error());
    }

    #[test]
    fn unknown_key_lists_allowed_values() {
        let err = QueryError::unknown_sort_direction("up", &["asc", "desc"]);
        assert_eq!(
            err.to_string(),
            r#"Sort direction "up" must be one of asc,desc"#
        );
    }

    #[test]
    fn no_match_marks_aggregate() {
        let err = QueryError::no_match("mpstat::Busy-CPU", &[], &[], true);
        assert!(err.to_string().starts_with("No matches for mpstat::Busy-CPU+"));
    }

    #[test]
    fn ambiguous_metric_exposes_details() {
        let err = QueryError::ambiguous(AmbiguityDiagnostic {
            message: "More than one metric (2) probably means you should add filters".into(),
            names: BTreeMap::from([("cpu".to_string(), vec!["3".into(), "4".into()])]),
            periods: vec![],
        });
        let details = err.details().unwrap();
        assert_eq!(details["names"]["cpu"], serde_json::json!(["3", "4"]));
        assert_eq!(err.code(), "AMBIGUOUS_METRIC");
    }

    #[test]
    fn backend_errors_are_not_client_errors() {
        let err: QueryError = DataError::backend_unavailable("opensearch", "refused").into();
        assert!(!err.is_client_error());
        assert_eq!(err.code(), "BACKEND_UNAVAILABLE");
    }
}
