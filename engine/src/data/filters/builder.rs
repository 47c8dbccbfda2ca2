//! Query filter builder
//!
//! Compiles parsed terms, breakout filters, period filters and sort keys into
//! backend query clauses. Includes field allow-lists.

use serde_json::{Value, json};

use crate::domain::QueryError;

use super::types::{BoolQuery, FilterSet, Namespace, SortDirection, SortTerm, Term};

/// Field allow-lists
pub mod columns {
    /// Run fields usable in `run:` filters and sort keys
    pub const RUN_FIELDS: &[&str] = &[
        "benchmark",
        "begin",
        "desc",
        "email",
        "end",
        "harness",
        "host",
        "id",
        "name",
        "source",
    ];
}

/// Build the per-namespace queries for a list of terms
///
/// Terms in the same `param`/`tag` namespace are ORed: a run qualifies when it
/// carries any of them. `run` terms are ANDed.
pub fn build_filters(terms: &[Term]) -> Result<FilterSet, QueryError> {
    let mut set = FilterSet::default();

    for term in terms {
        match term.namespace {
            Namespace::Run => {
                if !columns::RUN_FIELDS.contains(&term.key.as_str()) {
                    return Err(QueryError::unknown_filter_key(
                        &term.key,
                        columns::RUN_FIELDS,
                    ));
                }
                set.run
                    .push_filter(term.op.clause(&format!("run.{}", term.key), &term.value));
            }
            Namespace::Param => {
                push_should(
                    set.param.get_or_insert_with(BoolQuery::new),
                    pair_clause("param.arg", "param.val", term),
                );
            }
            Namespace::Tag => {
                push_should(
                    set.tag.get_or_insert_with(BoolQuery::new),
                    pair_clause("tag.name", "tag.val", term),
                );
            }
        }
    }

    Ok(set)
}

fn push_should(query: &mut BoolQuery, clause: Value) {
    query.should.push(clause);
    query.minimum_should_match = Some(1);
}

/// Exact name match combined with the term's value match
fn pair_clause(name_field: &str, value_field: &str, term: &Term) -> Value {
    json!({ "bool": { "filter": [
        { "term": { name_field: term.key } },
        term.op.clause(value_field, &term.value),
    ]}})
}

/// Exact-match clauses for `name=value` breakout filters (always ANDed)
pub fn build_name_filters(names: &[String]) -> Result<Vec<Value>, QueryError> {
    names
        .iter()
        .map(|item| {
            let (name, value) = item
                .split_once('=')
                .ok_or_else(|| QueryError::InvalidBreakoutFilter(item.clone()))?;
            Ok(json!({ "term": { format!("metric_desc.names.{}", name): value } }))
        })
        .collect()
}

/// Descriptor clause for period filters
///
/// Matches descriptors that carry no period, or whose period is one of `periods`.
pub fn build_period_filter(periods: &[String]) -> Option<Value> {
    if periods.is_empty() {
        return None;
    }
    Some(json!({ "bool": {
        "should": [
            { "bool": { "must_not": [{ "exists": { "field": "period" } }] } },
            { "terms": { "period.id": periods } },
        ],
        "minimum_should_match": 1
    }}))
}

/// Parse and validate `key[:direction]` sort terms against the run fields
pub fn build_sort_terms(keys: &[String]) -> Result<Vec<SortTerm>, QueryError> {
    keys.iter()
        .filter(|key| !key.is_empty())
        .map(|key| {
            let (field, direction) = match key.split_once(':') {
                Some((field, direction)) => (field, direction),
                None => (key.as_str(), "asc"),
            };
            if !columns::RUN_FIELDS.contains(&field) {
                return Err(QueryError::unknown_sort_key(field, columns::RUN_FIELDS));
            }
            let direction = SortDirection::parse(direction).ok_or_else(|| {
                QueryError::unknown_sort_direction(direction, SortDirection::ALL)
            })?;
            Ok(SortTerm {
                field: field.to_string(),
                direction,
            })
        })
        .collect()
}
