//! Metric resolution and time-series retrieval
//!
//! A metric is addressed by its `source::type` label within one run. Several
//! descriptors usually share a label, distinguished by their breakout names
//! (`cpu=3`, `type=usr`) and period. Unless the caller asks for aggregation,
//! exactly one descriptor must match; otherwise the caller gets a diagnostic
//! listing the breakout dimensions that still vary.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::data::documents::{MetricDataDoc, MetricDescDoc, PeriodDoc};
use crate::data::filters::{BoolQuery, build_name_filters, build_period_filter};
use crate::data::{Collection, DataError, IndexTarget, SearchRequest};
use crate::utils::time::millis_to_datetime;

use super::context::{EntityRef, QueryContext};
use super::error::{AmbiguityDiagnostic, QueryError};

/// Smallest histogram interval used when aligning series (milliseconds)
const MIN_INTERVAL_MS: i64 = 1;

/// One metric request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Run id; graph requests may fall back to a request-level run
    #[serde(default)]
    pub run: Option<String>,
    /// `source::type` label
    pub metric: String,
    /// Breakout filters (`name=value`)
    #[serde(default)]
    pub names: Vec<String>,
    /// Period id filters
    #[serde(default)]
    pub periods: Vec<String>,
    /// Sum all matching descriptors instead of requiring exactly one
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default)]
    pub title: Option<String>,
}

/// One sample of a metric time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub begin: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Seconds
    pub duration: f64,
    pub value: f64,
}

/// Breakout overview of one metric label within a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricListing {
    pub label: String,
    pub periods: Vec<String>,
    pub names: BTreeMap<String, Vec<String>>,
}

/// Remaining breakout choices for a partially filtered metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakouts {
    pub label: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub class: Option<String>,
    pub names: BTreeMap<String, Vec<String>>,
    pub periods: Vec<String>,
}

/// Split a `source::type` label
fn split_label(label: &str) -> Option<(&str, &str)> {
    label
        .split_once("::")
        .filter(|(source, kind)| !source.is_empty() && !kind.is_empty())
}

/// Descriptors of `label` in `run` matching the breakout and period filters
async fn find_descriptors(
    ctx: &QueryContext,
    run: &EntityRef,
    label: &str,
    names: &[String],
    periods: &[String],
    aggregate: bool,
) -> Result<Vec<MetricDescDoc>, QueryError> {
    let Some((source, kind)) = split_label(label) else {
        return Err(QueryError::no_match(label, names, periods, aggregate));
    };

    let mut query = BoolQuery::new()
        .with_filter(json!({ "term": { "run.id": run.raw } }))
        .with_filter(json!({ "term": { "metric_desc.source": source } }))
        .with_filter(json!({ "term": { "metric_desc.type": kind } }));
    for clause in build_name_filters(names)? {
        query.push_filter(clause);
    }
    if let Some(clause) = build_period_filter(periods) {
        query.push_filter(clause);
    }

    let index = ctx.scoped_target(Collection::MetricDesc, &[Some(run)])?;
    ctx.search_all(SearchRequest::new(Collection::MetricDesc, index, query))
        .await
}

/// Resolve a metric request to descriptor ids
pub async fn resolve_ids(
    ctx: &QueryContext,
    run: &EntityRef,
    label: &str,
    names: &[String],
    periods: &[String],
    aggregate: bool,
) -> Result<Vec<String>, QueryError> {
    let descriptors = find_descriptors(ctx, run, label, names, periods, aggregate).await?;
    select_ids(label, names, periods, aggregate, &descriptors)
}

/// Apply the single-match policy to a descriptor set
fn select_ids(
    label: &str,
    names: &[String],
    periods: &[String],
    aggregate: bool,
    descriptors: &[MetricDescDoc],
) -> Result<Vec<String>, QueryError> {
    match descriptors {
        [] => Err(QueryError::no_match(label, names, periods, aggregate)),
        [single] => Ok(vec![single.metric_desc.id.clone()]),
        many if !aggregate => {
            let breakouts = collect_breakouts(many);
            tracing::debug!(
                label,
                matches = many.len(),
                "Ambiguous metric request"
            );
            Err(QueryError::ambiguous(AmbiguityDiagnostic {
                message: format!(
                    "More than one metric ({}) probably means you should add filters",
                    many.len()
                ),
                names: breakouts
                    .names
                    .into_iter()
                    .filter(|(_, values)| values.len() > 1)
                    .map(|(name, values)| (name, values.into_iter().collect()))
                    .collect(),
                periods: breakouts.periods.into_iter().collect(),
            }))
        }
        many => Ok(many.iter().map(|d| d.metric_desc.id.clone()).collect()),
    }
}

#[derive(Default)]
struct BreakoutValues {
    names: BTreeMap<String, BTreeSet<String>>,
    periods: BTreeSet<String>,
}

fn collect_breakouts(descriptors: &[MetricDescDoc]) -> BreakoutValues {
    let mut values = BreakoutValues::default();
    for doc in descriptors {
        for (name, value) in &doc.metric_desc.names {
            values
                .names
                .entry(name.clone())
                .or_default()
                .insert(value.to_string());
        }
        if let Some(period) = &doc.period {
            values.periods.insert(period.id.clone());
        }
    }
    values
}

/// Time window `[min(begin), max(end)]` covered by `periods`
async fn period_window(
    ctx: &QueryContext,
    run: &EntityRef,
    periods: &[String],
) -> Result<Option<(i64, i64)>, QueryError> {
    if periods.is_empty() {
        return Ok(None);
    }
    let query = BoolQuery::new().with_filter(json!({ "terms": { "period.id": periods } }));
    let index = ctx.scoped_target(Collection::Period, &[Some(run)])?;
    let response = ctx
        .search(SearchRequest::new(Collection::Period, index, query).size(periods.len()))
        .await?;

    let mut window: Option<(i64, i64)> = None;
    for doc in response.documents::<PeriodDoc>()? {
        let (Some(begin), Some(end)) = (
            doc.period.begin.as_ref().and_then(|b| b.as_i64()),
            doc.period.end.as_ref().and_then(|e| e.as_i64()),
        ) else {
            return Err(DataError::backend_shape(
                "period",
                format!("period {} has no begin/end", doc.period.id),
            )
            .into());
        };
        window = Some(match window {
            Some((lo, hi)) => (lo.min(begin), hi.max(end)),
            None => (begin, end),
        });
    }

    match window {
        Some(window) => Ok(Some(window)),
        None => Err(QueryError::not_found(format!(
            "periods {}",
            periods.join(",")
        ))),
    }
}

/// Query selecting the data points of `ids`, restricted to the periods' window
pub(crate) async fn data_query(
    ctx: &QueryContext,
    run: &EntityRef,
    ids: &[String],
    periods: &[String],
) -> Result<BoolQuery, QueryError> {
    let mut query = BoolQuery::new().with_filter(json!({ "terms": { "metric_desc.id": ids } }));
    if let Some((begin, end)) = period_window(ctx, run, periods).await? {
        query.push_filter(json!({ "range": { "metric_data.begin": { "gte": begin } } }));
        query.push_filter(json!({ "range": { "metric_data.end": { "lte": end } } }));
    }
    Ok(query)
}

/// Fetch the time series of `ids`, ascending by end time
///
/// A single descriptor yields its raw samples. Several descriptors are aligned
/// on a histogram over `end` whose interval is the shortest sample duration, and
/// summed per bucket.
pub async fn fetch_data(
    ctx: &QueryContext,
    run: &EntityRef,
    ids: &[String],
    periods: &[String],
) -> Result<Vec<DataPoint>, QueryError> {
    let query = data_query(ctx, run, ids, periods).await?;
    let index = ctx.scoped_target(Collection::MetricData, &[Some(run)])?;

    let mut points = if ids.len() == 1 {
        let request = SearchRequest::new(Collection::MetricData, index, query)
            .sort(vec![json!({ "metric_data.end": { "order": "asc" } })]);
        ctx.search_all::<MetricDataDoc>(request)
            .await?
            .iter()
            .map(raw_point)
            .collect::<Result<Vec<_>, DataError>>()?
    } else {
        aggregate_points(ctx, index, query).await?
    };

    points.sort_by_key(|p| p.end);
    Ok(points)
}

fn raw_point(doc: &MetricDataDoc) -> Result<DataPoint, DataError> {
    let data = &doc.metric_data;
    let invalid = |field: &str| {
        DataError::backend_shape(
            "metric_data",
            format!("invalid {} for descriptor {}", field, doc.metric_desc.id),
        )
    };
    let begin = data.begin.as_i64().ok_or_else(|| invalid("begin"))?;
    let end = data.end.as_i64().ok_or_else(|| invalid("end"))?;
    let value = data.value.as_f64().ok_or_else(|| invalid("value"))?;
    let duration_ms = match &data.duration {
        Some(duration) => duration.as_f64().ok_or_else(|| invalid("duration"))?,
        None => (end - begin + 1) as f64,
    };
    Ok(DataPoint {
        begin: millis_to_datetime(begin),
        end: millis_to_datetime(end),
        duration: duration_ms / 1000.0,
        value,
    })
}

async fn aggregate_points(
    ctx: &QueryContext,
    index: IndexTarget,
    query: BoolQuery,
) -> Result<Vec<DataPoint>, QueryError> {
    let stats_request = SearchRequest::new(Collection::MetricData, index.clone(), query.clone())
        .aggregations(json!({ "duration": { "stats": { "field": "metric_data.duration" } } }));
    let stats = ctx.search(stats_request).await?;
    let duration = stats.aggregation("duration")?;
    let count = duration.get("count").and_then(Value::as_u64).unwrap_or(0);
    let Some(min) = duration.get("min").and_then(Value::as_f64).filter(|_| count > 0) else {
        return Ok(Vec::new());
    };
    let interval = (min as i64).max(MIN_INTERVAL_MS);

    let histogram_request = SearchRequest::new(Collection::MetricData, index, query).aggregations(
        json!({ "series": {
            "histogram": {
                "field": "metric_data.end",
                "interval": interval,
                "min_doc_count": 1
            },
            "aggs": { "value": { "sum": { "field": "metric_data.value" } } }
        }}),
    );
    let response = ctx.search(histogram_request).await?;
    let buckets = response
        .aggregation("series")?
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::backend_shape("histogram aggregation", "missing buckets"))?;

    buckets
        .iter()
        .map(|bucket| -> Result<DataPoint, QueryError> {
            let key = bucket
                .get("key")
                .and_then(Value::as_f64)
                .ok_or_else(|| DataError::backend_shape("histogram bucket", "missing key"))?
                as i64;
            let value = bucket
                .get("value")
                .and_then(|v| v.get("value"))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Ok(DataPoint {
                begin: millis_to_datetime(key - interval),
                end: millis_to_datetime(key),
                duration: interval as f64 / 1000.0,
                value,
            })
        })
        .collect()
}

/// All metric labels of a run with their breakout dimensions and periods
pub async fn list_metrics(
    ctx: &QueryContext,
    run: &EntityRef,
) -> Result<Vec<MetricListing>, QueryError> {
    let query = BoolQuery::new().with_filter(json!({ "term": { "run.id": run.raw } }));
    let index = ctx.scoped_target(Collection::MetricDesc, &[Some(run)])?;
    let descriptors: Vec<MetricDescDoc> = ctx
        .search_all(SearchRequest::new(Collection::MetricDesc, index, query))
        .await?;

    let mut by_label: BTreeMap<String, Vec<MetricDescDoc>> = BTreeMap::new();
    for doc in descriptors {
        by_label.entry(doc.metric_desc.label()).or_default().push(doc);
    }

    Ok(by_label
        .into_iter()
        .map(|(label, docs)| {
            let breakouts = collect_breakouts(&docs);
            MetricListing {
                label,
                periods: breakouts.periods.into_iter().collect(),
                names: into_lists(breakouts.names),
            }
        })
        .collect())
}

/// Breakout dimensions still available after applying `names` and `periods`
pub async fn breakouts(
    ctx: &QueryContext,
    run: &EntityRef,
    label: &str,
    names: &[String],
    periods: &[String],
) -> Result<Breakouts, QueryError> {
    let descriptors = find_descriptors(ctx, run, label, names, periods, true).await?;
    let Some(first) = descriptors.first() else {
        return Err(QueryError::no_match(label, names, periods, true));
    };
    let fixed: BTreeSet<&str> = names
        .iter()
        .filter_map(|n| n.split_once('=').map(|(name, _)| name))
        .collect();

    let source = first.metric_desc.source.clone();
    let kind = first.metric_desc.kind.clone();
    let class = first.metric_desc.class.clone();
    let mut values = collect_breakouts(&descriptors);
    values.names.retain(|name, _| !fixed.contains(name.as_str()));

    Ok(Breakouts {
        label: label.to_string(),
        source,
        kind,
        class,
        names: into_lists(values.names),
        periods: values.periods.into_iter().collect(),
    })
}

fn into_lists(sets: BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
    sets.into_iter()
        .map(|(name, values)| (name, values.into_iter().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::testing::{
        MockBackend, agg_response, has_aggregation, hits_response, query_contains,
    };
    use crate::data::{IndexResolver, SchemaGeneration};

    const DESC_INDEX: &str = "cdmv8dev-metric_desc";

    fn context(backend: Arc<MockBackend>) -> QueryContext {
        QueryContext::new(
            backend,
            IndexResolver::new(SchemaGeneration::Legacy {
                version: "v8dev".to_string(),
            }),
            1000,
        )
    }

    fn descriptor(id: &str, names: Value, period: Option<&str>) -> Value {
        let mut doc = json!({
            "run": { "id": "r1" },
            "metric_desc": {
                "id": id, "source": "mpstat", "type": "Busy-CPU", "class": "throughput",
                "names": names
            }
        });
        if let Some(period) = period {
            doc["period"] = json!({ "id": period });
        }
        doc
    }

    fn run() -> EntityRef {
        EntityRef::parse("r1").unwrap()
    }

    #[tokio::test]
    async fn single_match_resolves_to_its_id() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricDesc,
            hits_response(DESC_INDEX, vec![descriptor("d1", json!({ "cpu": "3" }), None)]),
        );
        let ctx = context(backend.clone());
        let ids = resolve_ids(&ctx, &run(), "mpstat::Busy-CPU", &["cpu=3".to_string()], &[], false)
            .await
            .unwrap();
        assert_eq!(ids, vec!["d1".to_string()]);

        let request = &backend.requests_for(Collection::MetricDesc)[0];
        assert!(query_contains(request, r#"{"term":{"metric_desc.names.cpu":"3"}}"#));
        assert!(query_contains(request, r#"{"term":{"metric_desc.type":"Busy-CPU"}}"#));
    }

    #[tokio::test]
    async fn ambiguity_reports_varying_dimensions() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricDesc,
            hits_response(
                DESC_INDEX,
                vec![
                    descriptor("d3", json!({ "cpu": "3", "type": "usr" }), Some("p1")),
                    descriptor("d4", json!({ "cpu": "4", "type": "usr" }), Some("p1")),
                ],
            ),
        );
        let ctx = context(backend);
        let err = resolve_ids(&ctx, &run(), "mpstat::Busy-CPU", &[], &[], false)
            .await
            .unwrap_err();
        let QueryError::AmbiguousMetric(diagnostic) = err else {
            panic!("expected ambiguity");
        };
        assert_eq!(
            diagnostic.names,
            BTreeMap::from([("cpu".to_string(), vec!["3".to_string(), "4".to_string()])])
        );
        assert_eq!(diagnostic.periods, vec!["p1".to_string()]);
        assert!(diagnostic.message.contains("(2)"));
    }

    #[tokio::test]
    async fn aggregate_returns_all_ids() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricDesc,
            hits_response(
                DESC_INDEX,
                vec![
                    descriptor("d3", json!({ "cpu": "3" }), None),
                    descriptor("d4", json!({ "cpu": "4" }), None),
                ],
            ),
        );
        let ctx = context(backend);
        let ids = resolve_ids(&ctx, &run(), "mpstat::Busy-CPU", &[], &[], true)
            .await
            .unwrap();
        assert_eq!(ids, vec!["d3".to_string(), "d4".to_string()]);
    }

    #[tokio::test]
    async fn no_descriptors_is_no_match() {
        let ctx = context(MockBackend::new());
        let err = resolve_ids(&ctx, &run(), "mpstat::Busy-CPU", &[], &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_MATCH");

        let err = resolve_ids(&ctx, &run(), "Busy-CPU", &[], &[], false)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NO_MATCH");
    }

    #[tokio::test]
    async fn single_id_returns_raw_points_in_seconds() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricData,
            hits_response(
                "cdmv8dev-metric_data",
                vec![
                    json!({ "metric_desc": { "id": "d1" },
                        "metric_data": { "begin": "2000", "end": "2999", "duration": "1000", "value": "5" } }),
                    json!({ "metric_desc": { "id": "d1" },
                        "metric_data": { "begin": "1000", "end": "1999", "duration": "1000", "value": "4" } }),
                ],
            ),
        );
        let ctx = context(backend);
        let points = fetch_data(&ctx, &run(), &["d1".to_string()], &[]).await.unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].end, millis_to_datetime(1999));
        assert_eq!(points[0].duration, 1.0);
        assert_eq!(points[1].value, 5.0);
    }

    #[tokio::test]
    async fn several_ids_are_summed_per_bucket() {
        let backend = MockBackend::new();
        backend
            .on_when(
                Collection::MetricData,
                |r| has_aggregation(r, "duration"),
                agg_response(
                    6,
                    json!({ "duration": { "count": 6, "min": 1000.0, "max": 2000.0 } }),
                ),
            )
            .on_when(
                Collection::MetricData,
                |r| has_aggregation(r, "series"),
                agg_response(
                    6,
                    json!({ "series": { "buckets": [
                        { "key": 2000.0, "doc_count": 2, "value": { "value": 7.0 } },
                        { "key": 3000.0, "doc_count": 2, "value": { "value": 9.0 } },
                        { "key": 4000.0, "doc_count": 2, "value": { "value": 11.0 } }
                    ]}}),
                ),
            );
        let ctx = context(backend.clone());
        let ids = vec!["d3".to_string(), "d4".to_string()];
        let points = fetch_data(&ctx, &run(), &ids, &[]).await.unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].begin, millis_to_datetime(1000));
        assert_eq!(points[0].end, millis_to_datetime(2000));
        assert_eq!(points[0].duration, 1.0);
        assert_eq!(points[2].value, 11.0);

        let histogram = backend
            .requests_for(Collection::MetricData)
            .into_iter()
            .find(|r| has_aggregation(r, "series"))
            .unwrap();
        let aggs = histogram.aggregations.unwrap();
        assert_eq!(aggs["series"]["histogram"]["interval"], json!(1000));
        assert_eq!(aggs["series"]["histogram"]["min_doc_count"], json!(1));
    }

    #[tokio::test]
    async fn several_ids_without_data_yield_empty_series() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricData,
            agg_response(0, json!({ "duration": { "count": 0, "min": null } })),
        );
        let ctx = context(backend.clone());
        let ids = vec!["d3".to_string(), "d4".to_string()];
        assert!(fetch_data(&ctx, &run(), &ids, &[]).await.unwrap().is_empty());
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn period_filter_restricts_time_window() {
        let backend = MockBackend::new();
        backend
            .on(
                Collection::Period,
                hits_response(
                    "cdmv8dev-period",
                    vec![
                        json!({ "run": { "id": "r1" }, "iteration": { "id": "i1" }, "sample": { "id": "s1" },
                            "period": { "id": "p1", "name": "measurement", "begin": "1000", "end": "5000" } }),
                        json!({ "run": { "id": "r1" }, "iteration": { "id": "i1" }, "sample": { "id": "s2" },
                            "period": { "id": "p2", "name": "measurement", "begin": "800", "end": "4000" } }),
                    ],
                ),
            );
        let ctx = context(backend.clone());
        let periods = vec!["p1".to_string(), "p2".to_string()];
        fetch_data(&ctx, &run(), &["d1".to_string()], &periods)
            .await
            .unwrap();
        let request = &backend.requests_for(Collection::MetricData)[0];
        assert!(query_contains(request, r#"{"range":{"metric_data.begin":{"gte":800}}}"#));
        assert!(query_contains(request, r#"{"range":{"metric_data.end":{"lte":5000}}}"#));
    }

    #[tokio::test]
    async fn unknown_period_is_not_found() {
        let ctx = context(MockBackend::new());
        let err = fetch_data(&ctx, &run(), &["d1".to_string()], &["p9".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn lists_metrics_and_breakouts() {
        let backend = MockBackend::new();
        backend.on(
            Collection::MetricDesc,
            hits_response(
                DESC_INDEX,
                vec![
                    descriptor("d3", json!({ "cpu": "3", "type": "usr" }), Some("p1")),
                    descriptor("d4", json!({ "cpu": "4", "type": "sys" }), Some("p1")),
                ],
            ),
        );
        let ctx = context(backend);

        let listing = list_metrics(&ctx, &run()).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].label, "mpstat::Busy-CPU");
        assert_eq!(listing[0].names["type"], vec!["sys".to_string(), "usr".to_string()]);

        let found = breakouts(&ctx, &run(), "mpstat::Busy-CPU", &["cpu=3".to_string()], &[])
            .await
            .unwrap();
        assert_eq!(found.kind, "Busy-CPU");
        assert_eq!(found.class.as_deref(), Some("throughput"));
        assert!(!found.names.contains_key("cpu"));
        assert!(found.names.contains_key("type"));
    }

    #[test]
    fn split_label_requires_both_parts() {
        assert_eq!(split_label("a::b"), Some(("a", "b")));
        assert_eq!(split_label("a::"), None);
        assert_eq!(split_label("ab"), None);
    }
}
