//! Statistical summaries of metric series

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::{Value, json};

use crate::data::{Collection, SearchRequest};

use super::context::{EntityRef, QueryContext};
use super::error::QueryError;
use super::metrics::{Metric, data_query, resolve_ids};

/// Statistics of one metric request; all `None` when no data matched
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub run: String,
    pub metric: String,
    pub title: String,
    pub names: Vec<String>,
    pub periods: Vec<String>,
    pub aggregate: bool,
    pub count: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub sum: Option<f64>,
    pub std_dev: Option<f64>,
}

/// Summarize each metric independently, preserving request order
pub async fn summarize(
    ctx: &QueryContext,
    metrics: &[Metric],
) -> Result<Vec<MetricSummary>, QueryError> {
    try_join_all(metrics.iter().map(|metric| summarize_one(ctx, metric))).await
}

async fn summarize_one(ctx: &QueryContext, metric: &Metric) -> Result<MetricSummary, QueryError> {
    let Some(run_id) = metric.run.as_deref() else {
        return Err(QueryError::missing_scope(format!(
            "Summary of {} requires a run",
            metric.metric
        )));
    };
    let run = EntityRef::parse(run_id)?;
    let ids = resolve_ids(
        ctx,
        &run,
        &metric.metric,
        &metric.names,
        &metric.periods,
        metric.aggregate,
    )
    .await?;
    let query = data_query(ctx, &run, &ids, &metric.periods).await?;
    let index = ctx.scoped_target(Collection::MetricData, &[Some(&run)])?;

    let request = SearchRequest::new(Collection::MetricData, index, query)
        .aggregations(json!({ "stats": { "extended_stats": { "field": "metric_data.value" } } }));
    let response = ctx.search(request).await?;
    let stats = response.aggregation("stats")?;

    let count = stats.get("count").and_then(Value::as_u64).unwrap_or(0);
    let field = |name: &str| {
        stats
            .get(name)
            .and_then(Value::as_f64)
            .filter(|_| count > 0)
    };

    tracing::debug!(metric = %metric.metric, descriptors = ids.len(), count, "Metric summarized");
    Ok(MetricSummary {
        run: run_id.to_string(),
        metric: metric.metric.clone(),
        title: metric.title.clone().unwrap_or_else(|| metric.metric.clone()),
        names: metric.names.clone(),
        periods: metric.periods.clone(),
        aggregate: metric.aggregate,
        count,
        min: field("min"),
        max: field("max"),
        avg: field("avg"),
        sum: field("sum"),
        std_dev: field("std_deviation"),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data::testing::{MockBackend, agg_response, hits_response};
    use crate::data::{IndexResolver, SchemaGeneration};

    fn context(backend: Arc<MockBackend>) -> QueryContext {
        QueryContext::new(
            backend,
            IndexResolver::new(SchemaGeneration::Legacy {
                version: "v8dev".to_string(),
            }),
            1000,
        )
    }

    fn backend(stats: Value) -> Arc<MockBackend> {
        let backend = MockBackend::new();
        backend
            .on(
                Collection::MetricDesc,
                hits_response(
                    "cdmv8dev-metric_desc",
                    vec![json!({ "run": { "id": "r1" }, "metric_desc": {
                        "id": "d1", "source": "uperf", "type": "Gbps", "names": {}
                    }})],
                ),
            )
            .on(Collection::MetricData, agg_response(0, json!({ "stats": stats })));
        backend
    }

    fn metric() -> Metric {
        Metric {
            run: Some("r1".to_string()),
            metric: "uperf::Gbps".to_string(),
            ..Metric::default()
        }
    }

    #[tokio::test]
    async fn summary_reads_extended_stats() {
        let backend = backend(json!({
            "count": 4, "min": 1.0, "max": 4.0, "avg": 2.5, "sum": 10.0, "std_deviation": 1.118
        }));
        let ctx = context(backend.clone());
        let summaries = summarize(&ctx, &[metric()]).await.unwrap();

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.count, 4);
        assert_eq!(summary.sum, Some(10.0));
        assert_eq!(summary.std_dev, Some(1.118));
        assert_eq!(summary.title, "uperf::Gbps");

        let request = &backend.requests_for(Collection::MetricData)[0];
        let aggs = request.aggregations.as_ref().unwrap();
        assert_eq!(aggs["stats"]["extended_stats"]["field"], json!("metric_data.value"));
    }

    #[tokio::test]
    async fn empty_series_has_no_statistics() {
        let ctx = context(backend(json!({
            "count": 0, "min": null, "max": null, "avg": null, "sum": 0.0, "std_deviation": null
        })));
        let summary = summarize(&ctx, &[metric()]).await.unwrap().remove(0);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.min, None);
        assert_eq!(summary.sum, None);
        assert_eq!(summary.std_dev, None);
    }

    #[tokio::test]
    async fn summaries_are_deterministic() {
        let ctx = context(backend(json!({
            "count": 2, "min": 1.0, "max": 3.0, "avg": 2.0, "sum": 4.0, "std_deviation": 1.0
        })));
        let metrics = vec![metric(), metric()];
        let first = summarize(&ctx, &metrics).await.unwrap();
        let second = summarize(&ctx, &metrics).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0], first[1]);
    }

    #[tokio::test]
    async fn backend_failure_fails_the_batch() {
        let backend = MockBackend::new();
        backend
            .on(
                Collection::MetricDesc,
                hits_response(
                    "cdmv8dev-metric_desc",
                    vec![json!({ "run": { "id": "r1" }, "metric_desc": {
                        "id": "d1", "source": "uperf", "type": "Gbps"
                    }})],
                ),
            )
            .fail(Collection::MetricData, "connection refused");
        let ctx = context(backend);
        let err = summarize(&ctx, &[metric()]).await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_UNAVAILABLE");
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn summary_requires_a_run() {
        let ctx = context(MockBackend::new());
        let mut request = metric();
        request.run = None;
        let err = summarize(&ctx, &[request]).await.unwrap_err();
        assert_eq!(err.code(), "MISSING_SCOPE");
    }
}
