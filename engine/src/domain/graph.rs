//! Graph composition
//!
//! Turns a batch of metric requests into plotly-style series and layout.
//! Series sharing a metric label share a y-axis; every new label opens a
//! further axis overlaying the first.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::core::constants::{GRAPH_COLORS, GRAPH_WIDTH};
use crate::data::documents::{ParamDoc, PeriodDoc};
use crate::data::filters::BoolQuery;
use crate::data::{Collection, SearchRequest};

use super::context::{EntityRef, QueryContext};
use super::error::QueryError;
use super::metrics::{DataPoint, Metric, fetch_data, resolve_ids};
use super::runs::{common_params, params_by_iteration};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphRequest {
    /// Run used by graphs that do not name their own
    #[serde(default)]
    pub run: Option<String>,
    pub graphs: Vec<Metric>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub x: Vec<DateTime<Utc>>,
    pub y: Vec<f64>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub mode: String,
    pub marker: Marker,
    pub yaxis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlaying: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoshift: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub width: String,
    /// `yaxis`, `yaxis2`, ...
    #[serde(flatten)]
    pub axes: BTreeMap<String, Axis>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    pub data: Vec<Series>,
    pub layout: Layout,
}

/// Assigns one y-axis per distinct metric label, in first-seen order
#[derive(Debug, Default)]
struct AxisAllocator {
    labels: Vec<String>,
}

impl AxisAllocator {
    /// Series axis reference (`y`, `y2`, ...) and whether it is new
    fn assign(&mut self, label: &str) -> (String, bool) {
        let (position, new) = match self.labels.iter().position(|l| l == label) {
            Some(position) => (position, false),
            None => {
                self.labels.push(label.to_string());
                (self.labels.len() - 1, true)
            }
        };
        let axis = if position == 0 {
            "y".to_string()
        } else {
            format!("y{}", position + 1)
        };
        (axis, new)
    }
}

/// Layout key for a series axis reference (`y2` -> `yaxis2`)
fn layout_key(axis: &str) -> String {
    format!("yaxis{}", axis.trim_start_matches('y'))
}

/// Compose a graph from a batch of metric requests
pub async fn compose(ctx: &QueryContext, request: &GraphRequest) -> Result<Graph, QueryError> {
    let mut runs: Vec<String> = Vec::new();
    let mut planned: Vec<(&Metric, EntityRef, usize)> = Vec::with_capacity(request.graphs.len());
    for (position, metric) in request.graphs.iter().enumerate() {
        let Some(run) = metric.run.as_deref().or(request.run.as_deref()) else {
            return Err(QueryError::missing_scope(format!(
                "Graph {} has no run and the request has no default run",
                position + 1
            )));
        };
        let run = EntityRef::parse(run)?;
        let ordinal = match runs.iter().position(|r| *r == run.raw) {
            Some(index) => index + 1,
            None => {
                runs.push(run.raw.clone());
                runs.len()
            }
        };
        planned.push((metric, run, ordinal));
    }
    let multi_run = runs.len() > 1;

    let fetched = try_join_all(planned.iter().map(|(metric, run, ordinal)| async move {
        tokio::try_join!(
            series_points(ctx, run, metric),
            series_title(ctx, run, metric, *ordinal, multi_run),
        )
    }))
    .await?;

    let mut axes = AxisAllocator::default();
    let mut layout = Layout {
        width: GRAPH_WIDTH.to_string(),
        axes: BTreeMap::new(),
    };
    let mut data = Vec::with_capacity(fetched.len());
    for (position, ((metric, _, _), (points, title))) in planned.iter().zip(fetched).enumerate() {
        let (axis, new) = axes.assign(&metric.metric);
        if new {
            let secondary = axis != "y";
            layout.axes.insert(
                layout_key(&axis),
                Axis {
                    title: metric.metric.clone(),
                    anchor: secondary.then(|| "free".to_string()),
                    overlaying: secondary.then(|| "y".to_string()),
                    autoshift: secondary.then_some(true),
                },
            );
        }
        data.push(Series {
            x: points.iter().map(|p| p.end).collect(),
            y: points.iter().map(|p| p.value).collect(),
            name: title,
            kind: "scatter".to_string(),
            mode: "line".to_string(),
            marker: Marker {
                color: GRAPH_COLORS[position % GRAPH_COLORS.len()].to_string(),
            },
            yaxis: axis,
        });
    }

    tracing::debug!(series = data.len(), axes = layout.axes.len(), "Graph composed");
    Ok(Graph { data, layout })
}

async fn series_points(
    ctx: &QueryContext,
    run: &EntityRef,
    metric: &Metric,
) -> Result<Vec<DataPoint>, QueryError> {
    let ids = resolve_ids(
        ctx,
        run,
        &metric.metric,
        &metric.names,
        &metric.periods,
        metric.aggregate,
    )
    .await?;
    fetch_data(ctx, run, &ids, &metric.periods).await
}

/// Explicit title, or one derived from the label and the run's structure
async fn series_title(
    ctx: &QueryContext,
    run: &EntityRef,
    metric: &Metric,
    ordinal: usize,
    multi_run: bool,
) -> Result<String, QueryError> {
    if let Some(title) = &metric.title {
        return Ok(title.clone());
    }

    let mut parts = vec![metric.metric.clone()];
    if multi_run {
        parts.push(format!("(run {})", ordinal));
    }
    if let Some(first) = metric.periods.first()
        && let Some(name) = period_name_if_repeated(ctx, run, first).await?
    {
        parts.push(format!("{} ({} samples)", name, metric.periods.len()));
    }
    if !metric.names.is_empty() {
        let varying = varying_params(ctx, run).await?;
        for filter in &metric.names {
            if let Some((name, _)) = filter.split_once('=')
                && varying.iter().any(|arg| arg == name)
            {
                parts.push(filter.clone());
            }
        }
    }
    Ok(parts.join(" "))
}

/// Name of `period`, if its iteration holds more than one period
async fn period_name_if_repeated(
    ctx: &QueryContext,
    run: &EntityRef,
    period: &str,
) -> Result<Option<String>, QueryError> {
    let index = ctx.scoped_target(Collection::Period, &[Some(run)])?;
    let query = BoolQuery::new().with_filter(json!({ "term": { "period.id": period } }));
    let response = ctx
        .search(SearchRequest::new(Collection::Period, index.clone(), query).size(1))
        .await?;
    let Some(doc) = response.documents::<PeriodDoc>()?.into_iter().next() else {
        return Err(QueryError::not_found(format!("period {}", period)));
    };

    let query =
        BoolQuery::new().with_filter(json!({ "term": { "iteration.id": doc.iteration.id } }));
    let siblings = ctx
        .search(SearchRequest::new(Collection::Period, index, query))
        .await?;
    Ok((siblings.total > 1).then_some(doc.period.name))
}

/// Param args whose value is not the same across every iteration of the run
async fn varying_params(ctx: &QueryContext, run: &EntityRef) -> Result<Vec<String>, QueryError> {
    let index = ctx.scoped_target(Collection::Param, &[Some(run)])?;
    let query = BoolQuery::new().with_filter(json!({ "term": { "run.id": run.raw } }));
    let params: Vec<ParamDoc> = ctx
        .search_all(SearchRequest::new(Collection::Param, index, query))
        .await?;
    let grouped = params_by_iteration(params);
    let maps: Vec<&BTreeMap<String, String>> = grouped.values().collect();
    let common = common_params(&maps);

    let mut varying: Vec<String> = grouped
        .values()
        .flat_map(|params| params.keys())
        .filter(|arg| !common.contains_key(*arg))
        .cloned()
        .collect();
    varying.sort();
    varying.dedup();
    Ok(varying)
}
