//! Run listing and summary assembly
//!
//! CDM has no joins: runs, iterations, tags and params live in separate
//! collections. A listing first narrows the run ids through the tag and param
//! collections, fetches one page of runs, then pulls their iterations, tags and
//! params and stitches them together here.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::data::documents::{CdmDocument, IterationDoc, IterationFields, ParamDoc, RunDoc, TagDoc};
use crate::data::filters::{BoolQuery, build_filters, build_sort_terms, parse_terms};
use crate::data::{Collection, DataError, FullId, IndexTarget, SearchRequest};
use crate::utils::time::{day_end_millis, day_start_millis, millis_to_datetime};

use super::context::QueryContext;
use super::error::QueryError;

const PASS: &str = "pass";

/// Run listing request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunQuery {
    /// Filter expressions (`tag:k=v,param:k~v,run:k=v`)
    #[serde(default)]
    pub filters: Vec<String>,
    /// Sort keys (`begin:desc`)
    #[serde(default)]
    pub sort: Vec<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub size: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationSummary {
    pub id: String,
    pub num: Option<i64>,
    pub status: Option<String>,
    pub primary_metric: Option<String>,
    pub primary_period: Option<String>,
    pub path: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl IterationSummary {
    pub(crate) fn from_fields(fields: IterationFields, params: BTreeMap<String, String>) -> Self {
        Self {
            id: fields.id,
            num: fields.num.as_ref().and_then(|n| n.as_i64()),
            status: fields.status,
            primary_metric: fields.primary_metric,
            primary_period: fields.primary_period,
            path: fields.path,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// FullID when the run's index is known
    pub id: String,
    pub benchmark: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub source: Option<String>,
    pub host: Option<String>,
    pub harness: Option<String>,
    pub desc: Option<String>,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub primary_metrics: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub common_params: BTreeMap<String, String>,
    pub iterations: Vec<IterationSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunList {
    pub runs: Vec<RunSummary>,
    pub count: usize,
    pub total: u64,
    pub offset: usize,
    pub next_offset: Option<usize>,
}

impl RunList {
    fn new(runs: Vec<RunSummary>, total: u64, offset: usize) -> Self {
        let count = runs.len();
        let next = offset + count;
        Self {
            runs,
            count,
            total,
            offset,
            next_offset: ((next as u64) < total && count > 0).then_some(next),
        }
    }
}

/// Reduce iteration statuses to a run status
///
/// Statuses are visited in iteration order and every one other than `pass`
/// overwrites the run status, so the last non-pass status wins. A run whose
/// iterations all passed (or that has none) has no status.
pub fn reduce_status<'a>(statuses: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    statuses
        .into_iter()
        .flatten()
        .filter(|status| *status != PASS)
        .last()
        .map(str::to_string)
}

/// Params shared with identical values by every map
pub fn common_params(maps: &[&BTreeMap<String, String>]) -> BTreeMap<String, String> {
    let Some((first, rest)) = maps.split_first() else {
        return BTreeMap::new();
    };
    let mut common = (*first).clone();
    for map in rest {
        common.retain(|arg, val| map.get(arg) == Some(val));
    }
    common
}

/// Group param documents by iteration id
pub(crate) fn params_by_iteration(
    params: Vec<ParamDoc>,
) -> FxHashMap<String, BTreeMap<String, String>> {
    let mut grouped: FxHashMap<String, BTreeMap<String, String>> = FxHashMap::default();
    for doc in params {
        let val = doc.param.val.to_string();
        let map = grouped.entry(doc.iteration.id).or_default();
        if let Some(previous) = map.insert(doc.param.arg.clone(), val.clone())
            && previous != val
        {
            tracing::warn!(
                arg = %doc.param.arg,
                previous = %previous,
                current = %val,
                "Duplicate param in iteration, keeping last"
            );
        }
    }
    grouped
}

/// List runs matching `query`, with iterations, tags and params attached
pub async fn list_runs(
    ctx: &QueryContext,
    query: &RunQuery,
    default_sort: &str,
) -> Result<RunList, QueryError> {
    let filters = build_filters(&parse_terms(&query.filters)?)?;
    let sort_keys = if query.sort.is_empty() {
        vec![default_sort.to_string()]
    } else {
        query.sort.clone()
    };
    let sort = build_sort_terms(&sort_keys)?;

    let (start, end) = (query.start, query.end);
    if let (Some(start), Some(end)) = (start, end)
        && start > end
    {
        return Err(QueryError::InvalidDateRange {
            start: start.to_string(),
            end: end.to_string(),
        });
    }

    let mut base = filters.run;
    if let Some(start) = start {
        base.push_filter(json!({ "range": { "run.begin": { "gte": day_start_millis(start) } } }));
    }
    if let Some(end) = end {
        base.push_filter(json!({ "range": { "run.end": { "lte": day_end_millis(end) } } }));
    }

    let (tag_ids, param_ids) = tokio::try_join!(
        matching_run_ids(ctx, Collection::Tag, filters.tag.as_ref(), start, end),
        matching_run_ids(ctx, Collection::Param, filters.param.as_ref(), start, end),
    )?;
    if let Some(ids) = intersect(tag_ids, param_ids) {
        if ids.is_empty() {
            tracing::debug!("No run satisfies both tag and param filters");
            return Ok(RunList::new(Vec::new(), 0, query.offset));
        }
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort();
        base.push_filter(json!({ "terms": { "run.id": ids } }));
    }

    let size = query.size.unwrap_or(ctx.page_size()).min(ctx.page_size());
    let index = ctx.indices().resolve(Collection::Run, start, end, None)?;
    let request = SearchRequest::new(Collection::Run, index, base)
        .size(size)
        .offset(query.offset)
        .sort(sort.iter().map(|s| s.to_json()).collect());
    let response = ctx.search(request).await?;

    let runs = response
        .hits
        .iter()
        .map(|hit| Ok((hit.index.clone(), hit.project::<RunDoc>()?)))
        .collect::<Result<Vec<_>, DataError>>()?;
    if runs.is_empty() {
        return Ok(RunList::new(Vec::new(), response.total, query.offset));
    }

    let run_ids: Vec<String> = runs.iter().map(|(_, doc)| doc.run.id.clone()).collect();
    let (iterations, tags, params) = tokio::try_join!(
        fetch_related::<IterationDoc>(ctx, Collection::Iteration, &runs, &run_ids, start, end),
        fetch_related::<TagDoc>(ctx, Collection::Tag, &runs, &run_ids, start, end),
        fetch_related::<ParamDoc>(ctx, Collection::Param, &runs, &run_ids, start, end),
    )?;

    let summaries = assemble_runs(runs, iterations, tags, params);
    Ok(RunList::new(summaries, response.total, query.offset))
}

/// Run ids carrying any document that matches `query` in `collection`
async fn matching_run_ids(
    ctx: &QueryContext,
    collection: Collection,
    query: Option<&BoolQuery>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Option<FxHashSet<String>>, QueryError> {
    let Some(query) = query else {
        return Ok(None);
    };
    let index = ctx.indices().resolve(collection, start, end, None)?;
    let request = SearchRequest::new(collection, index, query.clone()).aggregations(json!({
        "runs": { "terms": { "field": "run.id", "size": ctx.page_size() } }
    }));
    let response = ctx.search(request).await?;
    let buckets = response
        .aggregation("runs")?
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| DataError::backend_shape("terms aggregation", "missing buckets"))?;

    let ids: FxHashSet<String> = buckets
        .iter()
        .filter_map(|b| b.get("key").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    tracing::debug!(collection = %collection, runs = ids.len(), "Resolved run ids");
    Ok(Some(ids))
}

fn intersect(
    a: Option<FxHashSet<String>>,
    b: Option<FxHashSet<String>>,
) -> Option<FxHashSet<String>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Indices holding `collection` documents for the given run hits
///
/// Related documents share their run's shard, so the run hits' indices pin the
/// search. Falls back to date-range resolution for unrecognized index names.
fn related_target(
    ctx: &QueryContext,
    collection: Collection,
    runs: &[(String, RunDoc)],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<IndexTarget, QueryError> {
    let mut indices = BTreeSet::new();
    for (index, doc) in runs {
        match FullId::from_index(&doc.run.id, index) {
            Some(id) => {
                indices.insert(id.index_for(collection));
            }
            None => return ctx.indices().resolve(collection, start, end, None),
        }
    }
    let mut indices: Vec<String> = indices.into_iter().collect();
    Ok(if indices.len() == 1 {
        IndexTarget::Single(indices.remove(0))
    } else {
        IndexTarget::Shards(indices)
    })
}

async fn fetch_related<T: CdmDocument>(
    ctx: &QueryContext,
    collection: Collection,
    runs: &[(String, RunDoc)],
    run_ids: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Vec<T>, QueryError> {
    let index = related_target(ctx, collection, runs, start, end)?;
    let query = BoolQuery::new().with_filter(json!({ "terms": { "run.id": run_ids } }));
    ctx.search_all(SearchRequest::new(collection, index, query))
        .await
}

/// Join runs with their iterations, tags and params, preserving run order
fn assemble_runs(
    runs: Vec<(String, RunDoc)>,
    iterations: Vec<IterationDoc>,
    tags: Vec<TagDoc>,
    params: Vec<ParamDoc>,
) -> Vec<RunSummary> {
    let mut iterations_by_run: FxHashMap<String, Vec<IterationFields>> = FxHashMap::default();
    for doc in iterations {
        iterations_by_run
            .entry(doc.run.id)
            .or_default()
            .push(doc.iteration);
    }

    let mut tags_by_run: FxHashMap<String, BTreeMap<String, String>> = FxHashMap::default();
    for doc in tags {
        tags_by_run
            .entry(doc.run.id)
            .or_default()
            .insert(doc.tag.name, doc.tag.val.to_string());
    }

    let mut params = params_by_iteration(params);

    runs.into_iter()
        .map(|(index, doc)| {
            let run = doc.run;
            let mut fields = iterations_by_run.remove(&run.id).unwrap_or_default();
            fields.sort_by(|a, b| {
                let key = |f: &IterationFields| f.num.as_ref().and_then(|n| n.as_i64());
                key(a).cmp(&key(b)).then_with(|| a.id.cmp(&b.id))
            });
            let iterations: Vec<IterationSummary> = fields
                .into_iter()
                .map(|f| {
                    let own = params.remove(&f.id).unwrap_or_default();
                    IterationSummary::from_fields(f, own)
                })
                .collect();

            let status = reduce_status(iterations.iter().map(|i| i.status.as_deref()));
            let maps: Vec<&BTreeMap<String, String>> =
                iterations.iter().map(|i| &i.params).collect();
            let common = common_params(&maps);
            let primary_metrics: BTreeSet<String> = iterations
                .iter()
                .filter_map(|i| i.primary_metric.clone())
                .collect();

            RunSummary {
                id: FullId::from_index(&run.id, &index)
                    .map(|id| id.render())
                    .unwrap_or_else(|| run.id.clone()),
                tags: tags_by_run.remove(&run.id).unwrap_or_default(),
                benchmark: run.benchmark,
                name: run.name,
                email: run.email,
                source: run.source,
                host: run.host,
                harness: run.harness,
                desc: run.desc,
                begin: run.begin.and_then(|b| b.as_i64()).map(millis_to_datetime),
                end: run.end.and_then(|e| e.as_i64()).map(millis_to_datetime),
                status,
                primary_metrics: primary_metrics.into_iter().collect(),
                common_params: common,
                iterations,
            }
        })
        .collect()
}
