//! Entity listings scoped by run, iteration or sample

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;

use crate::data::documents::{
    CdmDocument, IterationDoc, ParamDoc, PeriodDoc, SampleDoc, TagDoc,
};
use crate::data::filters::BoolQuery;
use crate::data::{Collection, SearchRequest};
use crate::utils::time::millis_to_datetime;

use super::context::{EntityRef, QueryContext};
use super::error::QueryError;
use super::runs::{IterationSummary, common_params, params_by_iteration};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamListing {
    /// Params per iteration id
    pub iterations: BTreeMap<String, BTreeMap<String, String>>,
    /// Params identical across all listed iterations
    pub common: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub id: String,
    pub iteration: String,
    pub num: Option<i64>,
    pub status: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub id: String,
    pub name: String,
    pub iteration: String,
    pub sample: String,
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Whether the name equals the iteration's primary period
    pub is_primary: bool,
}

/// Scoped lookup: `(field, id)` pairs, at least one must be present
struct Scope<'a> {
    entries: Vec<(&'static str, &'a EntityRef)>,
}

impl<'a> Scope<'a> {
    fn new(
        what: &str,
        fields: &[(&'static str, Option<&'a EntityRef>)],
    ) -> Result<Self, QueryError> {
        let entries: Vec<(&'static str, &'a EntityRef)> = fields
            .iter()
            .filter_map(|(field, entity)| entity.map(|e| (*field, e)))
            .collect();
        if entries.is_empty() {
            let names: Vec<&str> = fields
                .iter()
                .map(|(field, _)| field.trim_end_matches(".id"))
                .collect();
            return Err(QueryError::missing_scope(format!(
                "Listing {} requires at least one of: {}",
                what,
                names.join(", ")
            )));
        }
        Ok(Self { entries })
    }

    fn query(&self) -> BoolQuery {
        self.entries
            .iter()
            .fold(BoolQuery::new(), |query, (field, entity)| {
                query.with_filter(json!({ "term": { *field: entity.raw } }))
            })
    }

    async fn fetch<T: CdmDocument>(
        &self,
        ctx: &QueryContext,
        collection: Collection,
    ) -> Result<Vec<T>, QueryError> {
        let refs: Vec<Option<&EntityRef>> = self.entries.iter().map(|(_, e)| Some(*e)).collect();
        let index = ctx.scoped_target(collection, &refs)?;
        ctx.search_all(SearchRequest::new(collection, index, self.query()))
            .await
    }
}

/// Tags of a run
pub async fn tags(
    ctx: &QueryContext,
    run: &EntityRef,
) -> Result<BTreeMap<String, String>, QueryError> {
    let scope = Scope::new("tags", &[("run.id", Some(run))])?;
    Ok(scope
        .fetch::<TagDoc>(ctx, Collection::Tag)
        .await?
        .into_iter()
        .map(|doc| (doc.tag.name, doc.tag.val.to_string()))
        .collect())
}

/// Params per iteration plus the params common to all of them
pub async fn params(
    ctx: &QueryContext,
    run: Option<&EntityRef>,
    iteration: Option<&EntityRef>,
) -> Result<ParamListing, QueryError> {
    let scope = Scope::new("params", &[("run.id", run), ("iteration.id", iteration)])?;
    let grouped = params_by_iteration(scope.fetch::<ParamDoc>(ctx, Collection::Param).await?);
    let iterations: BTreeMap<String, BTreeMap<String, String>> = grouped.into_iter().collect();
    let maps: Vec<&BTreeMap<String, String>> = iterations.values().collect();
    let common = common_params(&maps);
    Ok(ParamListing { iterations, common })
}

/// Iterations of a run, ordered by number
pub async fn iterations(
    ctx: &QueryContext,
    run: &EntityRef,
) -> Result<Vec<IterationSummary>, QueryError> {
    let scope = Scope::new("iterations", &[("run.id", Some(run))])?;
    let mut list: Vec<IterationSummary> = scope
        .fetch::<IterationDoc>(ctx, Collection::Iteration)
        .await?
        .into_iter()
        .map(|doc| IterationSummary::from_fields(doc.iteration, BTreeMap::new()))
        .collect();
    list.sort_by(|a, b| a.num.cmp(&b.num).then_with(|| a.id.cmp(&b.id)));
    Ok(list)
}

/// Samples of a run or iteration, ordered by iteration then number
pub async fn samples(
    ctx: &QueryContext,
    run: Option<&EntityRef>,
    iteration: Option<&EntityRef>,
) -> Result<Vec<SampleSummary>, QueryError> {
    let scope = Scope::new("samples", &[("run.id", run), ("iteration.id", iteration)])?;
    let mut list: Vec<SampleSummary> = scope
        .fetch::<SampleDoc>(ctx, Collection::Sample)
        .await?
        .into_iter()
        .map(|doc| SampleSummary {
            id: doc.sample.id,
            iteration: doc.iteration.id,
            num: doc.sample.num.as_ref().and_then(|n| n.as_i64()),
            status: doc.sample.status,
            path: doc.sample.path,
        })
        .collect();
    list.sort_by(|a, b| {
        (&a.iteration, a.num, &a.id).cmp(&(&b.iteration, b.num, &b.id))
    });
    Ok(list)
}

/// Periods of a run, iteration or sample, flagging primary periods
pub async fn periods(
    ctx: &QueryContext,
    run: Option<&EntityRef>,
    iteration: Option<&EntityRef>,
    sample: Option<&EntityRef>,
) -> Result<Vec<PeriodSummary>, QueryError> {
    let scope = Scope::new(
        "periods",
        &[
            ("run.id", run),
            ("iteration.id", iteration),
            ("sample.id", sample),
        ],
    )?;
    let docs = scope.fetch::<PeriodDoc>(ctx, Collection::Period).await?;
    if docs.is_empty() {
        return Ok(Vec::new());
    }

    let mut iteration_ids: Vec<String> = docs.iter().map(|d| d.iteration.id.clone()).collect();
    iteration_ids.sort();
    iteration_ids.dedup();
    let refs: Vec<Option<&EntityRef>> = vec![run, iteration, sample];
    let index = ctx.scoped_target(Collection::Iteration, &refs)?;
    let query =
        BoolQuery::new().with_filter(json!({ "terms": { "iteration.id": iteration_ids } }));
    let iterations: Vec<IterationDoc> = ctx
        .search_all(SearchRequest::new(Collection::Iteration, index, query))
        .await?;
    let primary: FxHashMap<String, Option<String>> = iterations
        .into_iter()
        .map(|doc| (doc.iteration.id, doc.iteration.primary_period))
        .collect();

    let mut list: Vec<PeriodSummary> = docs
        .into_iter()
        .map(|doc| {
            let is_primary = primary
                .get(&doc.iteration.id)
                .and_then(|p| p.as_deref())
                .is_some_and(|p| p == doc.period.name);
            PeriodSummary {
                id: doc.period.id,
                name: doc.period.name,
                iteration: doc.iteration.id,
                sample: doc.sample.id,
                begin: doc.period.begin.and_then(|b| b.as_i64()).map(millis_to_datetime),
                end: doc.period.end.and_then(|e| e.as_i64()).map(millis_to_datetime),
                is_primary,
            }
        })
        .collect();
    list.sort_by(|a, b| {
        (&a.iteration, &a.sample, &a.name, &a.id).cmp(&(&b.iteration, &b.sample, &b.name, &b.id))
    });
    Ok(list)
}
