//! Engine facade
//!
//! [`CdmService`] owns the backend handle and the schema generation probed at
//! connect time. Every query operation builds a [`QueryContext`] from that state
//! and delegates to the operation modules.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::core::config::{EngineConfig, GenerationMode};
use crate::data::filters::BoolQuery;
use crate::data::index::{legacy_index, shard_pattern};
use crate::data::{
    Collection, DataError, IndexResolver, IndexTarget, SchemaGeneration, SearchBackend,
    SearchRequest,
};

use super::context::{EntityRef, QueryContext};
use super::entities::{self, ParamListing, PeriodSummary, SampleSummary};
use super::error::QueryError;
use super::graph::{self, Graph, GraphRequest};
use super::metrics::{self, Breakouts, DataPoint, Metric, MetricListing};
use super::runs::{self, IterationSummary, RunList, RunQuery};
use super::stats::{self, MetricSummary};

pub struct CdmService {
    backend: Arc<dyn SearchBackend>,
    config: EngineConfig,
    generation: RwLock<Option<SchemaGeneration>>,
    closed: AtomicBool,
}

impl CdmService {
    /// Connect to a backend and settle the schema generation
    ///
    /// Fails with `BackendUnavailable` when the backend cannot be reached or
    /// holds no CDM run index for any configured version.
    pub async fn connect(
        config: EngineConfig,
        backend: Arc<dyn SearchBackend>,
    ) -> Result<Self, QueryError> {
        let service = Self {
            backend,
            config,
            generation: RwLock::new(None),
            closed: AtomicBool::new(false),
        };
        let generation = service.generation().await?;
        tracing::info!(
            backend = service.backend.backend_name(),
            %generation,
            "Connected to CDM store"
        );
        Ok(service)
    }

    /// Active schema generation, probing the backend on first use
    pub async fn generation(&self) -> Result<SchemaGeneration, QueryError> {
        let cached = self.generation.read().clone();
        if let Some(generation) = cached {
            return Ok(generation);
        }

        let probed = match self.config.generation {
            GenerationMode::Legacy => {
                self.verify(SchemaGeneration::Legacy {
                    version: first_version(&self.config.legacy_versions, "legacy")?,
                })
                .await?
            }
            GenerationMode::Sharded => {
                self.verify(SchemaGeneration::Sharded {
                    version: first_version(&self.config.sharded_versions, "sharded")?,
                })
                .await?
            }
            GenerationMode::Auto => self.probe().await?,
        };

        let mut slot = self.generation.write();
        Ok(slot.get_or_insert(probed).clone())
    }

    /// Number of runs stored under `generation`
    async fn count_runs(&self, generation: &SchemaGeneration) -> Result<u64, QueryError> {
        let index = match generation {
            SchemaGeneration::Sharded { version } => {
                IndexTarget::Pattern(shard_pattern(version, Collection::Run))
            }
            SchemaGeneration::Legacy { version } => {
                IndexTarget::Single(legacy_index(version, Collection::Run))
            }
        };
        let request = SearchRequest::new(Collection::Run, index, BoolQuery::new());
        let response = self.backend.search(&request).await?;
        tracing::debug!(%generation, total = response.total, "Probed run index");
        Ok(response.total)
    }

    /// Confirm the backend answers for a configured generation
    async fn verify(&self, generation: SchemaGeneration) -> Result<SchemaGeneration, QueryError> {
        if self.count_runs(&generation).await? == 0 {
            tracing::warn!(%generation, "Configured schema generation holds no runs");
        }
        Ok(generation)
    }

    /// First configured version whose run index holds documents, sharded first
    async fn probe(&self) -> Result<SchemaGeneration, QueryError> {
        let candidates = self
            .config
            .sharded_versions
            .iter()
            .map(|version| SchemaGeneration::Sharded {
                version: version.clone(),
            })
            .chain(
                self.config
                    .legacy_versions
                    .iter()
                    .map(|version| SchemaGeneration::Legacy {
                        version: version.clone(),
                    }),
            );

        for generation in candidates {
            if self.count_runs(&generation).await? > 0 {
                return Ok(generation);
            }
        }

        Err(DataError::backend_unavailable(
            self.backend.backend_name(),
            "no CDM run index found for any configured version",
        )
        .into())
    }

    async fn context(&self) -> Result<QueryContext, QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataError::backend_unavailable(
                self.backend.backend_name(),
                "service is closed",
            )
            .into());
        }
        Ok(QueryContext::new(
            self.backend.clone(),
            IndexResolver::new(self.generation().await?),
            self.config.max_page_size,
        ))
    }

    pub async fn list_runs(&self, query: &RunQuery) -> Result<RunList, QueryError> {
        let ctx = self.context().await?;
        runs::list_runs(&ctx, query, &self.config.default_sort).await
    }

    pub async fn tags(&self, run: &str) -> Result<BTreeMap<String, String>, QueryError> {
        let ctx = self.context().await?;
        entities::tags(&ctx, &EntityRef::parse(run)?).await
    }

    pub async fn params(
        &self,
        run: Option<&str>,
        iteration: Option<&str>,
    ) -> Result<ParamListing, QueryError> {
        let ctx = self.context().await?;
        entities::params(
            &ctx,
            EntityRef::parse_opt(run)?.as_ref(),
            EntityRef::parse_opt(iteration)?.as_ref(),
        )
        .await
    }

    pub async fn iterations(&self, run: &str) -> Result<Vec<IterationSummary>, QueryError> {
        let ctx = self.context().await?;
        entities::iterations(&ctx, &EntityRef::parse(run)?).await
    }

    pub async fn samples(
        &self,
        run: Option<&str>,
        iteration: Option<&str>,
    ) -> Result<Vec<SampleSummary>, QueryError> {
        let ctx = self.context().await?;
        entities::samples(
            &ctx,
            EntityRef::parse_opt(run)?.as_ref(),
            EntityRef::parse_opt(iteration)?.as_ref(),
        )
        .await
    }

    pub async fn periods(
        &self,
        run: Option<&str>,
        iteration: Option<&str>,
        sample: Option<&str>,
    ) -> Result<Vec<PeriodSummary>, QueryError> {
        let ctx = self.context().await?;
        entities::periods(
            &ctx,
            EntityRef::parse_opt(run)?.as_ref(),
            EntityRef::parse_opt(iteration)?.as_ref(),
            EntityRef::parse_opt(sample)?.as_ref(),
        )
        .await
    }

    pub async fn metrics(&self, run: &str) -> Result<Vec<MetricListing>, QueryError> {
        let ctx = self.context().await?;
        metrics::list_metrics(&ctx, &EntityRef::parse(run)?).await
    }

    pub async fn breakouts(
        &self,
        run: &str,
        label: &str,
        names: &[String],
        periods: &[String],
    ) -> Result<Breakouts, QueryError> {
        let ctx = self.context().await?;
        metrics::breakouts(&ctx, &EntityRef::parse(run)?, label, names, periods).await
    }

    /// Time series of one metric request
    pub async fn metric_data(&self, metric: &Metric) -> Result<Vec<DataPoint>, QueryError> {
        let Some(run) = metric.run.as_deref() else {
            return Err(QueryError::missing_scope(format!(
                "Data of {} requires a run",
                metric.metric
            )));
        };
        let ctx = self.context().await?;
        let run = EntityRef::parse(run)?;
        let ids = metrics::resolve_ids(
            &ctx,
            &run,
            &metric.metric,
            &metric.names,
            &metric.periods,
            metric.aggregate,
        )
        .await?;
        metrics::fetch_data(&ctx, &run, &ids, &metric.periods).await
    }

    pub async fn summary(&self, metrics: &[Metric]) -> Result<Vec<MetricSummary>, QueryError> {
        let ctx = self.context().await?;
        stats::summarize(&ctx, metrics).await
    }

    pub async fn graph(&self, request: &GraphRequest) -> Result<Graph, QueryError> {
        let ctx = self.context().await?;
        graph::compose(&ctx, request).await
    }

    /// Release the backend; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backend.close().await;
        tracing::debug!(backend = self.backend.backend_name(), "Service closed");
    }
}

fn first_version(versions: &[String], kind: &str) -> Result<String, QueryError> {
    versions.first().cloned().ok_or_else(|| {
        DataError::Config(format!("no {} schema versions configured", kind)).into()
    })
}
