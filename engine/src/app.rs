//! Core application

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};

use crate::core::cli::{self, CliConfig, Commands, MetricArgs, request_text};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME, APP_NAME_LOWER, ENV_LOG};
use crate::data::OpenSearchBackend;
use crate::domain::QueryError;
use crate::domain::graph::GraphRequest;
use crate::domain::metrics::Metric;
use crate::domain::runs::RunQuery;
use crate::domain::service::CdmService;

pub struct CoreApp {
    pub config: AppConfig,
    pub service: CdmService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self::init(&cli_config).await?;
        let outcome = app.execute(command).await;
        app.service.close().await;

        match outcome {
            Ok(output) => {
                println!("{}", serde_json::to_string_pretty(&output)?);
                Ok(())
            }
            Err(e) => {
                if let Some(query_error) = e.downcast_ref::<QueryError>() {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&error_body(query_error))?
                    );
                }
                Err(e)
            }
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let backend = OpenSearchBackend::new(&config.backend)
            .context("Failed to initialize search backend")?;
        let service = CdmService::connect(config.engine.clone(), Arc::new(backend))
            .await
            .with_context(|| format!("Failed to connect to {}", config.backend.url))?;
        tracing::debug!(app = APP_NAME, "Initialized");
        Ok(Self { config, service })
    }

    async fn execute(&self, command: Commands) -> Result<Value> {
        let service = &self.service;
        match command {
            Commands::Runs {
                filters,
                sort,
                start,
                end,
                size,
                offset,
            } => {
                let query = RunQuery {
                    filters,
                    sort,
                    start,
                    end,
                    size,
                    offset,
                };
                render(&service.list_runs(&query).await?)
            }
            Commands::Tags { run } => render(&service.tags(&run).await?),
            Commands::Params { run, iteration } => {
                render(&service.params(run.as_deref(), iteration.as_deref()).await?)
            }
            Commands::Iterations { run } => render(&service.iterations(&run).await?),
            Commands::Samples { run, iteration } => {
                render(&service.samples(run.as_deref(), iteration.as_deref()).await?)
            }
            Commands::Periods {
                run,
                iteration,
                sample,
            } => render(
                &service
                    .periods(run.as_deref(), iteration.as_deref(), sample.as_deref())
                    .await?,
            ),
            Commands::Metrics { run } => render(&service.metrics(&run).await?),
            Commands::Breakouts { metric } => render(
                &service
                    .breakouts(&metric.run, &metric.metric, &metric.names, &metric.periods)
                    .await?,
            ),
            Commands::Data { metric, aggregate } => {
                let request = metric_request(metric, aggregate);
                render(&service.metric_data(&request).await?)
            }
            Commands::Summary { request } => {
                let metrics: Vec<Metric> = serde_json::from_str(&request_text(&request)?)
                    .context("Invalid summary request: expected a JSON list of metrics")?;
                render(&service.summary(&metrics).await?)
            }
            Commands::Graph { request } => {
                let request: GraphRequest = serde_json::from_str(&request_text(&request)?)
                    .context("Invalid graph request")?;
                render(&service.graph(&request).await?)
            }
        }
    }

    /// Logs go to stderr so stdout only carries JSON results
    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }
}

fn render<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

fn metric_request(args: MetricArgs, aggregate: bool) -> Metric {
    Metric {
        run: Some(args.run),
        metric: args.metric,
        names: args.names,
        periods: args.periods,
        aggregate,
        title: None,
    }
}

/// Machine-readable error document printed for query failures
fn error_body(error: &QueryError) -> Value {
    let mut body = json!({
        "error": error.code(),
        "message": error.to_string(),
        "client_error": error.is_client_error(),
    });
    if let Some(details) = error.details() {
        body["details"] = details;
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_carries_code_and_details() {
        let body = error_body(&QueryError::malformed_expression("tag:'abc", 4));
        assert_eq!(body["error"], json!("MALFORMED_EXPRESSION"));
        assert_eq!(body["client_error"], json!(true));
        assert_eq!(body["details"]["position"], json!(4));

        let body = error_body(&QueryError::not_found("period p9"));
        assert!(body.get("details").is_none());
    }

    #[test]
    fn metric_request_from_cli_args() {
        let args = MetricArgs {
            run: "r1".to_string(),
            metric: "uperf::Gbps".to_string(),
            names: vec!["csid=1".to_string()],
            periods: vec![],
        };
        let metric = metric_request(args, true);
        assert_eq!(metric.run.as_deref(), Some("r1"));
        assert!(metric.aggregate);
        assert!(metric.title.is_none());
    }

    #[test]
    fn summary_requests_parse_from_json() {
        let metrics: Vec<Metric> = serde_json::from_str(
            r#"[{ "run": "r1", "metric": "mpstat::Busy-CPU", "names": ["cpu=3"] }]"#,
        )
        .unwrap();
        assert_eq!(metrics[0].names, vec!["cpu=3".to_string()]);
        assert!(!metrics[0].aggregate);

        let graph: GraphRequest =
            serde_json::from_str(r#"{ "run": "r1", "graphs": [{ "metric": "uperf::Gbps" }] }"#)
                .unwrap();
        assert_eq!(graph.graphs.len(), 1);
        assert!(graph.graphs[0].run.is_none());
    }
}
