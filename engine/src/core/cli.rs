use clap::{Args, Parser, Subcommand};

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use super::config::GenerationMode;
use super::constants::{
    ENV_CONFIG, ENV_GENERATION, ENV_PAGE_SIZE, ENV_PASSWORD, ENV_TIMEOUT, ENV_URL, ENV_USERNAME,
    ENV_VERIFY_TLS,
};
use crate::utils::file::expand_path;

#[derive(Parser)]
#[command(name = "cdmq")]
#[command(version, about = "Query and aggregate CDM benchmark data", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// OpenSearch base URL
    #[arg(long, global = true, env = ENV_URL)]
    pub url: Option<String>,

    /// Basic-auth user
    #[arg(long, global = true, env = ENV_USERNAME)]
    pub username: Option<String>,

    /// Basic-auth password
    #[arg(long, global = true, env = ENV_PASSWORD, hide_env_values = true)]
    pub password: Option<String>,

    /// Verify the backend TLS certificate
    #[arg(long, global = true, env = ENV_VERIFY_TLS)]
    pub verify_tls: Option<bool>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, env = ENV_TIMEOUT)]
    pub timeout: Option<u64>,

    /// Schema generation (auto, legacy or sharded)
    #[arg(long, global = true, env = ENV_GENERATION, value_parser = parse_generation)]
    pub generation: Option<GenerationMode>,

    /// Maximum documents fetched by one search
    #[arg(long, global = true, env = ENV_PAGE_SIZE)]
    pub page_size: Option<usize>,
}

/// Parse schema generation from CLI/env string
fn parse_generation(s: &str) -> Result<GenerationMode, String> {
    match s.to_lowercase().as_str() {
        "auto" => Ok(GenerationMode::Auto),
        "legacy" => Ok(GenerationMode::Legacy),
        "sharded" => Ok(GenerationMode::Sharded),
        _ => Err(format!(
            "Invalid generation '{}'. Valid options: auto, legacy, sharded",
            s
        )),
    }
}

/// Metric selection shared by `breakouts` and `data`
#[derive(Args, Clone, Debug)]
pub struct MetricArgs {
    /// Run id or FullID
    #[arg(long)]
    pub run: String,
    /// Metric label (`source::type`)
    #[arg(long)]
    pub metric: String,
    /// Breakout filter (`name=value`), repeatable
    #[arg(long = "name")]
    pub names: Vec<String>,
    /// Period id, repeatable
    #[arg(long = "period")]
    pub periods: Vec<String>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// List runs with their iterations, tags and params
    Runs {
        /// Filter expression (`tag:k=v,param:k~v,run:k=v`), repeatable
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Sort key (`begin:desc`), repeatable
        #[arg(long)]
        sort: Vec<String>,
        /// Earliest run begin date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Latest run end date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        size: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Tags of a run
    Tags {
        #[arg(long)]
        run: String,
    },
    /// Params of a run or iteration
    Params {
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
    },
    /// Iterations of a run
    Iterations {
        #[arg(long)]
        run: String,
    },
    /// Samples of a run or iteration
    Samples {
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
    },
    /// Periods of a run, iteration or sample
    Periods {
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
        #[arg(long)]
        sample: Option<String>,
    },
    /// Metric labels of a run with their breakouts
    Metrics {
        #[arg(long)]
        run: String,
    },
    /// Remaining breakouts of a partially filtered metric
    Breakouts {
        #[command(flatten)]
        metric: MetricArgs,
    },
    /// Time series of one metric
    Data {
        #[command(flatten)]
        metric: MetricArgs,
        /// Sum every matching metric instead of requiring one
        #[arg(long)]
        aggregate: bool,
    },
    /// Statistics for a JSON list of metric requests (inline or @file)
    Summary { request: String },
    /// Graph for a JSON graph request (inline or @file)
    Graph { request: String },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub config: Option<PathBuf>,
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: Option<bool>,
    pub timeout: Option<u64>,
    pub generation: Option<GenerationMode>,
    pub page_size: Option<usize>,
}

impl Cli {
    fn into_parts(self) -> (CliConfig, Commands) {
        let config = CliConfig {
            config: self.config,
            url: self.url,
            username: self.username,
            password: self.password,
            verify_tls: self.verify_tls,
            timeout: self.timeout,
            generation: self.generation,
            page_size: self.page_size,
        };
        (config, self.command)
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Commands) {
    Cli::parse().into_parts()
}

/// JSON request text given inline or as `@path`
pub fn request_text(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => {
            let path = expand_path(path);
            fs::read_to_string(&path)
                .with_context(|| format!("Failed to read request file: {}", path.display()))
        }
        None => Ok(arg.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> (CliConfig, Commands) {
        Cli::try_parse_from(args).unwrap().into_parts()
    }

    #[test]
    fn parses_runs_with_repeated_filters() {
        let (config, command) = parse_from(&[
            "cdmq",
            "--url",
            "https://search:9200",
            "runs",
            "--filter",
            "tag:topo=internode",
            "--filter",
            "param:bs~4",
            "--start",
            "2025-01-01",
            "--generation",
            "Sharded",
        ]);
        assert_eq!(config.url.as_deref(), Some("https://search:9200"));
        assert_eq!(config.generation, Some(GenerationMode::Sharded));
        let Commands::Runs {
            filters,
            start,
            offset,
            ..
        } = command
        else {
            panic!("expected runs");
        };
        assert_eq!(filters.len(), 2);
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(offset, 0);
    }

    #[test]
    fn parses_metric_arguments() {
        let (_, command) = parse_from(&[
            "cdmq",
            "data",
            "--run",
            "r1",
            "--metric",
            "mpstat::Busy-CPU",
            "--name",
            "cpu=3",
            "--aggregate",
        ]);
        let Commands::Data { metric, aggregate } = command else {
            panic!("expected data");
        };
        assert_eq!(metric.names, vec!["cpu=3".to_string()]);
        assert!(metric.periods.is_empty());
        assert!(aggregate);
    }

    #[test]
    fn rejects_unknown_generation() {
        assert!(Cli::try_parse_from(["cdmq", "--generation", "v10", "tags", "--run", "r1"]).is_err());
    }

    #[test]
    fn request_text_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        fs::write(&path, r#"{"graphs":[]}"#).unwrap();

        let text = request_text(&format!("@{}", path.display())).unwrap();
        assert_eq!(text, r#"{"graphs":[]}"#);
        assert_eq!(request_text("[]").unwrap(), "[]");
        assert!(request_text("@/nonexistent/request.json").is_err());
    }
}
