use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filters::build_sort_terms;
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_LEGACY_VERSIONS, DEFAULT_MAX_PAGE_SIZE,
    DEFAULT_SHARDED_VERSIONS, DEFAULT_SORT, DEFAULT_TIMEOUT_SECS, DEFAULT_URL,
};

// =============================================================================
// Schema Generation Override
// =============================================================================

/// How the schema generation is chosen at connect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Probe the backend, sharded versions first
    #[default]
    Auto,
    /// Use the first configured legacy version without probing
    Legacy,
    /// Use the first configured sharded version without probing
    Sharded,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Auto => write!(f, "auto"),
            GenerationMode::Legacy => write!(f, "legacy"),
            GenerationMode::Sharded => write!(f, "sharded"),
        }
    }
}

// =============================================================================
// File Config Structs
// =============================================================================

/// Backend connection section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct BackendFileConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: Option<bool>,
    pub timeout_secs: Option<u64>,
}

/// Query engine section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct EngineFileConfig {
    pub max_page_size: Option<usize>,
    pub sharded_versions: Option<Vec<String>>,
    pub legacy_versions: Option<Vec<String>>,
    pub generation: Option<GenerationMode>,
    pub default_sort: Option<String>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub backend: Option<BackendFileConfig>,
    pub engine: Option<EngineFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(backend) = other.backend {
            let current = self.backend.get_or_insert_with(BackendFileConfig::default);
            if backend.url.is_some() {
                tracing::trace!(url = ?backend.url, "Merging backend.url");
                current.url = backend.url;
            }
            if backend.username.is_some() {
                tracing::trace!(username = ?backend.username, "Merging backend.username");
                current.username = backend.username;
            }
            if backend.password.is_some() {
                tracing::trace!("Merging backend.password");
                current.password = backend.password;
            }
            if backend.verify_tls.is_some() {
                tracing::trace!(verify_tls = ?backend.verify_tls, "Merging backend.verify_tls");
                current.verify_tls = backend.verify_tls;
            }
            if backend.timeout_secs.is_some() {
                tracing::trace!(timeout_secs = ?backend.timeout_secs, "Merging backend.timeout_secs");
                current.timeout_secs = backend.timeout_secs;
            }
        }

        if let Some(engine) = other.engine {
            let current = self.engine.get_or_insert_with(EngineFileConfig::default);
            if engine.max_page_size.is_some() {
                tracing::trace!(max_page_size = ?engine.max_page_size, "Merging engine.max_page_size");
                current.max_page_size = engine.max_page_size;
            }
            if engine.sharded_versions.is_some() {
                tracing::trace!(versions = ?engine.sharded_versions, "Merging engine.sharded_versions");
                current.sharded_versions = engine.sharded_versions;
            }
            if engine.legacy_versions.is_some() {
                tracing::trace!(versions = ?engine.legacy_versions, "Merging engine.legacy_versions");
                current.legacy_versions = engine.legacy_versions;
            }
            if engine.generation.is_some() {
                tracing::trace!(generation = ?engine.generation, "Merging engine.generation");
                current.generation = engine.generation;
            }
            if engine.default_sort.is_some() {
                tracing::trace!(default_sort = ?engine.default_sort, "Merging engine.default_sort");
                current.default_sort = engine.default_sort;
            }
        }
    }
}

// =============================================================================
// Resolved Config
// =============================================================================

/// Search backend connection
#[derive(Clone)]
pub struct BackendConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            verify_tls: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("verify_tls", &self.verify_tls)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Query engine behavior
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum documents fetched by one search
    pub max_page_size: usize,
    pub sharded_versions: Vec<String>,
    pub legacy_versions: Vec<String>,
    pub generation: GenerationMode,
    /// Run listing order when the caller gives none
    pub default_sort: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            sharded_versions: owned(DEFAULT_SHARDED_VERSIONS),
            legacy_versions: owned(DEFAULT_LEGACY_VERSIONS),
            generation: GenerationMode::Auto,
            default_sort: DEFAULT_SORT.to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.cdmq/cdmq.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.cdmq/cdmq.json) - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::layer(cli, file_config);
        config.validate()?;
        tracing::debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }

    /// Layer defaults -> file config -> CLI/env overrides
    fn layer(cli: &CliConfig, file_config: FileConfig) -> Self {
        let file_backend = file_config.backend.unwrap_or_default();
        let file_engine = file_config.engine.unwrap_or_default();
        let defaults = EngineConfig::default();

        let backend = BackendConfig {
            url: cli
                .url
                .clone()
                .or(file_backend.url)
                .unwrap_or_else(|| DEFAULT_URL.to_string()),
            username: cli.username.clone().or(file_backend.username),
            password: cli.password.clone().or(file_backend.password),
            verify_tls: cli.verify_tls.or(file_backend.verify_tls).unwrap_or(true),
            timeout_secs: cli
                .timeout
                .or(file_backend.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        };

        let engine = EngineConfig {
            max_page_size: cli
                .page_size
                .or(file_engine.max_page_size)
                .unwrap_or(defaults.max_page_size),
            sharded_versions: file_engine
                .sharded_versions
                .unwrap_or(defaults.sharded_versions),
            legacy_versions: file_engine
                .legacy_versions
                .unwrap_or(defaults.legacy_versions),
            generation: cli
                .generation
                .or(file_engine.generation)
                .unwrap_or(defaults.generation),
            default_sort: file_engine.default_sort.unwrap_or(defaults.default_sort),
        };

        Self { backend, engine }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        let url = self.backend.url.trim();
        if url.is_empty() {
            anyhow::bail!("Configuration error: backend.url must not be empty");
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!(
                "Configuration error: backend.url must start with http:// or https:// (got '{}')",
                url
            );
        }
        if self.backend.timeout_secs == 0 {
            anyhow::bail!("Configuration error: backend.timeout_secs must be greater than 0");
        }

        if self.engine.max_page_size == 0 {
            anyhow::bail!("Configuration error: engine.max_page_size must be greater than 0");
        }
        let versions = [
            ("sharded_versions", &self.engine.sharded_versions),
            ("legacy_versions", &self.engine.legacy_versions),
        ];
        for (name, list) in versions {
            if list.iter().any(|v| v.trim().is_empty()) {
                anyhow::bail!("Configuration error: engine.{} must not contain empty versions", name);
            }
        }
        match self.engine.generation {
            GenerationMode::Auto
                if self.engine.sharded_versions.is_empty()
                    && self.engine.legacy_versions.is_empty() =>
            {
                anyhow::bail!("Configuration error: no schema versions configured to probe");
            }
            GenerationMode::Legacy if self.engine.legacy_versions.is_empty() => {
                anyhow::bail!(
                    "Configuration error: generation 'legacy' requires engine.legacy_versions"
                );
            }
            GenerationMode::Sharded if self.engine.sharded_versions.is_empty() => {
                anyhow::bail!(
                    "Configuration error: generation 'sharded' requires engine.sharded_versions"
                );
            }
            _ => {}
        }

        let sort_keys = [self.engine.default_sort.clone()];
        build_sort_terms(&sort_keys).map_err(|e| {
            anyhow::anyhow!("Configuration error: engine.default_sort is invalid: {}", e)
        })?;

        Ok(())
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Get the profile config path (~/.cdmq/cdmq.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
