// =============================================================================
// Application Identity
// =============================================================================

/// Application name (for display)
pub const APP_NAME: &str = "cdmq";

/// Application name in lowercase (for paths and log targets)
pub const APP_NAME_LOWER: &str = "cdmq";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".cdmq";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "cdmq.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "CDMQ_CONFIG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CDMQ_LOG";

// =============================================================================
// Environment Variables - Backend
// =============================================================================

/// Environment variable for the OpenSearch base URL
pub const ENV_URL: &str = "CDMQ_URL";

/// Environment variable for the basic-auth user
pub const ENV_USERNAME: &str = "CDMQ_USERNAME";

/// Environment variable for the basic-auth password
pub const ENV_PASSWORD: &str = "CDMQ_PASSWORD";

/// Environment variable toggling TLS certificate verification
pub const ENV_VERIFY_TLS: &str = "CDMQ_VERIFY_TLS";

/// Environment variable for the request timeout in seconds
pub const ENV_TIMEOUT: &str = "CDMQ_TIMEOUT";

// =============================================================================
// Environment Variables - Engine
// =============================================================================

/// Environment variable forcing the schema generation (auto, legacy, sharded)
pub const ENV_GENERATION: &str = "CDMQ_GENERATION";

/// Environment variable for the per-search document cap
pub const ENV_PAGE_SIZE: &str = "CDMQ_PAGE_SIZE";

// =============================================================================
// Backend Defaults
// =============================================================================

/// Default OpenSearch base URL
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Default HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Engine Defaults
// =============================================================================

/// Maximum documents returned by one search (OpenSearch `max_result_window`)
pub const DEFAULT_MAX_PAGE_SIZE: usize = 10_000;

/// Sharded schema versions probed at connect, in order
pub const DEFAULT_SHARDED_VERSIONS: &[&str] = &["v9dev"];

/// Legacy schema versions probed after the sharded ones, in order
pub const DEFAULT_LEGACY_VERSIONS: &[&str] = &["v8dev", "v7dev"];

/// Run listing order when the caller gives none
pub const DEFAULT_SORT: &str = "begin:desc";

// =============================================================================
// Graphs
// =============================================================================

/// Series colors, cycled in request order
pub const GRAPH_COLORS: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// Plot width passed through to the layout
pub const GRAPH_WIDTH: &str = "1500";
