//! Path helpers for config and request files

use std::path::PathBuf;

/// Expand `~` and make relative paths absolute against the working directory
///
/// ```text
/// expand_path("~/.cdmq/cdmq.json") // -> /home/user/.cdmq/cdmq.json
/// expand_path("graph.json")        // -> /current/dir/graph.json
/// expand_path("/etc/cdmq.json")    // -> /etc/cdmq.json
/// ```
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    let expanded = match path.strip_prefix('~') {
        Some("") => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        Some(rest) if rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(&rest[1..]),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}
