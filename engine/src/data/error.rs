//! Unified error type for the data layer
//!
//! Wraps failures of the search backend and violations of the CDM document
//! contract. None of these are caused by bad input; they abort the operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    /// Backend cannot be reached (connect/probe failure)
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Backend response or stored document does not have the expected shape
    #[error("Unexpected {context} shape: {detail}")]
    BackendShape { context: String, detail: String },

    /// Backend answered with a non-success HTTP status
    #[error("Backend {backend} returned HTTP {status}: {body}")]
    BackendStatus {
        backend: &'static str,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DataError {
    /// Create a backend unavailable error
    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a shape error for a response or document
    pub fn backend_shape(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::BackendShape {
            context: context.into(),
            detail: detail.into(),
        }
    }

    /// Shape error listing both the required and the present top-level keys
    pub fn missing_keys(context: &str, required: &[&str], mut present: Vec<String>) -> Self {
        present.sort();
        Self::backend_shape(
            context,
            format!(
                "missing required keys: required [{}], present [{}]",
                required.join(", "),
                present.join(", ")
            ),
        )
    }

    /// Get the backend name that generated this error
    pub fn backend(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { backend, .. } | Self::BackendStatus { backend, .. } => {
                backend
            }
            Self::BackendShape { .. } | Self::Http(_) | Self::Json(_) | Self::Config(_) => {
                "unknown"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_error_display() {
        let err = DataError::backend_unavailable("opensearch", "connection refused");
        assert_eq!(
            err.to_string(),
            "Backend opensearch is not available: connection refused"
        );
        assert_eq!(err.backend(), "opensearch");
    }

    #[test]
    fn test_missing_keys_lists_required_and_present() {
        let err = DataError::missing_keys(
            "iteration",
            &["run", "iteration"],
            vec!["run".to_string(), "cdm".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Unexpected iteration shape: missing required keys: required [run, iteration], present [cdm, run]"
        );
        assert_eq!(err.backend(), "unknown");
    }

    #[test]
    fn test_status_error_display() {
        let err = DataError::BackendStatus {
            backend: "opensearch",
            status: 400,
            body: "parse_exception".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Backend opensearch returned HTTP 400: parse_exception"
        );
    }
}
