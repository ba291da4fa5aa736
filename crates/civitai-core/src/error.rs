//! Error types for the Civitai client.
//!
//! Remote failures are either transient (retried) or definitive (surfaced
//! at once). Local I/O failures abort the one item they hit. Failed jobs are
//! logged with their [`CivitaiError::failure_class`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Civitai client.
#[derive(Debug, Error)]
pub enum CivitaiError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Download errors
    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Download cancelled")]
    DownloadCancelled,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Civitai operations.
pub type Result<T> = std::result::Result<T, CivitaiError>;

impl From<std::io::Error> for CivitaiError {
    fn from(err: std::io::Error) -> Self {
        CivitaiError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CivitaiError {
    fn from(err: serde_json::Error) -> Self {
        CivitaiError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for CivitaiError {
    fn from(err: rusqlite::Error) -> Self {
        CivitaiError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CivitaiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CivitaiError::Timeout(std::time::Duration::from_secs(0))
        } else {
            CivitaiError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl CivitaiError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CivitaiError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Build the error for a non-success HTTP status.
    ///
    /// 404 maps to [`CivitaiError::NotFound`]; everything else keeps the
    /// status and the server's message body.
    pub fn from_status(status: u16, resource: &str, body: &str) -> Self {
        if status == 404 {
            return CivitaiError::NotFound {
                resource: resource.to_string(),
            };
        }
        let message = body.trim();
        CivitaiError::Api {
            status,
            message: if message.is_empty() {
                format!("request for {} failed", resource)
            } else {
                message.to_string()
            },
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Network failures, timeouts, 5xx and the throttling statuses 408/429
    /// are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            CivitaiError::Network { .. } | CivitaiError::Timeout(_) => true,
            CivitaiError::Api { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Check if this is a terminal client-side rejection from the server.
    pub fn is_definitive(&self) -> bool {
        match self {
            CivitaiError::NotFound { .. } => true,
            CivitaiError::Api { status, .. } => !self.is_retryable() && (400..500).contains(status),
            _ => false,
        }
    }

    /// Check if the error came from the local filesystem.
    pub fn is_local_io(&self) -> bool {
        matches!(self, CivitaiError::Io { .. })
    }

    /// Short label for log lines.
    pub fn failure_class(&self) -> &'static str {
        if matches!(self, CivitaiError::DownloadCancelled) {
            "cancelled"
        } else if self.is_retryable() {
            "transient"
        } else if self.is_definitive() {
            "rejected by catalog"
        } else if self.is_local_io() {
            "local I/O"
        } else {
            "other"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CivitaiError::NotFound {
            resource: "model-versions/42".into(),
        };
        assert_eq!(err.to_string(), "Not found: model-versions/42");
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            CivitaiError::from_status(404, "models/1", ""),
            CivitaiError::NotFound { .. }
        ));

        let err = CivitaiError::from_status(400, "models", "{\"error\":\"bad limit\"}");
        match err {
            CivitaiError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("bad limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CivitaiError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(CivitaiError::from_status(503, "models", "").is_retryable());
        assert!(CivitaiError::from_status(429, "models", "").is_retryable());
        assert!(!CivitaiError::from_status(403, "models", "").is_retryable());
        assert!(!CivitaiError::from_status(404, "models", "").is_retryable());
    }

    #[test]
    fn test_definitive_errors() {
        assert!(CivitaiError::from_status(404, "models/1", "").is_definitive());
        assert!(CivitaiError::from_status(400, "models", "bad").is_definitive());
        assert!(!CivitaiError::from_status(500, "models", "").is_definitive());
        assert!(!CivitaiError::from_status(429, "models", "").is_definitive());
    }

    #[test]
    fn test_failure_class() {
        assert_eq!(CivitaiError::DownloadCancelled.failure_class(), "cancelled");
        assert_eq!(
            CivitaiError::from_status(502, "download", "").failure_class(),
            "transient"
        );
        assert_eq!(
            CivitaiError::from_status(404, "model-versions/9", "").failure_class(),
            "rejected by catalog"
        );
        let disk_full = std::io::Error::new(std::io::ErrorKind::Other, "no space left");
        assert_eq!(
            CivitaiError::io_with_path(disk_full, "/lib/models").failure_class(),
            "local I/O"
        );
        assert_eq!(CivitaiError::Other("?".into()).failure_class(), "other");
    }
}
