//! Error types for media-dl
//!
//! This module provides the error taxonomy of the library:
//! - [`Error`] for everything that can go wrong around a request (config, I/O, tool discovery)
//! - [`DownloadError`] for the failure kinds of a single download request
//! - Machine-readable codes and user-safe messages for front-end integration

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// Every failure that reaches a caller of the downloader is one of these variants.
/// Raw process diagnostics are kept inside [`DownloadError::ProcessFailed`] for logging,
/// but [`Error::user_message`] never exposes them.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (metadata JSON from the retrieval tool)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL is malformed or uses an unsupported scheme
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected input
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Shutdown in progress - not accepting new requests
    #[error("shutdown in progress: not accepting new requests")]
    ShuttingDown,

    /// External tool could not be executed
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),
}

/// Failure kinds of a single download request
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Requester is still inside their cooldown window
    #[error("rate limited: retry in {:.1}s", .remaining.as_secs_f64())]
    RateLimited {
        /// Estimated time until the requester is admitted again
        remaining: Duration,
    },

    /// Retrieval tool exceeded its time budget and was killed
    #[error("retrieval timed out after {}s", .timeout.as_secs())]
    Timeout {
        /// The budget that was exceeded
        timeout: Duration,
    },

    /// Retrieval tool exited with a non-zero status
    #[error("retrieval tool exited with code {exit_code:?}: {stderr}")]
    ProcessFailed {
        /// Exit code, `None` when the process was terminated by a signal
        exit_code: Option<i32>,
        /// Diagnostic text captured from stderr
        stderr: String,
    },

    /// Retrieval succeeded but no usable file was found
    #[error("no artifact produced in {}", .dir.display())]
    NoArtifact {
        /// The destination directory that was searched
        dir: PathBuf,
    },

    /// Selected artifact exceeds the configured size ceiling (the file has been deleted)
    #[error("artifact is {size} bytes, limit is {limit} bytes")]
    TooLarge {
        /// Size of the artifact in bytes
        size: u64,
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// Request was cancelled by the caller or by shutdown
    #[error("download cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code, stable across releases
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Download(e) => e.code(),
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::ShuttingDown => "shutting_down",
            Error::ExternalTool(_) => "external_tool_error",
            Error::NotSupported(_) => "not_supported",
        }
    }

    /// Message suitable for showing to an end user
    ///
    /// Internal diagnostics (stderr, paths) never appear here.
    pub fn user_message(&self) -> String {
        match self {
            Error::Download(e) => e.user_message(),
            Error::InvalidUrl { .. } => "Please send a valid link.".to_string(),
            Error::ShuttingDown => "The service is restarting, please try again shortly.".to_string(),
            _ => "An unexpected error occurred. Please try again later.".to_string(),
        }
    }

    /// The inner download error, if this is one
    pub fn as_download(&self) -> Option<&DownloadError> {
        match self {
            Error::Download(e) => Some(e),
            _ => None,
        }
    }
}

impl DownloadError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::RateLimited { .. } => "rate_limited",
            DownloadError::Timeout { .. } => "timeout",
            DownloadError::ProcessFailed { .. } => "process_failed",
            DownloadError::NoArtifact { .. } => "not_found",
            DownloadError::TooLarge { .. } => "too_large",
            DownloadError::Cancelled => "cancelled",
        }
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::RateLimited { remaining } => format!(
                "Please wait {:.1} seconds before sending another link.",
                remaining.as_secs_f64()
            ),
            DownloadError::Timeout { .. } => {
                "The download took too long and was stopped.".to_string()
            }
            DownloadError::ProcessFailed { .. } | DownloadError::NoArtifact { .. } => {
                "Download failed. The content may be private, deleted, age-restricted or unsupported."
                    .to_string()
            }
            DownloadError::TooLarge { size, limit } => format!(
                "File is too large ({:.1} MB). The limit is {:.0} MB.",
                *size as f64 / (1024.0 * 1024.0),
                *limit as f64 / (1024.0 * 1024.0)
            ),
            DownloadError::Cancelled => "The download was cancelled.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_errors_convert_into_error_with_their_own_code() {
        let err: Error = DownloadError::TooLarge {
            size: 60 * 1024 * 1024,
            limit: 50 * 1024 * 1024,
        }
        .into();

        assert_eq!(err.code(), "too_large");
        assert!(matches!(
            err.as_download(),
            Some(DownloadError::TooLarge { .. })
        ));
    }

    #[test]
    fn process_failure_user_message_does_not_leak_stderr() {
        let err = Error::from(DownloadError::ProcessFailed {
            exit_code: Some(1),
            stderr: "ERROR: [youtube] secret-internal-detail".to_string(),
        });

        let message = err.user_message();
        assert!(!message.contains("secret-internal-detail"));
        assert!(message.starts_with("Download failed"));
        // The Display form keeps the diagnostics for logs
        assert!(err.to_string().contains("secret-internal-detail"));
    }

    #[test]
    fn rate_limited_message_reports_remaining_seconds() {
        let err = DownloadError::RateLimited {
            remaining: Duration::from_millis(4_300),
        };
        assert_eq!(
            err.user_message(),
            "Please wait 4.3 seconds before sending another link."
        );
        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn too_large_message_is_in_megabytes() {
        let err = DownloadError::TooLarge {
            size: 75 * 1024 * 1024,
            limit: 50 * 1024 * 1024,
        };
        assert_eq!(
            err.user_message(),
            "File is too large (75.0 MB). The limit is 50 MB."
        );
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("max_concurrent_downloads", "must be at least 1") {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("max_concurrent_downloads"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }
}
