//! Error types for the record store client.

use thiserror::Error;

/// Errors that can occur when talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The API key was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Record not found.
    #[error("record not found: {0}")]
    NotFound(String),

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Server-side failure (5xx).
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Structured error returned by the table API.
    #[error("API error: {kind} - {message}")]
    Api { kind: String, message: String },

    /// The configured API URL cannot address a table.
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The in-memory store was told to fail.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            StoreError::Server { .. } => true,
            _ => false,
        }
    }
}
