//! Error types for publishing.

use thiserror::Error;

/// Errors raised by a [`Publisher`](crate::Publisher) or the media helpers.
#[derive(Debug, Error)]
pub enum PublisherError {
    /// The browser profile could not be started or stopped.
    #[error("launch failed for {resource_id}: {message}")]
    Launch {
        resource_id: String,
        message: String,
    },

    /// Login was refused.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An unexpected interstitial prompt interrupted the submission.
    #[error("unexpected interstitial: {0}")]
    Interstitial(String),

    /// The automation agent reported a failure.
    #[error("automation error: {0}")]
    Automation(String),

    /// Media had a content type we cannot publish.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
