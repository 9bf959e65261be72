//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Record store error.
    #[error("store error: {0}")]
    Store(#[from] cadence_store::StoreError),

    /// Publisher error.
    #[error("publisher error: {0}")]
    Publisher(#[from] cadence_publisher::PublisherError),

    /// A record's date/time could not be turned into an instant.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Invalid account configuration.
    #[error("invalid account configuration: {0}")]
    InvalidAccounts(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
