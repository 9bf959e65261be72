//! The record store seam.

use async_trait::async_trait;

use crate::{Record, StoreError};

/// Source of scheduling records.
///
/// The scheduler polls this; nothing is pushed.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch every record in the table.
    async fn list_all(&self) -> Result<Vec<Record>, StoreError>;

    /// Set the ready-to-schedule flag of one record.
    ///
    /// Implementations make a single attempt; callers own any retry.
    async fn set_ready_flag(&self, id: &str, ready: bool) -> Result<(), StoreError>;
}
