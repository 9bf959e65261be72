//! In-process record store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{Record, RecordStore, StoreError};

/// A record store held in memory.
///
/// Flag writes are applied to the stored rows and also logged, so callers can
/// assert on what the scheduler asked for.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<Record>>,
    flag_writes: RwLock<Vec<(String, bool)>>,
    fail_lists: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create a store seeded with the given records.
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Replace the stored rows.
    pub async fn set_records(&self, records: Vec<Record>) {
        *self.records.write().await = records;
    }

    /// Current rows.
    pub async fn records(&self) -> Vec<Record> {
        self.records.read().await.clone()
    }

    /// Every `set_ready_flag` call received, in order.
    pub async fn flag_writes(&self) -> Vec<(String, bool)> {
        self.flag_writes.read().await.clone()
    }

    /// Make `list_all` fail until reset.
    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Make `set_ready_flag` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("list disabled".to_string()));
        }
        Ok(self.records.read().await.clone())
    }

    async fn set_ready_flag(&self, id: &str, ready: bool) -> Result<(), StoreError> {
        self.flag_writes.write().await.push((id.to_string(), ready));

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write disabled".to_string()));
        }

        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.fields.ready = ready;
        Ok(())
    }
}
