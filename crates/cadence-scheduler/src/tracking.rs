//! Last-seen records and the set of admitted record ids.

use std::collections::HashSet;

use cadence_store::Record;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// What a refresh changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The snapshot differed from the store and was replaced.
    pub changed: bool,
    /// Ids dropped from the in-flight set, now eligible for admission again.
    pub released: Vec<String>,
}

/// Scheduler-side view of the store.
///
/// An id stays in flight from admission until the store shows its ready flag
/// cleared, not until its job finishes.
#[derive(Debug, Default)]
pub struct TrackedState {
    snapshot: RwLock<Vec<Record>>,
    in_flight: Mutex<HashSet<String>>,
}

impl TrackedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current snapshot.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.snapshot.read().await.clone()
    }

    /// Replace the snapshot with `records` if they differ, then drop every
    /// in-flight id whose record is no longer ready.
    ///
    /// Ids whose record disappeared from the store are dropped as well.
    pub async fn reconcile(&self, records: Vec<Record>) -> Reconciliation {
        let mut snapshot = self.snapshot.write().await;
        if *snapshot == records {
            return Reconciliation::default();
        }
        *snapshot = records;

        let mut in_flight = self.in_flight.lock().await;
        let mut released = Vec::new();
        in_flight.retain(|id| {
            let still_ready = snapshot.iter().any(|r| &r.id == id && r.is_ready());
            if !still_ready {
                released.push(id.clone());
            }
            still_ready
        });
        released.sort();

        debug!(
            records = snapshot.len(),
            released = released.len(),
            in_flight = in_flight.len(),
            "snapshot replaced"
        );

        Reconciliation {
            changed: true,
            released,
        }
    }

    /// Mark `id` as in flight. Returns false if it already was.
    pub async fn try_admit(&self, id: &str) -> bool {
        self.in_flight.lock().await.insert(id.to_string())
    }

    pub async fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().await.contains(id)
    }

    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}
