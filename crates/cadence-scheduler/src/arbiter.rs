//! Exclusive per-resource session slots.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Hands out at most one [`SessionSlot`] per resource id at a time.
///
/// Waiters park on the resource's mutex until the holder releases. There is
/// no fairness guarantee among waiters beyond what the mutex provides.
#[derive(Debug, Default)]
pub struct SessionArbiter {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_lock(&self, resource_id: &str) -> Arc<Mutex<()>> {
        self.slots
            .entry(resource_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait until the slot for `resource_id` is free and take it.
    pub async fn acquire(&self, resource_id: &str) -> SessionSlot {
        let lock = self.slot_lock(resource_id);
        let guard = lock.lock_owned().await;
        debug!(resource_id, "session slot acquired");
        SessionSlot {
            resource_id: resource_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Take the slot only if nobody holds it.
    pub fn try_acquire(&self, resource_id: &str) -> Option<SessionSlot> {
        let guard = self.slot_lock(resource_id).try_lock_owned().ok()?;
        Some(SessionSlot {
            resource_id: resource_id.to_string(),
            guard: Some(guard),
        })
    }

    /// Whether someone currently holds the slot for `resource_id`.
    pub fn is_held(&self, resource_id: &str) -> bool {
        match self.slots.get(resource_id) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }
}

/// Exclusive hold on one resource. Released explicitly or on drop.
#[derive(Debug)]
pub struct SessionSlot {
    resource_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionSlot {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Give the slot back. Calling this more than once is harmless.
    pub fn release(&mut self) {
        if self.guard.take().is_some() {
            debug!(resource_id = %self.resource_id, "session slot released");
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let arbiter = SessionArbiter::new();
        let mut slot = arbiter.acquire("k1").await;
        assert!(arbiter.is_held("k1"));
        assert!(slot.is_held());

        slot.release();
        slot.release();
        assert!(!arbiter.is_held("k1"));
        assert!(!slot.is_held());
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let arbiter = SessionArbiter::new();
        {
            let _slot = arbiter.acquire("k1").await;
            assert!(arbiter.try_acquire("k1").is_none());
        }
        assert!(arbiter.try_acquire("k1").is_some());
    }

    #[tokio::test]
    async fn test_slots_are_per_resource() {
        let arbiter = SessionArbiter::new();
        let _a = arbiter.acquire("k1").await;
        let b = arbiter.try_acquire("k2");
        assert!(b.is_some());
        assert!(!arbiter.is_held("unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_resumes_after_release() {
        let arbiter = Arc::new(SessionArbiter::new());
        let mut first = arbiter.acquire("k1").await;

        let waiter = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let slot = arbiter.acquire("k1").await;
                slot.resource_id().to_string()
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());

        first.release();
        assert_eq!(waiter.await.unwrap(), "k1");
    }
}
