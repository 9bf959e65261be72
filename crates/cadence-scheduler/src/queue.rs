//! FIFO hand-off between the poller and the dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use crate::Job;

/// Unbounded job queue with a timed pop.
#[derive(Debug)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<mpsc::UnboundedReceiver<Job>>,
    len: AtomicUsize,
}

impl JobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Append a job. Never blocks.
    pub fn push(&self, job: Job) {
        self.len.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the queue, so the send cannot fail.
        let _ = self.tx.send(job);
    }

    /// Take the oldest job, waiting at most `timeout` for one to arrive.
    pub async fn pop(&self, timeout: Duration) -> Option<Job> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(job)) => {
                self.len.fetch_sub(1, Ordering::SeqCst);
                Some(job)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
