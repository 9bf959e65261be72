//! Turns store records into queued jobs.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cadence_store::{Record, RecordStore};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::shutdown::wait_for_shutdown;
use crate::{AccountDirectory, Job, JobQueue, MatchingWindow, SchedulerError, TrackedState};

/// What happens to a record's ready flag once it has been admitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadyFlagPolicy {
    /// Clear the flag in the store right after admission.
    #[default]
    ClearOnAdmission,
    /// Leave the flag for someone else to clear.
    Retain,
}

impl FromStr for ReadyFlagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clear" | "clear-on-admission" => Ok(ReadyFlagPolicy::ClearOnAdmission),
            "retain" => Ok(ReadyFlagPolicy::Retain),
            other => Err(format!("unknown ready flag policy: {}", other)),
        }
    }
}

/// Poller timing and matching settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub refresh_interval: Duration,
    pub scan_interval: Duration,
    pub window: MatchingWindow,
    /// Zone the Date and Time columns are written in.
    pub zone: Tz,
    pub ready_policy: ReadyFlagPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(20),
            scan_interval: Duration::from_secs(10),
            window: MatchingWindow::default(),
            zone: chrono_tz::Europe::London,
            ready_policy: ReadyFlagPolicy::default(),
        }
    }
}

/// Refreshes the snapshot from the store and admits due records.
pub struct RecordPoller {
    store: Arc<dyn RecordStore>,
    tracking: Arc<TrackedState>,
    queue: Arc<JobQueue>,
    accounts: Arc<AccountDirectory>,
    config: PollerConfig,
    /// Ready-flag writes still in progress. Admission never waits on them.
    flag_clears: Mutex<JoinSet<()>>,
}

impl RecordPoller {
    pub fn new(
        store: Arc<dyn RecordStore>,
        tracking: Arc<TrackedState>,
        queue: Arc<JobQueue>,
        accounts: Arc<AccountDirectory>,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            tracking,
            queue,
            accounts,
            config,
            flag_clears: Mutex::new(JoinSet::new()),
        }
    }

    /// Fetch all records and reconcile the in-flight set against them.
    ///
    /// Returns whether the snapshot changed. On error the previous snapshot
    /// is kept.
    pub async fn refresh(&self) -> Result<bool, SchedulerError> {
        let records = self.store.list_all().await?;
        let count = records.len();
        let result = self.tracking.reconcile(records).await;

        if result.changed {
            debug!(records = count, "record snapshot updated");
        }
        for id in &result.released {
            info!(record_id = %id, "record reconciled, eligible again");
        }
        Ok(result.changed)
    }

    /// Admit every due record at `now`. Returns the admitted record ids.
    pub async fn scan_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let snapshot = self.tracking.snapshot().await;
        let mut admitted = Vec::new();

        for record in &snapshot {
            if !record.is_ready() || self.tracking.is_in_flight(&record.id).await {
                continue;
            }
            if let Some(job) = self.due_job(record, now) {
                if self.admit(job).await {
                    admitted.push(record.id.clone());
                }
            }
        }

        admitted
    }

    /// Build the job for `record` if it is due at `now`.
    fn due_job(&self, record: &Record, now: DateTime<Utc>) -> Option<Job> {
        let (Some(date), Some(time)) = (record.fields.date.as_deref(), record.fields.time.as_deref())
        else {
            debug!(record_id = %record.id, "ready record without date or time");
            return None;
        };

        let target = match crate::parse_target(date, time, self.config.zone) {
            Ok(target) => target,
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "skipping record with bad schedule");
                return None;
            }
        };

        if !self.config.window.contains(&target, now) {
            return None;
        }

        let Some(account) = record.account_name() else {
            warn!(record_id = %record.id, "due record has no account");
            return None;
        };
        if !self.accounts.contains(account) {
            warn!(record_id = %record.id, account, "due record names an unknown account");
            return None;
        }

        Some(Job::new(record.id.clone(), account, target, record.payload()))
    }

    async fn admit(&self, job: Job) -> bool {
        if !self.tracking.try_admit(&job.record_id).await {
            return false;
        }

        let record_id = job.record_id.clone();
        info!(
            record_id = %record_id,
            account = %job.account,
            target = %job.target,
            "admitted job"
        );
        self.queue.push(job);

        if self.config.ready_policy == ReadyFlagPolicy::ClearOnAdmission {
            self.clear_ready_flag(record_id).await;
        }
        true
    }

    /// Start clearing a record's ready flag without waiting for the store.
    async fn clear_ready_flag(&self, record_id: String) {
        let store = self.store.clone();
        let mut clears = self.flag_clears.lock().await;
        while let Some(result) = clears.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "ready flag task failed");
            }
        }

        clears.spawn(async move {
            match store.set_ready_flag(&record_id, false).await {
                Ok(()) => debug!(record_id = %record_id, "ready flag cleared"),
                Err(e) => warn!(record_id = %record_id, error = %e, "failed to clear ready flag"),
            }
        });
    }

    /// Wait for every ready-flag write started so far.
    pub async fn flush_flag_clears(&self) {
        let mut clears = self.flag_clears.lock().await;
        while let Some(result) = clears.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "ready flag task failed");
            }
        }
    }

    /// Run the refresh and scan ticks until shutdown.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            refresh_secs = self.config.refresh_interval.as_secs(),
            scan_secs = self.config.scan_interval.as_secs(),
            "record poller started"
        );

        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan = tokio::time::interval(self.config.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                _ = refresh.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "record refresh failed, keeping previous snapshot");
                    }
                }
                _ = scan.tick() => {
                    let admitted = self.scan_due(Utc::now()).await;
                    if !admitted.is_empty() {
                        debug!(count = admitted.len(), queued = self.queue.len(), "scan admitted jobs");
                    }
                }
            }
        }

        let pending = self.flag_clears.lock().await.len();
        if pending > 0 {
            warn!(pending, "ready flag writes still outstanding at shutdown");
        }
        info!("record poller stopped");
    }
}
