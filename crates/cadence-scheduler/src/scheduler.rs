//! The scheduler: shared state plus the loops that work on it.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_publisher::{MediaPipeline, Publisher};
use cadence_store::RecordStore;
use chrono::NaiveTime;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info};

use crate::{
    AccountDirectory, CleanupScheduler, DispatchConfig, Dispatcher, FailureReporter, JobQueue,
    MatchingWindow, PollerConfig, ReadyFlagPolicy, RecordPoller, SessionArbiter, TrackedState,
};

/// Delay before restarting a background loop that panicked.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Everything the scheduler needs to know, with the daemon's defaults.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Zone the store's Date and Time columns are written in.
    pub record_zone: Tz,
    /// Zone used to file screenshots.
    pub report_zone: Tz,
    pub refresh_interval: Duration,
    pub scan_interval: Duration,
    /// Admission tolerance on either side of a record's target time.
    pub matching_window: Duration,
    pub ready_policy: ReadyFlagPolicy,
    pub poll_timeout: Duration,
    pub spacing_min: Duration,
    pub spacing_max: Duration,
    /// Concurrent session bound. `None` means one per configured account.
    pub max_sessions: Option<usize>,
    pub capture_on_success: bool,
    /// Where downloaded media is kept.
    pub work_dir: PathBuf,
    /// Root of the screenshot tree.
    pub errors_dir: PathBuf,
    /// Local time of the daily working-directory purge.
    pub cleanup_at: NaiveTime,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let poller = PollerConfig::default();
        let dispatch = DispatchConfig::default();
        Self {
            record_zone: poller.zone,
            report_zone: chrono_tz::Europe::Kyiv,
            refresh_interval: poller.refresh_interval,
            scan_interval: poller.scan_interval,
            matching_window: Duration::from_secs(40),
            ready_policy: poller.ready_policy,
            poll_timeout: dispatch.poll_timeout,
            spacing_min: dispatch.spacing_min,
            spacing_max: dispatch.spacing_max,
            max_sessions: None,
            capture_on_success: dispatch.capture_on_success,
            work_dir: PathBuf::from("temp"),
            errors_dir: PathBuf::from("errors"),
            cleanup_at: NaiveTime::MIN,
        }
    }
}

impl SchedulerConfig {
    fn poller(&self) -> PollerConfig {
        PollerConfig {
            refresh_interval: self.refresh_interval,
            scan_interval: self.scan_interval,
            window: MatchingWindow::new(self.matching_window),
            zone: self.record_zone,
            ready_policy: self.ready_policy,
        }
    }

    fn dispatch(&self, accounts: &AccountDirectory) -> DispatchConfig {
        DispatchConfig {
            poll_timeout: self.poll_timeout,
            spacing_min: self.spacing_min,
            spacing_max: self.spacing_max,
            max_sessions: self.max_sessions.unwrap_or(accounts.len()).max(1),
            capture_on_success: self.capture_on_success,
        }
    }
}

/// Owns the tracked state, queue and session slots, and runs the poller,
/// dispatcher and cleanup loops over them.
pub struct Scheduler {
    tracking: Arc<TrackedState>,
    queue: Arc<JobQueue>,
    arbiter: Arc<SessionArbiter>,
    poller: Arc<RecordPoller>,
    dispatcher: Dispatcher,
    work_dir: PathBuf,
    cleanup_at: NaiveTime,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn Publisher>,
        accounts: AccountDirectory,
        media: Option<MediaPipeline>,
    ) -> Self {
        let accounts = Arc::new(accounts);
        let tracking = Arc::new(TrackedState::new());
        let queue = Arc::new(JobQueue::new());
        let arbiter = Arc::new(SessionArbiter::new());

        let poller = Arc::new(RecordPoller::new(
            store,
            tracking.clone(),
            queue.clone(),
            accounts.clone(),
            config.poller(),
        ));

        let reporter = Arc::new(FailureReporter::new(
            publisher.clone(),
            config.errors_dir.clone(),
            config.report_zone,
        ));

        let mut dispatcher = Dispatcher::new(
            queue.clone(),
            arbiter.clone(),
            accounts.clone(),
            publisher,
            reporter,
            config.dispatch(&accounts),
        );
        if let Some(pipeline) = media {
            dispatcher = dispatcher.with_media(Arc::new(pipeline));
        }

        Self {
            tracking,
            queue,
            arbiter,
            poller,
            dispatcher,
            work_dir: config.work_dir,
            cleanup_at: config.cleanup_at,
        }
    }

    pub fn poller(&self) -> &RecordPoller {
        &self.poller
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn arbiter(&self) -> &SessionArbiter {
        &self.arbiter
    }

    pub fn tracking(&self) -> &TrackedState {
        &self.tracking
    }

    /// Run every loop until shutdown. Returns once all of them have stopped.
    pub async fn run(&self, shutdown_rx: watch::Receiver<bool>) {
        info!("scheduler starting");

        let poller = {
            let poller = self.poller.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(supervise("poller", shutdown_rx.clone(), move || {
                let poller = poller.clone();
                let rx = rx.clone();
                async move { poller.run(rx).await }
            }))
        };

        let dispatcher = {
            let dispatcher = self.dispatcher.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(supervise("dispatcher", shutdown_rx.clone(), move || {
                let dispatcher = dispatcher.clone();
                let rx = rx.clone();
                async move { dispatcher.run(rx).await }
            }))
        };

        let cleanup = {
            let dir = self.work_dir.clone();
            let at = self.cleanup_at;
            let rx = shutdown_rx.clone();
            tokio::spawn(supervise("cleanup", shutdown_rx.clone(), move || {
                CleanupScheduler::new(dir.clone(), at).run(rx.clone())
            }))
        };

        for (name, handle) in [("poller", poller), ("dispatcher", dispatcher), ("cleanup", cleanup)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "supervisor task failed");
            }
        }

        info!(
            queued = self.queue.len(),
            "scheduler shut down gracefully"
        );
    }
}

/// Keep a background loop alive: restart it if it panics, until shutdown.
async fn supervise<F, Fut>(name: &'static str, shutdown_rx: watch::Receiver<bool>, make: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        match tokio::spawn(make()).await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                error!(task = name, error = %e, "background loop panicked");
                if *shutdown_rx.borrow() {
                    break;
                }
                sleep(RESTART_DELAY).await;
                info!(task = name, "restarting background loop");
            }
            Err(_) => break,
        }
    }
}
