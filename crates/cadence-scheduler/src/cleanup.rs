//! Daily purge of the media working directory.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::shutdown::wait_for_shutdown;

/// How often the clock is checked.
const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Pause after a purge. Short of a full day so the next day's minute is
/// never overslept.
const DEFAULT_REST: Duration = Duration::from_secs(23 * 60 * 60 + 55 * 60);

/// What [`purge_dir`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    /// Regular files only; subdirectories are left alone.
    FilesOnly,
    /// Files and directories.
    Everything,
}

/// Remove the contents of `dir`, creating it if missing.
///
/// Individual entries that cannot be removed are logged and skipped. Returns
/// how many entries were removed.
pub async fn purge_dir(dir: &Path, mode: PurgeMode) -> io::Result<usize> {
    tokio::fs::create_dir_all(dir).await?;

    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat entry");
                continue;
            }
        };

        let result = if file_type.is_dir() {
            match mode {
                PurgeMode::FilesOnly => continue,
                PurgeMode::Everything => tokio::fs::remove_dir_all(&path).await,
            }
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove entry"),
        }
    }

    Ok(removed)
}

/// Purges a directory once a day at a fixed local time.
pub struct CleanupScheduler {
    dir: PathBuf,
    at: NaiveTime,
    check_interval: Duration,
    rest: Duration,
    last_purge: Option<NaiveDate>,
    purges: u64,
}

impl CleanupScheduler {
    pub fn new(dir: impl Into<PathBuf>, at: NaiveTime) -> Self {
        Self {
            dir: dir.into(),
            at,
            check_interval: DEFAULT_CHECK_INTERVAL,
            rest: DEFAULT_REST,
            last_purge: None,
            purges: 0,
        }
    }

    pub fn with_intervals(mut self, check_interval: Duration, rest: Duration) -> Self {
        self.check_interval = check_interval;
        self.rest = rest;
        self
    }

    /// Purges run so far.
    pub fn purges(&self) -> u64 {
        self.purges
    }

    /// Whether a purge should run at local time `now`.
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        now.hour() == self.at.hour()
            && now.minute() == self.at.minute()
            && self.last_purge != Some(now.date())
    }

    /// Purge if due at `now`. Returns true if a purge ran.
    pub async fn tick(&mut self, now: NaiveDateTime) -> bool {
        if !self.is_due(now) {
            return false;
        }

        self.last_purge = Some(now.date());
        self.purges += 1;
        match purge_dir(&self.dir, PurgeMode::FilesOnly).await {
            Ok(removed) => info!(
                dir = %self.dir.display(),
                removed,
                purges = self.purges,
                "daily cleanup done"
            ),
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "daily cleanup failed"),
        }
        true
    }

    /// Run until shutdown.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        self.run_with_clock(shutdown_rx, || Local::now().naive_local())
            .await;
    }

    /// Run until shutdown, reading local time from `clock`.
    ///
    /// Checks follow a fixed cadence so the configured minute is always
    /// sampled; a purge pushes the next check out by the rest period.
    async fn run_with_clock<C>(mut self, mut shutdown_rx: watch::Receiver<bool>, clock: C) -> Self
    where
        C: Fn() -> NaiveDateTime,
    {
        info!(dir = %self.dir.display(), at = %self.at.format("%H:%M"), "cleanup scheduler started");

        let mut checks = tokio::time::interval(self.check_interval);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                _ = checks.tick() => {
                    if self.tick(clock()).await {
                        checks.reset_after(self.rest);
                    }
                }
            }
        }

        info!("cleanup scheduler stopped");
        self
    }
}
