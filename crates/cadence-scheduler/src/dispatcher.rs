//! Pulls jobs off the queue and drives them through a publishing session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cadence_publisher::{
    MediaPipeline, Publisher, PublisherError, SessionHandle, Submission, SubmitOutcome,
};
use rand::Rng;
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::shutdown::wait_for_shutdown;
use crate::{
    AccountConfig, AccountDirectory, FailureReporter, Job, JobOutcome, JobQueue, SessionArbiter,
};

/// Dispatch loop settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long one pop waits before re-checking for shutdown.
    pub poll_timeout: Duration,
    /// Pause between two dispatches is drawn uniformly from this range.
    pub spacing_min: Duration,
    pub spacing_max: Duration,
    /// Upper bound on concurrently open sessions.
    pub max_sessions: usize,
    /// Also screenshot sessions that published successfully.
    pub capture_on_success: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            spacing_min: Duration::from_secs(10),
            spacing_max: Duration::from_secs(20),
            max_sessions: 1,
            capture_on_success: true,
        }
    }
}

impl DispatchConfig {
    fn spacing(&self) -> Duration {
        if self.spacing_max <= self.spacing_min {
            return self.spacing_min;
        }
        rand::thread_rng().gen_range(self.spacing_min..=self.spacing_max)
    }
}

/// Consumes the job queue, one task per job.
///
/// Cloning is cheap; clones share the queue, arbiter, session pool and the
/// set of running units, so a restarted consumer loop picks up where the
/// previous one left off.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    arbiter: Arc<SessionArbiter>,
    accounts: Arc<AccountDirectory>,
    publisher: Arc<dyn Publisher>,
    reporter: Arc<FailureReporter>,
    media: Option<Arc<MediaPipeline>>,
    sessions: Arc<Semaphore>,
    units: Arc<Mutex<JoinSet<JobOutcome>>>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        arbiter: Arc<SessionArbiter>,
        accounts: Arc<AccountDirectory>,
        publisher: Arc<dyn Publisher>,
        reporter: Arc<FailureReporter>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            arbiter,
            accounts,
            publisher,
            reporter,
            media: None,
            sessions: Arc::new(Semaphore::new(config.max_sessions.max(1))),
            units: Arc::new(Mutex::new(JoinSet::new())),
            config,
        }
    }

    /// Download media referenced by jobs through `pipeline`.
    pub fn with_media(mut self, pipeline: Arc<MediaPipeline>) -> Self {
        self.media = Some(pipeline);
        self
    }

    /// Run the consumer loop until shutdown, then wait for running jobs.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            max_sessions = self.config.max_sessions.max(1),
            "dispatcher started"
        );
        {
            let units = self.units.lock().await;
            if !units.is_empty() {
                info!(running = units.len(), "resuming with units already running");
            }
        }

        loop {
            {
                let mut units = self.units.lock().await;
                while let Some(result) = units.try_join_next() {
                    Self::reap(result);
                }
            }

            let job = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                job = self.queue.pop(self.config.poll_timeout) => job,
            };
            let Some(job) = job else { continue };

            let mut units = self.units.lock().await;
            debug!(
                record_id = %job.record_id,
                queued = self.queue.len(),
                running = units.len(),
                "starting dispatch"
            );
            let dispatcher = self.clone();
            let unit_shutdown = shutdown_rx.clone();
            units.spawn(async move { dispatcher.dispatch(job, unit_shutdown).await });
            drop(units);

            let spacing = self.config.spacing();
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                _ = tokio::time::sleep(spacing) => {}
            }
        }

        let mut units = self.units.lock().await;
        info!(running = units.len(), "dispatcher draining");
        while let Some(result) = units.join_next().await {
            Self::reap(result);
        }
        info!("dispatcher stopped");
    }

    fn reap(result: Result<JobOutcome, JoinError>) {
        match result {
            Ok(outcome) => debug!(?outcome, "dispatch unit finished"),
            Err(e) if e.is_panic() => error!(error = %e, "dispatch unit panicked"),
            Err(e) => warn!(error = %e, "dispatch unit cancelled"),
        }
    }

    /// Publish one job: wait for the account's session, submit, report, close.
    #[tracing::instrument(skip_all, fields(record_id = %job.record_id, account = %job.account))]
    pub async fn dispatch(&self, job: Job, mut shutdown_rx: watch::Receiver<bool>) -> JobOutcome {
        let Some(account) = self.accounts.get(&job.account).cloned() else {
            warn!("account no longer configured, abandoning job");
            return JobOutcome::Abandoned(format!("unknown account {}", job.account));
        };

        let media_path = self.prepare_media(&job).await;
        let submission = build_submission(&job, media_path);

        let mut slot = tokio::select! {
            slot = self.arbiter.acquire(&account.resource_id) => slot,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("shutdown while waiting for session slot");
                return JobOutcome::Abandoned("shutdown while waiting for session".to_string());
            }
        };

        let permit = tokio::select! {
            permit = self.sessions.clone().acquire_owned() => permit,
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                info!("shutdown while waiting for session permit");
                return JobOutcome::Abandoned("shutdown while waiting for session".to_string());
            }
        };
        let Ok(_permit) = permit else {
            return JobOutcome::Abandoned("session pool closed".to_string());
        };

        let outcome = self.run_session(&job, &account, &submission).await;
        slot.release();

        match &outcome {
            JobOutcome::Published => info!("job published"),
            JobOutcome::Rejected(reason) => warn!(reason = %reason, "job rejected"),
            JobOutcome::Interstitial(text) => warn!(text = %text, "job hit an interstitial"),
            JobOutcome::Abandoned(reason) => warn!(reason = %reason, "job abandoned"),
        }
        outcome
    }

    async fn prepare_media(&self, job: &Job) -> Option<PathBuf> {
        let url = job.payload.media_url.as_deref()?;
        match &self.media {
            Some(pipeline) => pipeline.prepare(url).await,
            None => {
                debug!(url, "no media pipeline configured, posting without media");
                None
            }
        }
    }

    /// Open, use and close a session. The caller holds the account's slot.
    async fn run_session(
        &self,
        job: &Job,
        account: &AccountConfig,
        submission: &Submission,
    ) -> JobOutcome {
        let session = match self.publisher.open(&account.resource_id).await {
            Ok(session) => session,
            Err(e) => {
                error!(resource_id = %account.resource_id, error = %e, "session provisioning failed");
                return JobOutcome::Abandoned(format!("session provisioning failed: {}", e));
            }
        };

        let outcome = self.publish(&session, account, submission).await;

        if !outcome.is_success() || self.config.capture_on_success {
            self.reporter
                .capture(&session, &job.account, &job.payload.category, &job.target)
                .await;
        }

        if let Err(e) = self.publisher.close(session, account.disposition()).await {
            warn!(resource_id = %account.resource_id, error = %e, "failed to close session");
        }

        outcome
    }

    async fn publish(
        &self,
        session: &SessionHandle,
        account: &AccountConfig,
        submission: &Submission,
    ) -> JobOutcome {
        if let Err(e) = self
            .publisher
            .authenticate(session, &account.credentials())
            .await
        {
            return JobOutcome::Rejected(format!("authentication failed: {}", e));
        }

        match self.publisher.submit(session, submission).await {
            Ok(SubmitOutcome::Published) => JobOutcome::Published,
            Ok(SubmitOutcome::Rejected(reason)) => JobOutcome::Rejected(reason),
            Err(PublisherError::Interstitial(text)) => {
                let text = match self.publisher.dismiss_interstitial(session).await {
                    Ok(Some(dismissed)) if !dismissed.is_empty() => dismissed,
                    Ok(_) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to dismiss interstitial");
                        text
                    }
                };
                JobOutcome::Interstitial(text)
            }
            Err(e) => JobOutcome::Rejected(e.to_string()),
        }
    }
}

/// Turn a job's payload into what the publisher submits.
///
/// Media that could not be prepared moves the caption back into the title.
pub fn build_submission(job: &Job, media_path: Option<PathBuf>) -> Submission {
    let payload = &job.payload;
    let has_media = media_path.is_some();
    Submission {
        category: payload.category.clone(),
        title: payload.submission_title(has_media),
        body: payload.body.clone(),
        flair: payload.flair.clone(),
        media_path,
        overlay: payload.media_overlay(has_media),
    }
}
