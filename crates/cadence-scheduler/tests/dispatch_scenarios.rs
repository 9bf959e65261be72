//! End-to-end scenarios: admission, reconciliation and dispatch against an
//! in-memory store and a scripted publisher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cadence_publisher::{
    Credentials, Disposition, Publisher, PublisherError, SessionHandle, Submission, SubmitOutcome,
};
use cadence_scheduler::{
    AccountConfig, AccountDirectory, DispatchConfig, Dispatcher, FailureReporter, Job, JobOutcome,
    JobQueue, PollerConfig, RecordPoller, Scheduler, SchedulerConfig, SessionArbiter,
    TrackedState,
};
use cadence_store::{MemoryStore, Record};
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Europe::London;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::watch;

/// What the scripted publisher does with a submission, keyed by category.
#[derive(Clone)]
enum Script {
    Publish,
    Reject(&'static str),
    Interstitial(&'static str),
}

#[derive(Default)]
struct Calls {
    events: Vec<String>,
    captures: Vec<PathBuf>,
    closes: Vec<(String, Disposition)>,
    active: HashMap<String, usize>,
    max_active_per_resource: usize,
    active_total: usize,
    max_active_total: usize,
}

#[derive(Default)]
struct ScriptedPublisher {
    calls: Mutex<Calls>,
    scripts: HashMap<String, Script>,
    failing_opens: Mutex<usize>,
    refuse_login: bool,
    submit_delay: Duration,
}

impl ScriptedPublisher {
    fn new() -> Self {
        Self {
            submit_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn with_script(mut self, category: &str, script: Script) -> Self {
        self.scripts.insert(category.to_string(), script);
        self
    }

    fn fail_next_opens(self, count: usize) -> Self {
        *self.failing_opens.lock().unwrap() = count;
        self
    }

    fn refusing_login(mut self) -> Self {
        self.refuse_login = true;
        self
    }

    fn log(&self, event: String) {
        self.calls.lock().unwrap().events.push(event);
    }

    fn events(&self) -> Vec<String> {
        self.calls.lock().unwrap().events.clone()
    }

    fn captures(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().captures.clone()
    }

    fn closes(&self) -> Vec<(String, Disposition)> {
        self.calls.lock().unwrap().closes.clone()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn open(&self, resource_id: &str) -> Result<SessionHandle, PublisherError> {
        {
            let mut failing = self.failing_opens.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                drop(failing);
                self.log(format!("open-failed {}", resource_id));
                return Err(PublisherError::Launch {
                    resource_id: resource_id.to_string(),
                    message: "profile is busy".to_string(),
                });
            }
        }

        let mut calls = self.calls.lock().unwrap();
        let active = calls.active.entry(resource_id.to_string()).or_default();
        *active += 1;
        let active = *active;
        calls.max_active_per_resource = calls.max_active_per_resource.max(active);
        calls.active_total += 1;
        calls.max_active_total = calls.max_active_total.max(calls.active_total);
        calls.events.push(format!("open {}", resource_id));

        Ok(SessionHandle {
            resource_id: resource_id.to_string(),
            debugger_address: format!("127.0.0.1:{}", 9000 + active),
            driver_path: None,
        })
    }

    async fn authenticate(
        &self,
        session: &SessionHandle,
        credentials: &Credentials,
    ) -> Result<(), PublisherError> {
        self.log(format!("login {} {}", session.resource_id, credentials.username));
        if self.refuse_login {
            return Err(PublisherError::Auth("wrong password".to_string()));
        }
        Ok(())
    }

    async fn submit(
        &self,
        session: &SessionHandle,
        submission: &Submission,
    ) -> Result<SubmitOutcome, PublisherError> {
        self.log(format!("submit {} {}", session.resource_id, submission.title));
        tokio::time::sleep(self.submit_delay).await;

        match self
            .scripts
            .get(&submission.category)
            .cloned()
            .unwrap_or(Script::Publish)
        {
            Script::Publish => Ok(SubmitOutcome::Published),
            Script::Reject(reason) => Ok(SubmitOutcome::Rejected(reason.to_string())),
            Script::Interstitial(text) => Err(PublisherError::Interstitial(text.to_string())),
        }
    }

    async fn dismiss_interstitial(
        &self,
        session: &SessionHandle,
    ) -> Result<Option<String>, PublisherError> {
        self.log(format!("dismiss {}", session.resource_id));
        Ok(Some("Community rules".to_string()))
    }

    async fn capture(&self, _session: &SessionHandle, path: &Path) -> Result<(), PublisherError> {
        std::fs::write(path, b"png")?;
        self.calls.lock().unwrap().captures.push(path.to_path_buf());
        Ok(())
    }

    async fn close(
        &self,
        session: SessionHandle,
        disposition: Disposition,
    ) -> Result<(), PublisherError> {
        let mut calls = self.calls.lock().unwrap();
        if let Some(active) = calls.active.get_mut(&session.resource_id) {
            *active -= 1;
        }
        calls.active_total -= 1;
        calls
            .events
            .push(format!("close {}", session.resource_id));
        calls.closes.push((session.resource_id, disposition));
        Ok(())
    }
}

fn accounts() -> AccountDirectory {
    let mut teardown = AccountConfig::new("k2", "poster_b");
    teardown.close_after_use = true;
    AccountDirectory::default()
        .with_account("acctA", AccountConfig::new("k1", "poster_a"))
        .with_account("acctB", teardown)
}

fn record(id: &str, account: &str, time: &str, category: &str) -> Record {
    serde_json::from_value(json!({
        "id": id,
        "fields": {
            "Scheduled?": true,
            "Date": "2024-12-10",
            "Time": time,
            "Account": account,
            "Title": format!("post {}", id),
            "Subreddit": category
        }
    }))
    .unwrap()
}

fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    // London is on GMT in December.
    Utc.with_ymd_and_hms(2024, 12, 10, hour, minute, second).unwrap()
}

fn job(id: &str, account: &str, category: &str) -> Job {
    let record = record(id, account, "14:30", category);
    let target = London.with_ymd_and_hms(2024, 12, 10, 14, 30, 0).unwrap();
    Job::new(id, account, target, record.payload())
}

struct Harness {
    publisher: Arc<ScriptedPublisher>,
    arbiter: Arc<SessionArbiter>,
    queue: Arc<JobQueue>,
    dispatcher: Dispatcher,
    _errors: tempfile::TempDir,
}

fn harness(publisher: ScriptedPublisher, config: DispatchConfig) -> Harness {
    let publisher = Arc::new(publisher);
    let errors = tempfile::tempdir().unwrap();
    let arbiter = Arc::new(SessionArbiter::new());
    let queue = Arc::new(JobQueue::new());
    let reporter = Arc::new(FailureReporter::new(
        publisher.clone(),
        errors.path(),
        chrono_tz::Europe::Kyiv,
    ));
    let dispatcher = Dispatcher::new(
        queue.clone(),
        arbiter.clone(),
        Arc::new(accounts()),
        publisher.clone(),
        reporter,
        config,
    );
    Harness {
        publisher,
        arbiter,
        queue,
        dispatcher,
        _errors: errors,
    }
}

fn quiet_config() -> DispatchConfig {
    DispatchConfig {
        poll_timeout: Duration::from_millis(20),
        spacing_min: Duration::ZERO,
        spacing_max: Duration::ZERO,
        max_sessions: 4,
        capture_on_success: false,
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

struct PollerHarness {
    store: Arc<MemoryStore>,
    tracking: Arc<TrackedState>,
    queue: Arc<JobQueue>,
    poller: RecordPoller,
}

fn poller_harness(records: Vec<Record>) -> PollerHarness {
    let store = Arc::new(MemoryStore::new(records));
    let tracking = Arc::new(TrackedState::new());
    let queue = Arc::new(JobQueue::new());
    let poller = RecordPoller::new(
        store.clone(),
        tracking.clone(),
        queue.clone(),
        Arc::new(accounts()),
        PollerConfig::default(),
    );
    PollerHarness {
        store,
        tracking,
        queue,
        poller,
    }
}

#[tokio::test]
async fn test_due_record_is_admitted() {
    let h = poller_harness(vec![record("r1", "acctA", "14:30", "pics")]);
    h.poller.refresh().await.unwrap();

    let admitted = h.poller.scan_due(at(14, 30, 10)).await;

    assert_eq!(admitted, vec!["r1".to_string()]);
    assert_eq!(h.queue.len(), 1);
    assert!(h.tracking.is_in_flight("r1").await);
    h.poller.flush_flag_clears().await;
    assert_eq!(h.store.flag_writes().await, vec![("r1".to_string(), false)]);
}

#[tokio::test]
async fn test_early_record_is_not_admitted() {
    let h = poller_harness(vec![record("r1", "acctA", "14:30", "pics")]);
    h.poller.refresh().await.unwrap();

    assert!(h.poller.scan_due(at(14, 29, 0)).await.is_empty());
    assert!(h.queue.is_empty());
    assert!(!h.tracking.is_in_flight("r1").await);
    assert!(h.store.flag_writes().await.is_empty());
}

#[tokio::test]
async fn test_in_flight_record_is_not_admitted_twice() {
    let h = poller_harness(vec![record("r1", "acctA", "14:30", "pics")]);
    h.store.fail_writes(true);
    h.poller.refresh().await.unwrap();

    assert_eq!(h.poller.scan_due(at(14, 30, 0)).await.len(), 1);
    h.poller.flush_flag_clears().await;

    // The flag clear failed, so the store still reports the record ready.
    assert!(!h.poller.refresh().await.unwrap());
    assert!(h.poller.scan_due(at(14, 30, 10)).await.is_empty());
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn test_readmission_after_reconciliation() {
    let h = poller_harness(vec![record("r1", "acctA", "14:30", "pics")]);
    h.poller.refresh().await.unwrap();
    assert_eq!(h.poller.scan_due(at(14, 30, 0)).await.len(), 1);
    h.poller.flush_flag_clears().await;

    // The store now shows the cleared flag.
    assert!(h.poller.refresh().await.unwrap());
    assert!(!h.tracking.is_in_flight("r1").await);

    // An operator flags it again while it is still due.
    h.store
        .set_records(vec![record("r1", "acctA", "14:30", "pics")])
        .await;
    h.poller.refresh().await.unwrap();

    assert_eq!(h.poller.scan_due(at(14, 30, 20)).await, vec!["r1".to_string()]);
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn test_two_due_records_for_one_account_are_both_queued() {
    let h = poller_harness(vec![
        record("r1", "acctA", "14:30", "pics"),
        record("r2", "acctA", "14:30", "memes"),
    ]);
    h.poller.refresh().await.unwrap();

    let admitted = h.poller.scan_due(at(14, 30, 5)).await;

    assert_eq!(admitted, vec!["r1".to_string(), "r2".to_string()]);
    assert_eq!(h.queue.len(), 2);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_same_account_jobs_serialise_on_slot() {
    let h = harness(ScriptedPublisher::new(), quiet_config());
    let (_tx, rx) = watch::channel(false);

    let (first, second) = tokio::join!(
        h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx.clone()),
        h.dispatcher.dispatch(job("r2", "acctA", "memes"), rx.clone()),
    );

    assert_eq!(first, JobOutcome::Published);
    assert_eq!(second, JobOutcome::Published);
    assert_eq!(h.publisher.calls.lock().unwrap().max_active_per_resource, 1);

    // The second session only opens after the first one closed.
    let events = h.publisher.events();
    let opens_and_closes: Vec<&str> = events
        .iter()
        .filter(|e| e.starts_with("open") || e.starts_with("close"))
        .map(String::as_str)
        .collect();
    assert_eq!(opens_and_closes, vec!["open k1", "close k1", "open k1", "close k1"]);
    assert!(!h.arbiter.is_held("k1"));
}

#[tokio::test]
async fn test_different_accounts_run_concurrently() {
    let h = harness(ScriptedPublisher::new(), quiet_config());
    let (_tx, rx) = watch::channel(false);

    let (a, b) = tokio::join!(
        h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx.clone()),
        h.dispatcher.dispatch(job("r2", "acctB", "pics"), rx.clone()),
    );

    assert!(a.is_success() && b.is_success());
    assert_eq!(h.publisher.calls.lock().unwrap().max_active_total, 2);
}

#[tokio::test]
async fn test_session_permits_bound_live_sessions() {
    let config = DispatchConfig {
        max_sessions: 1,
        ..quiet_config()
    };
    let h = harness(ScriptedPublisher::new(), config);
    let (_tx, rx) = watch::channel(false);

    tokio::join!(
        h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx.clone()),
        h.dispatcher.dispatch(job("r2", "acctB", "pics"), rx.clone()),
    );

    assert_eq!(h.publisher.calls.lock().unwrap().max_active_total, 1);
}

#[tokio::test]
async fn test_open_failure_abandons_without_capture() {
    let h = harness(ScriptedPublisher::new().fail_next_opens(1), quiet_config());
    let (_tx, rx) = watch::channel(false);

    let outcome = h
        .dispatcher
        .dispatch(job("r1", "acctA", "pics"), rx.clone())
        .await;

    assert!(matches!(outcome, JobOutcome::Abandoned(_)));
    assert!(!h.arbiter.is_held("k1"));
    assert!(h.publisher.captures().is_empty());
    assert!(h.publisher.closes().is_empty());

    // The next job for the same account still goes through.
    let outcome = h.dispatcher.dispatch(job("r2", "acctA", "pics"), rx).await;
    assert_eq!(outcome, JobOutcome::Published);
}

#[tokio::test]
async fn test_login_failure_rejects_without_submit() {
    let h = harness(ScriptedPublisher::new().refusing_login(), quiet_config());
    let (_tx, rx) = watch::channel(false);

    let outcome = h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx).await;

    assert!(matches!(outcome, JobOutcome::Rejected(ref reason) if reason.contains("authentication")));
    assert!(!h.publisher.events().iter().any(|e| e.starts_with("submit")));
    // The failed login page is captured like any other failure.
    assert_eq!(h.publisher.captures().len(), 1);
    assert_eq!(h.publisher.closes(), vec![("k1".to_string(), Disposition::Detach)]);
}

#[tokio::test]
async fn test_interstitial_is_dismissed_and_captured() {
    let publisher =
        ScriptedPublisher::new().with_script("pics", Script::Interstitial("Before you post"));
    let h = harness(publisher, quiet_config());
    let (_tx, rx) = watch::channel(false);

    let outcome = h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx).await;

    assert_eq!(outcome, JobOutcome::Interstitial("Community rules".to_string()));
    assert!(h.publisher.events().contains(&"dismiss k1".to_string()));
    assert_eq!(h.publisher.captures().len(), 1);
}

#[tokio::test]
async fn test_rejection_is_captured_and_teardown_honoured() {
    let publisher = ScriptedPublisher::new().with_script("pics", Script::Reject("flair required"));
    let h = harness(publisher, quiet_config());
    let (_tx, rx) = watch::channel(false);

    let outcome = h.dispatcher.dispatch(job("r1", "acctB", "pics"), rx).await;

    assert_eq!(outcome, JobOutcome::Rejected("flair required".to_string()));
    let captures = h.publisher.captures();
    assert_eq!(captures.len(), 1);
    assert!(captures[0].is_absolute());
    assert!(captures[0].to_string_lossy().contains("acctB"));
    assert_eq!(h.publisher.closes(), vec![("k2".to_string(), Disposition::Teardown)]);
}

#[tokio::test]
async fn test_success_capture_follows_policy() {
    let h = harness(
        ScriptedPublisher::new(),
        DispatchConfig {
            capture_on_success: true,
            ..quiet_config()
        },
    );
    let (_tx, rx) = watch::channel(false);
    assert!(h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx.clone()).await.is_success());
    assert_eq!(h.publisher.captures().len(), 1);

    let h = harness(ScriptedPublisher::new(), quiet_config());
    assert!(h.dispatcher.dispatch(job("r1", "acctA", "pics"), rx).await.is_success());
    assert!(h.publisher.captures().is_empty());
}

#[tokio::test]
async fn test_shutdown_abandons_waiting_job() {
    let h = harness(ScriptedPublisher::new(), quiet_config());
    let (tx, rx) = watch::channel(false);
    let held = h.arbiter.acquire("k1").await;

    let dispatcher = h.dispatcher.clone();
    let waiting =
        tokio::spawn(async move { dispatcher.dispatch(job("r1", "acctA", "pics"), rx).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    let outcome = waiting.await.unwrap();
    assert!(matches!(outcome, JobOutcome::Abandoned(_)));
    assert!(h.publisher.events().is_empty());
    drop(held);
}

#[tokio::test]
async fn test_consumer_loop_drains_queue_and_stops() {
    let h = harness(ScriptedPublisher::new(), quiet_config());
    let (tx, rx) = watch::channel(false);

    h.queue.push(job("r1", "acctA", "pics"));
    h.queue.push(job("r2", "acctA", "memes"));
    h.queue.push(job("r3", "acctB", "pics"));

    let dispatcher = h.dispatcher.clone();
    let running = tokio::spawn(async move { dispatcher.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.publisher.closes().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    assert!(h.queue.is_empty());
    assert_eq!(h.publisher.calls.lock().unwrap().max_active_per_resource, 1);
}

#[tokio::test]
async fn test_running_unit_survives_consumer_loop_restart() {
    let publisher = ScriptedPublisher {
        submit_delay: Duration::from_millis(300),
        ..ScriptedPublisher::new()
    };
    let h = harness(publisher, quiet_config());
    let (tx, rx) = watch::channel(false);
    h.queue.push(job("r1", "acctA", "pics"));

    let dispatcher = h.dispatcher.clone();
    let first = {
        let rx = rx.clone();
        tokio::spawn(async move { dispatcher.run(rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.publisher.events().iter().any(|e| e.starts_with("submit")) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // The loop dies mid-session, as it would on a panic.
    first.abort();
    assert!(first.await.unwrap_err().is_cancelled());

    let dispatcher = h.dispatcher.clone();
    let second = tokio::spawn(async move { dispatcher.run(rx).await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.publisher.closes().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.publisher.closes(), vec![("k1".to_string(), Disposition::Detach)]);
    assert!(!h.arbiter.is_held("k1"));
}

// ---------------------------------------------------------------------------
// Whole scheduler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scheduler_publishes_record_due_now() {
    let now = Utc::now().with_timezone(&London);
    let due = serde_json::from_value::<Record>(json!({
        "id": "r1",
        "fields": {
            "Scheduled?": true,
            "Date": now.format("%Y-%m-%d").to_string(),
            "Time": now.format("%H:%M:%S").to_string(),
            "Account": ["acctA"],
            "Title": "Hello"
        }
    }))
    .unwrap();

    let store = Arc::new(MemoryStore::new(vec![due]));
    let publisher = Arc::new(ScriptedPublisher::new());
    let dir = tempfile::tempdir().unwrap();

    let config = SchedulerConfig {
        refresh_interval: Duration::from_millis(50),
        scan_interval: Duration::from_millis(50),
        poll_timeout: Duration::from_millis(20),
        spacing_min: Duration::ZERO,
        spacing_max: Duration::ZERO,
        capture_on_success: false,
        work_dir: dir.path().join("temp"),
        errors_dir: dir.path().join("errors"),
        ..Default::default()
    };
    let scheduler = Arc::new(Scheduler::new(
        config,
        store.clone(),
        publisher.clone(),
        accounts(),
        None,
    ));

    let (tx, rx) = watch::channel(false);
    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while publisher.closes().is_empty() || scheduler.tracking().is_in_flight("r1").await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    scheduler.poller().flush_flag_clears().await;
    assert_eq!(store.flag_writes().await, vec![("r1".to_string(), false)]);
    assert!(publisher.events().contains(&"submit k1 Hello".to_string()));
}
