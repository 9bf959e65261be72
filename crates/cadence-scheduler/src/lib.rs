//! Scheduling core for Cadence.
//!
//! This crate turns store records into publishing jobs and runs them:
//! - Polls the record store and admits records whose target time has come
//! - Queues admitted jobs in arrival order
//! - Gives each account at most one live session at a time
//! - Screenshots finished sessions and purges downloaded media daily

mod accounts;
mod arbiter;
mod cleanup;
mod dispatcher;
mod error;
mod poller;
mod queue;
mod reporter;
mod scheduler;
mod shutdown;
mod tracking;
mod types;

pub use accounts::{AccountConfig, AccountDirectory};
pub use arbiter::{SessionArbiter, SessionSlot};
pub use cleanup::{CleanupScheduler, PurgeMode, purge_dir};
pub use dispatcher::{DispatchConfig, Dispatcher, build_submission};
pub use error::SchedulerError;
pub use poller::{PollerConfig, ReadyFlagPolicy, RecordPoller};
pub use queue::JobQueue;
pub use reporter::FailureReporter;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use shutdown::wait_for_shutdown;
pub use tracking::{Reconciliation, TrackedState};
pub use types::{Job, JobOutcome, MatchingWindow, parse_target};
