//! Scheduler types.

use std::time::Duration;

use cadence_store::Payload;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::SchedulerError;

/// Date/time layouts accepted in the Date and Time columns.
const TARGET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"];

/// A publishing job admitted from a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Identifier of the record the job came from.
    pub record_id: String,
    /// Account the job publishes through.
    pub account: String,
    /// When the record asked to be published.
    pub target: DateTime<Tz>,
    pub payload: Payload,
}

impl Job {
    pub fn new(
        record_id: impl Into<String>,
        account: impl Into<String>,
        target: DateTime<Tz>,
        payload: Payload,
    ) -> Self {
        Self {
            record_id: record_id.into(),
            account: account.into(),
            target,
            payload,
        }
    }
}

/// How a dispatched job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The post went through.
    Published,
    /// Login or submission failed.
    Rejected(String),
    /// An unexpected prompt interrupted the submission.
    Interstitial(String),
    /// The job never reached a session.
    Abandoned(String),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Published)
    }
}

/// Tolerance around a record's target time inside which it is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingWindow {
    tolerance_ms: i64,
}

impl MatchingWindow {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            tolerance_ms: i64::try_from(tolerance.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Whether `now` is within the tolerance of `target`, on either side.
    pub fn contains(&self, target: &DateTime<Tz>, now: DateTime<Utc>) -> bool {
        let offset = now - target.with_timezone(&Utc);
        offset.num_milliseconds().abs() <= self.tolerance_ms
    }
}

impl Default for MatchingWindow {
    fn default() -> Self {
        Self::new(Duration::from_secs(40))
    }
}

/// Combine a record's Date and Time columns into an instant in `zone`.
///
/// Runs of whitespace are collapsed. Local times skipped by a DST change are
/// rejected; repeated ones resolve to the earlier instant.
pub fn parse_target(date: &str, time: &str, zone: Tz) -> Result<DateTime<Tz>, SchedulerError> {
    let joined = format!("{} {}", date, time);
    let normalized = joined.split_whitespace().collect::<Vec<_>>().join(" ");

    let naive = TARGET_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&normalized, format).ok())
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("unparseable '{}'", normalized)))?;

    zone.from_local_datetime(&naive).earliest().ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("'{}' does not exist in {}", normalized, zone))
    })
}
