//! The publisher seam and the values that cross it.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use crate::PublisherError;

/// Login credentials for one account.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open automation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Profile the session belongs to.
    pub resource_id: String,
    /// Address the automation agent attaches to.
    pub debugger_address: String,
    /// Driver binary reported by the launcher, if any.
    pub driver_path: Option<String>,
}

/// What to do with a session once a job is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the profile entirely.
    Teardown,
    /// Drop our attachment and leave the profile running for reuse.
    Detach,
}

impl Disposition {
    /// Disposition for an account's close-after-use setting.
    pub fn for_policy(close_after_use: bool) -> Self {
        if close_after_use {
            Disposition::Teardown
        } else {
            Disposition::Detach
        }
    }
}

/// A post ready to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub category: String,
    pub title: String,
    pub body: String,
    pub flair: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_path: Option<PathBuf>,
    /// Caption to overlay on the media, when it is not part of the title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<String>,
}

/// Result of a submit that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Published,
    Rejected(String),
}

/// Provider of authenticated automation sessions on the target platform.
///
/// Implementations own their retry policy for slow pages and flaky
/// networks; the scheduler never retries a call.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Start (or attach to) the session for a resource.
    async fn open(&self, resource_id: &str) -> Result<SessionHandle, PublisherError>;

    /// Log in, if the session is not already logged in.
    async fn authenticate(
        &self,
        session: &SessionHandle,
        credentials: &Credentials,
    ) -> Result<(), PublisherError>;

    /// Submit a post.
    ///
    /// An interstitial prompt is reported as [`PublisherError::Interstitial`].
    async fn submit(
        &self,
        session: &SessionHandle,
        submission: &Submission,
    ) -> Result<SubmitOutcome, PublisherError>;

    /// Dismiss an open interstitial prompt, returning its text.
    async fn dismiss_interstitial(
        &self,
        session: &SessionHandle,
    ) -> Result<Option<String>, PublisherError>;

    /// Save a screenshot of the session to `path`.
    async fn capture(&self, session: &SessionHandle, path: &Path) -> Result<(), PublisherError>;

    /// Release the session.
    async fn close(
        &self,
        session: SessionHandle,
        disposition: Disposition,
    ) -> Result<(), PublisherError>;
}
