//! Automation sessions and media preparation for Cadence.
//!
//! The [`Publisher`] trait is the seam between the scheduler and whatever
//! drives the target platform. [`BrowserPublisher`] implements it against a
//! browser-profile launcher plus an automation agent, both reached over HTTP.
//!
//! Media attached to a post is downloaded by [`MediaFetcher`] and then handed
//! to a [`MediaTransform`] before submission.

mod browser;
mod error;
mod media;
mod publisher;

pub use browser::BrowserPublisher;
pub use error::PublisherError;
pub use media::{CommandTransform, MediaFetcher, MediaPipeline, MediaTransform, Passthrough};
pub use publisher::{Credentials, Disposition, Publisher, SessionHandle, Submission, SubmitOutcome};
