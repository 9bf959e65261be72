//! Screenshots of finished sessions, filed by account and day.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_publisher::{Publisher, SessionHandle};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

/// Captures session screenshots under
/// `<root>/<account>/<DD_MM>/<category>_<hh-mmAM>.png`.
pub struct FailureReporter {
    publisher: Arc<dyn Publisher>,
    root: PathBuf,
    zone: Tz,
}

impl FailureReporter {
    pub fn new(publisher: Arc<dyn Publisher>, root: impl Into<PathBuf>, zone: Tz) -> Self {
        Self {
            publisher,
            root: root.into(),
            zone,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for a job goes.
    ///
    /// The day folder is `now` in the reporting zone; the file label is the
    /// job's target time in the same zone.
    pub fn artifact_path(
        &self,
        account: &str,
        category: &str,
        target: &DateTime<Tz>,
        now: DateTime<Utc>,
    ) -> PathBuf {
        let day = now.with_timezone(&self.zone).format("%d_%m").to_string();
        let label = target.with_timezone(&self.zone).format("%I-%M%p").to_string();

        self.root
            .join(path_component(account))
            .join(day)
            .join(format!("{}_{}.png", path_component(category), label))
    }

    /// Capture the session's current state. Never fails; problems are logged.
    pub async fn capture(
        &self,
        session: &SessionHandle,
        account: &str,
        category: &str,
        target: &DateTime<Tz>,
    ) -> Option<PathBuf> {
        let path = self.artifact_path(account, category, target, Utc::now());
        let path = match prepare_location(&path).await {
            Ok(path) => path,
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot create report directory");
                return None;
            }
        };

        match self.publisher.capture(session, &path).await {
            Ok(()) => {
                info!(account, path = %path.display(), "saved session screenshot");
                Some(path)
            }
            Err(e) => {
                error!(account, error = %e, "session screenshot failed");
                None
            }
        }
    }
}

/// Create the artifact's directory and return the path in absolute form.
///
/// The screenshot is written by the automation agent, which resolves relative
/// paths against its own working directory.
async fn prepare_location(path: &Path) -> std::io::Result<PathBuf> {
    let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Ok(path.to_path_buf());
    };
    tokio::fs::create_dir_all(parent).await?;
    let parent = tokio::fs::canonicalize(parent).await?;
    Ok(parent.join(file_name))
}

/// Make a store-provided name safe to use as a single path component.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
