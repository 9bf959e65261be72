//! Media download and transformation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::PublisherError;

/// Rewrites a media file before it is submitted.
///
/// Returns the path of the file to publish, or `None` when the media must be
/// dropped.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    async fn transform(&self, path: &Path) -> Option<PathBuf>;
}

/// Publishes media unchanged.
pub struct Passthrough;

#[async_trait]
impl MediaTransform for Passthrough {
    async fn transform(&self, path: &Path) -> Option<PathBuf> {
        Some(path.to_path_buf())
    }
}

/// Runs an external program as `<program> [args..] <input> <output>`.
///
/// The output is written next to the input with a `_t` suffix on the stem.
pub struct CommandTransform {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandTransform {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Where the transformed copy of `input` goes.
    fn output_path(input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let name = match input.extension() {
            Some(ext) => format!("{}_t.{}", stem, ext.to_string_lossy()),
            None => format!("{}_t", stem),
        };
        input.with_file_name(name)
    }
}

#[async_trait]
impl MediaTransform for CommandTransform {
    async fn transform(&self, path: &Path) -> Option<PathBuf> {
        let output = Self::output_path(path);

        let result = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .arg(&output)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() && output.exists() => {
                debug!(input = %path.display(), output = %output.display(), "media transformed");
                Some(output)
            }
            Ok(out) => {
                warn!(
                    program = %self.program.display(),
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr),
                    "media transform failed"
                );
                None
            }
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "media transform could not run");
                None
            }
        }
    }
}

/// Downloads media URLs into the working directory.
pub struct MediaFetcher {
    http: Client,
    dir: PathBuf,
}

impl MediaFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            dir: dir.into(),
        }
    }

    /// File suffix for a content type, if we can publish it.
    fn suffix_for(content_type: &str) -> Option<&'static str> {
        if content_type.starts_with("image/") {
            Some(".jpg")
        } else if content_type.starts_with("video/") {
            Some(".mp4")
        } else {
            None
        }
    }

    /// Download `url` and return the absolute path of the saved file.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf, PublisherError> {
        let response = self.http.get(url).send().await?.error_for_status()?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let suffix = Self::suffix_for(&content_type)
            .ok_or_else(|| PublisherError::UnsupportedMedia(content_type.clone()))?;

        let bytes = response.bytes().await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}{}", Uuid::new_v4(), suffix));
        tokio::fs::write(&path, &bytes).await?;
        let path = tokio::fs::canonicalize(&path).await?;

        info!(path = %path.display(), bytes = bytes.len(), "downloaded media");
        Ok(path)
    }
}

/// Download followed by transform, degrading to "no media" on any failure.
pub struct MediaPipeline {
    fetcher: MediaFetcher,
    transform: Arc<dyn MediaTransform>,
}

impl MediaPipeline {
    pub fn new(fetcher: MediaFetcher, transform: Arc<dyn MediaTransform>) -> Self {
        Self { fetcher, transform }
    }

    /// Produce a local file for `url`, or `None` if it cannot be published.
    pub async fn prepare(&self, url: &str) -> Option<PathBuf> {
        let downloaded = match self.fetcher.fetch(url).await {
            Ok(path) => path,
            Err(e) => {
                warn!(url, error = %e, "media download failed, posting without media");
                return None;
            }
        };

        let transformed = self.transform.transform(&downloaded).await;
        if transformed.is_none() {
            warn!(url, "media transform dropped the media");
        }
        transformed
    }
}
