//! REST table client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{READY_COLUMN, Record, RecordFields, RecordStore, StoreError};

/// Maximum rows the API returns per page.
const PAGE_SIZE: u32 = 100;

/// Attempts per request: initial + 3 retries with backoff.
const MAX_ATTEMPTS: u32 = 4;

/// Ready-flag writes are tried once; a miss is reconciled by the next refresh.
const FLAG_ATTEMPTS: u32 = 1;

/// Per-request timeout for ready-flag writes.
const FLAG_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for a hosted table API (`/v0/{base}/{table}`).
pub struct TableClient {
    http: Client,
    api_url: String,
    api_key: String,
    base_id: String,
    table: String,
}

/// One page of `GET /v0/{base}/{table}`.
#[derive(Debug, Deserialize)]
struct ListPage {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// A row before its columns are interpreted.
#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiErrorDetail {
    Code(String),
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        message: String,
    },
}

impl TableClient {
    /// Create a client for one table.
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        base_id: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_url: api_url.into(),
            api_key: api_key.into(),
            base_id: base_id.into(),
            table: table.into(),
        }
    }

    /// The API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// URL of the table, or of one row when `id` is given.
    fn table_url(&self, id: Option<&str>) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", self.api_url, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidUrl(self.api_url.clone()))?;
            segments
                .pop_if_empty()
                .extend(["v0", self.base_id.as_str(), self.table.as_str()]);
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Fetch a single page of rows.
    async fn list_page(&self, offset: Option<&str>) -> Result<ListPage, StoreError> {
        let url = self.table_url(None)?;

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            let mut query: Vec<(&str, String)> = vec![("pageSize", PAGE_SIZE.to_string())];
            if let Some(offset) = offset {
                query.push(("offset", offset.to_string()));
            }

            let result = match self
                .http
                .get(url.clone())
                .bearer_auth(&self.api_key)
                .query(&query)
                .send()
                .await
            {
                Ok(response) => self.handle_response(response, None).await,
                Err(e) => Err(StoreError::Http(e)),
            };

            match result {
                Ok(page) => return Ok(page),
                Err(ref e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff_ms = 500 * (1 << attempt); // 500ms, 1s, 2s
                    debug!(
                        attempt = attempt + 1,
                        backoff_ms,
                        error = %e,
                        "transient error listing records, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    last_error = Some(result);
                    continue;
                }
                Err(_) => return result,
            }
        }

        last_error.unwrap_or_else(|| Err(StoreError::InvalidResponse("retry exhausted".into())))
    }

    /// Update a set of columns on one row, trying at most `attempts` times.
    async fn patch_fields<T: Serialize + Sync>(
        &self,
        id: &str,
        fields: &T,
        attempts: u32,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        #[derive(Serialize)]
        struct PatchRequest<'a, T> {
            fields: &'a T,
        }

        let url = self.table_url(Some(id))?;
        let body = PatchRequest { fields };

        let mut last_error = None;
        for attempt in 0..attempts {
            let result = match self
                .http
                .patch(url.clone())
                .bearer_auth(&self.api_key)
                .timeout(timeout)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => self
                    .handle_response::<serde_json::Value>(response, Some(id))
                    .await
                    .map(|_| ()),
                Err(e) => Err(StoreError::Http(e)),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(ref e) if e.is_transient() && attempt + 1 < attempts => {
                    let backoff_ms = 500 * (1 << attempt);
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms,
                        record_id = %id,
                        error = %e,
                        "transient error updating record, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    last_error = Some(result);
                    continue;
                }
                Err(_) => return result,
            }
        }

        last_error.unwrap_or_else(|| Err(StoreError::InvalidResponse("retry exhausted".into())))
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        record_id: Option<&str>,
    ) -> Result<T, StoreError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(StoreError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                StoreError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(StoreError::Auth(format!("{}: {}", status, text)));
            }
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound(
                    record_id.unwrap_or(self.table.as_str()).to_string(),
                ));
            }
            if status.is_server_error() {
                return Err(StoreError::Server {
                    status: status.as_u16(),
                    message: text,
                });
            }

            if let Ok(body) = serde_json::from_str::<ApiErrorBody>(&text) {
                let (kind, message) = match body.error {
                    ApiErrorDetail::Code(code) => (code, String::new()),
                    ApiErrorDetail::Detailed { kind, message } => (kind, message),
                };
                return Err(StoreError::Api { kind, message });
            }

            return Err(StoreError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl RecordStore for TableClient {
    /// List every row (handles pagination).
    ///
    /// Rows whose columns cannot be interpreted are skipped with a warning so
    /// one bad row never hides the rest of the table.
    async fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let page = self.list_page(offset.as_deref()).await?;

            for raw in page.records {
                let fields = serde_json::Value::Object(raw.fields);
                match serde_json::from_value::<RecordFields>(fields) {
                    Ok(fields) => records.push(Record { id: raw.id, fields }),
                    Err(e) => {
                        warn!(record_id = %raw.id, error = %e, "skipping malformed record");
                    }
                }
            }

            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(count = records.len(), "listed records");
        Ok(records)
    }

    async fn set_ready_flag(&self, id: &str, ready: bool) -> Result<(), StoreError> {
        let fields = serde_json::json!({ READY_COLUMN: ready });
        self.patch_fields(id, &fields, FLAG_ATTEMPTS, FLAG_TIMEOUT).await
    }
}
