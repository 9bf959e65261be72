//! Publisher backed by a browser-profile launcher and an automation agent.
//!
//! The launcher owns profile lifecycles (`/api/v1/browser/start|stop`). Once a
//! profile is running it exposes a debugger address, which the automation
//! agent attaches to for login, submission and screenshots.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};

use crate::{
    Credentials, Disposition, Publisher, PublisherError, SessionHandle, Submission, SubmitOutcome,
};

/// Publisher that drives browser profiles through two local HTTP services.
pub struct BrowserPublisher {
    http: Client,
    launcher_url: String,
    agent_url: String,
}

/// Launcher reply envelope.
#[derive(Debug, Deserialize)]
struct LaunchResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<LaunchData>,
}

#[derive(Debug, Deserialize)]
struct LaunchData {
    #[serde(default)]
    ws: Option<LaunchEndpoints>,
    #[serde(default)]
    webdriver: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LaunchEndpoints {
    #[serde(default)]
    selenium: Option<String>,
}

/// Generic agent acknowledgement.
#[derive(Debug, Deserialize)]
struct AgentReply {
    ok: bool,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SubmitStatus {
    Published,
    Rejected,
    Interstitial,
}

#[derive(Debug, Deserialize)]
struct SubmitReply {
    status: SubmitStatus,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DismissReply {
    #[serde(default)]
    text: Option<String>,
}

/// Every agent request names the session by its debugger address.
#[derive(Serialize)]
struct AgentRequest<'a, T: Serialize> {
    debugger_address: &'a str,
    #[serde(flatten)]
    body: T,
}

impl BrowserPublisher {
    /// Create a publisher for the given launcher and agent base URLs.
    pub fn new(launcher_url: impl Into<String>, agent_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Submissions wait on uploads and page loads inside the agent.
            .timeout(Duration::from_secs(300))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            launcher_url: launcher_url.into().trim_end_matches('/').to_string(),
            agent_url: agent_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Call a launcher endpoint for one profile.
    async fn launcher_call(
        &self,
        action: &str,
        resource_id: &str,
        extra: &[(&str, &str)],
    ) -> Result<LaunchResponse, PublisherError> {
        let url = format!("{}/api/v1/browser/{}", self.launcher_url, action);

        let mut query: Vec<(&str, &str)> = vec![("user_id", resource_id)];
        query.extend_from_slice(extra);

        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let reply: LaunchResponse = response.json().await?;
        debug!(resource_id, action, code = reply.code, msg = %reply.msg, "launcher response");
        Ok(reply)
    }

    /// Call an automation agent endpoint for one session.
    async fn agent_call<B: Serialize + Send, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        session: &SessionHandle,
        body: B,
    ) -> Result<R, PublisherError> {
        let url = format!("{}/v1/sessions/{}", self.agent_url, endpoint);

        let response = self
            .http
            .post(&url)
            .json(&AgentRequest {
                debugger_address: &session.debugger_address,
                body,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PublisherError::Automation(format!(
                "{} failed ({}): {}",
                endpoint, status, text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Publisher for BrowserPublisher {
    async fn open(&self, resource_id: &str) -> Result<SessionHandle, PublisherError> {
        if resource_id.trim().is_empty() {
            return Err(PublisherError::Launch {
                resource_id: resource_id.to_string(),
                message: "empty resource id".to_string(),
            });
        }

        let reply = self
            .launcher_call("start", resource_id, &[("open_tabs", "0"), ("ip_tab", "0")])
            .await?;

        if reply.code != 0 {
            return Err(PublisherError::Launch {
                resource_id: resource_id.to_string(),
                message: format!("launcher returned code {}: {}", reply.code, reply.msg),
            });
        }

        let data = reply.data.ok_or_else(|| PublisherError::Launch {
            resource_id: resource_id.to_string(),
            message: "launcher response has no data".to_string(),
        })?;

        let debugger_address = data
            .ws
            .and_then(|ws| ws.selenium)
            .filter(|addr| addr.contains(':'))
            .ok_or_else(|| PublisherError::Launch {
                resource_id: resource_id.to_string(),
                message: "launcher response has no usable debugger address".to_string(),
            })?;

        info!(resource_id, debugger_address = %debugger_address, "browser profile started");

        Ok(SessionHandle {
            resource_id: resource_id.to_string(),
            debugger_address,
            driver_path: data.webdriver,
        })
    }

    async fn authenticate(
        &self,
        session: &SessionHandle,
        credentials: &Credentials,
    ) -> Result<(), PublisherError> {
        let reply: AgentReply = self.agent_call("login", session, credentials).await?;
        if !reply.ok {
            return Err(PublisherError::Auth(reply.message));
        }
        Ok(())
    }

    async fn submit(
        &self,
        session: &SessionHandle,
        submission: &Submission,
    ) -> Result<SubmitOutcome, PublisherError> {
        let reply: SubmitReply = self.agent_call("submit", session, submission).await?;
        match reply.status {
            SubmitStatus::Published => Ok(SubmitOutcome::Published),
            SubmitStatus::Rejected => Ok(SubmitOutcome::Rejected(reply.message)),
            SubmitStatus::Interstitial => Err(PublisherError::Interstitial(reply.message)),
        }
    }

    async fn dismiss_interstitial(
        &self,
        session: &SessionHandle,
    ) -> Result<Option<String>, PublisherError> {
        let reply: DismissReply = self
            .agent_call("dismiss", session, serde_json::json!({}))
            .await?;
        Ok(reply.text)
    }

    async fn capture(&self, session: &SessionHandle, path: &Path) -> Result<(), PublisherError> {
        let reply: AgentReply = self
            .agent_call("screenshot", session, serde_json::json!({ "path": path }))
            .await?;
        if !reply.ok {
            return Err(PublisherError::Automation(reply.message));
        }
        Ok(())
    }

    async fn close(
        &self,
        session: SessionHandle,
        disposition: Disposition,
    ) -> Result<(), PublisherError> {
        match disposition {
            Disposition::Teardown => {
                let reply = self.launcher_call("stop", &session.resource_id, &[]).await?;
                if reply.code != 0 {
                    warn!(
                        resource_id = %session.resource_id,
                        code = reply.code,
                        msg = %reply.msg,
                        "launcher refused to stop profile"
                    );
                    return Err(PublisherError::Launch {
                        resource_id: session.resource_id,
                        message: format!("stop returned code {}: {}", reply.code, reply.msg),
                    });
                }
                info!(resource_id = %session.resource_id, "browser profile stopped");
            }
            Disposition::Detach => {
                let _: AgentReply = self
                    .agent_call("detach", &session, serde_json::json!({}))
                    .await?;
                debug!(resource_id = %session.resource_id, "detached from browser profile");
            }
        }
        Ok(())
    }
}
