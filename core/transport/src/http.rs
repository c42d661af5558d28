//! HTTP delivery against the message backend.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use courier_common::{Error, Result};
use courier_sync::{ConnectivityProbe, MessageSender, QueuedMessage};

/// Path messages are posted to, relative to the base URL.
const MESSAGES_PATH: &str = "api/messages";
/// Path of the liveness endpoint, relative to the base URL.
const HEALTH_PATH: &str = "health";

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

fn user_agent() -> String {
    format!("Courier/{}", env!("CARGO_PKG_VERSION"))
}

/// Parse `base` and resolve `path` beneath it.
///
/// A base with a path prefix (`https://host/v1`) keeps the prefix.
fn endpoint(base: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::InvalidInput(format!("Invalid endpoint '{}': {}", base, e)))?;

    if url.cannot_be_a_base() {
        return Err(Error::InvalidInput(format!(
            "Endpoint '{}' cannot be used as a base URL",
            base
        )));
    }
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }

    url.join(path)
        .map_err(|e| Error::InvalidInput(format!("Invalid endpoint '{}': {}", base, e)))
}

fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Build the request body: the queued message plus sync markers.
fn request_body(message: &QueuedMessage, sync_timestamp: i64) -> Result<Value> {
    let mut body = serde_json::to_value(message)?;
    if let Some(fields) = body.as_object_mut() {
        fields.insert("offline_sync".to_string(), Value::Bool(true));
        fields.insert("sync_timestamp".to_string(), Value::from(sync_timestamp));
    }
    Ok(body)
}

/// Sender that posts each message as JSON to `{base}/api/messages`.
pub struct HttpSender {
    http: Client,
    url: Url,
}

impl HttpSender {
    /// Create a sender for the backend at `base`.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `base` is not an absolute URL
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            http: client(SEND_TIMEOUT)?,
            url: endpoint(base, MESSAGES_PATH)?,
        })
    }

    /// URL messages are posted to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    async fn send(&self, message: &QueuedMessage) -> Result<()> {
        let body = request_body(message, Utc::now().timestamp_millis())?;

        let response = self
            .http
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Failed to send message: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(message_id = %message.id, %status, "Message accepted");
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if text.is_empty() {
            Err(Error::Transport(status.to_string()))
        } else {
            Err(Error::Transport(text))
        }
    }
}

/// Probe that issues `HEAD {base}/health`.
///
/// Any HTTP response, including error statuses, means the backend is reachable.
pub struct HttpProbe {
    http: Client,
    url: Url,
}

impl HttpProbe {
    /// Create a probe for the backend at `base`.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if `base` is not an absolute URL
    pub fn new(base: &str) -> Result<Self> {
        Ok(Self {
            http: client(PROBE_TIMEOUT)?,
            url: endpoint(base, HEALTH_PATH)?,
        })
    }

    /// URL of the liveness endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.http.head(self.url.clone()).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}
