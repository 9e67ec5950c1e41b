//! Shared HTTP transport for the webhook, SMS and email adapters.

use std::time::Duration;

use herald_core::DeliveryTask;
use herald_core::retry::parse_retry_after_header;
use herald_settings::HttpEndpointSettings;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, warn};

use super::AdapterError;

/// Header carrying the task id so receivers can deduplicate retries.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// A pooled `reqwest` client with a fixed per-request timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            timeout,
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` as JSON to `endpoint` on behalf of `task`.
    pub async fn post_json(
        &self,
        endpoint: &HttpEndpointSettings,
        task: &DeliveryTask,
        body: &Value,
    ) -> Result<(), AdapterError> {
        let url = endpoint
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                AdapterError::Permanent(format!("no {} endpoint configured", task.channel))
            })?;

        let mut request = self
            .client
            .post(url)
            .header(IDEMPOTENCY_KEY_HEADER, task.id.as_str())
            .json(body);
        if let Some(token) = endpoint.auth_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(task_id = %task.id, status = status.as_u16(), "endpoint accepted delivery");
            return Ok(());
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let err = classify_status(status, retry_after_ms);
        warn!(
            task_id = %task.id,
            channel = %task.channel,
            status = status.as_u16(),
            retryable = err.is_retryable(),
            "endpoint rejected delivery"
        );
        Err(err)
    }
}

/// Map a non-2xx status to an [`AdapterError`].
pub(crate) fn classify_status(status: StatusCode, retry_after_ms: Option<u64>) -> AdapterError {
    let reason = format!("HTTP {}", status.as_u16());
    let transient = matches!(status.as_u16(), 408 | 425 | 429) || status.is_server_error();
    if transient {
        AdapterError::Transient {
            reason,
            retry_after_ms,
        }
    } else {
        AdapterError::Permanent(reason)
    }
}

fn classify_send_error(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        AdapterError::transient(err.to_string())
    } else {
        AdapterError::Permanent(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
