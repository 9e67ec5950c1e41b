//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"halted"` after a ledger fault.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Delivery tasks still running.
    pub pending_tasks: usize,
    /// The fault that halted the pipeline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted_reason: Option<String>,
}

impl HealthResponse {
    /// Whether the pipeline accepts events.
    pub fn is_ok(&self) -> bool {
        self.halted_reason.is_none()
    }
}

/// Build a health response from live state.
pub fn health_check(
    start_time: Instant,
    pending_tasks: usize,
    halted_reason: Option<String>,
) -> HealthResponse {
    HealthResponse {
        status: if halted_reason.is_some() { "halted" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        pending_tasks,
        halted_reason,
    }
}
