//! Audit-side records: ledger entries, digest windows, operator alerts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::delivery::{Channel, DeliveryStatus, DeliveryTask};
use crate::errors::ParseError;
use crate::events::ImpactTier;
use crate::ids::{AlertId, EventId, TaskId};

/// A ledger entry about to be appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerRecord {
    /// Task whose terminal state is recorded.
    pub task_id: TaskId,
    /// Event (or digest window key) the task belongs to.
    pub event_id: EventId,
    /// Channel of the task.
    pub channel: Channel,
    /// Tier of the event; `None` for digests.
    pub tier: Option<ImpactTier>,
    /// Terminal status (`Delivered` or `Abandoned`).
    pub status: DeliveryStatus,
    /// Attempts made.
    pub attempts: u32,
    /// Failure reason for abandoned tasks.
    pub reason: Option<String>,
    /// Content hash of the delivered payload.
    pub content_hash: String,
    /// Structured detail (the notification data).
    pub detail: Value,
}

impl NewLedgerRecord {
    /// Snapshot a task in its current (terminal) state.
    #[must_use]
    pub fn from_task(task: &DeliveryTask) -> Self {
        Self {
            task_id: task.id.clone(),
            event_id: task.event_id.clone(),
            channel: task.channel,
            tier: task.tier,
            status: task.status,
            attempts: task.attempts,
            reason: task.last_error.clone(),
            content_hash: task.content_hash.clone(),
            detail: task.notification.data.clone(),
        }
    }
}

/// A persisted, immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    /// Position in the ledger's total order.
    pub sequence: i64,
    /// Task whose terminal state is recorded.
    pub task_id: TaskId,
    /// Event (or digest window key).
    pub event_id: EventId,
    /// Channel of the task.
    pub channel: Channel,
    /// Tier of the event; `None` for digests.
    pub tier: Option<ImpactTier>,
    /// Terminal status.
    pub status: DeliveryStatus,
    /// Attempts made.
    pub attempts: u32,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Content hash of the delivered payload.
    pub content_hash: String,
    /// Structured detail.
    pub detail: Value,
    /// Append time, ms since epoch. Non-decreasing in `sequence` order.
    pub appended_at_ms: i64,
}

/// A digest aggregation window, `[start_ms, end_ms)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestWindow {
    /// Inclusive start, ms since epoch.
    pub start_ms: i64,
    /// Exclusive end, ms since epoch.
    pub end_ms: i64,
    /// Events aggregated in this window.
    pub event_ids: Vec<EventId>,
    /// Digest delivery task, if a digest was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// When the window was sealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at_ms: Option<i64>,
}

impl DigestWindow {
    /// Open an empty, unsealed window.
    #[must_use]
    pub fn open(start_ms: i64, end_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms,
            event_ids: Vec::new(),
            task_id: None,
            sealed_at_ms: None,
        }
    }

    /// Whether `ts_ms` falls inside the window.
    #[must_use]
    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms < self.end_ms
    }

    /// Whether the window has been sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed_at_ms.is_some()
    }
}

/// Category of operator alert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A delivery task was abandoned.
    TaskAbandoned,
    /// The ledger could not be written; the pipeline halted.
    LedgerFault,
}

impl AlertKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskAbandoned => "task_abandoned",
            Self::LedgerFault => "ledger_fault",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_abandoned" => Ok(Self::TaskAbandoned),
            "ledger_fault" => Ok(Self::LedgerFault),
            _ => Err(ParseError::new("alert kind", s)),
        }
    }
}

/// Operator-facing alert, separate from user notification channels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorAlert {
    /// Alert identifier.
    pub id: AlertId,
    /// Category.
    pub kind: AlertKind,
    /// Deduplication key; an alert is raised at most once per key.
    pub dedupe_key: String,
    /// Task concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Channel concerned, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<Channel>,
    /// Human-readable description.
    pub message: String,
    /// When the alert was raised.
    pub raised_at_ms: i64,
}

impl OperatorAlert {
    /// Alert for an abandoned task, keyed on the task id.
    #[must_use]
    pub fn task_abandoned(task: &DeliveryTask) -> Self {
        Self {
            id: AlertId::new(),
            kind: AlertKind::TaskAbandoned,
            dedupe_key: format!("abandoned:{}", task.id),
            task_id: Some(task.id.clone()),
            channel: Some(task.channel),
            message: format!(
                "{} delivery for event {} abandoned after {} attempt(s): {}",
                task.channel,
                task.event_id,
                task.attempts,
                task.last_error.as_deref().unwrap_or("unknown error")
            ),
            raised_at_ms: crate::now_millis(),
        }
    }

    /// Alarm for a ledger write failure.
    #[must_use]
    pub fn ledger_fault(message: impl Into<String>) -> Self {
        let id = AlertId::new();
        Self {
            dedupe_key: format!("ledger_fault:{id}"),
            id,
            kind: AlertKind::LedgerFault,
            task_id: None,
            channel: Some(Channel::Ledger),
            message: message.into(),
            raised_at_ms: crate::now_millis(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
