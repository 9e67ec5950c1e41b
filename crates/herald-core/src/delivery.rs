//! Delivery tasks and their status state machine.
//!
//! One [`DeliveryTask`] exists per (classified event, channel) pair, plus one
//! per sealed digest window. Status transitions are monotonic: once a task is
//! `Delivered` or `Abandoned` it never changes again.
//!
//! ```text
//! Pending ──► InFlight ──► Delivered
//!    │           │  ▲
//!    │           ▼  │
//!    │         Failed
//!    │           │
//!    └──────► Abandoned ◄── (InFlight on permanent error)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::{ParseError, TransitionError};
use crate::events::{ClassifiedEvent, ImpactTier};
use crate::ids::{EventId, TaskId};

/// Notification channel. Each channel is served by exactly one adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// HTTP POST to a configured endpoint.
    Webhook,
    /// SMS gateway.
    Sms,
    /// Email API.
    Email,
    /// Append-only audit ledger.
    Ledger,
}

impl Channel {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Ledger => "ledger",
        }
    }

    /// All channels in routing order.
    pub const ALL: [Self; 4] = [Self::Webhook, Self::Sms, Self::Email, Self::Ledger];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(Self::Webhook),
            "sms" => Ok(Self::Sms),
            "email" => Ok(Self::Email),
            "ledger" => Ok(Self::Ledger),
            _ => Err(ParseError::new("channel", s)),
        }
    }
}

/// Lifecycle status of a delivery task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, no attempt started yet.
    Pending,
    /// An attempt is running.
    InFlight,
    /// Delivered successfully (terminal).
    Delivered,
    /// Last attempt failed; may be retried.
    Failed,
    /// Given up (terminal).
    Abandoned,
}

impl DeliveryStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Abandoned)
    }

    /// Whether `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::InFlight | Self::Abandoned)
                | (Self::InFlight, Self::Delivered | Self::Failed | Self::Abandoned)
                | (Self::Failed, Self::InFlight | Self::Abandoned)
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_flight" => Ok(Self::InFlight),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(ParseError::new("delivery status", s)),
        }
    }
}

/// Rendered message handed to a channel adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Short subject line (email subject, SMS prefix).
    pub subject: String,
    /// Human-readable body.
    pub body: String,
    /// Structured payload (webhook body, ledger detail).
    pub data: Value,
}

impl Notification {
    /// Render the immediate notification for a classified event.
    #[must_use]
    pub fn for_event(classified: &ClassifiedEvent) -> Self {
        let event = &classified.event;
        let subject = format!(
            "[{}] Policy '{}' {} by {}",
            classified.tier.as_str().to_ascii_uppercase(),
            event.policy_name,
            event.change_type,
            event.actor
        );
        let body = format!(
            "Policy '{}' was {} by {} at {}.\nImpact tier: {}.\nEvent: {}",
            event.policy_name,
            event.change_type,
            event.actor,
            event.timestamp.to_rfc3339(),
            classified.tier,
            event.id
        );
        let data = serde_json::json!({
            "eventId": event.id,
            "policyName": event.policy_name,
            "changeType": event.change_type,
            "actor": event.actor,
            "timestamp": event.timestamp.to_rfc3339(),
            "tier": classified.tier,
            "sequence": classified.sequence,
            "diff": event.diff,
        });
        Self {
            subject,
            body,
            data,
        }
    }
}

/// One unit of delivery work: a notification bound to a single channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTask {
    /// Idempotency key.
    pub id: TaskId,
    /// Event this task delivers (window key for digests).
    pub event_id: EventId,
    /// Target channel.
    pub channel: Channel,
    /// Tier of the event; `None` for digests.
    pub tier: Option<ImpactTier>,
    /// Content hash of the delivered payload.
    pub content_hash: String,
    /// Current status.
    pub status: DeliveryStatus,
    /// Attempts started so far.
    pub attempts: u32,
    /// Reason of the last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// What to send.
    pub notification: Notification,
}

impl DeliveryTask {
    /// Create the task delivering `classified` through `channel`.
    #[must_use]
    pub fn for_event(classified: &ClassifiedEvent, channel: Channel) -> Self {
        Self {
            id: TaskId::for_event(classified.id(), channel),
            event_id: classified.id().clone(),
            channel,
            tier: Some(classified.tier),
            content_hash: classified.event.content_hash(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            notification: Notification::for_event(classified),
        }
    }

    /// Create the digest task for the window starting at `window_start_ms`.
    ///
    /// Digests always go out by email. The content hash covers the rendered
    /// data, so a re-sent digest for the same window hashes identically.
    #[must_use]
    pub fn for_digest(window_start_ms: i64, notification: Notification) -> Self {
        let id = TaskId::for_digest(window_start_ms);
        let bytes = serde_json::to_vec(&notification.data).unwrap_or_default();
        let content_hash = format!("{:x}", Sha256::digest(&bytes));
        Self {
            event_id: EventId::from(id.as_str()),
            id,
            channel: Channel::Email,
            tier: None,
            content_hash,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_error: None,
            notification,
        }
    }

    /// Move to `to`, enforcing the monotonic state machine.
    pub fn transition(&mut self, to: DeliveryStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        if to == DeliveryStatus::InFlight {
            self.attempts += 1;
        }
        self.status = to;
        Ok(())
    }

    /// Record a failed attempt and move to `to` (`Failed` or `Abandoned`).
    pub fn fail(
        &mut self,
        to: DeliveryStatus,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(to)?;
        self.last_error = Some(reason.into());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeType, PolicyChangeEvent};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn classified(tier: ImpactTier) -> ClassifiedEvent {
        ClassifiedEvent {
            event: PolicyChangeEvent {
                id: EventId::from("p1"),
                policy_name: "access-control".into(),
                change_type: ChangeType::Updated,
                actor: "alice".into(),
                timestamp: Utc::now(),
                diff: serde_json::json!({"allow": ["admin"]}),
                severity_hint: None,
            },
            tier,
            sequence: 7,
        }
    }

    #[test]
    fn task_starts_pending() {
        let task = DeliveryTask::for_event(&classified(ImpactTier::High), Channel::Sms);
        assert_eq!(task.status, DeliveryStatus::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.id.as_str(), "p1:sms");
        assert_eq!(task.tier, Some(ImpactTier::High));
    }

    #[test]
    fn happy_path_transitions() {
        let mut task = DeliveryTask::for_event(&classified(ImpactTier::High), Channel::Email);
        task.transition(DeliveryStatus::InFlight).unwrap();
        task.transition(DeliveryStatus::Delivered).unwrap();
        assert_eq!(task.attempts, 1);
        assert!(task.status.is_terminal());
    }

    #[test]
    fn retry_cycle_counts_attempts() {
        let mut task = DeliveryTask::for_event(&classified(ImpactTier::High), Channel::Webhook);
        for _ in 0..3 {
            task.transition(DeliveryStatus::InFlight).unwrap();
            task.fail(DeliveryStatus::Failed, "503").unwrap();
        }
        task.fail(DeliveryStatus::Abandoned, "gave up").unwrap();
        assert_eq!(task.attempts, 3);
        assert_eq!(task.last_error.as_deref(), Some("gave up"));
    }

    #[test]
    fn no_regression_from_terminal_states() {
        for terminal in [DeliveryStatus::Delivered, DeliveryStatus::Abandoned] {
            for to in [
                DeliveryStatus::Pending,
                DeliveryStatus::InFlight,
                DeliveryStatus::Failed,
                DeliveryStatus::Delivered,
                DeliveryStatus::Abandoned,
            ] {
                assert!(!terminal.can_transition_to(to), "{terminal} -> {to}");
            }
        }
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut task = DeliveryTask::for_event(&classified(ImpactTier::High), Channel::Email);
        assert_matches!(
            task.transition(DeliveryStatus::Delivered),
            Err(TransitionError {
                from: DeliveryStatus::Pending,
                to: DeliveryStatus::Delivered
            })
        );
        assert_eq!(task.status, DeliveryStatus::Pending);
    }

    #[test]
    fn pending_can_be_cancelled() {
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Abandoned));
        assert!(!DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Failed));
    }

    #[test]
    fn status_round_trips_through_wire_name() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::InFlight,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
            DeliveryStatus::Abandoned,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
    }

    #[test]
    fn notification_mentions_policy_and_tier() {
        let n = Notification::for_event(&classified(ImpactTier::High));
        assert!(n.subject.starts_with("[HIGH]"));
        assert!(n.subject.contains("access-control"));
        assert_eq!(n.data["tier"], "high");
        assert_eq!(n.data["sequence"], 7);
    }

    #[test]
    fn digest_task_goes_to_email() {
        let notification = Notification {
            subject: "digest".into(),
            body: String::new(),
            data: serde_json::json!({"events": []}),
        };
        let task = DeliveryTask::for_digest(1_000, notification.clone());
        assert_eq!(task.id.as_str(), "digest:1000");
        assert!(task.id.is_digest());
        assert_eq!(task.channel, Channel::Email);
        assert_eq!(task.tier, None);
        assert_eq!(
            task.content_hash,
            DeliveryTask::for_digest(1_000, notification).content_hash
        );
    }

    #[test]
    fn channel_parse() {
        assert_eq!("SMS".parse::<Channel>().unwrap(), Channel::Sms);
        assert!("pager".parse::<Channel>().is_err());
    }
}
