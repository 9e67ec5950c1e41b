//! Event Ingestor: validation, sequencing and duplicate detection.
//!
//! Validation is a pure function of the payload and the current time, so a
//! rejected event leaves no trace. Only an event that passes validation
//! touches the ingest log, which assigns the ingestion sequence number and
//! detects re-ingested ids durably.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use herald_core::{ChangeType, EventId, ImpactTier, PolicyChangeEvent};
use herald_ledger::{DeliveryLedger, IngestOutcome};

use crate::blocking::with_ledger;
use crate::errors::{IngestError, ValidationError};

/// Actor recorded when the upstream engine does not name one.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Event payload as submitted by the policy engine. Every field is optional
/// at this layer; [`Ingestor::validate`] decides what is required.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    /// Upstream event identifier.
    pub id: Option<String>,
    /// Policy name.
    #[serde(alias = "policyName")]
    pub policy: Option<String>,
    /// Change type (`created` / `updated` / `deleted`).
    #[serde(alias = "changeType")]
    pub change: Option<String>,
    /// Who made the change.
    pub actor: Option<String>,
    /// RFC 3339 timestamp.
    pub timestamp: Option<String>,
    /// Rule payload diff.
    pub diff: Option<Value>,
    /// Declared severity hint.
    #[serde(alias = "severityHint")]
    pub hint: Option<String>,
}

impl RawEvent {
    /// Parse a JSON body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ValidationError> {
        serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}

/// A validated event with its ingestion sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestedEvent {
    /// The validated, now immutable event.
    pub event: PolicyChangeEvent,
    /// Ingestion sequence (monotonic).
    pub sequence: i64,
}

/// Validates inbound events and records them in the ingest log.
#[derive(Clone)]
pub struct Ingestor {
    clock_skew: Duration,
    ledger: DeliveryLedger,
}

impl Ingestor {
    /// Create an ingestor accepting timestamps up to `clock_skew_ms` ahead.
    pub fn new(ledger: DeliveryLedger, clock_skew_ms: u64) -> Self {
        let skew = i64::try_from(clock_skew_ms).unwrap_or(i64::MAX);
        Self {
            clock_skew: Duration::try_milliseconds(skew).unwrap_or(Duration::MAX),
            ledger,
        }
    }

    /// Validate `raw` against `now`. Pure: no I/O, no side effects.
    pub fn validate(
        &self,
        raw: &RawEvent,
        now: DateTime<Utc>,
    ) -> Result<PolicyChangeEvent, ValidationError> {
        let id = required(raw.id.as_deref(), "id")?;
        let policy_name = required(raw.policy.as_deref(), "policy")?;
        let change = required(raw.change.as_deref(), "change")?;
        let timestamp = required(raw.timestamp.as_deref(), "timestamp")?;

        let change_type: ChangeType = change
            .parse()
            .map_err(|_| ValidationError::InvalidChangeType(change.to_string()))?;

        let timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map_err(|_| ValidationError::InvalidTimestamp(timestamp.to_string()))?
            .with_timezone(&Utc);
        if timestamp > now + self.clock_skew {
            return Err(ValidationError::FutureTimestamp {
                timestamp: timestamp.to_rfc3339(),
                skew_ms: u64::try_from(self.clock_skew.num_milliseconds()).unwrap_or(0),
            });
        }

        let severity_hint = match raw.hint.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(hint) => Some(
                hint.parse::<ImpactTier>()
                    .map_err(|_| ValidationError::InvalidSeverityHint(hint.to_string()))?,
            ),
        };

        let actor = raw
            .actor
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or(UNKNOWN_ACTOR);

        Ok(PolicyChangeEvent {
            id: EventId::from(id),
            policy_name: policy_name.to_string(),
            change_type,
            actor: actor.to_string(),
            timestamp,
            diff: raw.diff.clone().unwrap_or(Value::Null),
            severity_hint,
        })
    }

    /// Validate `raw`, then record it in the ingest log.
    ///
    /// A re-ingested id is dropped and reported as
    /// [`ValidationError::Duplicate`].
    pub async fn ingest(
        &self,
        raw: &RawEvent,
        now: DateTime<Utc>,
    ) -> Result<IngestedEvent, IngestError> {
        let event = self.validate(raw, now)?;
        let to_record = event.clone();
        let outcome = with_ledger(&self.ledger, move |ledger| ledger.record_ingest(&to_record)).await?;

        match outcome {
            IngestOutcome::Inserted { sequence } => {
                debug!(event_id = %event.id, sequence, "event ingested");
                Ok(IngestedEvent { event, sequence })
            }
            IngestOutcome::Duplicate { sequence } => {
                warn!(event_id = %event.id, sequence, "duplicate event dropped");
                Err(ValidationError::Duplicate {
                    event_id: event.id,
                    sequence,
                }
                .into())
            }
        }
    }
}

fn required<'a>(value: Option<&'a str>, field: &'static str) -> Result<&'a str, ValidationError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::MissingField(field))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use herald_ledger::ConnectionConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let ledger =
            DeliveryLedger::open(dir.path().join("ledger.db"), &ConnectionConfig::default())
                .unwrap();
        (dir, Ingestor::new(ledger, 5_000))
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn raw(id: &str) -> RawEvent {
        RawEvent {
            id: Some(id.into()),
            policy: Some("access-control".into()),
            change: Some("updated".into()),
            actor: Some("alice".into()),
            timestamp: Some("2025-06-01T11:59:00Z".into()),
            diff: Some(serde_json::json!({"added": ["admin"]})),
            hint: Some("High".into()),
        }
    }

    #[test]
    fn valid_event_passes() {
        let (_dir, ingestor) = setup();
        let event = ingestor.validate(&raw("p1"), now()).unwrap();
        assert_eq!(event.id.as_str(), "p1");
        assert_eq!(event.change_type, ChangeType::Updated);
        assert_eq!(event.severity_hint, Some(ImpactTier::High));
        assert_eq!(event.diff["added"][0], "admin");
    }

    #[test]
    fn missing_fields_are_rejected() {
        let (_dir, ingestor) = setup();
        let cases: [(fn(&mut RawEvent), &str); 4] = [
            (|r| r.id = None, "id"),
            (|r| r.policy = Some("  ".into()), "policy"),
            (|r| r.change = None, "change"),
            (|r| r.timestamp = None, "timestamp"),
        ];
        for (mutate, field) in cases {
            let mut event = raw("p1");
            mutate(&mut event);
            assert_eq!(
                ingestor.validate(&event, now()).unwrap_err(),
                ValidationError::MissingField(field)
            );
        }
    }

    #[test]
    fn bad_values_are_rejected() {
        let (_dir, ingestor) = setup();

        let mut event = raw("p1");
        event.change = Some("renamed".into());
        assert_matches!(
            ingestor.validate(&event, now()),
            Err(ValidationError::InvalidChangeType(_))
        );

        let mut event = raw("p1");
        event.timestamp = Some("yesterday".into());
        assert_matches!(
            ingestor.validate(&event, now()),
            Err(ValidationError::InvalidTimestamp(_))
        );

        let mut event = raw("p1");
        event.hint = Some("critical".into());
        assert_matches!(
            ingestor.validate(&event, now()),
            Err(ValidationError::InvalidSeverityHint(_))
        );
    }

    #[test]
    fn clock_skew_tolerance() {
        let (_dir, ingestor) = setup();

        let mut event = raw("p1");
        event.timestamp = Some("2025-06-01T12:00:05Z".into());
        assert!(ingestor.validate(&event, now()).is_ok());

        event.timestamp = Some("2025-06-01T12:00:05.001Z".into());
        assert_matches!(
            ingestor.validate(&event, now()),
            Err(ValidationError::FutureTimestamp { skew_ms: 5_000, .. })
        );
    }

    #[test]
    fn optional_fields_default() {
        let (_dir, ingestor) = setup();
        let mut event = raw("p1");
        event.actor = None;
        event.diff = None;
        event.hint = Some(String::new());
        let event = ingestor.validate(&event, now()).unwrap();
        assert_eq!(event.actor, UNKNOWN_ACTOR);
        assert!(event.diff.is_null());
        assert_eq!(event.severity_hint, None);
    }

    #[test]
    fn json_aliases_are_accepted() {
        let raw = RawEvent::from_json(
            br#"{"id":"p1","policyName":"mfa","changeType":"deleted","timestamp":"2025-06-01T00:00:00Z","severityHint":"low"}"#,
        )
        .unwrap();
        assert_eq!(raw.policy.as_deref(), Some("mfa"));
        assert_eq!(raw.change.as_deref(), Some("deleted"));
        assert_eq!(raw.hint.as_deref(), Some("low"));
        assert_matches!(RawEvent::from_json(b"[1,2]"), Err(ValidationError::Malformed(_)));
    }

    #[tokio::test]
    async fn ingest_assigns_sequences_and_drops_duplicates() {
        let (_dir, ingestor) = setup();
        let first = ingestor.ingest(&raw("p1"), now()).await.unwrap();
        let second = ingestor.ingest(&raw("p2"), now()).await.unwrap();
        assert!(second.sequence > first.sequence);

        let dup = ingestor.ingest(&raw("p1"), now()).await.unwrap_err();
        assert_matches!(
            dup,
            IngestError::Validation(ValidationError::Duplicate { sequence, .. }) if sequence == first.sequence
        );
    }

    #[tokio::test]
    async fn rejected_event_is_not_recorded() {
        let (_dir, ingestor) = setup();
        let mut bad = raw("p1");
        bad.change = None;
        assert!(ingestor.ingest(&bad, now()).await.is_err());

        let ok = ingestor.ingest(&raw("p1"), now()).await.unwrap();
        assert_eq!(ok.sequence, 1);
    }
}
