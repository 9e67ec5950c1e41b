//! Database row types for mapping between `SQLite` rows and domain values.
//!
//! These represent the raw database row shape. Conversion to the public
//! `herald-core` types happens here so that a row the code cannot interpret
//! surfaces as [`LedgerError::Corrupt`] instead of a panic.

use std::str::FromStr;

use herald_core::{
    AlertKind, Channel, DeliveryStatus, DigestWindow, EventId, ImpactTier, LedgerRecord,
    OperatorAlert, TaskId,
};

use crate::errors::{LedgerError, Result};

/// Raw row from the `ledger_records` table.
#[derive(Clone, Debug)]
pub struct LedgerRecordRow {
    /// Ledger sequence.
    pub sequence: i64,
    /// Task id.
    pub task_id: String,
    /// Event id.
    pub event_id: String,
    /// Channel wire name.
    pub channel: String,
    /// Tier wire name.
    pub tier: Option<String>,
    /// Status wire name.
    pub status: String,
    /// Attempt count.
    pub attempts: i64,
    /// Failure reason.
    pub reason: Option<String>,
    /// Content hash.
    pub content_hash: String,
    /// Detail JSON text.
    pub detail: String,
    /// Append time, ms.
    pub appended_at_ms: i64,
}

impl LedgerRecordRow {
    /// Column list matching [`Self::map_row`].
    pub const COLUMNS: &'static str = "sequence, task_id, event_id, channel, tier, status, \
         attempts, reason, content_hash, detail, appended_at_ms";

    /// Map a rusqlite row selected with [`Self::COLUMNS`].
    pub fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence: row.get(0)?,
            task_id: row.get(1)?,
            event_id: row.get(2)?,
            channel: row.get(3)?,
            tier: row.get(4)?,
            status: row.get(5)?,
            attempts: row.get(6)?,
            reason: row.get(7)?,
            content_hash: row.get(8)?,
            detail: row.get(9)?,
            appended_at_ms: row.get(10)?,
        })
    }

    /// Convert into the domain record.
    pub fn into_record(self) -> Result<LedgerRecord> {
        Ok(LedgerRecord {
            sequence: self.sequence,
            task_id: TaskId::from_string(self.task_id),
            event_id: EventId::from_string(self.event_id),
            channel: parse(&self.channel)?,
            tier: self.tier.as_deref().map(parse::<ImpactTier>).transpose()?,
            status: parse::<DeliveryStatus>(&self.status)?,
            attempts: u32::try_from(self.attempts)
                .map_err(|_| LedgerError::Corrupt(format!("attempts {}", self.attempts)))?,
            reason: self.reason,
            content_hash: self.content_hash,
            detail: serde_json::from_str(&self.detail)?,
            appended_at_ms: self.appended_at_ms,
        })
    }
}

/// Raw row from the `digest_windows` table.
#[derive(Clone, Debug)]
pub struct DigestWindowRow {
    /// Inclusive start.
    pub start_ms: i64,
    /// Exclusive end.
    pub end_ms: i64,
    /// Event ids as a JSON array.
    pub event_ids: String,
    /// Digest task id.
    pub task_id: Option<String>,
    /// Seal time.
    pub sealed_at_ms: i64,
}

impl DigestWindowRow {
    /// Map a rusqlite row (`start_ms, end_ms, event_ids, task_id, sealed_at_ms`).
    pub fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            start_ms: row.get(0)?,
            end_ms: row.get(1)?,
            event_ids: row.get(2)?,
            task_id: row.get(3)?,
            sealed_at_ms: row.get(4)?,
        })
    }

    /// Convert into the domain window.
    pub fn into_window(self) -> Result<DigestWindow> {
        Ok(DigestWindow {
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            event_ids: serde_json::from_str(&self.event_ids)?,
            task_id: self.task_id.map(TaskId::from_string),
            sealed_at_ms: Some(self.sealed_at_ms),
        })
    }
}

/// Raw row from the `operator_alerts` table.
#[derive(Clone, Debug)]
pub struct AlertRow {
    /// Alert id.
    pub id: String,
    /// Kind wire name.
    pub kind: String,
    /// Dedupe key.
    pub dedupe_key: String,
    /// Task id.
    pub task_id: Option<String>,
    /// Channel wire name.
    pub channel: Option<String>,
    /// Message.
    pub message: String,
    /// Raise time.
    pub raised_at_ms: i64,
}

impl AlertRow {
    /// Map a rusqlite row (`id, kind, dedupe_key, task_id, channel, message, raised_at_ms`).
    pub fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            dedupe_key: row.get(2)?,
            task_id: row.get(3)?,
            channel: row.get(4)?,
            message: row.get(5)?,
            raised_at_ms: row.get(6)?,
        })
    }

    /// Convert into the domain alert.
    pub fn into_alert(self) -> Result<OperatorAlert> {
        Ok(OperatorAlert {
            id: self.id.into(),
            kind: parse::<AlertKind>(&self.kind)?,
            dedupe_key: self.dedupe_key,
            task_id: self.task_id.map(TaskId::from_string),
            channel: self.channel.as_deref().map(parse::<Channel>).transpose()?,
            message: self.message,
            raised_at_ms: self.raised_at_ms,
        })
    }
}

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr<Err = herald_core::ParseError>,
{
    value
        .parse()
        .map_err(|e: herald_core::ParseError| LedgerError::Corrupt(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn record_row() -> LedgerRecordRow {
        LedgerRecordRow {
            sequence: 3,
            task_id: "p1:webhook".into(),
            event_id: "p1".into(),
            channel: "webhook".into(),
            tier: Some("high".into()),
            status: "abandoned".into(),
            attempts: 5,
            reason: Some("HTTP 503".into()),
            content_hash: "abc".into(),
            detail: r#"{"policyName":"access-control"}"#.into(),
            appended_at_ms: 1_000,
        }
    }

    #[test]
    fn record_row_converts() {
        let record = record_row().into_record().unwrap();
        assert_eq!(record.channel, Channel::Webhook);
        assert_eq!(record.tier, Some(ImpactTier::High));
        assert_eq!(record.status, DeliveryStatus::Abandoned);
        assert_eq!(record.attempts, 5);
        assert_eq!(record.detail["policyName"], "access-control");
    }

    #[test]
    fn unknown_channel_is_corrupt() {
        let mut row = record_row();
        row.channel = "pager".into();
        assert_matches!(row.into_record(), Err(LedgerError::Corrupt(_)));
    }

    #[test]
    fn window_row_converts() {
        let window = DigestWindowRow {
            start_ms: 0,
            end_ms: 10,
            event_ids: r#"["a","b"]"#.into(),
            task_id: Some("digest:0".into()),
            sealed_at_ms: 11,
        }
        .into_window()
        .unwrap();
        assert_eq!(window.event_ids.len(), 2);
        assert!(window.is_sealed());
        assert!(window.task_id.unwrap().is_digest());
    }
}
