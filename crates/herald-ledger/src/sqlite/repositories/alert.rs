//! Operator alert repository.
//!
//! Alerts are keyed by `dedupe_key`; inserting a key that already exists is
//! a no-op, which is what makes "reported exactly once" hold across retries
//! and restarts.

use rusqlite::{Connection, params};

use herald_core::OperatorAlert;

use crate::errors::Result;
use crate::sqlite::row_types::AlertRow;

/// Operator alert repository: stateless, every method takes `&Connection`.
pub struct AlertRepo;

impl AlertRepo {
    /// Insert `alert` unless its dedupe key exists. Returns whether it was new.
    pub fn insert(conn: &Connection, alert: &OperatorAlert) -> Result<bool> {
        let changed = conn.execute(
            "INSERT INTO operator_alerts (id, kind, dedupe_key, task_id, channel, message,
                 raised_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (dedupe_key) DO NOTHING",
            params![
                alert.id.as_str(),
                alert.kind.as_str(),
                alert.dedupe_key,
                alert.task_id.as_ref().map(|t| t.as_str()),
                alert.channel.map(herald_core::Channel::as_str),
                alert.message,
                alert.raised_at_ms
            ],
        )?;
        Ok(changed == 1)
    }

    /// All alerts, oldest first.
    pub fn list(conn: &Connection) -> Result<Vec<OperatorAlert>> {
        let mut stmt = conn.prepare(
            "SELECT id, kind, dedupe_key, task_id, channel, message, raised_at_ms
             FROM operator_alerts ORDER BY raised_at_ms, rowid",
        )?;
        let rows = stmt
            .query_map([], AlertRow::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(AlertRow::into_alert).collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
