//! Ledger record repository: inserts and reads on `ledger_records`.
//!
//! Insert-only. The schema triggers reject updates and deletes.

use rusqlite::{Connection, OptionalExtension, params};

use herald_core::{Channel, DeliveryStatus, EventId, LedgerRecord, NewLedgerRecord, TaskId};

use crate::errors::Result;
use crate::sqlite::row_types::LedgerRecordRow;

/// Ledger record repository: stateless, every method takes `&Connection`.
pub struct RecordRepo;

impl RecordRepo {
    /// Insert a record with the given append time. Returns the new sequence.
    ///
    /// Fails with a constraint violation if the record is a second delivered
    /// record for the same task.
    pub fn insert(conn: &Connection, record: &NewLedgerRecord, appended_at_ms: i64) -> Result<i64> {
        let detail = serde_json::to_string(&record.detail)?;
        let _ = conn.execute(
            "INSERT INTO ledger_records (task_id, event_id, channel, tier, status, attempts,
                 reason, content_hash, detail, appended_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.task_id.as_str(),
                record.event_id.as_str(),
                record.channel.as_str(),
                record.tier.map(herald_core::ImpactTier::as_str),
                record.status.as_str(),
                record.attempts,
                record.reason,
                record.content_hash,
                detail,
                appended_at_ms
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Highest append time in the ledger, if any record exists.
    pub fn latest_appended_at(conn: &Connection) -> Result<Option<i64>> {
        let latest = conn.query_row("SELECT MAX(appended_at_ms) FROM ledger_records", [], |row| {
            row.get(0)
        })?;
        Ok(latest)
    }

    /// The delivered record for `task_id`, if any.
    pub fn delivered(conn: &Connection, task_id: &TaskId) -> Result<Option<LedgerRecord>> {
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM ledger_records WHERE task_id = ?1 AND status = ?2",
                    LedgerRecordRow::COLUMNS
                ),
                params![task_id.as_str(), DeliveryStatus::Delivered.as_str()],
                LedgerRecordRow::map_row,
            )
            .optional()?;
        row.map(LedgerRecordRow::into_record).transpose()
    }

    /// All records for an event, in append order.
    pub fn by_event(conn: &Connection, event_id: &EventId) -> Result<Vec<LedgerRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger_records WHERE event_id = ?1 ORDER BY sequence",
            LedgerRecordRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![event_id.as_str()], LedgerRecordRow::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(LedgerRecordRow::into_record).collect()
    }

    /// Delivered ledger-channel records of Low/Medium events appended in
    /// `[start_ms, end_ms)`, in append order.
    pub fn digest_candidates(
        conn: &Connection,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<LedgerRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger_records
             WHERE channel = ?1 AND status = ?2 AND tier IN ('low', 'medium')
               AND appended_at_ms >= ?3 AND appended_at_ms < ?4
             ORDER BY appended_at_ms, sequence",
            LedgerRecordRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![
                    Channel::Ledger.as_str(),
                    DeliveryStatus::Delivered.as_str(),
                    start_ms,
                    end_ms
                ],
                LedgerRecordRow::map_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(LedgerRecordRow::into_record).collect()
    }

    /// The most recent `limit` records, newest first.
    pub fn recent(conn: &Connection, limit: u32) -> Result<Vec<LedgerRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ledger_records ORDER BY sequence DESC LIMIT ?1",
            LedgerRecordRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit], LedgerRecordRow::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(LedgerRecordRow::into_record).collect()
    }

    /// Total number of records.
    pub fn count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM ledger_records", [], |row| row.get(0))?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
