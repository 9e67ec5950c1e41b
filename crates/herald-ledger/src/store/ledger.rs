//! High-level `DeliveryLedger` API.
//!
//! Every write runs in its own `BEGIN IMMEDIATE` transaction, so concurrent
//! writers are linearized by `SQLite`'s write lock and a reader never observes
//! a partial write. Commits are fsynced (`synchronous = FULL`) before a write
//! method returns.

use std::path::Path;

use rusqlite::{ErrorCode, TransactionBehavior};
use tracing::{debug, instrument, warn};

use herald_core::{
    DeliveryStatus, DigestWindow, EventId, LedgerRecord, NewLedgerRecord, OperatorAlert,
    PolicyChangeEvent, TaskId, now_millis,
};

use crate::errors::{LedgerError, Result};
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool, PooledConnection};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::alert::AlertRepo;
use crate::sqlite::repositories::ingest::{IngestOutcome, IngestRepo, IngestedEntry};
use crate::sqlite::repositories::record::RecordRepo;
use crate::sqlite::repositories::window::WindowRepo;

/// Result of an append.
#[derive(Clone, Debug, PartialEq)]
pub enum AppendOutcome {
    /// The record was written.
    Appended(LedgerRecord),
    /// A delivered record for the task already exists; nothing was written.
    AlreadyDelivered(LedgerRecord),
}

impl AppendOutcome {
    /// The written or pre-existing record.
    pub fn record(&self) -> &LedgerRecord {
        match self {
            Self::Appended(record) | Self::AlreadyDelivered(record) => record,
        }
    }
}

/// Append-only delivery ledger backed by `SQLite`.
///
/// Besides ledger records it owns the ingest log (duplicate detection and
/// ingestion sequence), the sealed digest windows, and operator alerts, so
/// that all durable pipeline state lives in one database file.
#[derive(Clone, Debug)]
pub struct DeliveryLedger {
    pool: ConnectionPool,
}

impl DeliveryLedger {
    /// Wrap an existing pool. Migrations must already have run.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a file-backed ledger and run migrations.
    pub fn open(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Self> {
        let pool = connection::new_file(path, config)?;
        {
            let conn = pool.get()?;
            let _ = run_migrations(&conn)?;
        }
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ledger records
    // ─────────────────────────────────────────────────────────────────────

    /// Append a terminal-state record.
    ///
    /// The append time is `max(now, latest append time, last sealed digest
    /// end)`, which keeps append times non-decreasing in sequence order and
    /// guarantees a record never lands inside an already-sealed window.
    ///
    /// A second delivered record for the same task is not written; the
    /// existing record is returned as [`AppendOutcome::AlreadyDelivered`].
    #[instrument(skip_all, fields(task_id = %record.task_id, status = %record.status))]
    pub fn append(&self, record: &NewLedgerRecord) -> Result<AppendOutcome> {
        if !record.status.is_terminal() {
            return Err(LedgerError::Corrupt(format!(
                "refusing to append non-terminal status {}",
                record.status
            )));
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if record.status == DeliveryStatus::Delivered {
            if let Some(existing) = RecordRepo::delivered(&tx, &record.task_id)? {
                debug!(sequence = existing.sequence, "task already delivered");
                return Ok(AppendOutcome::AlreadyDelivered(existing));
            }
        }

        let floor = RecordRepo::latest_appended_at(&tx)?
            .into_iter()
            .chain(WindowRepo::last_sealed_end(&tx)?)
            .max()
            .unwrap_or(i64::MIN);
        let appended_at_ms = now_millis().max(floor);

        let sequence = match RecordRepo::insert(&tx, record, appended_at_ms) {
            Ok(sequence) => sequence,
            Err(LedgerError::Sqlite(e)) if is_constraint_violation(&e) => {
                warn!(error = %e, "delivered-once constraint hit");
                drop(tx);
                return self.already_delivered(&record.task_id);
            }
            Err(e) => return Err(e),
        };
        tx.commit()?;

        debug!(sequence, appended_at_ms, "ledger record appended");
        Ok(AppendOutcome::Appended(LedgerRecord {
            sequence,
            task_id: record.task_id.clone(),
            event_id: record.event_id.clone(),
            channel: record.channel,
            tier: record.tier,
            status: record.status,
            attempts: record.attempts,
            reason: record.reason.clone(),
            content_hash: record.content_hash.clone(),
            detail: record.detail.clone(),
            appended_at_ms,
        }))
    }

    fn already_delivered(&self, task_id: &TaskId) -> Result<AppendOutcome> {
        let conn = self.conn()?;
        RecordRepo::delivered(&conn, task_id)?
            .map(AppendOutcome::AlreadyDelivered)
            .ok_or_else(|| LedgerError::Corrupt(format!("constraint violation for {task_id}")))
    }

    /// All records for an event, in append order.
    pub fn query(&self, event_id: &EventId) -> Result<Vec<LedgerRecord>> {
        RecordRepo::by_event(&*self.conn()?, event_id)
    }

    /// The delivered record for a task, if the task has been delivered.
    pub fn delivered(&self, task_id: &TaskId) -> Result<Option<LedgerRecord>> {
        RecordRepo::delivered(&*self.conn()?, task_id)
    }

    /// Delivered ledger-channel records of Low/Medium events appended in
    /// `[start_ms, end_ms)`.
    ///
    /// Read under the write lock: any append that committed before this call
    /// is visible, and any append after it gets a later append time.
    pub fn digest_candidates(&self, start_ms: i64, end_ms: i64) -> Result<Vec<LedgerRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let records = RecordRepo::digest_candidates(&tx, start_ms, end_ms)?;
        tx.commit()?;
        Ok(records)
    }

    /// The most recent records, newest first.
    pub fn recent(&self, limit: u32) -> Result<Vec<LedgerRecord>> {
        RecordRepo::recent(&*self.conn()?, limit)
    }

    /// Number of ledger records.
    pub fn record_count(&self) -> Result<i64> {
        RecordRepo::count(&*self.conn()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Ingest log
    // ─────────────────────────────────────────────────────────────────────

    /// Record an accepted event, assigning its ingestion sequence.
    #[instrument(skip_all, fields(event_id = %event.id))]
    pub fn record_ingest(&self, event: &PolicyChangeEvent) -> Result<IngestOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = IngestRepo::record(&tx, event, now_millis())?;
        tx.commit()?;
        Ok(outcome)
    }

    /// Fetch an ingested event and its sequence.
    pub fn ingested_event(&self, event_id: &EventId) -> Result<Option<(i64, PolicyChangeEvent)>> {
        IngestRepo::get(&*self.conn()?, event_id)
    }

    /// Up to `limit` ingested events after `after_sequence`, oldest first,
    /// with the task ids already settled in the ledger.
    pub fn ingested_page(&self, after_sequence: i64, limit: u32) -> Result<Vec<IngestedEntry>> {
        IngestRepo::page(&*self.conn()?, after_sequence, limit)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Digest windows
    // ─────────────────────────────────────────────────────────────────────

    /// End of the last sealed digest window, if any window was sealed.
    pub fn last_sealed_end(&self) -> Result<Option<i64>> {
        WindowRepo::last_sealed_end(&*self.conn()?)
    }

    /// Seal a digest window.
    ///
    /// The window must start exactly at the last sealed end (any start is
    /// accepted for the very first window) and must not be empty.
    #[instrument(skip_all, fields(start_ms = window.start_ms, end_ms = window.end_ms))]
    pub fn seal_window(&self, window: &DigestWindow) -> Result<DigestWindow> {
        if window.end_ms <= window.start_ms {
            return Err(LedgerError::EmptyWindow {
                start_ms: window.start_ms,
                end_ms: window.end_ms,
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(expected_ms) = WindowRepo::last_sealed_end(&tx)? {
            if window.start_ms < expected_ms {
                return Err(LedgerError::WindowAlreadySealed {
                    start_ms: window.start_ms,
                });
            }
            if window.start_ms > expected_ms {
                return Err(LedgerError::WindowNotContiguous {
                    expected_ms,
                    start_ms: window.start_ms,
                });
            }
        }

        let sealed_at_ms = now_millis();
        WindowRepo::insert(&tx, window, sealed_at_ms)?;
        tx.commit()?;

        debug!(events = window.event_ids.len(), "digest window sealed");
        Ok(DigestWindow {
            sealed_at_ms: Some(sealed_at_ms),
            ..window.clone()
        })
    }

    /// All sealed windows, oldest first.
    pub fn windows(&self) -> Result<Vec<DigestWindow>> {
        WindowRepo::list(&*self.conn()?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operator alerts
    // ─────────────────────────────────────────────────────────────────────

    /// Persist an alert unless one with the same dedupe key exists.
    pub fn record_alert(&self, alert: &OperatorAlert) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = AlertRepo::insert(&tx, alert)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// All alerts, oldest first.
    pub fn alerts(&self) -> Result<Vec<OperatorAlert>> {
        AlertRepo::list(&*self.conn()?)
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
