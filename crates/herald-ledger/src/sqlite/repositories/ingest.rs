//! Ingest log repository: the durable record of accepted event ids.
//!
//! The `sequence` column is the ingestion sequence number handed to the
//! classifier. The `event_id` uniqueness constraint is what makes duplicate
//! detection survive restarts.

use rusqlite::{Connection, OptionalExtension, params};

use herald_core::{EventId, PolicyChangeEvent, TaskId};

use crate::errors::Result;

/// Outcome of recording an event in the ingest log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First time this event id was seen.
    Inserted {
        /// Assigned ingestion sequence.
        sequence: i64,
    },
    /// The event id was already ingested.
    Duplicate {
        /// Sequence assigned on first ingestion.
        sequence: i64,
    },
}

/// An ingested event with the tasks that already have a terminal record.
#[derive(Clone, Debug, PartialEq)]
pub struct IngestedEntry {
    /// Ingestion sequence.
    pub sequence: i64,
    /// The stored event.
    pub event: PolicyChangeEvent,
    /// Distinct task ids with a Delivered or Abandoned record.
    pub settled: Vec<TaskId>,
}

/// Ingest log repository: stateless, every method takes `&Connection`.
pub struct IngestRepo;

impl IngestRepo {
    /// Insert `event` unless its id is already present.
    pub fn record(
        conn: &Connection,
        event: &PolicyChangeEvent,
        now_ms: i64,
    ) -> Result<IngestOutcome> {
        let event_json = serde_json::to_string(event)?;
        let changed = conn.execute(
            "INSERT INTO ingest_log (event_id, policy_name, change_type, content_hash,
                 event_json, ingested_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (event_id) DO NOTHING",
            params![
                event.id.as_str(),
                event.policy_name,
                event.change_type.as_str(),
                event.content_hash(),
                event_json,
                now_ms
            ],
        )?;

        if changed == 1 {
            Ok(IngestOutcome::Inserted {
                sequence: conn.last_insert_rowid(),
            })
        } else {
            let sequence = conn.query_row(
                "SELECT sequence FROM ingest_log WHERE event_id = ?1",
                params![event.id.as_str()],
                |row| row.get(0),
            )?;
            Ok(IngestOutcome::Duplicate { sequence })
        }
    }

    /// Fetch an ingested event by id.
    pub fn get(conn: &Connection, event_id: &EventId) -> Result<Option<(i64, PolicyChangeEvent)>> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT sequence, event_json FROM ingest_log WHERE event_id = ?1",
                params![event_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(sequence, json)| Ok((sequence, serde_json::from_str(&json)?)))
            .transpose()
    }

    /// Up to `limit` events ingested after `after_sequence`, oldest first,
    /// each with the task ids its ledger records settle.
    pub fn page(conn: &Connection, after_sequence: i64, limit: u32) -> Result<Vec<IngestedEntry>> {
        let mut stmt = conn.prepare(
            "SELECT i.sequence, i.event_json,
                    (SELECT json_group_array(r.task_id) FROM ledger_records r
                      WHERE r.event_id = i.event_id)
             FROM ingest_log i
             WHERE i.sequence > ?1
             ORDER BY i.sequence
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![after_sequence, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(sequence, event_json, settled_json)| {
                let mut settled: Vec<TaskId> = serde_json::from_str(&settled_json)?;
                settled.sort();
                settled.dedup();
                Ok(IngestedEntry {
                    sequence,
                    event: serde_json::from_str(&event_json)?,
                    settled,
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
