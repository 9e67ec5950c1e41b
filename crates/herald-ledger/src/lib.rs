//! # herald-ledger
//!
//! Durable state of the Herald pipeline in one `SQLite` database:
//!
//! - **Ledger records**: append-only terminal outcomes of delivery tasks,
//!   at most one delivered record per task
//! - **Ingest log**: accepted event ids and their ingestion sequence numbers
//! - **Digest windows**: sealed, contiguous `[start, end)` windows
//! - **Operator alerts**: deduplicated alarms for abandoned tasks and faults
//! - **Migrations**: version-tracked SQL schema evolution

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;

pub use errors::{LedgerError, Result};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool};
pub use sqlite::repositories::ingest::{IngestOutcome, IngestedEntry};
pub use store::{AppendOutcome, DeliveryLedger};
