//! Error taxonomy of the pipeline.
//!
//! - [`ValidationError`]: malformed or duplicate inbound event. Rejected, never
//!   retried, no side effects.
//! - [`AdapterError`](crate::adapters::AdapterError): per-attempt delivery
//!   failure, handled inside the dispatcher.
//! - [`LedgerWriteFault`]: the durability layer is unavailable. Fatal to the
//!   pipeline instance, which halts instead of losing audit records.

use herald_core::EventId;
use herald_ledger::LedgerError;
use thiserror::Error;

/// An inbound event was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The payload is not a JSON object of the expected shape.
    #[error("malformed event payload: {0}")]
    Malformed(String),

    /// A required field is absent or blank.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The change type is not `created`, `updated` or `deleted`.
    #[error("invalid change type: {0:?}")]
    InvalidChangeType(String),

    /// The timestamp is not RFC 3339.
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// The severity hint is not `low`, `medium` or `high`.
    #[error("invalid severity hint: {0:?}")]
    InvalidSeverityHint(String),

    /// The timestamp lies beyond the accepted clock skew.
    #[error("timestamp {timestamp} is more than {skew_ms}ms in the future")]
    FutureTimestamp {
        /// The offending timestamp (RFC 3339).
        timestamp: String,
        /// Accepted skew.
        skew_ms: u64,
    },

    /// The event id was already ingested.
    #[error("duplicate event {event_id} (first ingested as sequence {sequence})")]
    Duplicate {
        /// Duplicated id.
        event_id: EventId,
        /// Sequence of the first ingestion.
        sequence: i64,
    },
}

impl ValidationError {
    /// Stable machine-readable code, used in HTTP bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidChangeType(_) => "invalid_change_type",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::InvalidSeverityHint(_) => "invalid_severity_hint",
            Self::FutureTimestamp { .. } => "future_timestamp",
            Self::Duplicate { .. } => "duplicate",
        }
    }
}

/// The ledger could not be written.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("ledger write fault: {message}")]
pub struct LedgerWriteFault {
    /// Underlying cause.
    pub message: String,
}

impl LedgerWriteFault {
    /// Fault with the given cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<LedgerError> for LedgerWriteFault {
    fn from(err: LedgerError) -> Self {
        Self::new(err.to_string())
    }
}

/// Failure to ingest an event.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The event was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The ingest log could not be written.
    #[error(transparent)]
    Fault(#[from] LedgerWriteFault),
}

/// Failure of `submit_event`.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The event was rejected; nothing was dispatched.
    #[error(transparent)]
    Rejected(#[from] ValidationError),
    /// This submission hit a ledger fault; the pipeline is now halted.
    #[error(transparent)]
    Fault(#[from] LedgerWriteFault),
    /// The pipeline halted earlier and accepts no new events.
    #[error("pipeline halted: {reason}")]
    Halted {
        /// Fault that caused the halt.
        reason: String,
    },
    /// No ingested event with this id (replay only).
    #[error("unknown event: {0}")]
    UnknownEvent(EventId),
}

impl From<IngestError> for SubmitError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(e) => Self::Rejected(e),
            IngestError::Fault(f) => Self::Fault(f),
        }
    }
}

/// Failure of a digest tick.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The ledger could not be read or written; the window stays unsealed.
    #[error(transparent)]
    Fault(#[from] LedgerWriteFault),
    /// The pipeline is halted; no tick runs.
    #[error("pipeline halted")]
    Halted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
