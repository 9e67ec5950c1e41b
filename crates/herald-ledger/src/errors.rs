//! Error types for the delivery ledger.
//!
//! [`LedgerError`] is returned by every ledger operation. Storage failures
//! (`Sqlite`, `Pool`, `Serde`, `Migration`, `Corrupt`) mean the durability
//! layer is unavailable; the window variants are contract violations by the
//! caller and leave the database untouched.

use thiserror::Error;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// A stored row could not be mapped back to a domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// A digest window starting before the last sealed end.
    #[error("digest window starting at {start_ms} overlaps a sealed window")]
    WindowAlreadySealed {
        /// Start of the rejected window.
        start_ms: i64,
    },

    /// A digest window that would leave a gap after the last sealed end.
    #[error("digest window starting at {start_ms} is not contiguous (expected {expected_ms})")]
    WindowNotContiguous {
        /// Last sealed end.
        expected_ms: i64,
        /// Start of the rejected window.
        start_ms: i64,
    },

    /// A digest window whose end does not follow its start.
    #[error("digest window [{start_ms}, {end_ms}) is empty")]
    EmptyWindow {
        /// Window start.
        start_ms: i64,
        /// Window end.
        end_ms: i64,
    },
}

impl LedgerError {
    /// Whether the error means the durability layer itself failed.
    pub fn is_storage_fault(&self) -> bool {
        !matches!(
            self,
            Self::WindowAlreadySealed { .. }
                | Self::WindowNotContiguous { .. }
                | Self::EmptyWindow { .. }
        )
    }
}

/// Convenience type alias for ledger results.
pub type Result<T> = std::result::Result<T, LedgerError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = LedgerError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
        assert!(err.is_storage_fault());
    }

    #[test]
    fn migration_error_display() {
        let err = LedgerError::Migration {
            message: "v001 failed: table already exists".into(),
        };
        assert_eq!(
            err.to_string(),
            "migration error: v001 failed: table already exists"
        );
    }

    #[test]
    fn window_errors_are_not_storage_faults() {
        let err = LedgerError::WindowNotContiguous {
            expected_ms: 1_000,
            start_ms: 2_000,
        };
        assert_eq!(
            err.to_string(),
            "digest window starting at 2000 is not contiguous (expected 1000)"
        );
        assert!(!err.is_storage_fault());
        assert!(!LedgerError::WindowAlreadySealed { start_ms: 0 }.is_storage_fault());
    }
}
