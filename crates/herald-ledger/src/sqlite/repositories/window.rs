//! Digest window repository.

use rusqlite::{Connection, OptionalExtension, params};

use herald_core::DigestWindow;

use crate::errors::Result;
use crate::sqlite::row_types::DigestWindowRow;

/// Digest window repository: stateless, every method takes `&Connection`.
pub struct WindowRepo;

impl WindowRepo {
    /// End of the most recently sealed window.
    pub fn last_sealed_end(conn: &Connection) -> Result<Option<i64>> {
        let end = conn
            .query_row(
                "SELECT end_ms FROM digest_windows ORDER BY start_ms DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(end)
    }

    /// Persist a sealed window.
    pub fn insert(conn: &Connection, window: &DigestWindow, sealed_at_ms: i64) -> Result<()> {
        let event_ids = serde_json::to_string(&window.event_ids)?;
        let _ = conn.execute(
            "INSERT INTO digest_windows (start_ms, end_ms, event_ids, task_id, sealed_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                window.start_ms,
                window.end_ms,
                event_ids,
                window.task_id.as_ref().map(|t| t.as_str()),
                sealed_at_ms
            ],
        )?;
        Ok(())
    }

    /// All sealed windows, oldest first.
    pub fn list(conn: &Connection) -> Result<Vec<DigestWindow>> {
        let mut stmt = conn.prepare(
            "SELECT start_ms, end_ms, event_ids, task_id, sealed_at_ms
             FROM digest_windows ORDER BY start_ms",
        )?;
        let rows = stmt
            .query_map([], DigestWindowRow::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(DigestWindowRow::into_window).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::repositories::test_connection;

    #[test]
    fn last_sealed_end_tracks_latest_window() {
        let conn = test_connection();
        assert_eq!(WindowRepo::last_sealed_end(&conn).unwrap(), None);

        WindowRepo::insert(&conn, &DigestWindow::open(0, 100), 101).unwrap();
        WindowRepo::insert(&conn, &DigestWindow::open(100, 250), 251).unwrap();
        assert_eq!(WindowRepo::last_sealed_end(&conn).unwrap(), Some(250));

        let windows = WindowRepo::list(&conn).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].sealed_at_ms, Some(251));
    }

    #[test]
    fn sealed_window_cannot_be_rewritten() {
        let conn = test_connection();
        WindowRepo::insert(&conn, &DigestWindow::open(0, 100), 101).unwrap();
        assert!(
            conn.execute("UPDATE digest_windows SET end_ms = 50", [])
                .is_err()
        );
        assert!(WindowRepo::insert(&conn, &DigestWindow::open(0, 100), 102).is_err());
    }
}
