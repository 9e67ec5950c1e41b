//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! parameter, so the facade decides the transaction boundaries.

pub mod alert;
pub mod ingest;
pub mod record;
pub mod window;

#[cfg(test)]
pub(crate) fn test_connection() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    let _ = crate::sqlite::migrations::run_migrations(&conn).unwrap();
    conn
}
