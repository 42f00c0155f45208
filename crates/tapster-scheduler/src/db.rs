use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a writer waits on a lock held by another connection or process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a connection suitable for sharing one database file between several
/// components and processes: WAL journal, foreign keys on, busy timeout set.
pub fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Initialise the scheduler schema in `conn`.
///
/// Both tables are keyed by event id: the PRIMARY KEY insert is the atomic
/// single-key create that `DuplicateTimer` and `AlreadyCompleted` rely on.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS notification_timers (
            event_id    INTEGER NOT NULL PRIMARY KEY,
            fire_at     TEXT    NOT NULL,   -- RFC 3339 UTC
            created_at  TEXT    NOT NULL,
            attempts    INTEGER NOT NULL DEFAULT 0,
            stalled     INTEGER NOT NULL DEFAULT 0,
            last_error  TEXT
        ) STRICT;

        CREATE TABLE IF NOT EXISTS completion_markers (
            event_id          INTEGER NOT NULL PRIMARY KEY,
            participant_count INTEGER NOT NULL,
            computed_at       TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// True when `err` is a PRIMARY KEY clash.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub(crate) fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn to_ts(dt: chrono::DateTime<chrono::Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
