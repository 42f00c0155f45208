use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result};
use tapster_core::types::{Choice, Event, EventId};

/// Column list shared by every event SELECT so `row_to_event` stays in sync.
pub(crate) const EVENT_COLUMNS: &str =
    "id, name, starts_at, location, has_choice, option_1, option_2, created_by";

/// Map a SELECT row (column order from EVENT_COLUMNS) to an Event.
pub(crate) fn row_to_event(row: &rusqlite::Row<'_>) -> Result<Event> {
    Ok(Event {
        id: EventId(row.get(0)?),
        name: row.get(1)?,
        starts_at: parse_ts(row, 2)?,
        location: row.get(3)?,
        has_choice: row.get::<_, i32>(4)? != 0,
        option_1: row.get(5)?,
        option_2: row.get(6)?,
        created_by: row.get(7)?,
    })
}

/// Map `event_id, user_id, option, selected_at` to a Choice.
pub(crate) fn row_to_choice(row: &rusqlite::Row<'_>) -> Result<Choice> {
    Ok(Choice {
        event_id: EventId(row.get(0)?),
        user_id: row.get(1)?,
        option: row.get(2)?,
        selected_at: parse_ts(row, 3)?,
    })
}

/// Timestamps are stored as RFC 3339 UTC; anything else is reported as a
/// conversion failure on that column.
fn parse_ts(row: &rusqlite::Row<'_>, idx: usize) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Initialise the events schema. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_events_table(conn)?;
    create_choices_table(conn)?;
    Ok(())
}

fn create_events_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL,
            starts_at   TEXT    NOT NULL,   -- RFC 3339 UTC
            location    TEXT,
            has_choice  INTEGER NOT NULL DEFAULT 0,
            option_1    TEXT,
            option_2    TEXT,
            created_by  INTEGER NOT NULL,
            created_at  TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_starts_at ON events (starts_at);",
    )
}

fn create_choices_table(conn: &Connection) -> Result<()> {
    // Choices go away with their event; the window query hits
    // (event_id, selected_at) on every firing.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS choices (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id    INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL,
            option      TEXT    NOT NULL,
            selected_at TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_choices_window
            ON choices (event_id, selected_at);",
    )
}
