use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tapster_core::types::{Choice, Event, EventId, NewEvent};
use tracing::{debug, info};

use crate::db::{row_to_choice, row_to_event, EVENT_COLUMNS};
use crate::error::{EventsError, Result};

/// Fixed-width RFC 3339 so stored timestamps order correctly as text.
pub fn to_db_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// CRUD over events and attendee choices.
///
/// Thread-safe: the connection sits behind a Mutex, one statement at a time.
pub struct EventRepository {
    db: Mutex<Connection>,
}

impl EventRepository {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| EventsError::Poisoned)
    }

    pub fn create_event(&self, new: &NewEvent) -> Result<Event> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events
             (name, starts_at, location, has_choice, option_1, option_2, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.name,
                to_db_ts(new.starts_at),
                new.location,
                new.has_choice as i32,
                new.option_1,
                new.option_2,
                new.created_by,
                to_db_ts(Utc::now()),
            ],
        )?;
        let id = EventId(conn.last_insert_rowid());
        info!(event_id = %id, name = %new.name, starts_at = %new.starts_at, "event created");
        Ok(Event {
            id,
            name: new.name.clone(),
            starts_at: new.starts_at,
            location: new.location.clone(),
            has_choice: new.has_choice,
            option_1: new.option_1.clone(),
            option_2: new.option_2.clone(),
            created_by: new.created_by,
        })
    }

    pub fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        Ok(conn.query_row(&sql, [id.get()], row_to_event).optional()?)
    }

    /// Delete an event and its choices. Returns `false` if no such event.
    pub fn delete_event(&self, id: EventId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM choices WHERE event_id = ?1", [id.get()])?;
        let n = tx.execute("DELETE FROM events WHERE id = ?1", [id.get()])?;
        tx.commit()?;
        if n > 0 {
            info!(event_id = %id, "event deleted");
        }
        Ok(n > 0)
    }

    /// Events starting at or after `from`, soonest first.
    pub fn list_upcoming(&self, from: DateTime<Utc>, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE starts_at >= ?1 ORDER BY starts_at ASC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![to_db_ts(from), limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn record_choice(
        &self,
        event_id: EventId,
        user_id: i64,
        option: &str,
        at: DateTime<Utc>,
    ) -> Result<Choice> {
        let conn = self.conn()?;
        let exists: bool = conn
            .query_row("SELECT 1 FROM events WHERE id = ?1", [event_id.get()], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(EventsError::NotFound(event_id.get()));
        }
        conn.execute(
            "INSERT INTO choices (event_id, user_id, option, selected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id.get(), user_id, option, to_db_ts(at)],
        )?;
        debug!(event_id = %event_id, user_id, option, "choice recorded");
        Ok(Choice {
            event_id,
            user_id,
            option: option.to_string(),
            selected_at: at,
        })
    }

    /// Choices for `event_id` with `from <= selected_at <= to`, oldest first.
    pub fn choices_in_window(
        &self,
        event_id: EventId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Choice>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT event_id, user_id, option, selected_at FROM choices
             WHERE event_id = ?1 AND selected_at >= ?2 AND selected_at <= ?3
             ORDER BY selected_at ASC",
        )?;
        let choices = stmt
            .query_map(
                params![event_id.get(), to_db_ts(from), to_db_ts(to)],
                row_to_choice,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(choices)
    }
}
