//! Idempotency Guard: durable "already notified" markers.
//!
//! The marker insert is the authoritative gate: however many times a timer
//! fires, only one `mark_completed` per event can succeed.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tapster_core::types::EventId;
use tracing::info;

use crate::db::{init_db, is_unique_violation, parse_ts, to_ts};
use crate::error::{Result, SchedulerError};
use crate::types::CompletionMarker;

pub trait IdempotencyGuard: Send + Sync {
    /// Side-effect-free check.
    fn is_completed(&self, event_id: EventId) -> Result<bool>;

    /// Record completion. Fails with `AlreadyCompleted` if a marker exists;
    /// among concurrent callers for one event exactly one succeeds.
    fn mark_completed(&self, event_id: EventId, participant_count: u32)
        -> Result<CompletionMarker>;

    fn get(&self, event_id: EventId) -> Result<Option<CompletionMarker>>;
}

/// SQLite-backed [`IdempotencyGuard`].
pub struct SqliteCompletionGuard {
    conn: Mutex<Connection>,
}

impl SqliteCompletionGuard {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::StorageUnavailable("completion guard lock poisoned".into()))
    }

    /// Drop the marker of a purged event.
    ///
    /// Only the event-deletion flow calls this; the scheduler never deletes
    /// markers.
    pub fn purge(&self, event_id: EventId) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM completion_markers WHERE event_id = ?1",
            [event_id.get()],
        )?;
        if n > 0 {
            info!(event_id = %event_id, "completion marker purged");
        }
        Ok(n > 0)
    }
}

impl IdempotencyGuard for SqliteCompletionGuard {
    fn is_completed(&self, event_id: EventId) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM completion_markers WHERE event_id = ?1",
                [event_id.get()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_completed(
        &self,
        event_id: EventId,
        participant_count: u32,
    ) -> Result<CompletionMarker> {
        let conn = self.conn()?;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO completion_markers (event_id, participant_count, computed_at)
             VALUES (?1, ?2, ?3)",
            params![event_id.get(), participant_count, to_ts(now)],
        );
        match inserted {
            Ok(_) => Ok(CompletionMarker {
                event_id,
                participant_count,
                computed_at: now,
            }),
            Err(e) if is_unique_violation(&e) => Err(SchedulerError::AlreadyCompleted(event_id)),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, event_id: EventId) -> Result<Option<CompletionMarker>> {
        let conn = self.conn()?;
        let marker = conn
            .query_row(
                "SELECT event_id, participant_count, computed_at
                 FROM completion_markers WHERE event_id = ?1",
                [event_id.get()],
                |row| {
                    Ok(CompletionMarker {
                        event_id: EventId(row.get(0)?),
                        participant_count: row.get(1)?,
                        computed_at: parse_ts(&row.get::<_, String>(2)?, 2)?,
                    })
                },
            )
            .optional()?;
        Ok(marker)
    }
}
