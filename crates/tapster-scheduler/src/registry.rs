//! Timer Registry: the durable list of pending (event, fire time) pairs.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tapster_core::types::EventId;
use tracing::{info, warn};

use crate::db::{init_db, is_unique_violation, parse_ts, to_ts};
use crate::error::{Result, SchedulerError};
use crate::types::TimerEntry;

/// Durable storage of pending timers.
///
/// Every write must be atomic and survive a crash once it returns `Ok`.
pub trait TimerRegistry: Send + Sync {
    /// Register a timer. Fails with `DuplicateTimer` if one exists.
    fn add(&self, event_id: EventId, fire_at: DateTime<Utc>) -> Result<TimerEntry>;

    /// Remove a timer. Returns whether a row existed; never an error for a
    /// missing entry.
    fn remove(&self, event_id: EventId) -> Result<bool>;

    fn get(&self, event_id: EventId) -> Result<Option<TimerEntry>>;

    /// Every persisted timer, earliest first.
    fn list_all(&self) -> Result<Vec<TimerEntry>>;

    /// Flag a timer for manual follow-up after delivery gave up.
    fn mark_stalled(&self, event_id: EventId, attempts: u32, reason: &str) -> Result<()>;

    /// Clear the stalled flag. Returns `false` if the timer is not stalled.
    fn unstall(&self, event_id: EventId) -> Result<bool>;
}

const TIMER_COLUMNS: &str = "event_id, fire_at, created_at, attempts, stalled, last_error";

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<TimerEntry> {
    Ok(TimerEntry {
        event_id: EventId(row.get(0)?),
        fire_at: parse_ts(&row.get::<_, String>(1)?, 1)?,
        created_at: parse_ts(&row.get::<_, String>(2)?, 2)?,
        attempts: row.get(3)?,
        stalled: row.get::<_, i64>(4)? != 0,
        last_error: row.get(5)?,
    })
}

/// SQLite-backed [`TimerRegistry`].
pub struct SqliteTimerRegistry {
    conn: Mutex<Connection>,
}

impl SqliteTimerRegistry {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::StorageUnavailable("timer registry lock poisoned".into()))
    }
}

impl TimerRegistry for SqliteTimerRegistry {
    fn add(&self, event_id: EventId, fire_at: DateTime<Utc>) -> Result<TimerEntry> {
        let conn = self.conn()?;
        let now = Utc::now();
        let inserted = conn.execute(
            "INSERT INTO notification_timers (event_id, fire_at, created_at)
             VALUES (?1, ?2, ?3)",
            params![event_id.get(), to_ts(fire_at), to_ts(now)],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(SchedulerError::DuplicateTimer(event_id));
            }
            Err(e) => return Err(e.into()),
        }
        info!(event_id = %event_id, %fire_at, "timer registered");
        Ok(TimerEntry {
            event_id,
            fire_at,
            created_at: now,
            attempts: 0,
            stalled: false,
            last_error: None,
        })
    }

    fn remove(&self, event_id: EventId) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM notification_timers WHERE event_id = ?1",
            [event_id.get()],
        )?;
        Ok(n > 0)
    }

    fn get(&self, event_id: EventId) -> Result<Option<TimerEntry>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {TIMER_COLUMNS} FROM notification_timers WHERE event_id = ?1");
        Ok(conn
            .query_row(&sql, [event_id.get()], row_to_entry)
            .optional()?)
    }

    fn list_all(&self) -> Result<Vec<TimerEntry>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {TIMER_COLUMNS} FROM notification_timers ORDER BY fire_at, event_id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn mark_stalled(&self, event_id: EventId, attempts: u32, reason: &str) -> Result<()> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE notification_timers SET stalled = 1, attempts = ?2, last_error = ?3
             WHERE event_id = ?1",
            params![event_id.get(), attempts, reason],
        )?;
        if n == 0 {
            // Cancelled while the last attempt was in flight; nothing to flag.
            warn!(event_id = %event_id, "stall requested for a timer that no longer exists");
        }
        Ok(())
    }

    fn unstall(&self, event_id: EventId) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE notification_timers SET stalled = 0, attempts = 0, last_error = NULL
             WHERE event_id = ?1 AND stalled = 1",
            [event_id.get()],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn registry() -> SqliteTimerRegistry {
        SqliteTimerRegistry::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn add_then_list_returns_entry() {
        let reg = registry();
        let at = Utc.with_ymd_and_hms(2026, 10, 23, 15, 0, 0).unwrap();
        reg.add(EventId(1), at).unwrap();

        let all = reg.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].event_id, EventId(1));
        assert_eq!(all[0].fire_at, at);
        assert!(!all[0].stalled);
    }

    #[test]
    fn second_add_for_same_event_is_duplicate() {
        let reg = registry();
        let at = Utc::now();
        reg.add(EventId(1), at).unwrap();
        let err = reg.add(EventId(1), at + Duration::hours(1)).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateTimer(EventId(1))));
        // The original fire time is untouched.
        let entry = reg.get(EventId(1)).unwrap().unwrap();
        assert_eq!(entry.fire_at.timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn remove_is_idempotent() {
        let reg = registry();
        reg.add(EventId(3), Utc::now()).unwrap();
        assert!(reg.remove(EventId(3)).unwrap());
        assert!(!reg.remove(EventId(3)).unwrap());
        assert!(!reg.remove(EventId(404)).unwrap());
        assert!(reg.list_all().unwrap().is_empty());
    }

    #[test]
    fn list_is_ordered_by_fire_time() {
        let reg = registry();
        let base = Utc.with_ymd_and_hms(2026, 10, 23, 15, 0, 0).unwrap();
        reg.add(EventId(1), base + Duration::hours(2)).unwrap();
        reg.add(EventId(2), base).unwrap();
        reg.add(EventId(3), base + Duration::hours(1)).unwrap();

        let ids: Vec<i64> = reg.list_all().unwrap().iter().map(|e| e.event_id.get()).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn stall_and_unstall_round_trip() {
        let reg = registry();
        reg.add(EventId(5), Utc::now()).unwrap();
        reg.mark_stalled(EventId(5), 3, "chat not found").unwrap();

        let entry = reg.get(EventId(5)).unwrap().unwrap();
        assert!(entry.stalled);
        assert_eq!(entry.attempts, 3);
        assert_eq!(entry.last_error.as_deref(), Some("chat not found"));

        assert!(reg.unstall(EventId(5)).unwrap());
        assert!(!reg.unstall(EventId(5)).unwrap());
        let entry = reg.get(EventId(5)).unwrap().unwrap();
        assert!(!entry.stalled);
        assert!(entry.last_error.is_none());
    }

    #[test]
    fn stalling_a_missing_timer_is_not_an_error() {
        registry().mark_stalled(EventId(9), 1, "gone").unwrap();
    }

    #[test]
    fn entries_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.db");
        let at = Utc.with_ymd_and_hms(2026, 10, 23, 15, 0, 0).unwrap();
        {
            let reg = SqliteTimerRegistry::new(crate::db::open(&path).unwrap()).unwrap();
            reg.add(EventId(11), at).unwrap();
        }
        let reg = SqliteTimerRegistry::new(crate::db::open(&path).unwrap()).unwrap();
        let all = reg.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fire_at, at);
    }
}
