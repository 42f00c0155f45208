//! Event creation and deletion, with the notification timer kept in step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tapster_core::types::{Event, EventId, NewEvent};
use tapster_events::{EventRepository, EventsError};
use tapster_scheduler::{
    NotificationScheduler, SchedulerError, SqliteCompletionGuard, TimerRegistry,
};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Events(#[from] EventsError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// How the lifecycle registers and drops timers.
///
/// The daemon arms waits in-process; one-shot CLI commands only touch the
/// durable registry and leave arming to the daemon's next reconcile.
pub trait TimerControl: Send + Sync {
    fn schedule(&self, event_id: EventId, fire_at: DateTime<Utc>) -> tapster_scheduler::Result<()>;
    fn cancel(&self, event_id: EventId) -> tapster_scheduler::Result<bool>;
}

impl TimerControl for NotificationScheduler {
    fn schedule(&self, event_id: EventId, fire_at: DateTime<Utc>) -> tapster_scheduler::Result<()> {
        NotificationScheduler::schedule(self, event_id, fire_at).map(|_| ())
    }

    fn cancel(&self, event_id: EventId) -> tapster_scheduler::Result<bool> {
        NotificationScheduler::cancel(self, event_id)
    }
}

/// Registry-only control for processes that do not run the scheduler.
pub struct DurableTimers(pub Arc<dyn TimerRegistry>);

impl TimerControl for DurableTimers {
    fn schedule(&self, event_id: EventId, fire_at: DateTime<Utc>) -> tapster_scheduler::Result<()> {
        self.0.add(event_id, fire_at).map(|_| ())
    }

    fn cancel(&self, event_id: EventId) -> tapster_scheduler::Result<bool> {
        self.0.remove(event_id)
    }
}

pub struct EventLifecycle {
    repo: Arc<EventRepository>,
    timers: Arc<dyn TimerControl>,
    guard: Arc<SqliteCompletionGuard>,
}

impl EventLifecycle {
    pub fn new(
        repo: Arc<EventRepository>,
        timers: Arc<dyn TimerControl>,
        guard: Arc<SqliteCompletionGuard>,
    ) -> Self {
        Self {
            repo,
            timers,
            guard,
        }
    }

    /// Store the event, then schedule its notification at the start time.
    ///
    /// A timer that already exists for the id counts as scheduled.
    pub fn create_event(&self, new: &NewEvent) -> Result<Event> {
        let event = self.repo.create_event(new)?;
        match self.timers.schedule(event.id, event.starts_at) {
            Ok(()) => {}
            Err(SchedulerError::DuplicateTimer(id)) => {
                info!(event_id = %id, "timer already registered");
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "event stored but timer not registered");
                return Err(e.into());
            }
        }
        Ok(event)
    }

    /// Cancel the notification, delete the event, then purge its marker.
    ///
    /// Returns whether the event existed.
    ///
    /// Not atomic with a firing already past its completion check in the
    /// daemon: that firing still sends and may write its marker after the
    /// purge, leaving a marker for a deleted event. Event ids are never
    /// reused, so the stray marker blocks nothing.
    pub fn delete_event(&self, id: EventId) -> Result<bool> {
        self.timers.cancel(id)?;
        let existed = self.repo.delete_event(id)?;
        self.guard.purge(id)?;
        if existed {
            info!(event_id = %id, "event deleted");
        }
        Ok(existed)
    }
}
