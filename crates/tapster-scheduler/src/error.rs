use tapster_core::types::EventId;
use thiserror::Error;

/// Errors that can occur within the notification scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A timer is already registered for this event. Callers treat the event
    /// as already scheduled.
    #[error("Timer already registered for event {0}")]
    DuplicateTimer(EventId),

    /// A completion marker already exists; another firing won the race.
    #[error("Notification already completed for event {0}")]
    AlreadyCompleted(EventId),

    /// The messaging channel rejected or failed to deliver the notification.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Underlying SQLite / rusqlite error in the registry or guard.
    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Storage could not be reached at all (e.g. a poisoned connection lock).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The event store failed to answer a read.
    #[error("Event store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
