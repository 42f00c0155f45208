use thiserror::Error;

/// Errors from the events store. Kept separate from the scheduler's errors so
/// the adapter in the binary decides how a store failure is classified.
#[derive(Debug, Error)]
pub enum EventsError {
    #[error("Event not found: {0}")]
    NotFound(i64),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Connection lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, EventsError>;
