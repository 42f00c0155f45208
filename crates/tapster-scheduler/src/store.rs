use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tapster_core::types::{Choice, Event, EventId};

use crate::error::Result;

/// Read-only view of the application's events, as the scheduler needs it.
///
/// Implementations map their own failures to `SchedulerError::Store`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// `Ok(None)` when the event no longer exists.
    async fn get_event(&self, id: EventId) -> Result<Option<Event>>;

    /// Choices for `id` with `from <= selected_at <= to`.
    async fn choices_in_window(
        &self,
        id: EventId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Choice>>;
}
