//! Adapts the event repository to the scheduler's read-only `EventStore`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tapster_core::types::{Choice, Event, EventId};
use tapster_events::{EventRepository, EventsError};
use tapster_scheduler::{EventStore, SchedulerError};

pub struct RepoEventStore {
    repo: Arc<EventRepository>,
}

impl RepoEventStore {
    pub fn new(repo: Arc<EventRepository>) -> Self {
        Self { repo }
    }
}

fn store_err(e: EventsError) -> SchedulerError {
    SchedulerError::Store(e.to_string())
}

#[async_trait]
impl EventStore for RepoEventStore {
    async fn get_event(&self, id: EventId) -> tapster_scheduler::Result<Option<Event>> {
        self.repo.get_event(id).map_err(store_err)
    }

    async fn choices_in_window(
        &self,
        id: EventId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> tapster_scheduler::Result<Vec<Choice>> {
        self.repo.choices_in_window(id, from, to).map_err(store_err)
    }
}
