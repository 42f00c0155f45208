use std::sync::Arc;

use tapster_core::config::TapsterConfig;
use tapster_scheduler::{EventStore, NotificationScheduler};
use tapster_telegram::OperatorContext;

use crate::store::RepoEventStore;

/// Central shared state, passed as `Arc<AppState>` to the Telegram handler.
pub struct AppState {
    pub config: TapsterConfig,
    pub scheduler: NotificationScheduler,
    pub events: Arc<RepoEventStore>,
}

impl AppState {
    pub fn new(
        config: TapsterConfig,
        scheduler: NotificationScheduler,
        events: Arc<RepoEventStore>,
    ) -> Self {
        Self {
            config,
            scheduler,
            events,
        }
    }
}

impl OperatorContext for AppState {
    fn operator_id(&self) -> Option<i64> {
        self.config.operator_id()
    }

    fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    fn events(&self) -> &dyn EventStore {
        self.events.as_ref()
    }
}
