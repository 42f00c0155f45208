//! What the Telegram handler needs from the host application.

use tapster_scheduler::{EventStore, NotificationScheduler};

/// Implemented by the binary's shared state and handed to the Dispatcher.
pub trait OperatorContext: Send + Sync {
    /// Telegram id allowed to run operator commands, if one is configured.
    fn operator_id(&self) -> Option<i64>;

    fn scheduler(&self) -> &NotificationScheduler;

    /// Used to put event names next to pending timers.
    fn events(&self) -> &dyn EventStore;
}
