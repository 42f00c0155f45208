//! `tapster-scheduler`: fires one attendance notification per event.
//!
//! # Overview
//!
//! When an event is created its notification is [`NotificationScheduler::schedule`]d:
//! a timer row goes into the durable [`registry::TimerRegistry`] and a tokio task
//! sleeps until the fire time. On firing the task
//!
//! 1. re-reads the event (gone → the timer is dropped),
//! 2. asks the [`guard::IdempotencyGuard`] whether the report was already sent,
//! 3. aggregates in-window choices ([`aggregate`]),
//! 4. sends the report through a [`notify::Notifier`],
//! 5. writes the completion marker and removes the timer.
//!
//! The marker insert is the only gate that matters for duplicates: restarts
//! replay every stored timer, and a replay of a finished event is a no-op.
//! A crash between steps 4 and 5 re-sends the report on restart.
//!
//! | Failure                | Handling                                        |
//! |------------------------|-------------------------------------------------|
//! | event deleted          | timer dropped, nothing sent                     |
//! | delivery error         | retried with backoff, then flagged `stalled`    |
//! | registry/guard error   | task ends, timer stays for the next reconcile   |
//! | marker write fails     | sent once, timer flagged `stalled`              |
//! | marker already present | treated as done                                 |

pub mod aggregate;
pub mod db;
pub mod engine;
pub mod error;
pub mod guard;
pub mod notify;
pub mod registry;
pub mod store;
pub mod types;

pub use engine::{NotificationScheduler, SchedulerSettings};
pub use error::{Result, SchedulerError};
pub use guard::{IdempotencyGuard, SqliteCompletionGuard};
pub use notify::Notifier;
pub use registry::{SqliteTimerRegistry, TimerRegistry};
pub use store::EventStore;
pub use types::{Attendance, CompletionMarker, FiringOutcome, FiringReport, TimerEntry, TimerState};
