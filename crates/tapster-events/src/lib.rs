//! `tapster-events`: SQLite store for events and attendee choices.
//!
//! Owned by the surrounding application; the notification scheduler only
//! reads from it through the `EventStore` adapter in `tapster-bot`.

pub mod db;
pub mod error;
pub mod repo;

pub use error::{EventsError, Result};
pub use repo::EventRepository;
