//! `tapster-core`: configuration, errors and domain types shared by every crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::TapsterConfig;
pub use error::{Result, TapsterError};
pub use types::{Choice, Event, EventId, NewEvent};
