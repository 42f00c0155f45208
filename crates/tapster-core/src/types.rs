use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Option label used when an event does not configure its own.
pub const DEFAULT_OPTION: &str = "Lager";

/// Stable identifier of an event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl EventId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for EventId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(EventId)
    }
}

/// A scheduled social event, as stored by the events subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    /// Start instant; local display happens at render time.
    pub starts_at: DateTime<Utc>,
    pub location: Option<String>,
    /// Whether attendees pick between two options instead of a single default.
    pub has_choice: bool,
    pub option_1: Option<String>,
    pub option_2: Option<String>,
    /// Telegram id of the creator.
    pub created_by: i64,
}

impl Event {
    /// Options attendees can choose for this event.
    ///
    /// Binary-choice events with both labels set offer both; everything else
    /// falls back to the first label or [`DEFAULT_OPTION`].
    pub fn valid_options(&self) -> Vec<&str> {
        let first = self.option_1.as_deref().filter(|s| !s.is_empty());
        let second = self.option_2.as_deref().filter(|s| !s.is_empty());
        match (self.has_choice, first, second) {
            (true, Some(a), Some(b)) => vec![a, b],
            (_, Some(a), _) => vec![a],
            _ => vec![DEFAULT_OPTION],
        }
    }
}

/// Fields required to create an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub starts_at: DateTime<Utc>,
    pub location: Option<String>,
    pub has_choice: bool,
    pub option_1: Option<String>,
    pub option_2: Option<String>,
    pub created_by: i64,
}

/// One attendee's pick for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub event_id: EventId,
    pub user_id: i64,
    pub option: String,
    pub selected_at: DateTime<Utc>,
}
