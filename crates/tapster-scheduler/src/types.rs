use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tapster_core::types::EventId;

/// A durable pending timer: fire the notification for `event_id` at `fire_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEntry {
    pub event_id: EventId,
    /// Immutable once registered; cancel and re-add to move it.
    pub fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Delivery attempts made by the last firing that gave up.
    pub attempts: u32,
    /// Set when delivery retries were exhausted. Stalled timers are not
    /// re-armed automatically; an operator has to unstall them.
    pub stalled: bool,
    pub last_error: Option<String>,
}

/// Durable proof that the notification for an event was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub event_id: EventId,
    pub participant_count: u32,
    pub computed_at: DateTime<Utc>,
}

/// Attendance figures reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attendance {
    /// Distinct users with at least one in-window choice.
    pub participant_count: u32,
    /// In-window choices per valid option, in the event's option order.
    pub per_option: Vec<(String, u32)>,
}

impl Attendance {
    pub fn count_for(&self, option: &str) -> Option<u32> {
        self.per_option
            .iter()
            .find(|(name, _)| name == option)
            .map(|(_, n)| *n)
    }
}

/// Lifecycle state of a tracked event's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerState {
    /// Registered and waiting (or left for retry after a failure).
    Pending,
    /// Wait elapsed; the notification pipeline is running.
    Firing,
    /// Notification sent and marker written. Terminal.
    Completed,
    /// Event deleted or timer cancelled before the guard check. Terminal.
    Cancelled,
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerState::Pending => "pending",
            TimerState::Firing => "firing",
            TimerState::Completed => "completed",
            TimerState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// How a single wait task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FiringOutcome {
    /// Notification delivered and completion recorded.
    Sent { participant_count: u32 },
    /// A marker already existed; nothing was sent.
    AlreadyCompleted,
    /// Delivered, but a concurrent firing wrote the marker first.
    LostRace,
    /// The event vanished before firing; the stale timer was dropped.
    EventMissing,
    /// Cancelled before the guard check (or during delivery backoff).
    Cancelled,
    /// Every delivery attempt failed; the timer is flagged stalled.
    DeliveryFailed { attempts: u32 },
    /// Registry, guard or event store failed; the timer stays pending.
    StorageFailed,
    /// Delivered, but the completion marker was not written. The timer is
    /// flagged stalled so the report is not resent until an operator
    /// unstalls it.
    Unrecorded,
}

impl FiringOutcome {
    pub fn state(&self) -> TimerState {
        match self {
            FiringOutcome::Sent { .. }
            | FiringOutcome::AlreadyCompleted
            | FiringOutcome::LostRace => TimerState::Completed,
            FiringOutcome::EventMissing | FiringOutcome::Cancelled => TimerState::Cancelled,
            FiringOutcome::DeliveryFailed { .. }
            | FiringOutcome::StorageFailed
            | FiringOutcome::Unrecorded => TimerState::Pending,
        }
    }

    /// True if this firing put a notification on the wire.
    pub fn delivered(&self) -> bool {
        matches!(
            self,
            FiringOutcome::Sent { .. } | FiringOutcome::LostRace | FiringOutcome::Unrecorded
        )
    }
}

/// Sent on the optional report channel when a wait task exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiringReport {
    pub event_id: EventId,
    pub outcome: FiringOutcome,
}
