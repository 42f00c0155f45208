//! Attendance Aggregator: who is coming and what they ordered.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use tapster_core::types::{Choice, Event};
use tracing::debug;

use crate::error::Result;
use crate::store::EventStore;
use crate::types::Attendance;

/// The pre-event window `[starts_at - window, starts_at]`, both ends inclusive.
pub fn window_bounds(event: &Event, window: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    (event.starts_at - window, event.starts_at)
}

/// Aggregate `choices` for `event`.
///
/// Choices for other events or outside the window are skipped even if the
/// store returned them. Option names the event does not offer still count
/// the user as a participant but add to no option total.
pub fn tally(event: &Event, choices: &[Choice], window: Duration) -> Attendance {
    let (from, to) = window_bounds(event, window);
    let in_window: Vec<&Choice> = choices
        .iter()
        .filter(|c| c.event_id == event.id && c.selected_at >= from && c.selected_at <= to)
        .collect();

    let participants: HashSet<i64> = in_window.iter().map(|c| c.user_id).collect();
    let per_option = event
        .valid_options()
        .into_iter()
        .map(|option| {
            let n = in_window.iter().filter(|c| c.option == option).count() as u32;
            (option.to_string(), n)
        })
        .collect();

    Attendance {
        participant_count: participants.len() as u32,
        per_option,
    }
}

/// Load the event's in-window choices and aggregate them. No side effects.
pub async fn compute(store: &dyn EventStore, event: &Event, window: Duration) -> Result<Attendance> {
    let (from, to) = window_bounds(event, window);
    let choices = store.choices_in_window(event.id, from, to).await?;
    debug!(event_id = %event.id, %from, %to, found = choices.len(), "counting choices");
    Ok(tally(event, &choices, window))
}
