//! Operator notification: the delivery capability and the message text.

use std::fmt::Write;

use async_trait::async_trait;
use chrono::FixedOffset;
use tapster_core::types::Event;

use crate::error::Result;
use crate::types::Attendance;

/// Outbound messaging capability. Any transport can implement it.
///
/// Synchronous from the caller's view and may fail transiently; failures are
/// reported as `SchedulerError::Delivery`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, operator_id: i64, text: &str) -> Result<()>;
}

/// Render the attendance report sent to the operator.
///
/// Times are shown at `offset`, the group's local time.
pub fn render_notification(event: &Event, attendance: &Attendance, offset: FixedOffset) -> String {
    let local = event.starts_at.with_timezone(&offset);
    let mut text = format!(
        "🍺 Orders for event '{}' ({}):\n",
        event.name,
        local.format("%d.%m.%Y @ %H:%M")
    );
    if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
        let _ = writeln!(text, "📍 {location}");
    }
    let _ = writeln!(text, "👥 Participants: {}", attendance.participant_count);
    if attendance.participant_count == 0 {
        text.push_str("🍻 No orders.");
    } else {
        for (option, count) in &attendance.per_option {
            let _ = writeln!(text, "🍻 {option}: {count}");
        }
    }
    text.trim_end().to_string()
}
