//! Telegram message handler registered in the teloxide Dispatcher.
//!
//! Only operator commands are handled; every other message is ignored.

use std::sync::Arc;

use tapster_core::types::EventId;
use tapster_scheduler::TimerEntry;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::allow;
use crate::context::OperatorContext;
use crate::send;

const USAGE: &str = "Operator commands:\n\
/pending - list scheduled notifications\n\
/cancel <event id> - drop an event's notification\n\
/unstall <event id> - retry a notification that gave up";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Pending,
    Cancel(EventId),
    Unstall(EventId),
    Help,
    /// Known command with a missing or malformed argument.
    Invalid(String),
}

/// Parse `/command [arg]`, tolerating a `@botname` suffix on the command.
///
/// Returns `None` for text that is not one of our commands.
pub fn parse_command(text: &str) -> Option<OperatorCommand> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    let arg = parts.next();

    let with_id = |make: fn(EventId) -> OperatorCommand| match arg.map(str::parse::<EventId>) {
        Some(Ok(id)) => make(id),
        _ => OperatorCommand::Invalid(format!("Usage: /{name} <event id>")),
    };

    match name.as_str() {
        "pending" => Some(OperatorCommand::Pending),
        "cancel" => Some(with_id(OperatorCommand::Cancel)),
        "unstall" => Some(with_id(OperatorCommand::Unstall)),
        "help" | "start" => Some(OperatorCommand::Help),
        _ => None,
    }
}

/// Run `cmd` against the scheduler and build the reply text.
pub async fn execute<C: OperatorContext + ?Sized>(ctx: &C, cmd: OperatorCommand) -> String {
    match cmd {
        OperatorCommand::Help => USAGE.to_string(),
        OperatorCommand::Invalid(usage) => usage,
        OperatorCommand::Pending => match ctx.scheduler().list_pending() {
            Ok(entries) => format_pending(ctx, &entries).await,
            Err(e) => format!("⚠️ Could not read timers: {e}"),
        },
        OperatorCommand::Cancel(id) => match ctx.scheduler().cancel(id) {
            Ok(true) => {
                info!(event_id = %id, "operator cancelled notification");
                format!("🛑 Notification for event {id} cancelled.")
            }
            Ok(false) => format!("Nothing pending for event {id}."),
            Err(e) => format!("⚠️ Cancel failed: {e}"),
        },
        OperatorCommand::Unstall(id) => match ctx.scheduler().unstall(id) {
            Ok(true) => format!("🔁 Notification for event {id} re-armed."),
            Ok(false) => format!("Event {id} has no stalled notification."),
            Err(e) => format!("⚠️ Unstall failed: {e}"),
        },
    }
}

async fn format_pending<C: OperatorContext + ?Sized>(ctx: &C, entries: &[TimerEntry]) -> String {
    if entries.is_empty() {
        return "No pending notifications.".to_string();
    }
    let offset = ctx.scheduler().display_offset();
    let mut lines = vec![format!("⏳ Pending notifications ({}):", entries.len())];
    for entry in entries {
        let name = match ctx.events().get_event(entry.event_id).await {
            Ok(Some(event)) => event.name,
            Ok(None) => "(deleted event)".to_string(),
            Err(_) => "(unknown)".to_string(),
        };
        let mut line = format!(
            "#{} {} at {}",
            entry.event_id,
            name,
            entry.fire_at.with_timezone(&offset).format("%d.%m.%Y %H:%M")
        );
        if entry.stalled {
            line.push_str(&format!(" ⚠️ stalled after {} attempts", entry.attempts));
            if let Some(ref reason) = entry.last_error {
                line.push_str(&format!(": {reason}"));
            }
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Main message handler registered in the teloxide Dispatcher.
///
/// 1. Bot-message filter
/// 2. Command parse (non-commands are ignored)
/// 3. Private chat + operator check (deny-by-default)
/// 4. Execute and reply
pub async fn handle_message<C: OperatorContext + 'static>(
    bot: Bot,
    msg: Message,
    ctx: Arc<C>,
) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }

    let Some(cmd) = msg.text().and_then(parse_command) else {
        return Ok(());
    };

    if !msg.chat.is_private() || !allow::is_operator(ctx.operator_id(), from.id.0) {
        warn!(user_id = from.id.0, "Telegram: operator command outside the operator's private chat ignored");
        return Ok(());
    }

    let response = execute(ctx.as_ref(), cmd).await;
    send::reply(&bot, msg.chat.id, &response).await;
    Ok(())
}
