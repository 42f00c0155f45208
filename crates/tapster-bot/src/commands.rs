//! One-shot CLI commands. Each writes durable state and exits.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{FixedOffset, Utc};
use tapster_core::types::{EventId, NewEvent};
use tapster_events::EventRepository;
use tapster_scheduler::{SqliteCompletionGuard, TimerEntry, TimerRegistry};

use crate::cli::{CreateEventArgs, EventCommands};
use crate::lifecycle::{DurableTimers, EventLifecycle, TimerControl};

/// Handles to the shared database, one connection per component.
pub struct Offline {
    pub repo: Arc<EventRepository>,
    pub registry: Arc<dyn TimerRegistry>,
    pub guard: Arc<SqliteCompletionGuard>,
    pub display_offset: FixedOffset,
}

impl Offline {
    fn timers(&self) -> DurableTimers {
        DurableTimers(Arc::clone(&self.registry))
    }

    fn lifecycle(&self) -> EventLifecycle {
        EventLifecycle::new(
            Arc::clone(&self.repo),
            Arc::new(self.timers()),
            Arc::clone(&self.guard),
        )
    }

    pub fn pending(&self, json: bool) -> anyhow::Result<()> {
        let entries = self.registry.list_all()?;
        if json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }
        if entries.is_empty() {
            println!("No pending notifications.");
            return Ok(());
        }
        for entry in &entries {
            println!("{}", self.describe(entry)?);
        }
        Ok(())
    }

    fn describe(&self, entry: &TimerEntry) -> anyhow::Result<String> {
        let name = self
            .repo
            .get_event(entry.event_id)?
            .map(|e| e.name)
            .unwrap_or_else(|| "(deleted event)".to_string());
        let mut line = format!(
            "#{:<5} {:<24} fires {}",
            entry.event_id,
            name,
            entry.fire_at.with_timezone(&self.display_offset).format("%d.%m.%Y %H:%M")
        );
        if entry.stalled {
            line.push_str(&format!(
                "  STALLED after {} attempts ({})",
                entry.attempts,
                entry.last_error.as_deref().unwrap_or("no error recorded")
            ));
        }
        Ok(line)
    }

    pub fn cancel(&self, event_id: EventId) -> anyhow::Result<()> {
        if self.timers().cancel(event_id)? {
            println!("Notification for event {event_id} cancelled.");
        } else {
            println!("Nothing pending for event {event_id}.");
        }
        Ok(())
    }

    pub fn unstall(&self, event_id: EventId) -> anyhow::Result<()> {
        if self.registry.unstall(event_id)? {
            println!("Event {event_id} unstalled; the running daemon retries it on its next pass.");
        } else {
            println!("Event {event_id} has no stalled notification.");
        }
        Ok(())
    }

    pub fn event(&self, cmd: EventCommands) -> anyhow::Result<()> {
        match cmd {
            EventCommands::Create(args) => self.create_event(args),
            EventCommands::Delete { event_id } => {
                if self.lifecycle().delete_event(event_id)? {
                    println!("Event {event_id} deleted.");
                } else {
                    println!("No event {event_id}.");
                }
                Ok(())
            }
            EventCommands::List { limit } => self.list_events(limit),
        }
    }

    fn create_event(&self, args: CreateEventArgs) -> anyhow::Result<()> {
        let has_choice = args.option_1.is_some() && args.option_2.is_some();
        let event = self.lifecycle().create_event(&NewEvent {
            name: args.name,
            starts_at: args.starts_at,
            location: args.location,
            has_choice,
            option_1: args.option_1,
            option_2: args.option_2,
            created_by: args.created_by,
        })?;
        println!(
            "Created event {} '{}' at {}; options: {}",
            event.id,
            event.name,
            event.starts_at.with_timezone(&self.display_offset).format("%d.%m.%Y %H:%M"),
            event.valid_options().join(" / ")
        );
        Ok(())
    }

    fn list_events(&self, limit: usize) -> anyhow::Result<()> {
        let events = self.repo.list_upcoming(Utc::now(), limit)?;
        if events.is_empty() {
            println!("No upcoming events.");
        }
        for event in &events {
            let timer = match self.registry.get(event.id)? {
                Some(entry) if entry.stalled => "stalled",
                Some(_) => "pending",
                None => "none",
            };
            println!(
                "#{:<5} {:<24} {}  notification: {timer}",
                event.id,
                event.name,
                event.starts_at.with_timezone(&self.display_offset).format("%d.%m.%Y %H:%M")
            );
        }
        Ok(())
    }

    pub fn choose(&self, event_id: EventId, user_id: i64, option: &str) -> anyhow::Result<()> {
        let event = self
            .repo
            .get_event(event_id)?
            .with_context(|| format!("no event {event_id}"))?;
        let options = event.valid_options();
        if !options.contains(&option) {
            bail!(
                "'{option}' is not offered for event {event_id}; choose one of: {}",
                options.join(", ")
            );
        }
        self.repo.record_choice(event_id, user_id, option, Utc::now())?;
        println!("Recorded {option} for user {user_id} at event {event_id}.");
        Ok(())
    }
}
