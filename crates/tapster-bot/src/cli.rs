//! CLI command definitions.
//!
//! `run` is the long-lived daemon. Every other command is one-shot: it writes
//! durable state only and the daemon picks changes up on its next reconcile.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tapster_core::types::EventId;

/// Tapster - attendance notifications for bar events.
#[derive(Parser)]
#[command(name = "tapster")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to $TAPSTER_CONFIG, then ~/.tapster/tapster.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and the Telegram bot (default)
    Run,

    /// List pending notification timers
    Pending {
        /// Print the raw timer entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop an event's pending notification
    Cancel {
        /// Event id
        event_id: EventId,
    },

    /// Clear the stalled flag so the daemon retries delivery
    Unstall {
        /// Event id
        event_id: EventId,
    },

    /// Event management
    #[command(subcommand)]
    Event(EventCommands),

    /// Record an attendee's choice for an event
    Choose {
        /// Event id
        event_id: EventId,
        /// Telegram user id of the attendee
        user_id: i64,
        /// Option label, e.g. "Lager"
        option: String,
    },
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Create an event and schedule its notification
    Create(CreateEventArgs),

    /// Delete an event, its choices and its notification
    Delete {
        /// Event id
        event_id: EventId,
    },

    /// List upcoming events
    List {
        /// Maximum number of events to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
pub struct CreateEventArgs {
    /// Event name
    #[arg(long)]
    pub name: String,

    /// Start time, RFC 3339 (e.g. 2026-10-23T18:00:00+03:00)
    #[arg(long)]
    pub starts_at: DateTime<Utc>,

    /// Venue
    #[arg(long)]
    pub location: Option<String>,

    /// First option label (defaults to "Lager")
    #[arg(long = "option-1")]
    pub option_1: Option<String>,

    /// Second option label; setting both makes the event a choice
    #[arg(long = "option-2")]
    pub option_2: Option<String>,

    /// Telegram id of the creator
    #[arg(long, default_value_t = 0)]
    pub created_by: i64,
}
