use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use tapster_core::config::TapsterConfig;
use tapster_events::EventRepository;
use tapster_scheduler::{
    FiringOutcome, FiringReport, NotificationScheduler, SchedulerSettings, SqliteCompletionGuard,
    SqliteTimerRegistry, TimerRegistry,
};
use tapster_telegram::TelegramAdapter;

mod app;
mod cli;
mod commands;
mod lifecycle;
mod store;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tapster_bot=info,tapster_scheduler=info,tapster_telegram=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > TAPSTER_CONFIG env > ~/.tapster/tapster.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("TAPSTER_CONFIG").ok());
    let config = TapsterConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        TapsterConfig::default()
    });

    // single SQLite file shared by every component and process
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    debug!(path = %db_path, "opening SQLite database");
    let open = || tapster_scheduler::db::open(&db_path);
    {
        let db = open()?;
        tapster_events::db::init_db(&db)?;
        tapster_scheduler::db::init_db(&db)?;
    }

    let repo = Arc::new(EventRepository::new(open()?));
    let registry: Arc<dyn TimerRegistry> = Arc::new(SqliteTimerRegistry::new(open()?)?);
    let guard = Arc::new(SqliteCompletionGuard::new(open()?)?);

    let settings =
        SchedulerSettings::from_config(&config.scheduler, config.operator_id().unwrap_or(0));
    let offline = commands::Offline {
        repo: Arc::clone(&repo),
        registry: Arc::clone(&registry),
        guard: Arc::clone(&guard),
        display_offset: settings.display_offset,
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config, settings, repo, registry, guard).await,
        Commands::Pending { json } => offline.pending(json),
        Commands::Cancel { event_id } => offline.cancel(event_id),
        Commands::Unstall { event_id } => offline.unstall(event_id),
        Commands::Event(cmd) => offline.event(cmd),
        Commands::Choose {
            event_id,
            user_id,
            option,
        } => offline.choose(event_id, user_id, &option),
    }
}

/// Scheduler + Telegram adapter until Ctrl-C.
async fn run_daemon(
    config: TapsterConfig,
    settings: SchedulerSettings,
    repo: Arc<EventRepository>,
    registry: Arc<dyn TimerRegistry>,
    guard: Arc<SqliteCompletionGuard>,
) -> anyhow::Result<()> {
    let telegram_cfg = config
        .telegram
        .clone()
        .ok_or_else(|| anyhow!("`tapster run` needs a [telegram] section with bot_token"))?;
    if config.operator_id().is_none() {
        warn!("telegram.operator_id is not set; reports will fail and timers will stall");
    }

    let adapter = TelegramAdapter::new(&telegram_cfg)?;
    let events = Arc::new(store::RepoEventStore::new(repo));

    // Firing reports: NotificationScheduler → report logger
    let (report_tx, report_rx) = mpsc::channel::<FiringReport>(256);
    let scheduler = NotificationScheduler::new(
        registry,
        guard,
        events.clone(),
        Arc::new(adapter.notifier()),
        settings,
        Some(report_tx),
    );
    let state = Arc::new(app::AppState::new(config, scheduler.clone(), events));

    tokio::spawn(log_reports(report_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let telegram_task = tokio::spawn(adapter.run(state, shutdown_rx));
    info!("tapster running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    let _ = telegram_task.await;
    Ok(())
}

/// Background task that surfaces firing outcomes needing operator attention.
async fn log_reports(mut rx: mpsc::Receiver<FiringReport>) {
    while let Some(report) = rx.recv().await {
        match report.outcome {
            FiringOutcome::DeliveryFailed { attempts } => warn!(
                event_id = %report.event_id,
                attempts,
                "notification stalled; run `tapster unstall {}` once delivery works",
                report.event_id
            ),
            FiringOutcome::Unrecorded => warn!(
                event_id = %report.event_id,
                "notification sent but not recorded; stalled to avoid resending, `tapster unstall {}` sends it again",
                report.event_id
            ),
            FiringOutcome::StorageFailed => warn!(
                event_id = %report.event_id,
                "firing interrupted by a storage error; retried on the next reconcile"
            ),
            outcome => debug!(event_id = %report.event_id, ?outcome, "firing finished"),
        }
    }
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
