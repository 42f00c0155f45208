// End-to-end behaviour of the notification scheduler against in-memory
// fakes for the event store and the messaging channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::Connection;
use tapster_core::types::{Choice, Event, EventId};
use tapster_scheduler::{
    CompletionMarker, EventStore, FiringOutcome, FiringReport, IdempotencyGuard, Notifier,
    NotificationScheduler, Result, SchedulerError, SchedulerSettings, SqliteCompletionGuard,
    SqliteTimerRegistry, TimerRegistry, TimerState,
};
use tokio::sync::{mpsc, watch};

const OPERATOR: i64 = 4242;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    events: Mutex<HashMap<EventId, Event>>,
    choices: Mutex<Vec<Choice>>,
}

impl MemoryStore {
    fn add_event(&self, event: Event) {
        self.events.lock().unwrap().insert(event.id, event);
    }

    fn choose(&self, event_id: EventId, user_id: i64, option: &str, at: DateTime<Utc>) {
        self.choices.lock().unwrap().push(Choice {
            event_id,
            user_id,
            option: option.to_string(),
            selected_at: at,
        });
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.lock().unwrap().get(&id).cloned())
    }

    async fn choices_in_window(
        &self,
        id: EventId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Choice>> {
        Ok(self
            .choices
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.event_id == id && c.selected_at >= from && c.selected_at <= to)
            .cloned()
            .collect())
    }
}

/// Records every message; fails the first `failures` calls.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    calls: AtomicU32,
    failures: AtomicU32,
}

impl RecordingNotifier {
    fn failing(n: u32) -> Self {
        let notifier = Self::default();
        notifier.failures.store(n, Ordering::SeqCst);
        notifier
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, operator_id: i64, text: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SchedulerError::Delivery("chat unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((operator_id, text.to_string()));
        Ok(())
    }
}

/// Guard wrapper that counts successful marks, or refuses to write at all.
struct CountingGuard {
    inner: Arc<SqliteCompletionGuard>,
    marks: Arc<AtomicUsize>,
    broken_writes: bool,
}

impl IdempotencyGuard for CountingGuard {
    fn is_completed(&self, event_id: EventId) -> Result<bool> {
        self.inner.is_completed(event_id)
    }

    fn mark_completed(&self, event_id: EventId, count: u32) -> Result<CompletionMarker> {
        if self.broken_writes {
            return Err(SchedulerError::StorageUnavailable("disk full".to_string()));
        }
        let marker = self.inner.mark_completed(event_id, count)?;
        self.marks.fetch_add(1, Ordering::SeqCst);
        Ok(marker)
    }

    fn get(&self, event_id: EventId) -> Result<Option<CompletionMarker>> {
        self.inner.get(event_id)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn settings() -> SchedulerSettings {
    SchedulerSettings {
        operator_id: OPERATOR,
        window: chrono::Duration::minutes(30),
        max_delivery_attempts: 3,
        retry_backoff: Duration::from_millis(10),
        reconcile_interval: Duration::from_secs(60),
        display_offset: FixedOffset::east_opt(0).unwrap(),
    }
}

fn event(id: i64, starts_at: DateTime<Utc>) -> Event {
    Event {
        id: EventId(id),
        name: format!("Event {id}"),
        starts_at,
        location: None,
        has_choice: true,
        option_1: Some("A".to_string()),
        option_2: Some("B".to_string()),
        created_by: 1,
    }
}

struct Harness {
    scheduler: NotificationScheduler,
    reports: mpsc::Receiver<FiringReport>,
    registry: Arc<SqliteTimerRegistry>,
    guard: Arc<SqliteCompletionGuard>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

impl Harness {
    fn new() -> Self {
        Self::with_notifier(RecordingNotifier::default())
    }

    fn with_notifier(notifier: RecordingNotifier) -> Self {
        Self::with_settings(notifier, settings())
    }

    fn with_settings(notifier: RecordingNotifier, settings: SchedulerSettings) -> Self {
        let registry =
            Arc::new(SqliteTimerRegistry::new(Connection::open_in_memory().unwrap()).unwrap());
        let guard =
            Arc::new(SqliteCompletionGuard::new(Connection::open_in_memory().unwrap()).unwrap());
        Self::build(
            registry,
            guard.clone(),
            guard,
            Arc::new(MemoryStore::default()),
            Arc::new(notifier),
            settings,
        )
    }

    fn build(
        registry: Arc<SqliteTimerRegistry>,
        guard: Arc<SqliteCompletionGuard>,
        gate: Arc<dyn IdempotencyGuard>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        settings: SchedulerSettings,
    ) -> Self {
        let (tx, reports) = mpsc::channel(32);
        let scheduler = NotificationScheduler::new(
            registry.clone(),
            gate,
            store.clone(),
            notifier.clone(),
            settings,
            Some(tx),
        );
        Self {
            scheduler,
            reports,
            registry,
            guard,
            store,
            notifier,
        }
    }

    /// Same storage, store and channel; fresh in-process state.
    fn restart(&self) -> Self {
        Self::build(
            self.registry.clone(),
            self.guard.clone(),
            self.guard.clone(),
            self.store.clone(),
            self.notifier.clone(),
            settings(),
        )
    }

    async fn next_report(&mut self) -> FiringReport {
        tokio::time::timeout(Duration::from_secs(5), self.reports.recv())
            .await
            .expect("no firing report within 5s")
            .expect("report channel closed")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn past_fire_time_sends_one_report() {
    let mut h = Harness::new();
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(1, start));
    h.store.choose(EventId(1), 10, "A", start - chrono::Duration::minutes(20));
    h.store.choose(EventId(1), 11, "B", start - chrono::Duration::minutes(5));
    h.store.choose(EventId(1), 12, "A", start - chrono::Duration::minutes(45));

    h.scheduler.schedule(EventId(1), start).unwrap();
    let report = h.next_report().await;

    assert_eq!(report.event_id, EventId(1));
    assert_eq!(report.outcome, FiringOutcome::Sent { participant_count: 2 });
    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, OPERATOR);
    assert!(sent[0].1.contains("Participants: 2"));
    assert!(sent[0].1.contains("A: 1"));
    assert!(sent[0].1.contains("B: 1"));

    assert!(h.registry.list_all().unwrap().is_empty());
    assert_eq!(h.guard.get(EventId(1)).unwrap().unwrap().participant_count, 2);
    assert_eq!(h.scheduler.state_of(EventId(1)).unwrap(), None);
}

#[tokio::test]
async fn cancel_before_fire_sends_nothing() {
    let mut h = Harness::new();
    let start = Utc::now() + chrono::Duration::hours(1);
    h.store.add_event(event(2, start));

    h.scheduler.schedule(EventId(2), start).unwrap();
    assert!(h.scheduler.is_armed(EventId(2)));
    assert_eq!(
        h.scheduler.state_of(EventId(2)).unwrap(),
        Some(TimerState::Pending)
    );

    assert!(h.scheduler.cancel(EventId(2)).unwrap());
    assert_eq!(h.next_report().await.outcome, FiringOutcome::Cancelled);
    assert!(h.notifier.sent().is_empty());
    assert!(h.scheduler.list_pending().unwrap().is_empty());
    assert!(!h.scheduler.is_armed(EventId(2)));

    // Second cancel is a no-op.
    assert!(!h.scheduler.cancel(EventId(2)).unwrap());
}

#[tokio::test]
async fn scheduling_twice_is_a_duplicate() {
    let h = Harness::new();
    let start = Utc::now() + chrono::Duration::hours(1);
    h.store.add_event(event(3, start));

    h.scheduler.schedule(EventId(3), start).unwrap();
    let err = h
        .scheduler
        .schedule(EventId(3), start + chrono::Duration::hours(1))
        .unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateTimer(EventId(3))));
    assert_eq!(h.scheduler.list_pending().unwrap().len(), 1);
    h.scheduler.cancel(EventId(3)).unwrap();
}

#[tokio::test]
async fn replay_after_completion_is_a_no_op() {
    let mut h = Harness::new();
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(4, start));
    h.scheduler.schedule(EventId(4), start).unwrap();
    assert!(h.next_report().await.outcome.delivered());

    // A crash after the marker but before the timer was removed leaves the
    // timer behind; the next start replays it.
    h.registry.add(EventId(4), start).unwrap();
    let mut restarted = h.restart();
    assert_eq!(restarted.scheduler.recover().unwrap(), 1);

    assert_eq!(
        restarted.next_report().await.outcome,
        FiringOutcome::AlreadyCompleted
    );
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.registry.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_after_send_is_harmless() {
    let mut h = Harness::new();
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(5, start));
    h.scheduler.schedule(EventId(5), start).unwrap();
    assert!(h.next_report().await.outcome.delivered());

    assert!(!h.scheduler.cancel(EventId(5)).unwrap());
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.guard.is_completed(EventId(5)).unwrap());
}

#[tokio::test]
async fn missing_event_drops_the_timer() {
    let mut h = Harness::new();
    h.scheduler
        .schedule(EventId(6), Utc::now() - chrono::Duration::seconds(1))
        .unwrap();

    assert_eq!(h.next_report().await.outcome, FiringOutcome::EventMissing);
    assert!(h.notifier.sent().is_empty());
    assert!(h.registry.get(EventId(6)).unwrap().is_none());
    assert!(!h.guard.is_completed(EventId(6)).unwrap());
}

#[tokio::test]
async fn transient_delivery_failure_is_retried() {
    let mut h = Harness::with_notifier(RecordingNotifier::failing(1));
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(7, start));
    h.scheduler.schedule(EventId(7), start).unwrap();

    assert_eq!(
        h.next_report().await.outcome,
        FiringOutcome::Sent { participant_count: 0 }
    );
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 2);
    assert!(h.notifier.sent()[0].1.contains("No orders."));
}

#[tokio::test]
async fn exhausted_delivery_stalls_until_unstalled() {
    let mut h = Harness::with_notifier(RecordingNotifier::failing(3));
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(8, start));
    h.scheduler.schedule(EventId(8), start).unwrap();

    assert_eq!(
        h.next_report().await.outcome,
        FiringOutcome::DeliveryFailed { attempts: 3 }
    );
    let entry = h.registry.get(EventId(8)).unwrap().unwrap();
    assert!(entry.stalled);
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.last_error.as_deref(), Some("Delivery failed: chat unavailable"));
    assert!(!h.guard.is_completed(EventId(8)).unwrap());

    // Reconcile leaves stalled timers alone.
    assert_eq!(h.scheduler.reconcile().unwrap(), 0);
    assert!(!h.scheduler.is_armed(EventId(8)));

    assert!(h.scheduler.unstall(EventId(8)).unwrap());
    assert!(h.next_report().await.outcome.delivered());
    assert_eq!(h.notifier.sent().len(), 1);
    assert!(h.registry.get(EventId(8)).unwrap().is_none());
}

#[tokio::test]
async fn unpersisted_marker_stalls_instead_of_resending() {
    let registry =
        Arc::new(SqliteTimerRegistry::new(Connection::open_in_memory().unwrap()).unwrap());
    let guard =
        Arc::new(SqliteCompletionGuard::new(Connection::open_in_memory().unwrap()).unwrap());
    let broken = Arc::new(CountingGuard {
        inner: guard.clone(),
        marks: Arc::new(AtomicUsize::new(0)),
        broken_writes: true,
    });
    let mut h = Harness::build(
        registry,
        guard,
        broken,
        Arc::new(MemoryStore::default()),
        Arc::new(RecordingNotifier::default()),
        settings(),
    );
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(9, start));
    h.scheduler.schedule(EventId(9), start).unwrap();

    assert_eq!(h.next_report().await.outcome, FiringOutcome::Unrecorded);
    assert_eq!(h.notifier.sent().len(), 1);
    let entry = h.registry.get(EventId(9)).unwrap().unwrap();
    assert!(entry.stalled);
    assert!(entry
        .last_error
        .as_deref()
        .unwrap()
        .contains("completion marker not persisted"));

    // Periodic passes and restarts leave it alone.
    for _ in 0..5 {
        assert_eq!(h.scheduler.reconcile().unwrap(), 0);
    }
    let mut restarted = h.restart();
    assert_eq!(restarted.scheduler.recover().unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.notifier.sent().len(), 1);

    // Unstalling sends again: at-least-once when the marker write is lost.
    assert!(restarted.scheduler.unstall(EventId(9)).unwrap());
    assert!(restarted.next_report().await.outcome.delivered());
    assert_eq!(h.notifier.sent().len(), 2);
    assert!(h.guard.is_completed(EventId(9)).unwrap());
    assert!(h.registry.get(EventId(9)).unwrap().is_none());
}

#[tokio::test]
async fn two_instances_on_one_database_complete_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tapster.db");
    let store = Arc::new(MemoryStore::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let marks = Arc::new(AtomicUsize::new(0));

    let mut instances: Vec<Harness> = (0..2)
        .map(|_| {
            let open = || tapster_scheduler::db::open(&path).unwrap();
            let registry = Arc::new(SqliteTimerRegistry::new(open()).unwrap());
            let guard = Arc::new(SqliteCompletionGuard::new(open()).unwrap());
            let counting = Arc::new(CountingGuard {
                inner: guard.clone(),
                marks: marks.clone(),
                broken_writes: false,
            });
            Harness::build(
                registry,
                guard,
                counting,
                store.clone(),
                notifier.clone(),
                settings(),
            )
        })
        .collect();

    store.add_event(event(10, Utc::now() - chrono::Duration::minutes(1)));
    // Slightly in the future so both instances are armed before either fires.
    let fire_at = Utc::now() + chrono::Duration::milliseconds(300);
    instances[0].registry.add(EventId(10), fire_at).unwrap();
    assert_eq!(instances[0].scheduler.recover().unwrap(), 1);
    assert_eq!(instances[1].scheduler.recover().unwrap(), 1);

    let mut outcomes = Vec::new();
    for h in instances.iter_mut() {
        outcomes.push(h.next_report().await.outcome);
    }

    assert_eq!(marks.load(Ordering::SeqCst), 1);
    let sent = outcomes
        .iter()
        .filter(|o| matches!(o, FiringOutcome::Sent { .. }))
        .count();
    assert_eq!(sent, 1, "outcomes: {outcomes:?}");
    assert!(notifier.sent().len() <= 2);
    assert!(instances[0].registry.list_all().unwrap().is_empty());
}

#[tokio::test]
async fn reconcile_drops_waits_removed_elsewhere() {
    let mut h = Harness::new();
    let start = Utc::now() + chrono::Duration::hours(2);
    h.store.add_event(event(11, start));
    h.scheduler.schedule(EventId(11), start).unwrap();

    // Another process cancelled the timer.
    h.registry.remove(EventId(11)).unwrap();
    assert_eq!(h.scheduler.reconcile().unwrap(), 0);

    assert_eq!(h.next_report().await.outcome, FiringOutcome::Cancelled);
    assert!(!h.scheduler.is_armed(EventId(11)));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn timer_removed_elsewhere_is_not_fired() {
    let mut h = Harness::new();
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(13, start));
    h.scheduler
        .schedule(EventId(13), Utc::now() + chrono::Duration::milliseconds(200))
        .unwrap();
    assert!(h.scheduler.is_armed(EventId(13)));

    // Removed by another process; no reconcile pass runs before the wait ends.
    h.registry.remove(EventId(13)).unwrap();

    assert_eq!(h.next_report().await.outcome, FiringOutcome::Cancelled);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
    assert!(!h.guard.is_completed(EventId(13)).unwrap());
}

#[tokio::test]
async fn cancel_during_retry_backoff_stops_delivery() {
    let mut h = Harness::with_settings(
        RecordingNotifier::failing(3),
        SchedulerSettings {
            retry_backoff: Duration::from_secs(30),
            ..settings()
        },
    );
    let start = Utc::now() - chrono::Duration::minutes(1);
    h.store.add_event(event(14, start));
    h.scheduler.schedule(EventId(14), start).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while h.notifier.calls.load(Ordering::SeqCst) == 0 {
        assert!(tokio::time::Instant::now() < deadline, "first attempt never made");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        h.scheduler.state_of(EventId(14)).unwrap(),
        Some(TimerState::Firing)
    );

    assert!(h.scheduler.cancel(EventId(14)).unwrap());
    assert_eq!(h.next_report().await.outcome, FiringOutcome::Cancelled);
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
    assert!(h.notifier.sent().is_empty());
    assert!(h.registry.get(EventId(14)).unwrap().is_none());
    assert!(!h.scheduler.is_armed(EventId(14)));
}

#[tokio::test]
async fn shutdown_keeps_durable_timers() {
    let mut h = Harness::new();
    let start = Utc::now() + chrono::Duration::hours(3);
    h.store.add_event(event(12, start));
    h.registry.add(EventId(12), start).unwrap();

    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(h.scheduler.clone().run(rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !h.scheduler.is_armed(EventId(12)) {
        assert!(tokio::time::Instant::now() < deadline, "recovery never armed the timer");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tx.send(true).unwrap();
    task.await.unwrap();

    assert_eq!(h.next_report().await.outcome, FiringOutcome::Cancelled);
    assert_eq!(h.registry.list_all().unwrap().len(), 1);
    assert!(h.notifier.sent().is_empty());
}
