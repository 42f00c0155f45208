use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tapster_core::config::{SchedulerConfig, DEFAULT_WINDOW_MINUTES};
use tapster_core::types::EventId;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    aggregate,
    error::{Result, SchedulerError},
    guard::IdempotencyGuard,
    notify::{render_notification, Notifier},
    registry::TimerRegistry,
    store::EventStore,
    types::{FiringOutcome, FiringReport, TimerEntry, TimerState},
};

/// Runtime knobs for [`NotificationScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Chat id that receives attendance reports.
    pub operator_id: i64,
    pub window: chrono::Duration,
    pub max_delivery_attempts: u32,
    pub retry_backoff: Duration,
    pub reconcile_interval: Duration,
    pub display_offset: FixedOffset,
}

impl SchedulerSettings {
    pub fn from_config(config: &SchedulerConfig, operator_id: i64) -> Self {
        Self {
            operator_id,
            window: window(config.window_minutes),
            max_delivery_attempts: config.max_delivery_attempts,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
            // A zero period would make tokio's interval panic.
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs.max(1)),
            display_offset: FixedOffset::east_opt(config.display_offset_minutes * 60)
                .unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Upper bound on the attendance window: one week.
const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

fn window(minutes: i64) -> chrono::Duration {
    if (1..=MAX_WINDOW_MINUTES).contains(&minutes) {
        return chrono::Duration::minutes(minutes);
    }
    warn!(
        window_minutes = minutes,
        fallback = DEFAULT_WINDOW_MINUTES,
        "scheduler.window_minutes out of range; using the default"
    );
    chrono::Duration::minutes(DEFAULT_WINDOW_MINUTES)
}

/// In-process bookkeeping for one live wait task.
struct WaitSlot {
    token: CancellationToken,
    /// Distinguishes a re-armed slot from the one a finishing task owned.
    generation: u64,
    firing: Arc<AtomicBool>,
}

struct Inner {
    registry: Arc<dyn TimerRegistry>,
    guard: Arc<dyn IdempotencyGuard>,
    events: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    settings: SchedulerSettings,
    waits: DashMap<EventId, WaitSlot>,
    next_generation: AtomicU64,
    reports: Option<mpsc::Sender<FiringReport>>,
}

/// Fires one attendance notification per event at its start time.
///
/// Each pending timer is a tokio task sleeping until its fire time. The
/// durable [`TimerRegistry`] lets waits be rebuilt after a restart, and the
/// [`IdempotencyGuard`] makes repeated firings harmless. Cheap to clone.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<Inner>,
}

impl NotificationScheduler {
    /// Build a scheduler. Nothing is armed until [`schedule`](Self::schedule),
    /// [`recover`](Self::recover) or [`run`](Self::run) is called.
    ///
    /// Pass `Some(tx)` to receive a [`FiringReport`] whenever a wait task
    /// exits. The sender is non-blocking (`try_send`).
    pub fn new(
        registry: Arc<dyn TimerRegistry>,
        guard: Arc<dyn IdempotencyGuard>,
        events: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
        settings: SchedulerSettings,
        reports: Option<mpsc::Sender<FiringReport>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                guard,
                events,
                notifier,
                settings,
                waits: DashMap::new(),
                next_generation: AtomicU64::new(0),
                reports,
            }),
        }
    }

    /// Register a durable timer for `event_id` and start waiting for it.
    ///
    /// Fires immediately if `fire_at` has already passed. Fails with
    /// `DuplicateTimer` if the event already has a timer.
    pub fn schedule(&self, event_id: EventId, fire_at: DateTime<Utc>) -> Result<TimerEntry> {
        let entry = self.inner.registry.add(event_id, fire_at)?;
        if !self.inner.arm(event_id, fire_at) {
            // A wait left over from a timer removed by another process.
            if let Some((_, stale)) = self.inner.waits.remove(&event_id) {
                stale.token.cancel();
            }
            self.inner.arm(event_id, fire_at);
        }
        Ok(entry)
    }

    /// Stop waiting for `event_id` and remove its timer.
    ///
    /// Idempotent. A firing that already passed the completion check is not
    /// stopped. Returns whether anything was cancelled.
    pub fn cancel(&self, event_id: EventId) -> Result<bool> {
        let had_wait = match self.inner.waits.remove(&event_id) {
            Some((_, slot)) => {
                slot.token.cancel();
                true
            }
            None => false,
        };
        let removed = self.inner.registry.remove(event_id)?;
        if had_wait || removed {
            info!(event_id = %event_id, had_wait, removed, "notification cancelled");
        } else {
            debug!(event_id = %event_id, "cancel: nothing pending");
        }
        Ok(had_wait || removed)
    }

    /// Every durable timer, earliest first. For operator tooling.
    pub fn list_pending(&self) -> Result<Vec<TimerEntry>> {
        self.inner.registry.list_all()
    }

    /// Clear the stalled flag on a timer and re-arm it in this process.
    pub fn unstall(&self, event_id: EventId) -> Result<bool> {
        if !self.inner.registry.unstall(event_id)? {
            return Ok(false);
        }
        if let Some(entry) = self.inner.registry.get(event_id)? {
            info!(event_id = %event_id, "stalled timer re-armed by operator");
            self.inner.arm(event_id, entry.fire_at);
        }
        Ok(true)
    }

    /// Where `event_id` stands from this process's point of view.
    ///
    /// `None` means no timer: never scheduled, already completed, or cancelled.
    pub fn state_of(&self, event_id: EventId) -> Result<Option<TimerState>> {
        if let Some(slot) = self.inner.waits.get(&event_id) {
            return Ok(Some(if slot.firing.load(Ordering::Acquire) {
                TimerState::Firing
            } else {
                TimerState::Pending
            }));
        }
        Ok(self
            .inner
            .registry
            .get(event_id)?
            .map(|_| TimerState::Pending))
    }

    /// Offset used for times shown to the operator.
    pub fn display_offset(&self) -> FixedOffset {
        self.inner.settings.display_offset
    }

    /// Whether this process holds a live wait for `event_id`.
    pub fn is_armed(&self, event_id: EventId) -> bool {
        self.inner.waits.contains_key(&event_id)
    }

    /// Startup recovery: arm a wait for every stored timer.
    ///
    /// Timers whose fire time already passed fire right away. Returns how
    /// many waits were armed.
    pub fn recover(&self) -> Result<usize> {
        let armed = self.inner.reconcile()?;
        info!(armed, "timer registry recovered");
        Ok(armed)
    }

    /// Arm waits for stored timers this process is not tracking yet and
    /// drop waits whose timers were removed elsewhere.
    pub fn reconcile(&self) -> Result<usize> {
        self.inner.reconcile()
    }

    /// Recover, then reconcile periodically until `shutdown` broadcasts `true`.
    ///
    /// On shutdown the in-memory waits are dropped; their durable timers stay
    /// for the next start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("notification scheduler started");
        if let Err(e) = self.recover() {
            error!(error = %e, "startup recovery failed; retrying on the next pass");
        }

        let mut interval = tokio::time::interval(self.inner.settings.reconcile_interval);
        // First tick completes immediately; recovery just covered it.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.inner.reconcile() {
                        error!(error = %e, "reconcile pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("notification scheduler shutting down");
                        break;
                    }
                }
            }
        }

        for slot in self.inner.waits.iter() {
            slot.token.cancel();
        }
    }
}

impl Inner {
    /// Spawn a wait task unless one is already live for `event_id`.
    fn arm(self: &Arc<Self>, event_id: EventId, fire_at: DateTime<Utc>) -> bool {
        let (token, generation, firing) = match self.waits.entry(event_id) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let firing = Arc::new(AtomicBool::new(false));
                slot.insert(WaitSlot {
                    token: token.clone(),
                    generation,
                    firing: Arc::clone(&firing),
                });
                (token, generation, firing)
            }
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.wait_and_fire(event_id, fire_at, &token, &firing).await;
            inner
                .waits
                .remove_if(&event_id, |_, slot| slot.generation == generation);
            inner.report(event_id, outcome);
        });
        true
    }

    fn reconcile(self: &Arc<Self>) -> Result<usize> {
        // Slots armed from here on may not be in the listing below yet.
        let horizon = self.next_generation.load(Ordering::Relaxed);
        let entries = self.registry.list_all()?;

        let mut armed = 0;
        let mut stalled = 0;
        for entry in &entries {
            if entry.stalled {
                stalled += 1;
                continue;
            }
            if self.arm(entry.event_id, entry.fire_at) {
                debug!(event_id = %entry.event_id, fire_at = %entry.fire_at, "wait armed from registry");
                armed += 1;
            }
        }
        if stalled > 0 {
            warn!(stalled, "stalled timers awaiting operator follow-up");
        }

        let listed: HashSet<EventId> = entries.iter().map(|e| e.event_id).collect();
        let orphaned: Vec<EventId> = self
            .waits
            .iter()
            .filter(|slot| slot.generation < horizon && !listed.contains(slot.key()))
            .map(|slot| *slot.key())
            .collect();
        for event_id in orphaned {
            if let Some((_, slot)) = self
                .waits
                .remove_if(&event_id, |_, slot| slot.generation < horizon)
            {
                info!(event_id = %event_id, "timer removed elsewhere; dropping wait");
                slot.token.cancel();
            }
        }
        Ok(armed)
    }

    async fn wait_and_fire(
        &self,
        event_id: EventId,
        fire_at: DateTime<Utc>,
        token: &CancellationToken,
        firing: &AtomicBool,
    ) -> FiringOutcome {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(event_id = %event_id, delay_secs = delay.as_secs(), "waiting for fire time");

        tokio::select! {
            _ = token.cancelled() => return FiringOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
        firing.store(true, Ordering::Release);
        self.fire(event_id, token).await
    }

    /// The firing pipeline: fetch, check, aggregate, send, mark, retire.
    async fn fire(&self, event_id: EventId, token: &CancellationToken) -> FiringOutcome {
        let event = match self.events.get_event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => {
                info!(event_id = %event_id, "event no longer exists; dropping stale timer");
                self.retire(event_id);
                return FiringOutcome::EventMissing;
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "event lookup failed; timer left pending");
                return FiringOutcome::StorageFailed;
            }
        };

        match self.registry.get(event_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!(event_id = %event_id, "timer removed before firing");
                return FiringOutcome::Cancelled;
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "timer registry unavailable");
                return FiringOutcome::StorageFailed;
            }
        }

        // Last point at which a cancel stops the notification.
        if token.is_cancelled() {
            return FiringOutcome::Cancelled;
        }
        match self.guard.is_completed(event_id) {
            Ok(false) => {}
            Ok(true) => {
                info!(event_id = %event_id, "notification already sent; retiring duplicate timer");
                self.retire(event_id);
                return FiringOutcome::AlreadyCompleted;
            }
            Err(e) => {
                error!(event_id = %event_id, error = %e, "completion guard unavailable");
                return FiringOutcome::StorageFailed;
            }
        }

        let attendance =
            match aggregate::compute(self.events.as_ref(), &event, self.settings.window).await {
                Ok(attendance) => attendance,
                Err(e) => {
                    error!(event_id = %event_id, error = %e, "attendance query failed; timer left pending");
                    return FiringOutcome::StorageFailed;
                }
            };
        let text = render_notification(&event, &attendance, self.settings.display_offset);

        if let Err(outcome) = self.deliver(event_id, &text, token).await {
            return outcome;
        }

        match self.guard.mark_completed(event_id, attendance.participant_count) {
            Ok(_) => {}
            Err(SchedulerError::AlreadyCompleted(_)) => {
                warn!(
                    event_id = %event_id,
                    "another firing recorded completion first; the operator may see this report twice"
                );
                self.retire(event_id);
                return FiringOutcome::LostRace;
            }
            Err(e) => {
                error!(
                    event_id = %event_id,
                    error = %e,
                    "notification sent but completion marker not persisted; timer flagged for manual follow-up"
                );
                let reason = format!("sent but completion marker not persisted: {e}");
                if let Err(e) = self.registry.mark_stalled(event_id, 1, &reason) {
                    error!(event_id = %event_id, error = %e, "failed to flag stalled timer");
                }
                return FiringOutcome::Unrecorded;
            }
        }

        self.retire(event_id);
        info!(
            event_id = %event_id,
            participants = attendance.participant_count,
            "attendance notification sent"
        );
        FiringOutcome::Sent {
            participant_count: attendance.participant_count,
        }
    }

    /// Send with bounded retries. On exhaustion the timer is flagged stalled.
    async fn deliver(
        &self,
        event_id: EventId,
        text: &str,
        token: &CancellationToken,
    ) -> std::result::Result<(), FiringOutcome> {
        let max_attempts = self.settings.max_delivery_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.notifier.notify(self.settings.operator_id, text).await {
                Ok(()) => return Ok(()),
                Err(e) => e.to_string(),
            };

            if attempt >= max_attempts {
                error!(
                    event_id = %event_id,
                    attempts = attempt,
                    error = %err,
                    "delivery retries exhausted; timer flagged for manual follow-up"
                );
                if let Err(e) = self.registry.mark_stalled(event_id, attempt, &err) {
                    error!(event_id = %event_id, error = %e, "failed to flag stalled timer");
                }
                return Err(FiringOutcome::DeliveryFailed { attempts: attempt });
            }

            warn!(
                event_id = %event_id,
                attempt,
                error = %err,
                "notification delivery failed; retrying"
            );
            tokio::select! {
                _ = token.cancelled() => {
                    info!(event_id = %event_id, "cancelled during delivery backoff");
                    return Err(FiringOutcome::Cancelled);
                }
                _ = tokio::time::sleep(self.settings.retry_backoff) => {}
            }
            attempt += 1;
        }
    }

    /// Remove the durable timer once the event needs no further firing.
    ///
    /// A failure here is harmless: the next firing finds the marker (or the
    /// missing event) and retires the timer again.
    fn retire(&self, event_id: EventId) {
        if let Err(e) = self.registry.remove(event_id) {
            error!(event_id = %event_id, error = %e, "failed to remove timer; it will fire again");
        }
    }

    fn report(&self, event_id: EventId, outcome: FiringOutcome) {
        debug!(event_id = %event_id, state = %outcome.state(), ?outcome, "wait task finished");
        if let Some(ref tx) = self.reports {
            if tx.try_send(FiringReport { event_id, outcome }).is_err() {
                warn!(event_id = %event_id, "report channel full or closed; report dropped");
            }
        }
    }
}
