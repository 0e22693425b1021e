//! Hybrid event scheduler
//!
//! Events due within the horizon are backed by an in-process timer for
//! precise delivery. A reconciliation loop re-reads the store on a fixed
//! interval and delivers or arms anything without a live timer. The timers
//! are only a latency optimisation; the store plus reconciliation is what
//! guarantees delivery, including after a restart.

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::store::EventStore;
use super::types::{EventQuery, EventStatus, NewEvent, ScheduledEvent, StoreError, StoreStats};
use crate::clock::SharedClock;
use crate::notification::NotificationGateway;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Event scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Graceful shutdown did not finish in time
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Slack allowed between a timer firing and the event's due instant
const DUE_TOLERANCE_MS: i64 = 1_000;

/// Event scheduler configuration
#[derive(Debug, Clone)]
pub struct EventSchedulerConfig {
    /// Events due within this window get a live timer
    pub horizon: ChronoDuration,
    /// Reconciliation period
    pub reconcile_interval: Duration,
    /// Upper bound for [`EventScheduler::stop`]
    pub shutdown_timeout: Duration,
    /// Retry 4xx responses like transient failures; when false they fail
    /// the event immediately
    pub retry_client_errors: bool,
}

impl Default for EventSchedulerConfig {
    fn default() -> Self {
        Self {
            horizon: ChronoDuration::hours(6),
            reconcile_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
            retry_client_errors: true,
        }
    }
}

impl EventSchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set arming horizon
    pub fn with_horizon(mut self, horizon: ChronoDuration) -> Self {
        self.horizon = horizon;
        self
    }

    /// Set reconciliation interval
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set client error policy
    pub fn with_retry_client_errors(mut self, retry: bool) -> Self {
        self.retry_client_errors = retry;
        self
    }
}

/// Read-only snapshot for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Whether `start` has been called without a matching `stop`
    pub running: bool,
    /// Events with a live timer
    pub armed: usize,
    /// Deliveries currently in progress
    pub in_flight: usize,
    /// Delivery attempts since construction
    pub delivery_attempts: u64,
    /// Arming horizon in seconds
    pub horizon_secs: i64,
    /// Reconciliation period in seconds
    pub reconcile_interval_secs: u64,
    /// Earliest pending or scheduled due date
    pub next_due: Option<DateTime<Utc>>,
    /// Store counts
    pub events: StoreStats,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Overdue events without a timer, handed to delivery
    pub missed: usize,
    /// Events newly armed
    pub armed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmOutcome {
    Armed,
    AlreadyArmed,
    Overdue,
    BeyondHorizon,
}

struct Lifecycle {
    cancel: CancellationToken,
    reconciler: JoinHandle<()>,
}

/// Drives delivery of persisted events
pub struct EventScheduler {
    store: Arc<EventStore>,
    gateway: Arc<dyn NotificationGateway>,
    config: EventSchedulerConfig,
    clock: SharedClock,
    armed: Mutex<HashMap<String, JoinHandle<()>>>,
    in_flight: Mutex<HashSet<String>>,
    running: AtomicBool,
    attempts: AtomicU64,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl EventScheduler {
    /// Create a scheduler over `store`, delivering through `gateway`
    pub fn new(
        store: Arc<EventStore>,
        gateway: Arc<dyn NotificationGateway>,
        config: EventSchedulerConfig,
    ) -> Arc<Self> {
        let clock = store.clock().clone();
        Arc::new(Self {
            store,
            gateway,
            config,
            clock,
            armed: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            attempts: AtomicU64::new(0),
            lifecycle: Mutex::new(None),
        })
    }

    /// Backing store
    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Whether the scheduler is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Arm everything due within the horizon and start reconciliation.
    ///
    /// Overdue events are handed to delivery straight away. Calling `start`
    /// on a running scheduler does nothing.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Event scheduler already running");
            return Ok(());
        }

        info!(
            horizon_secs = self.config.horizon.num_seconds(),
            reconcile_secs = self.config.reconcile_interval.as_secs(),
            "Event scheduler starting"
        );

        let report = self.reconcile().await;
        info!(
            armed = report.armed,
            overdue = report.missed,
            "Initial scheduling pass complete"
        );

        let cancel = CancellationToken::new();
        let reconciler = tokio::spawn(reconcile_loop(
            Arc::downgrade(self),
            cancel.clone(),
            self.config.reconcile_interval,
        ));
        *lock(&self.lifecycle) = Some(Lifecycle { cancel, reconciler });
        Ok(())
    }

    /// Tear down timers, revert their events to pending and flush the store.
    ///
    /// Bounded by the configured shutdown timeout.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let timeout = self.config.shutdown_timeout;
        match tokio::time::timeout(timeout, self.shutdown_sequence()).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "Event scheduler shutdown timed out");
                Err(SchedulerError::ShutdownTimeout(timeout))
            }
        }
    }

    async fn shutdown_sequence(&self) -> Result<()> {
        info!("Event scheduler stopping");

        let lifecycle = lock(&self.lifecycle).take();
        if let Some(Lifecycle { cancel, reconciler }) = lifecycle {
            cancel.cancel();
            reconciler.abort();
        }

        let timers: Vec<(String, JoinHandle<()>)> = lock(&self.armed).drain().collect();
        let disarmed = timers.len();
        for (id, handle) in timers {
            handle.abort();
            self.store.revert_to_pending(&id).await;
        }

        self.store.flush().await?;
        info!(disarmed, "Event scheduler stopped");
        Ok(())
    }

    /// Persist an event and arm it right away if the scheduler is running
    pub async fn add_event(self: &Arc<Self>, event: NewEvent) -> Result<ScheduledEvent> {
        let record = self.store.add(event).await?;
        info!(
            event_id = %record.id,
            plugin = %record.plugin_name,
            scheduled_for = %record.scheduled_for,
            "Event registered"
        );
        if self.is_running() {
            self.arm(&record).await;
        }
        Ok(record)
    }

    /// Persist several events with one write, then arm them
    pub async fn add_events(self: &Arc<Self>, events: Vec<NewEvent>) -> Result<Vec<ScheduledEvent>> {
        let records = self.store.add_batch(events).await?;
        info!(count = records.len(), "Event batch registered");
        if self.is_running() {
            for record in &records {
                self.arm(record).await;
            }
        }
        Ok(records)
    }

    /// Clear any live timer and delete the event.
    ///
    /// Returns whether the event existed. A delivery already past its timer
    /// is not interrupted, but its result is discarded.
    pub async fn cancel_event(&self, id: &str) -> bool {
        if let Some(handle) = lock(&self.armed).remove(id) {
            handle.abort();
        }
        let existed = self.store.remove(id).await;
        if existed {
            info!(event_id = %id, "Event cancelled");
        } else {
            debug!(event_id = %id, "Cancel requested for unknown event");
        }
        existed
    }

    /// Whether `id` has a live timer
    pub fn is_armed(&self, id: &str) -> bool {
        lock(&self.armed).contains_key(id)
    }

    /// Number of live timers
    pub fn armed_count(&self) -> usize {
        lock(&self.armed).len()
    }

    /// Snapshot for the admin surface
    pub async fn status(&self) -> SchedulerStatus {
        let next_due = self
            .store
            .query(&EventQuery::new().with_statuses(&[EventStatus::Pending, EventStatus::Scheduled]))
            .await
            .first()
            .map(|e| e.scheduled_for);
        let in_flight = lock(&self.in_flight).len();
        let events = self.store.stats().await;

        SchedulerStatus {
            running: self.is_running(),
            armed: self.armed_count(),
            in_flight,
            delivery_attempts: self.attempts.load(Ordering::SeqCst),
            horizon_secs: self.config.horizon.num_seconds(),
            reconcile_interval_secs: self.config.reconcile_interval.as_secs(),
            next_due,
            events,
        }
    }

    /// One reconciliation pass.
    ///
    /// Overdue pending/scheduled events without a timer are delivered (in
    /// due order); events newly inside the horizon are armed.
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileReport {
        let now = self.clock.now();
        let candidates = self
            .store
            .query(
                &EventQuery::new()
                    .with_statuses(&[EventStatus::Pending, EventStatus::Scheduled])
                    .before(now + self.config.horizon),
            )
            .await;

        let mut report = ReconcileReport::default();
        let mut overdue = Vec::new();

        for event in candidates {
            if self.is_armed(&event.id) {
                continue;
            }
            if event.scheduled_for <= now {
                if self.try_claim(&event.id) {
                    debug!(event_id = %event.id, due = %event.scheduled_for, "Missed event found");
                    overdue.push(event.id);
                }
                continue;
            }
            if self.arm(&event).await == ArmOutcome::Armed {
                report.armed += 1;
            }
        }

        report.missed = overdue.len();
        self.spawn_deliveries(overdue);
        report
    }

    /// Boxed: the timer task re-enters `arm` after a failed attempt.
    fn arm<'a>(self: &'a Arc<Self>, event: &'a ScheduledEvent) -> BoxFuture<'a, ArmOutcome> {
        Box::pin(async move {
            let delay = event.delay_from(self.clock.now());

            if delay <= ChronoDuration::zero() {
                if self.try_claim(&event.id) {
                    self.spawn_deliveries(vec![event.id.clone()]);
                }
                return ArmOutcome::Overdue;
            }
            if delay > self.config.horizon {
                return ArmOutcome::BeyondHorizon;
            }
            if self.is_armed(&event.id) {
                return ArmOutcome::AlreadyArmed;
            }

            self.store.mark_as_scheduled(&event.id).await;

            let sleep_for = delay.to_std().unwrap_or_default();
            let mut armed = lock(&self.armed);
            if armed.contains_key(&event.id) {
                return ArmOutcome::AlreadyArmed;
            }
            let this = Arc::clone(self);
            let id = event.id.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(sleep_for).await;
                this.on_timer_fired(id).await;
            });
            armed.insert(event.id.clone(), handle);

            debug!(event_id = %event.id, delay_ms = delay.num_milliseconds(), "Event armed");
            ArmOutcome::Armed
        })
    }

    async fn on_timer_fired(self: Arc<Self>, id: String) {
        lock(&self.armed).remove(&id);
        if !self.try_claim(&id) {
            debug!(event_id = %id, "Timer fired while delivery already in flight");
            return;
        }
        self.deliver_claimed(&id).await;
    }

    fn spawn_deliveries(self: &Arc<Self>, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            for id in ids {
                this.deliver_claimed(&id).await;
            }
        });
    }

    fn try_claim(&self, id: &str) -> bool {
        lock(&self.in_flight).insert(id.to_string())
    }

    fn release(&self, id: &str) {
        lock(&self.in_flight).remove(id);
    }

    /// Deliver an event whose id this caller has claimed, then release it
    async fn deliver_claimed(self: &Arc<Self>, id: &str) {
        let rearm = self.attempt_delivery(id).await;
        self.release(id);

        if let Some(event) = rearm {
            if self.is_running() {
                self.arm(&event).await;
            }
        }
    }

    /// One delivery attempt. Returns the event if it still needs a timer.
    async fn attempt_delivery(&self, id: &str) -> Option<ScheduledEvent> {
        let Some(event) = self.store.get(id).await else {
            debug!(event_id = %id, "Event cancelled before delivery");
            return None;
        };
        if event.status.is_terminal() {
            return None;
        }

        let now = self.clock.now();
        if event.scheduled_for > now + ChronoDuration::milliseconds(DUE_TOLERANCE_MS) {
            debug!(event_id = %id, due = %event.scheduled_for, "Event not due yet");
            return Some(event);
        }

        self.attempts.fetch_add(1, Ordering::SeqCst);
        let notification = event.payload.to_notification();

        match self.gateway.send(&notification).await {
            Ok(()) => {
                match self.store.mark_as_sent(id).await {
                    Some(_) => info!(
                        event_id = %id,
                        plugin = %event.plugin_name,
                        event_type = %event.event_type,
                        "Event delivered"
                    ),
                    None => debug!(event_id = %id, "Event cancelled during delivery"),
                }
                None
            }
            Err(e) if e.is_client_error() && !self.config.retry_client_errors => {
                if self
                    .store
                    .mark_as_failed_permanently(id, &e.to_string())
                    .await
                    .is_some()
                {
                    error!(event_id = %id, error = %e, "Gateway rejected event, not retrying");
                }
                None
            }
            Err(e) => {
                let updated = self.store.mark_as_failed(id, &e.to_string()).await?;
                match updated.status {
                    EventStatus::Failed => {
                        error!(
                            event_id = %id,
                            retries = updated.retry_count,
                            error = %e,
                            "Event failed permanently"
                        );
                        None
                    }
                    EventStatus::Pending => {
                        warn!(
                            event_id = %id,
                            retry = updated.retry_count,
                            max_retries = updated.max_retries,
                            next_attempt = %updated.scheduled_for,
                            client_error = e.is_client_error(),
                            error = %e,
                            "Delivery failed, retrying"
                        );
                        Some(updated)
                    }
                    _ => None,
                }
            }
        }
    }
}

impl Drop for EventScheduler {
    fn drop(&mut self) {
        if let Some(lifecycle) = lock(&self.lifecycle).take() {
            lifecycle.cancel.cancel();
            lifecycle.reconciler.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn reconcile_loop(scheduler: Weak<EventScheduler>, cancel: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }

        let Some(scheduler) = scheduler.upgrade() else {
            return;
        };
        let report = scheduler.reconcile().await;
        if report.missed > 0 || report.armed > 0 {
            info!(missed = report.missed, armed = report.armed, "Reconciliation pass");
        } else {
            debug!("Reconciliation pass found nothing to do");
        }
    }
}
