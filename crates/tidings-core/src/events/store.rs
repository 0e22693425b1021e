//! Durable event store
//!
//! Owns the canonical [`ScheduledEvent`] records. Every mutation marks the
//! store dirty; a background task writes the full record set after the
//! coalescing window. A second background task prunes old terminal records.


use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::flush::{FlushPolicy, DEFAULT_FLUSH_DEBOUNCE};
use super::persistence::EventPersistence;
use super::types::{
    retry_backoff, EventQuery, EventStatus, EventUpdate, NewEvent, Result, ScheduledEvent,
    StoreError, StoreStats,
};
use crate::clock::{SharedClock, SystemClock};

/// Window used by [`EventStore::get_next_pending`]
pub const NEXT_PENDING_WINDOW_SECS: i64 = 60;

/// Event store configuration
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// Coalescing window for writes
    pub flush_debounce: Duration,
    /// Age after which terminal records are pruned
    pub retention: ChronoDuration,
    /// How often the pruning pass runs
    pub cleanup_interval: Duration,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
            retention: ChronoDuration::hours(48),
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EventStoreConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set write coalescing window
    pub fn with_flush_debounce(mut self, debounce: Duration) -> Self {
        self.flush_debounce = debounce;
        self
    }

    /// Set retention window
    pub fn with_retention(mut self, retention: ChronoDuration) -> Self {
        self.retention = retention;
        self
    }

    /// Set cleanup interval
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Persistent collection of scheduled events
pub struct EventStore {
    records: RwLock<HashMap<String, ScheduledEvent>>,
    persistence: Arc<dyn EventPersistence>,
    clock: SharedClock,
    config: EventStoreConfig,
    flush_policy: Arc<FlushPolicy>,
    write_lock: Mutex<()>,
    writes: AtomicU64,
    cancel: CancellationToken,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl EventStore {
    /// Load the store from `persistence` and start background flush/cleanup.
    ///
    /// A missing file yields an empty store. A file that exists but does not
    /// parse is an error; nothing is discarded silently.
    pub async fn open(
        persistence: Arc<dyn EventPersistence>,
        config: EventStoreConfig,
    ) -> Result<Arc<Self>> {
        Self::open_with_clock(persistence, config, Arc::new(SystemClock)).await
    }

    /// Same as [`EventStore::open`] with an explicit clock
    pub async fn open_with_clock(
        persistence: Arc<dyn EventPersistence>,
        config: EventStoreConfig,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        let loaded = persistence.load().await?;
        let mut records = HashMap::with_capacity(loaded.len());
        for event in loaded {
            if let Some(previous) = records.insert(event.id.clone(), event) {
                warn!(event_id = %previous.id, "Duplicate id in event file, keeping last record");
            }
        }

        info!(
            count = records.len(),
            location = %persistence.describe(),
            "Event store loaded"
        );

        let store = Arc::new(Self {
            records: RwLock::new(records),
            persistence,
            clock,
            flush_policy: Arc::new(FlushPolicy::new(config.flush_debounce)),
            config,
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            background: std::sync::Mutex::new(Vec::new()),
        });

        store.spawn_background();
        Ok(store)
    }

    fn spawn_background(self: &Arc<Self>) {
        let flusher = tokio::spawn(flush_loop(
            Arc::downgrade(self),
            self.flush_policy.clone(),
            self.cancel.clone(),
        ));
        let cleaner = tokio::spawn(cleanup_loop(
            Arc::downgrade(self),
            self.cancel.clone(),
            self.config.cleanup_interval,
        ));

        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        background.push(flusher);
        background.push(cleaner);
    }

    /// Clock used for timestamps
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Insert a new event. Duplicate ids are rejected.
    pub async fn add(&self, event: NewEvent) -> Result<ScheduledEvent> {
        let now = self.clock.now();
        let record = {
            let mut records = self.records.write().await;
            if records.contains_key(&event.id) {
                return Err(StoreError::DuplicateId(event.id));
            }
            let record = event.into_event(now);
            records.insert(record.id.clone(), record.clone());
            record
        };

        debug!(event_id = %record.id, scheduled_for = %record.scheduled_for, "Event added");
        self.flush_policy.mark_dirty();
        Ok(record)
    }

    /// Insert several events with a single write.
    ///
    /// All-or-nothing: if any id already exists (in the store or earlier in
    /// the batch) nothing is inserted.
    pub async fn add_batch(&self, events: Vec<NewEvent>) -> Result<Vec<ScheduledEvent>> {
        let now = self.clock.now();
        let inserted = {
            let mut records = self.records.write().await;
            let mut seen = std::collections::HashSet::with_capacity(events.len());
            for event in &events {
                if records.contains_key(&event.id) || !seen.insert(event.id.as_str()) {
                    return Err(StoreError::DuplicateId(event.id.clone()));
                }
            }

            let mut inserted = Vec::with_capacity(events.len());
            for event in events {
                let record = event.into_event(now);
                records.insert(record.id.clone(), record.clone());
                inserted.push(record);
            }
            inserted
        };

        debug!(count = inserted.len(), "Event batch added");
        if !inserted.is_empty() {
            self.flush_policy.mark_dirty();
        }
        Ok(inserted)
    }

    /// Look up one event
    pub async fn get(&self, id: &str) -> Option<ScheduledEvent> {
        self.records.read().await.get(id).cloned()
    }

    /// Delete one event, returning whether it existed
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.records.write().await.remove(id).is_some();
        if removed {
            debug!(event_id = %id, "Event removed");
            self.flush_policy.mark_dirty();
        }
        removed
    }

    /// Apply a partial update
    pub async fn update(&self, id: &str, update: EventUpdate) -> Option<ScheduledEvent> {
        self.mutate(id, |event, _| update.apply(event)).await
    }

    /// Events matching `query`, ascending by due time
    pub async fn query(&self, query: &EventQuery) -> Vec<ScheduledEvent> {
        let records = self.records.read().await;
        let mut matched: Vec<ScheduledEvent> =
            records.values().filter(|e| query.matches(e)).cloned().collect();
        sort_by_due(&mut matched);
        matched
    }

    /// Pending events due within the next minute, at most `limit`
    pub async fn get_next_pending(&self, limit: usize) -> Vec<ScheduledEvent> {
        let horizon = self.clock.now() + ChronoDuration::seconds(NEXT_PENDING_WINDOW_SECS);
        let query = EventQuery::new()
            .with_statuses(&[EventStatus::Pending])
            .before(horizon);
        let mut due = self.query(&query).await;
        due.truncate(limit);
        due
    }

    /// Pending → scheduled. No-op on terminal records.
    pub async fn mark_as_scheduled(&self, id: &str) -> Option<ScheduledEvent> {
        self.mutate(id, |event, _| {
            if !event.status.is_terminal() {
                event.status = EventStatus::Scheduled;
            }
        })
        .await
    }

    /// Scheduled → pending, used when a live timer is torn down
    pub async fn revert_to_pending(&self, id: &str) -> Option<ScheduledEvent> {
        self.mutate(id, |event, _| {
            if event.status == EventStatus::Scheduled {
                event.status = EventStatus::Pending;
            }
        })
        .await
    }

    /// Mark delivered. No-op on terminal records.
    pub async fn mark_as_sent(&self, id: &str) -> Option<ScheduledEvent> {
        self.mutate(id, |event, now| {
            if event.status.is_terminal() {
                return;
            }
            event.status = EventStatus::Sent;
            event.last_attempt_at = Some(now);
            event.completed_at = Some(now);
        })
        .await
    }

    /// Record a failed attempt.
    ///
    /// Increments the retry count. Once it reaches `max_retries` the event is
    /// failed for good; otherwise it goes back to pending, due after
    /// [`retry_backoff`]. No-op on terminal records.
    pub async fn mark_as_failed(&self, id: &str, error: &str) -> Option<ScheduledEvent> {
        self.mutate(id, |event, now| {
            if event.status.is_terminal() {
                return;
            }
            event.retry_count += 1;
            event.last_attempt_at = Some(now);
            event.last_error = Some(error.to_string());

            if event.retry_count >= event.max_retries {
                event.status = EventStatus::Failed;
                event.completed_at = Some(now);
            } else {
                event.status = EventStatus::Pending;
                event.scheduled_for = now + retry_backoff(event.retry_count);
            }
        })
        .await
    }

    /// Fail without consuming the retry budget. No-op on terminal records.
    pub async fn mark_as_failed_permanently(
        &self,
        id: &str,
        error: &str,
    ) -> Option<ScheduledEvent> {
        self.mutate(id, |event, now| {
            if event.status.is_terminal() {
                return;
            }
            event.status = EventStatus::Failed;
            event.last_attempt_at = Some(now);
            event.completed_at = Some(now);
            event.last_error = Some(error.to_string());
        })
        .await
    }

    async fn mutate<F>(&self, id: &str, f: F) -> Option<ScheduledEvent>
    where
        F: FnOnce(&mut ScheduledEvent, chrono::DateTime<chrono::Utc>),
    {
        let now = self.clock.now();
        let updated = {
            let mut records = self.records.write().await;
            let event = records.get_mut(id)?;
            let before = event.clone();
            f(event, now);
            if *event == before {
                return Some(before);
            }
            event.updated_at = now;
            event.clone()
        };
        self.flush_policy.mark_dirty();
        Some(updated)
    }

    /// Remove terminal events older than the retention window.
    ///
    /// Pending and scheduled events are never removed.
    pub async fn cleanup(&self) -> usize {
        let cutoff = self.clock.now() - self.config.retention;
        let removed = {
            let mut records = self.records.write().await;
            let before = records.len();
            records.retain(|_, event| {
                let finished = event.completed_at.unwrap_or(event.updated_at);
                !(event.status.is_terminal() && finished < cutoff)
            });
            before - records.len()
        };

        if removed > 0 {
            info!(removed, "Pruned expired events");
            self.flush_policy.mark_dirty();
        }
        removed
    }

    /// Per-status counts
    pub async fn stats(&self) -> StoreStats {
        let records = self.records.read().await;
        let mut stats = StoreStats {
            total: records.len(),
            ..StoreStats::default()
        };
        for event in records.values() {
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Scheduled => stats.scheduled += 1,
                EventStatus::Sent => stats.sent += 1,
                EventStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Completed persistence writes since open
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whether unflushed mutations exist
    pub fn is_dirty(&self) -> bool {
        self.flush_policy.is_dirty()
    }

    /// Write now if there are unflushed mutations.
    ///
    /// The dirty flag is only cleared once the write succeeds; a failed or
    /// cancelled save leaves it set so a later flush retries.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(pending) = self.flush_policy.begin_flush() else {
            return Ok(());
        };

        let snapshot = {
            let records = self.records.read().await;
            let mut events: Vec<ScheduledEvent> = records.values().cloned().collect();
            sort_by_due(&mut events);
            events
        };

        self.persistence.save(&snapshot).await?;
        pending.complete();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Stop background work and flush. Flush errors are returned.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            background.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        self.flush().await?;
        info!(writes = self.write_count(), "Event store shut down");
        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn sort_by_due(events: &mut [ScheduledEvent]) {
    events.sort_by(|a, b| {
        a.scheduled_for
            .cmp(&b.scheduled_for)
            .then_with(|| a.id.cmp(&b.id))
    });
}

async fn flush_loop(store: Weak<EventStore>, policy: Arc<FlushPolicy>, cancel: CancellationToken) {
    while policy.wait_for_flush(&cancel).await {
        let Some(store) = store.upgrade() else {
            return;
        };
        if let Err(e) = store.flush().await {
            warn!(error = %e, "Background flush failed, will retry on next change");
        }
    }
}

async fn cleanup_loop(store: Weak<EventStore>, cancel: CancellationToken, period: Duration) {
    let start = tokio::time::Instant::now() + period;
    let mut ticker = tokio::time::interval_at(start, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }

        let Some(store) = store.upgrade() else {
            return;
        };
        store.cleanup().await;
    }
}
