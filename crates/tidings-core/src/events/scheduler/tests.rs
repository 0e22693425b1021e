use super::*;
use crate::clock::{Clock, TokioClock};
use crate::events::persistence::{EventPersistence, MemoryPersistence};
use crate::events::store::EventStoreConfig;
use crate::events::types::EventPayload;
use crate::notification::{DeliveryError, DeliveryResult, MockNotificationGateway, Notification};
use async_trait::async_trait;
use std::sync::atomic::AtomicUsize;

/// Gateway that records every send and fails on demand
#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<Notification>>,
    calls: AtomicUsize,
    fail_with: Mutex<Option<DeliveryError>>,
}

impl RecordingGateway {
    fn failing(error: DeliveryError) -> Self {
        Self {
            fail_with: Mutex::new(Some(error)),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn titles(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|n| n.title.clone()).collect()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn send(&self, notification: &Notification) -> DeliveryResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.fail_with).clone() {
            return Err(err);
        }
        lock(&self.sent).push(notification.clone());
        Ok(())
    }
}

/// Persistence whose writes never finish
struct StalledPersistence;

#[async_trait]
impl EventPersistence for StalledPersistence {
    async fn load(&self) -> crate::events::types::Result<Vec<ScheduledEvent>> {
        Ok(Vec::new())
    }

    async fn save(&self, _events: &[ScheduledEvent]) -> crate::events::types::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

struct TestContext {
    scheduler: Arc<EventScheduler>,
    store: Arc<EventStore>,
    gateway: Arc<RecordingGateway>,
    clock: SharedClock,
}

async fn create_context_with(
    persistence: Arc<dyn EventPersistence>,
    gateway: RecordingGateway,
    config: EventSchedulerConfig,
) -> TestContext {
    let clock: SharedClock = Arc::new(TokioClock::new());
    let store = EventStore::open_with_clock(persistence, EventStoreConfig::new(), clock.clone())
        .await
        .unwrap();
    let gateway = Arc::new(gateway);
    let scheduler = EventScheduler::new(store.clone(), gateway.clone(), config);
    TestContext {
        scheduler,
        store,
        gateway,
        clock,
    }
}

async fn create_test_context() -> TestContext {
    create_context_with(
        Arc::new(MemoryPersistence::new()),
        RecordingGateway::default(),
        EventSchedulerConfig::new(),
    )
    .await
}

fn tide_event(id: &str, at: DateTime<Utc>) -> NewEvent {
    NewEvent::new(
        id,
        "tides",
        "low_tide",
        at,
        EventPayload::new(format!("Low tide {id}"), "0.3m at the harbour"),
    )
}

async fn status_of(store: &EventStore, id: &str) -> EventStatus {
    store.get(id).await.map(|e| e.status).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_event_delivered_at_due_time() {
    let ctx = create_test_context().await;
    ctx.scheduler.start().await.unwrap();

    let due = ctx.clock.now() + ChronoDuration::seconds(2);
    ctx.scheduler.add_event(tide_event("e1", due)).await.unwrap();
    assert!(ctx.scheduler.is_armed("e1"));
    assert_eq!(status_of(&ctx.store, "e1").await, EventStatus::Scheduled);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(ctx.gateway.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(ctx.gateway.calls(), 1);
    assert_eq!(ctx.gateway.titles(), vec!["Low tide e1".to_string()]);

    let record = ctx.store.get("e1").await.unwrap();
    assert_eq!(record.status, EventStatus::Sent);
    assert!(record.completed_at.is_some());
    assert!(!ctx.scheduler.is_armed("e1"));
}

#[tokio::test(start_paused = true)]
async fn test_failing_event_exhausts_retries() {
    let ctx = create_context_with(
        Arc::new(MemoryPersistence::new()),
        RecordingGateway::failing(DeliveryError::Server {
            status: 503,
            body: "unavailable".to_string(),
        }),
        EventSchedulerConfig::new(),
    )
    .await;
    ctx.scheduler.start().await.unwrap();

    let past = ctx.clock.now() - ChronoDuration::seconds(10);
    ctx.scheduler
        .add_event(tide_event("e2", past).with_max_retries(3))
        .await
        .unwrap();

    // attempts at +0s, +2s, +6s
    tokio::time::sleep(Duration::from_secs(30)).await;
    let record = ctx.store.get("e2").await.unwrap();
    assert_eq!(record.status, EventStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert!(record.last_error.unwrap().contains("503"));
    assert_eq!(ctx.gateway.calls(), 3);

    // reconciliation must not pick the failed event up again
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(ctx.gateway.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_overdue_event_delivered_on_add() {
    let ctx = create_test_context().await;
    ctx.scheduler.start().await.unwrap();

    let past = ctx.clock.now() - ChronoDuration::minutes(5);
    ctx.scheduler.add_event(tide_event("late", past)).await.unwrap();

    // well before the first reconciliation tick
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ctx.gateway.calls(), 1);
    assert_eq!(status_of(&ctx.store, "late").await, EventStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn test_start_delivers_missed_and_arms_upcoming() {
    let clock = TokioClock::new();
    let now = clock.now();
    let seeded = vec![
        tide_event("missed-a", now - ChronoDuration::hours(2)).into_event(now),
        tide_event("missed-b", now - ChronoDuration::minutes(1)).into_event(now),
        tide_event("soon", now + ChronoDuration::minutes(10)).into_event(now),
        tide_event("later", now + ChronoDuration::hours(12)).into_event(now),
    ];
    let mut crashed = tide_event("crashed", now + ChronoDuration::seconds(30)).into_event(now);
    crashed.status = EventStatus::Scheduled;

    let mut events = seeded;
    events.push(crashed);
    let ctx = create_context_with(
        Arc::new(MemoryPersistence::with_events(events)),
        RecordingGateway::default(),
        EventSchedulerConfig::new(),
    )
    .await;

    ctx.scheduler.start().await.unwrap();
    assert!(ctx.scheduler.is_armed("soon"));
    assert!(ctx.scheduler.is_armed("crashed"));
    assert!(!ctx.scheduler.is_armed("later"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ctx.gateway.titles(), vec!["Low tide missed-a", "Low tide missed-b"]);

    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    assert_eq!(status_of(&ctx.store, "crashed").await, EventStatus::Sent);
    assert_eq!(status_of(&ctx.store, "soon").await, EventStatus::Sent);
    assert_eq!(status_of(&ctx.store, "later").await, EventStatus::Pending);
    assert_eq!(ctx.gateway.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_reconcile_arms_event_entering_horizon() {
    let ctx = create_context_with(
        Arc::new(MemoryPersistence::new()),
        RecordingGateway::default(),
        EventSchedulerConfig::new().with_horizon(ChronoDuration::minutes(5)),
    )
    .await;
    ctx.scheduler.start().await.unwrap();

    let due = ctx.clock.now() + ChronoDuration::minutes(10);
    ctx.scheduler.add_event(tide_event("far", due)).await.unwrap();
    assert!(!ctx.scheduler.is_armed("far"));
    assert_eq!(status_of(&ctx.store, "far").await, EventStatus::Pending);

    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert!(ctx.scheduler.is_armed("far"));

    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(status_of(&ctx.store, "far").await, EventStatus::Sent);
    assert_eq!(ctx.gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_add_before_start_waits_for_start() {
    let ctx = create_test_context().await;
    let past = ctx.clock.now() - ChronoDuration::seconds(1);
    ctx.scheduler.add_event(tide_event("queued", past)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ctx.gateway.calls(), 0);

    ctx.scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ctx.gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_event() {
    let ctx = create_test_context().await;
    ctx.scheduler.start().await.unwrap();

    assert!(!ctx.scheduler.cancel_event("nope").await);

    let due = ctx.clock.now() + ChronoDuration::seconds(30);
    ctx.scheduler.add_event(tide_event("e1", due)).await.unwrap();
    assert!(ctx.scheduler.is_armed("e1"));

    assert!(ctx.scheduler.cancel_event("e1").await);
    assert!(!ctx.scheduler.is_armed("e1"));
    assert!(ctx.store.get("e1").await.is_none());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(ctx.gateway.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_reverts_armed_events() {
    let ctx = create_test_context().await;
    ctx.scheduler.start().await.unwrap();

    let due = ctx.clock.now() + ChronoDuration::hours(1);
    ctx.scheduler.add_event(tide_event("e1", due)).await.unwrap();
    assert_eq!(status_of(&ctx.store, "e1").await, EventStatus::Scheduled);

    ctx.scheduler.stop().await.unwrap();
    assert!(!ctx.scheduler.is_running());
    assert_eq!(ctx.scheduler.armed_count(), 0);
    assert_eq!(status_of(&ctx.store, "e1").await, EventStatus::Pending);
    assert!(!ctx.store.is_dirty());

    // second stop is a no-op
    ctx.scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_on_stalled_flush() {
    let ctx = create_context_with(
        Arc::new(StalledPersistence),
        RecordingGateway::default(),
        EventSchedulerConfig::new().with_shutdown_timeout(Duration::from_secs(5)),
    )
    .await;
    ctx.scheduler.start().await.unwrap();

    let due = ctx.clock.now() + ChronoDuration::hours(1);
    ctx.scheduler.add_event(tide_event("e1", due)).await.unwrap();

    let result = ctx.scheduler.stop().await;
    assert!(matches!(result, Err(SchedulerError::ShutdownTimeout(_))));
    // the abandoned write is still owed
    assert!(ctx.store.is_dirty());
    assert_eq!(ctx.store.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_not_retried_when_disabled() {
    let ctx = create_context_with(
        Arc::new(MemoryPersistence::new()),
        RecordingGateway::failing(DeliveryError::Client {
            status: 403,
            body: "forbidden".to_string(),
        }),
        EventSchedulerConfig::new().with_retry_client_errors(false),
    )
    .await;
    ctx.scheduler.start().await.unwrap();

    let past = ctx.clock.now() - ChronoDuration::seconds(1);
    ctx.scheduler.add_event(tide_event("e1", past)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    let record = ctx.store.get("e1").await.unwrap();
    assert_eq!(record.status, EventStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert_eq!(ctx.gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_retried_by_default() {
    let ctx = create_context_with(
        Arc::new(MemoryPersistence::new()),
        RecordingGateway::failing(DeliveryError::Client {
            status: 400,
            body: "bad request".to_string(),
        }),
        EventSchedulerConfig::new(),
    )
    .await;
    ctx.scheduler.start().await.unwrap();

    let past = ctx.clock.now() - ChronoDuration::seconds(1);
    ctx.scheduler.add_event(tide_event("e1", past)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(ctx.store.get("e1").await.unwrap().retry_count, 3);
    assert_eq!(ctx.gateway.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_add_events_batch_arms_all() {
    let ctx = create_test_context().await;
    ctx.scheduler.start().await.unwrap();

    let now = ctx.clock.now();
    let batch = (0..5)
        .map(|i| tide_event(&format!("b{i}"), now + ChronoDuration::seconds(10 + i)))
        .collect();
    let records = ctx.scheduler.add_events(batch).await.unwrap();
    assert_eq!(records.len(), 5);
    assert_eq!(ctx.scheduler.armed_count(), 5);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(ctx.gateway.calls(), 5);
    assert_eq!(ctx.store.stats().await.sent, 5);
}

#[tokio::test(start_paused = true)]
async fn test_status_snapshot() {
    let ctx = create_test_context().await;
    let now = ctx.clock.now();
    ctx.scheduler
        .add_event(tide_event("e1", now + ChronoDuration::minutes(3)))
        .await
        .unwrap();

    let status = ctx.scheduler.status().await;
    assert!(!status.running);
    assert_eq!(status.armed, 0);
    assert_eq!(status.events.pending, 1);
    assert_eq!(status.horizon_secs, 6 * 3600);
    assert_eq!(status.next_due, Some(now + ChronoDuration::minutes(3)));

    ctx.scheduler.start().await.unwrap();
    let status = ctx.scheduler.status().await;
    assert!(status.running);
    assert_eq!(status.armed, 1);
    assert_eq!(status.events.scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_gateway_receives_payload() {
    let mut gateway = MockNotificationGateway::new();
    gateway
        .expect_send()
        .withf(|n: &Notification| n.title == "Low tide e1" && n.message == "0.3m at the harbour")
        .times(1)
        .returning(|_| Ok(()));

    let clock: SharedClock = Arc::new(TokioClock::new());
    let store = EventStore::open_with_clock(
        Arc::new(MemoryPersistence::new()),
        EventStoreConfig::new(),
        clock.clone(),
    )
    .await
    .unwrap();
    let scheduler = EventScheduler::new(store.clone(), Arc::new(gateway), EventSchedulerConfig::new());
    scheduler.start().await.unwrap();

    scheduler
        .add_event(tide_event("e1", clock.now() + ChronoDuration::seconds(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(status_of(&store, "e1").await, EventStatus::Sent);
}
