use super::*;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Extension;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tidings_core::{
    CronSchedulerConfig, CronTaskScheduler, DeliveryResult, EventPayload, EventScheduler,
    EventSchedulerConfig, EventStore, EventStoreConfig, MemoryPersistence, NewEvent, Notification,
    NotificationGateway, PluginConfig,
};
use tower::ServiceExt;

struct NullGateway;

#[async_trait]
impl NotificationGateway for NullGateway {
    async fn send(&self, _notification: &Notification) -> DeliveryResult<()> {
        Ok(())
    }
}

struct Harness {
    app: Router,
    scheduler: Arc<EventScheduler>,
    cron: Arc<CronTaskScheduler>,
}

async fn harness() -> Harness {
    let store = EventStore::open(Arc::new(MemoryPersistence::new()), EventStoreConfig::new())
        .await
        .unwrap();
    let gateway: Arc<dyn NotificationGateway> = Arc::new(NullGateway);
    let scheduler = EventScheduler::new(store, gateway.clone(), EventSchedulerConfig::new());

    let plugin = crate::plugins::registry()
        .create(&PluginConfig::new("morning", "reminder").with_settings(json!({
            "reminders": [
                { "id": "wake", "expression": "0 7 * * *", "description": "Wake up",
                  "title": "Wake", "message": "Rise" },
                { "id": "walk", "expression": "30 12 * * *", "description": "Walk",
                  "title": "Walk", "message": "Go outside" }
            ]
        })))
        .unwrap();
    let cron = Arc::new(CronTaskScheduler::new(
        vec![plugin],
        gateway,
        CronSchedulerConfig::new(),
    ));
    cron.start();

    let app = router()
        .layer(Extension(scheduler.clone()))
        .layer(Extension(cron.clone()));
    Harness {
        app,
        scheduler,
        cron,
    }
}

async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn event(id: &str, hours: i64) -> NewEvent {
    NewEvent::new(
        id,
        "tides",
        "low_tide",
        Utc::now() + ChronoDuration::hours(hours),
        EventPayload::new(format!("Low tide {id}"), "0.3m"),
    )
}

#[tokio::test]
async fn test_health() {
    let h = harness().await;
    let (status, body) = call(&h.app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_reports_both_schedulers() {
    let h = harness().await;
    h.scheduler.add_event(event("a", 30)).await.unwrap();

    let (_, body) = call(&h.app, "GET", "/api/v1/status").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["events"]["running"], false);
    assert_eq!(body["data"]["events"]["events"]["total"], 1);
    assert_eq!(body["data"]["events"]["events"]["pending"], 1);
    assert_eq!(body["data"]["cron"]["running"], true);
    assert_eq!(body["data"]["cron"]["tasks"], 2);
    assert_eq!(
        body["data"]["cron"]["plugins"],
        json!([{ "name": "morning", "enabled": true }])
    );
}

#[tokio::test]
async fn test_list_tasks() {
    let h = harness().await;
    let (_, body) = call(&h.app, "GET", "/api/v1/tasks").await;
    assert_eq!(body["success"], true);

    let tasks = body["data"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["name"], "morning:wake");
    assert_eq!(tasks[0]["expression"], "0 7 * * *");
    assert_eq!(tasks[0]["paused"], false);
    assert!(tasks[0]["nextRun"].is_string());
    assert_eq!(tasks[1]["name"], "morning:walk");
}

#[tokio::test]
async fn test_toggle_task() {
    let h = harness().await;

    let (_, body) = call(&h.app, "POST", "/api/v1/tasks/morning:wake/toggle").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!({ "name": "morning:wake", "active": false }));
    let wake = h.cron.tasks().into_iter().find(|t| t.name == "morning:wake").unwrap();
    assert!(wake.paused);

    let (_, body) = call(&h.app, "POST", "/api/v1/tasks/morning:wake/toggle").await;
    assert_eq!(body["data"]["active"], true);

    let (_, body) = call(&h.app, "POST", "/api/v1/tasks/nope/toggle").await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("nope"));
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn test_toggle_plugin() {
    let h = harness().await;

    let (_, body) = call(&h.app, "POST", "/api/v1/plugins/morning/toggle").await;
    assert_eq!(
        body["data"],
        json!({ "name": "morning", "enabled": false, "tasks": 2 })
    );
    assert!(!h.cron.is_plugin_enabled("morning"));
    assert!(h.cron.tasks().iter().all(|t| t.paused));

    let (_, body) = call(&h.app, "POST", "/api/v1/plugins/morning/toggle").await;
    assert_eq!(body["data"]["enabled"], true);
    assert!(h.cron.tasks().iter().all(|t| !t.paused));

    let (_, body) = call(&h.app, "POST", "/api/v1/plugins/ghost/toggle").await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_list_events_with_filter() {
    let h = harness().await;
    h.scheduler.add_event(event("later", 48)).await.unwrap();
    h.scheduler.add_event(event("sooner", 24)).await.unwrap();
    h.scheduler.store().mark_as_sent("later").await.unwrap();

    let (_, body) = call(&h.app, "GET", "/api/v1/events").await;
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["sooner", "later"]);

    let (_, body) = call(&h.app, "GET", "/api/v1/events?status=pending").await;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["id"], "sooner");
    assert_eq!(events[0]["payload"]["title"], "Low tide sooner");

    let (_, body) = call(&h.app, "GET", "/api/v1/events?status=sent,failed").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = call(&h.app, "GET", "/api/v1/events?status=lost").await;
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("lost"));
}

#[tokio::test]
async fn test_cancel_event() {
    let h = harness().await;
    h.scheduler.add_event(event("a", 1)).await.unwrap();

    let (_, body) = call(&h.app, "DELETE", "/api/v1/events/a").await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["id"], "a");
    assert!(h.scheduler.store().get("a").await.is_none());

    let (_, body) = call(&h.app, "DELETE", "/api/v1/events/a").await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_missing_state_reports_error() {
    let app = router();
    let (status, body) = call(&app, "GET", "/api/v1/tasks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, "GET", "/api/v1/status").await;
    assert_eq!(body["success"], false);
}

#[test]
fn test_parse_statuses() {
    use tidings_core::EventStatus;
    assert_eq!(
        events::parse_statuses("pending, Scheduled,").unwrap(),
        vec![EventStatus::Pending, EventStatus::Scheduled]
    );
    assert!(events::parse_statuses("").unwrap().is_empty());
    assert!(events::parse_statuses("pending,bogus").is_err());
}
