//! Scheduled event endpoints

use axum::extract::{Extension, Path, Query};
use axum::response::Json;
use axum::routing::{delete, get};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidings_core::{EventQuery, EventScheduler, EventStatus, ScheduledEvent};
use tracing::info;

use super::ApiResponse;

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsParams {
    /// Comma-separated statuses, e.g. `pending,scheduled`
    pub status: Option<String>,
    pub plugin: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventCancelled {
    pub id: String,
}

/// Parse `pending,scheduled` into statuses
pub fn parse_statuses(raw: &str) -> Result<Vec<EventStatus>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<EventStatus>)
        .collect()
}

pub async fn list_events(
    scheduler: Option<Extension<Arc<EventScheduler>>>,
    Query(params): Query<ListEventsParams>,
) -> Json<ApiResponse<Vec<ScheduledEvent>>> {
    let Some(Extension(scheduler)) = scheduler else {
        return Json(ApiResponse::error("Event scheduler not running"));
    };

    let mut query = EventQuery::new();
    if let Some(raw) = params.status.as_deref() {
        match parse_statuses(raw) {
            Ok(statuses) if !statuses.is_empty() => query = query.with_statuses(&statuses),
            Ok(_) => {}
            Err(e) => return Json(ApiResponse::error(e)),
        }
    }
    if let Some(plugin) = params.plugin {
        query = query.with_plugin(plugin);
    }

    Json(ApiResponse::success(scheduler.store().query(&query).await))
}

pub async fn cancel_event(
    scheduler: Option<Extension<Arc<EventScheduler>>>,
    Path(id): Path<String>,
) -> Json<ApiResponse<EventCancelled>> {
    let Some(Extension(scheduler)) = scheduler else {
        return Json(ApiResponse::error("Event scheduler not running"));
    };

    if scheduler.cancel_event(&id).await {
        info!(event_id = %id, "Event cancelled via API");
        Json(ApiResponse::success(EventCancelled { id }))
    } else {
        Json(ApiResponse::error(format!("Event not found: {}", id)))
    }
}

pub fn events_routes() -> Router {
    Router::new()
        .route("/api/v1/events", get(list_events))
        .route("/api/v1/events/:id", delete(cancel_event))
}
