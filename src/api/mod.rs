//! Admin HTTP API
//!
//! GET    /health                       - Liveness + version
//! GET    /api/v1/status                - Event and cron scheduler snapshot
//! GET    /api/v1/tasks                 - List cron tasks
//! POST   /api/v1/tasks/:name/toggle    - Pause or resume one task
//! POST   /api/v1/plugins/:name/toggle  - Enable or disable every task of a plugin
//! GET    /api/v1/events?status=        - List scheduled events
//! DELETE /api/v1/events/:id            - Cancel a scheduled event
//!
//! Handlers read the schedulers from `Extension<Arc<_>>` layers and answer
//! with the [`ApiResponse`] envelope.

pub mod events;
pub mod health;
pub mod tasks;

#[cfg(test)]
mod tests;

use axum::Router;
use serde::Serialize;

/// Standard API response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// All admin routes, without state layers
pub fn router() -> Router {
    Router::new()
        .merge(health::health_routes())
        .merge(tasks::tasks_routes())
        .merge(events::events_routes())
}
