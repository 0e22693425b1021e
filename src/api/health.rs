//! Health and status endpoints
//!
//! - `/health`: "healthy" + version, no dependencies touched
//! - `/api/v1/status`: event scheduler counters and cron task summary

use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tidings_core::{CronTaskScheduler, EventScheduler, SchedulerStatus};

use super::ApiResponse;

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Cron half of the status report
#[derive(Debug, Serialize)]
pub struct CronStatus {
    pub running: bool,
    pub tasks: usize,
    pub paused: usize,
    pub plugins: Vec<PluginStatus>,
}

#[derive(Debug, Serialize)]
pub struct PluginStatus {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub events: SchedulerStatus,
    pub cron: CronStatus,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn status(
    scheduler: Option<Extension<Arc<EventScheduler>>>,
    cron: Option<Extension<Arc<CronTaskScheduler>>>,
) -> Json<ApiResponse<StatusResponse>> {
    let (Some(Extension(scheduler)), Some(Extension(cron))) = (scheduler, cron) else {
        return Json(ApiResponse::error("Schedulers not running"));
    };

    let tasks = cron.tasks();
    let plugins = cron
        .plugin_names()
        .into_iter()
        .map(|name| PluginStatus {
            enabled: cron.is_plugin_enabled(&name),
            name,
        })
        .collect();

    Json(ApiResponse::success(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        events: scheduler.status().await,
        cron: CronStatus {
            running: cron.is_running(),
            tasks: tasks.len(),
            paused: tasks.iter().filter(|t| t.paused).count(),
            plugins,
        },
    }))
}

pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/status", get(status))
}
