//! Cron task endpoints

use axum::extract::{Extension, Path};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tidings_core::{CronTaskScheduler, TaskInfo};
use tracing::info;

use super::ApiResponse;

#[derive(Debug, Serialize)]
pub struct TaskToggled {
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct PluginToggled {
    pub name: String,
    pub enabled: bool,
    pub tasks: usize,
}

pub async fn list_tasks(
    cron: Option<Extension<Arc<CronTaskScheduler>>>,
) -> Json<ApiResponse<Vec<TaskInfo>>> {
    let Some(Extension(cron)) = cron else {
        return Json(ApiResponse::error("Cron scheduler not running"));
    };
    Json(ApiResponse::success(cron.tasks()))
}

pub async fn toggle_task(
    cron: Option<Extension<Arc<CronTaskScheduler>>>,
    Path(name): Path<String>,
) -> Json<ApiResponse<TaskToggled>> {
    let Some(Extension(cron)) = cron else {
        return Json(ApiResponse::error("Cron scheduler not running"));
    };

    match cron.toggle(&name) {
        Ok(active) => {
            info!(task = %name, active, "Task toggled via API");
            Json(ApiResponse::success(TaskToggled { name, active }))
        }
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

/// Flip a plugin between enabled and disabled
pub async fn toggle_plugin(
    cron: Option<Extension<Arc<CronTaskScheduler>>>,
    Path(name): Path<String>,
) -> Json<ApiResponse<PluginToggled>> {
    let Some(Extension(cron)) = cron else {
        return Json(ApiResponse::error("Cron scheduler not running"));
    };

    let enabled = !cron.is_plugin_enabled(&name);
    match cron.set_plugin_enabled(&name, enabled) {
        Ok(tasks) => {
            info!(plugin = %name, enabled, tasks, "Plugin toggled via API");
            Json(ApiResponse::success(PluginToggled {
                name,
                enabled,
                tasks,
            }))
        }
        Err(e) => Json(ApiResponse::error(e.to_string())),
    }
}

pub fn tasks_routes() -> Router {
    Router::new()
        .route("/api/v1/tasks", get(list_tasks))
        .route("/api/v1/tasks/:name/toggle", post(toggle_task))
        .route("/api/v1/plugins/:name/toggle", post(toggle_plugin))
}
