//! `tidings check`: run plugin checks once

use anyhow::{Context, Result};
use tracing::info;

use crate::server::config::AppConfig;
use crate::server::{build_components, Components};

pub async fn run(config: &AppConfig, plugin: Option<&str>) -> Result<()> {
    let Components { store, cron, .. } = build_components(config).await?;

    let plugins = cron.plugin_names();
    if plugins.is_empty() {
        println!("No plugins configured.");
        return Ok(());
    }
    info!(plugins = ?plugins, only = ?plugin, "Running plugin checks");

    let delivered = cron
        .execute_once_now(plugin)
        .await
        .context("Plugin check failed")?;

    // follow-up events registered by the checks must reach disk
    store.shutdown().await.context("Failed to flush event store")?;

    println!("Delivered {} notification(s).", delivered);
    Ok(())
}
