//! `tidings events` and `tidings cleanup`

use anyhow::{anyhow, Context, Result};
use tidings_core::{EventQuery, ScheduledEvent};

use crate::api::events::parse_statuses;
use crate::server::config::AppConfig;
use crate::server::open_store;

pub async fn list(config: &AppConfig, status: Option<&str>) -> Result<()> {
    let mut query = EventQuery::new();
    if let Some(raw) = status {
        let statuses = parse_statuses(raw).map_err(|e| anyhow!(e))?;
        if !statuses.is_empty() {
            query = query.with_statuses(&statuses);
        }
    }

    let store = open_store(config).await?;
    let events = store.query(&query).await;
    store.shutdown().await.context("Failed to close event store")?;

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    println!(
        "{:<40} {:<10} {:<26} {:>7}  {}",
        "ID", "STATUS", "SCHEDULED FOR", "RETRIES", "TITLE"
    );
    for event in &events {
        println!("{}", format_row(event));
    }
    println!("\n{} event(s)", events.len());
    Ok(())
}

pub async fn cleanup(config: &AppConfig) -> Result<()> {
    let store = open_store(config).await?;
    let removed = store.cleanup().await;
    store.shutdown().await.context("Failed to flush event store")?;
    println!("Removed {} old event(s).", removed);
    Ok(())
}

fn format_row(event: &ScheduledEvent) -> String {
    format!(
        "{:<40} {:<10} {:<26} {:>3}/{:<3}  {}",
        event.id,
        event.status.as_str(),
        event.scheduled_for.to_rfc3339(),
        event.retry_count,
        event.max_retries,
        event.payload.title
    )
}
