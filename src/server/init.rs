//! Component wiring and the `serve` run loop

use anyhow::{Context, Result};
use axum::Extension;
use std::net::SocketAddr;
use std::sync::Arc;
use tidings_channels::NtfyGateway;
use tidings_core::{
    CronTaskScheduler, EventScheduler, EventStore, JsonFilePersistence, NotificationGateway,
    SchedulerError,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use super::config::AppConfig;
use super::shutdown::wait_for_shutdown_signal;
use crate::{api, plugins};

/// The long-lived pieces of a Tidings process
pub struct Components {
    pub store: Arc<EventStore>,
    pub scheduler: Arc<EventScheduler>,
    pub cron: Arc<CronTaskScheduler>,
}

impl Components {
    /// Stop both schedulers and write the store a final time.
    ///
    /// A scheduler that cannot finish within its shutdown timeout is fatal;
    /// the store is left dirty and the error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        self.cron.stop();
        match self.scheduler.stop().await {
            Ok(()) => {}
            Err(e @ SchedulerError::ShutdownTimeout(_)) => {
                error!(
                    error = %e,
                    unflushed = self.store.is_dirty(),
                    "Event scheduler shutdown timed out"
                );
                return Err(e).context("Event scheduler shutdown timed out");
            }
            Err(e) => warn!(error = %e, "Event scheduler did not stop cleanly"),
        }

        if let Err(e) = self.store.shutdown().await {
            error!(error = %e, "Final event flush failed");
            return Err(e).context("Failed to flush event store");
        }
        Ok(())
    }
}

/// Open the event store configured in `config`
pub async fn open_store(config: &AppConfig) -> Result<Arc<EventStore>> {
    let path = config.events_file();
    let persistence = Arc::new(JsonFilePersistence::new(&path));
    EventStore::open(persistence, config.store.to_store_config())
        .await
        .with_context(|| format!("Failed to open event store at {}", path.display()))
}

/// Build the store, gateway, event scheduler, plugins and cron scheduler.
///
/// Nothing is started; callers decide which halves run.
pub async fn build_components(config: &AppConfig) -> Result<Components> {
    let store = open_store(config).await?;

    let gateway: Arc<dyn NotificationGateway> = Arc::new(
        NtfyGateway::new(config.ntfy.clone()).context("Invalid ntfy configuration")?,
    );
    info!(
        base_url = %config.ntfy.base_url,
        topic = %config.ntfy.topic,
        "ntfy gateway ready"
    );

    let scheduler = EventScheduler::new(
        store.clone(),
        gateway.clone(),
        config.scheduler.to_scheduler_config(),
    );

    let registry = plugins::registry();
    let loaded = registry.build(&config.plugins);
    for plugin in &loaded {
        plugin.attach_scheduler(scheduler.clone());
    }
    info!(
        configured = config.plugins.len(),
        loaded = loaded.len(),
        types = ?registry.types(),
        "Plugins loaded"
    );

    let cron = Arc::new(CronTaskScheduler::new(
        loaded,
        gateway,
        config.cron.to_cron_config()?,
    ));

    Ok(Components {
        store,
        scheduler,
        cron,
    })
}

/// Run until a shutdown signal arrives
pub async fn run(config: AppConfig) -> Result<()> {
    let components = build_components(&config).await?;
    let Components { scheduler, cron, .. } = &components;

    scheduler
        .start()
        .await
        .context("Failed to start event scheduler")?;
    let tasks = cron.start();
    info!(tasks, "Cron tasks started");

    if config.server.enabled {
        let app = api::router()
            .layer(Extension(scheduler.clone()))
            .layer(Extension(cron.clone()))
            .layer(TraceLayer::new_for_http());

        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("Invalid server address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;
        info!("Admin API listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown_signal())
            .await
            .context("HTTP server error")?;
    } else {
        info!("Admin API disabled");
        wait_for_shutdown_signal().await;
    }

    info!("Shutting down");
    components.shutdown().await?;

    info!("Tidings shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;
    use tidings_core::{
        CronSchedulerConfig, DeliveryResult, EventPayload, EventPersistence, EventSchedulerConfig,
        EventStoreConfig, MemoryPersistence, NewEvent, Notification, ScheduledEvent, StoreError,
    };

    struct NullGateway;

    #[async_trait]
    impl NotificationGateway for NullGateway {
        async fn send(&self, _notification: &Notification) -> DeliveryResult<()> {
            Ok(())
        }
    }

    struct StalledPersistence;

    #[async_trait]
    impl EventPersistence for StalledPersistence {
        async fn load(&self) -> std::result::Result<Vec<ScheduledEvent>, StoreError> {
            Ok(Vec::new())
        }

        async fn save(&self, _events: &[ScheduledEvent]) -> std::result::Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        fn describe(&self) -> String {
            "stalled".to_string()
        }
    }

    async fn components(persistence: Arc<dyn EventPersistence>) -> Components {
        let store = EventStore::open(persistence, EventStoreConfig::new())
            .await
            .unwrap();
        let gateway: Arc<dyn NotificationGateway> = Arc::new(NullGateway);
        let scheduler = EventScheduler::new(
            store.clone(),
            gateway.clone(),
            EventSchedulerConfig::new().with_shutdown_timeout(Duration::from_secs(5)),
        );
        let cron = Arc::new(CronTaskScheduler::new(
            Vec::new(),
            gateway,
            CronSchedulerConfig::new(),
        ));
        Components {
            store,
            scheduler,
            cron,
        }
    }

    fn tide(id: &str) -> NewEvent {
        NewEvent::new(
            id,
            "tides",
            "low_tide",
            Utc::now() + ChronoDuration::hours(1),
            EventPayload::new("Low tide", "0.3m"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_timeout_is_fatal() {
        let c = components(Arc::new(StalledPersistence)).await;
        c.scheduler.start().await.unwrap();
        c.scheduler.add_event(tide("e1")).await.unwrap();

        let err = c.shutdown().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SchedulerError>(),
            Some(SchedulerError::ShutdownTimeout(_))
        ));
        assert!(c.store.is_dirty());
        assert_eq!(c.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_store() {
        let persistence = Arc::new(MemoryPersistence::new());
        let c = components(persistence.clone()).await;
        c.scheduler.start().await.unwrap();
        c.scheduler.add_event(tide("e1")).await.unwrap();

        c.shutdown().await.unwrap();
        assert!(!c.store.is_dirty());
        assert!(!c.scheduler.is_running());
        assert_eq!(persistence.load().await.unwrap().len(), 1);
    }
}
