//! Fixed-text reminders on cron cadences
//!
//! ```toml
//! [[plugins]]
//! name = "morning"
//! type = "reminder"
//! [plugins.settings]
//! reminders = [
//!   { id = "standup", expression = "45 8 * * 1-5", description = "Standup",
//!     title = "Standup", message = "Standup in 15 minutes", follow_up_minutes = 30 },
//! ]
//! ```
//!
//! A reminder with `follow_up_minutes` also registers a future-dated event
//! through the event scheduler, so the follow-up survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tidings_core::plugin::CheckContext;
use tidings_core::{
    EventPayload, EventScheduler, NewEvent, Notification, Plugin, PluginConfig, PluginError,
    PluginResult, PluginSchedule, Priority, SchedulerError, StoreError,
};
use tracing::{debug, info, warn};

/// Factory key
pub const PLUGIN_TYPE: &str = "reminder";

/// Event type of follow-up events
pub const FOLLOW_UP_EVENT: &str = "follow_up";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReminderSettings {
    #[serde(default)]
    pub reminders: Vec<Reminder>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reminder {
    #[serde(flatten)]
    pub schedule: PluginSchedule,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub click: Option<String>,
    /// Minutes after a firing at which a follow-up is pushed
    #[serde(default)]
    pub follow_up_minutes: Option<i64>,
}

impl Reminder {
    fn notification(&self) -> Notification {
        let mut notification =
            Notification::new(&self.title, &self.message).with_priority(self.priority);
        notification.tags = self.tags.clone();
        notification.click = self.click.clone();
        notification
    }
}

pub struct ReminderPlugin {
    name: String,
    reminders: Vec<Reminder>,
    scheduler: OnceLock<Arc<EventScheduler>>,
}

impl ReminderPlugin {
    pub fn new(name: impl Into<String>, settings: ReminderSettings) -> Self {
        Self {
            name: name.into(),
            reminders: settings.reminders,
            scheduler: OnceLock::new(),
        }
    }

    /// Id of the follow-up for one firing; repeated firings at the same
    /// instant collapse onto one event
    pub fn follow_up_id(&self, schedule_id: &str, fired_at: DateTime<Utc>) -> String {
        format!(
            "{}:{}:follow-up:{}",
            self.name,
            schedule_id,
            fired_at.timestamp()
        )
    }

    async fn schedule_follow_up(
        &self,
        reminder: &Reminder,
        fired_at: DateTime<Utc>,
        minutes: i64,
    ) -> PluginResult<()> {
        let Some(scheduler) = self.scheduler.get() else {
            warn!(plugin = %self.name, "No event scheduler attached, follow-up dropped");
            return Ok(());
        };

        let schedule_id = reminder.schedule.schedule_id();
        let id = self.follow_up_id(&schedule_id, fired_at);
        let mut payload = EventPayload::from(reminder.notification());
        payload.title = format!("Follow-up: {}", reminder.title);

        let event = NewEvent::new(
            &id,
            &self.name,
            FOLLOW_UP_EVENT,
            fired_at + ChronoDuration::minutes(minutes),
            payload,
        )
        .with_metadata("schedule", serde_json::Value::String(schedule_id));

        match scheduler.add_event(event).await {
            Ok(event) => {
                info!(plugin = %self.name, event_id = %id, due = %event.scheduled_for, "Follow-up scheduled");
                Ok(())
            }
            Err(SchedulerError::Store(StoreError::DuplicateId(_))) => {
                debug!(plugin = %self.name, event_id = %id, "Follow-up already scheduled");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Plugin for ReminderPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn schedules(&self) -> Vec<PluginSchedule> {
        self.reminders.iter().map(|r| r.schedule.clone()).collect()
    }

    async fn check_conditions(&self, context: &CheckContext) -> PluginResult<Vec<Notification>> {
        let due: Vec<&Reminder> = if context.manual {
            self.reminders.iter().filter(|r| r.schedule.enabled).collect()
        } else {
            self.reminders
                .iter()
                .filter(|r| r.schedule.schedule_id() == context.schedule_id)
                .collect()
        };

        let mut notifications = Vec::with_capacity(due.len());
        for reminder in due {
            if let Some(minutes) = reminder.follow_up_minutes.filter(|m| *m > 0) {
                self.schedule_follow_up(reminder, context.fired_at, minutes)
                    .await?;
            }
            notifications.push(reminder.notification());
        }
        Ok(notifications)
    }

    fn attach_scheduler(&self, scheduler: Arc<EventScheduler>) {
        if self.scheduler.set(scheduler).is_err() {
            debug!(plugin = %self.name, "Event scheduler already attached");
        }
    }
}

/// Build a reminder plugin from its config section
pub fn create(config: &PluginConfig) -> PluginResult<Arc<dyn Plugin>> {
    let invalid = |reason: String| PluginError::Config {
        plugin: config.name.clone(),
        reason,
    };

    let settings: ReminderSettings = if config.settings.is_null() {
        ReminderSettings::default()
    } else {
        serde_json::from_value(config.settings.clone()).map_err(|e| invalid(e.to_string()))?
    };

    if settings.reminders.is_empty() {
        return Err(invalid("no reminders configured".to_string()));
    }
    if let Some(blank) = settings.reminders.iter().find(|r| r.title.trim().is_empty()) {
        return Err(invalid(format!(
            "reminder '{}' has an empty title",
            blank.schedule.schedule_id()
        )));
    }

    Ok(Arc::new(ReminderPlugin::new(&config.name, settings)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tidings_core::{
        DeliveryResult, EventSchedulerConfig, EventStatus, EventStore, EventStoreConfig,
        MemoryPersistence, NotificationGateway,
    };

    struct NullGateway;

    #[async_trait]
    impl NotificationGateway for NullGateway {
        async fn send(&self, _notification: &Notification) -> DeliveryResult<()> {
            Ok(())
        }
    }

    fn config(settings: serde_json::Value) -> PluginConfig {
        PluginConfig::new("morning", PLUGIN_TYPE).with_settings(settings)
    }

    fn standup() -> serde_json::Value {
        json!({
            "reminders": [
                {
                    "id": "standup",
                    "expression": "45 8 * * 1-5",
                    "description": "Standup",
                    "title": "Standup",
                    "message": "Standup in 15 minutes",
                    "priority": "high",
                    "tags": ["calendar"],
                    "follow_up_minutes": 30
                },
                {
                    "expression": "0 17 * * 5",
                    "description": "Weekly review",
                    "title": "Review",
                    "message": "Write the weekly notes"
                }
            ]
        })
    }

    fn fired_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 8, 45, 0).unwrap()
    }

    async fn scheduler() -> Arc<EventScheduler> {
        let store = EventStore::open(Arc::new(MemoryPersistence::new()), EventStoreConfig::new())
            .await
            .unwrap();
        EventScheduler::new(store, Arc::new(NullGateway), EventSchedulerConfig::new())
    }

    #[test]
    fn test_create_reads_schedules() {
        let plugin = create(&config(standup())).unwrap();
        assert_eq!(plugin.name(), "morning");

        let ids: Vec<String> = plugin.schedules().iter().map(|s| s.schedule_id()).collect();
        assert_eq!(ids, vec!["standup", "weekly-review"]);
    }

    #[test]
    fn test_create_rejects_bad_settings() {
        assert!(matches!(
            create(&PluginConfig::new("empty", PLUGIN_TYPE)),
            Err(PluginError::Config { .. })
        ));
        assert!(create(&config(json!({ "reminders": [{ "expression": "* * * * *" }] }))).is_err());
        assert!(create(&config(json!({
            "reminders": [{ "expression": "* * * * *", "description": "x", "title": " ", "message": "m" }]
        })))
        .is_err());
    }

    #[tokio::test]
    async fn test_firing_returns_matching_reminder() {
        let plugin = create(&config(standup())).unwrap();
        let schedule = plugin.schedules()[1].clone();

        let notifications = plugin
            .check_conditions(&CheckContext::for_schedule(&schedule, fired_at()))
            .await
            .unwrap();

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Review");
        assert_eq!(notifications[0].priority, Priority::Default);
    }

    #[tokio::test]
    async fn test_follow_up_registered_once() {
        let scheduler = scheduler().await;
        let plugin = create(&config(standup())).unwrap();
        plugin.attach_scheduler(scheduler.clone());
        let schedule = plugin.schedules()[0].clone();
        let context = CheckContext::for_schedule(&schedule, fired_at());

        let notifications = plugin.check_conditions(&context).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].priority, Priority::High);
        assert_eq!(notifications[0].tags, vec!["calendar"]);

        // same firing again: the follow-up id collides and is ignored
        plugin.check_conditions(&context).await.unwrap();

        let events = scheduler.store().query(&Default::default()).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "morning:standup:follow-up:1709541900");
        assert_eq!(events[0].event_type, FOLLOW_UP_EVENT);
        assert_eq!(events[0].status, EventStatus::Pending);
        assert_eq!(
            events[0].scheduled_for,
            fired_at() + ChronoDuration::minutes(30)
        );
        assert_eq!(events[0].payload.title, "Follow-up: Standup");
    }

    #[tokio::test]
    async fn test_manual_run_fires_every_reminder() {
        let plugin = create(&config(standup())).unwrap();
        // no scheduler attached: follow-ups are skipped, not errors
        let notifications = plugin
            .check_conditions(&CheckContext::manual(fired_at()))
            .await
            .unwrap();
        let titles: Vec<&str> = notifications.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Standup", "Review"]);
    }
}
