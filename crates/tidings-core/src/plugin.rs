//! Plugin contract
//!
//! A plugin declares cron schedules and, when one fires, inspects whatever
//! external state it watches and returns the notifications to send. Plugins
//! that also need future-dated delivery keep the [`EventScheduler`] handle
//! passed to [`Plugin::attach_scheduler`].


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::events::{EventScheduler, SchedulerError};
use crate::notification::Notification;

/// Result type for plugin operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Plugin errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Condition check failed
    #[error("check failed: {0}")]
    Check(String),

    /// Plugin settings rejected
    #[error("invalid configuration for plugin {plugin}: {reason}")]
    Config {
        /// Plugin name
        plugin: String,
        /// What was wrong
        reason: String,
    },

    /// No factory for this plugin type
    #[error("unknown plugin type: {0}")]
    UnknownType(String),

    /// Event scheduling failed
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// One cron cadence declared by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSchedule {
    /// Stable identifier; defaults to the normalized description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 5-field cron expression
    pub expression: String,
    /// Human-readable description
    pub description: String,
    /// Whether a task is created for this schedule
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginSchedule {
    /// Create an enabled schedule
    pub fn new(expression: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            expression: expression.into(),
            description: description.into(),
            enabled: true,
        }
    }

    /// Set a stable identifier
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark the schedule disabled
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Identifier used in task names and check contexts
    pub fn schedule_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => normalize_key(&self.description),
        }
    }

    /// Task name for this schedule under `plugin`
    pub fn task_name(&self, plugin: &str) -> String {
        format!("{}:{}", plugin, self.schedule_id())
    }
}

/// Lowercase, whitespace runs collapsed to `-`
pub fn normalize_key(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// Which declared schedule fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckContext {
    /// Stable schedule identifier
    pub schedule_id: String,
    /// Schedule description
    pub description: String,
    /// When the check was triggered
    pub fired_at: DateTime<Utc>,
    /// Whether the check bypassed the cadence
    pub manual: bool,
}

impl CheckContext {
    /// Context for a cron firing of `schedule`
    pub fn for_schedule(schedule: &PluginSchedule, fired_at: DateTime<Utc>) -> Self {
        Self {
            schedule_id: schedule.schedule_id(),
            description: schedule.description.clone(),
            fired_at,
            manual: false,
        }
    }

    /// Context for an out-of-band run
    pub fn manual(fired_at: DateTime<Utc>) -> Self {
        Self {
            schedule_id: "manual".to_string(),
            description: "manual run".to_string(),
            fired_at,
            manual: true,
        }
    }
}

/// A monitoring plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name
    fn name(&self) -> &str;

    /// Declared cron schedules
    fn schedules(&self) -> Vec<PluginSchedule>;

    /// Inspect external state and return notifications to send now
    async fn check_conditions(&self, context: &CheckContext) -> PluginResult<Vec<Notification>>;

    /// Receive the event scheduler handle
    fn attach_scheduler(&self, _scheduler: Arc<EventScheduler>) {}
}

/// Plugin instance configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Instance name
    pub name: String,
    /// Factory key
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Whether the instance is built at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Plugin-specific settings
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl PluginConfig {
    /// Create an enabled config with empty settings
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            enabled: true,
            settings: serde_json::Value::Null,
        }
    }

    /// Set settings
    #[must_use]
    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }
}

/// Builds a plugin from its configuration
pub type PluginFactory = Arc<dyn Fn(&PluginConfig) -> PluginResult<Arc<dyn Plugin>> + Send + Sync>;

/// Plugin type registry
#[derive(Default, Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `plugin_type`, replacing any previous one
    pub fn register<F>(&mut self, plugin_type: impl Into<String>, factory: F)
    where
        F: Fn(&PluginConfig) -> PluginResult<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let plugin_type = plugin_type.into();
        if self
            .factories
            .insert(plugin_type.clone(), Arc::new(factory))
            .is_some()
        {
            warn!(plugin_type = %plugin_type, "Plugin factory replaced");
        }
    }

    /// Whether a factory exists for `plugin_type`
    pub fn contains(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Registered plugin types, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Instantiate one config
    pub fn create(&self, config: &PluginConfig) -> PluginResult<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(&config.plugin_type)
            .ok_or_else(|| PluginError::UnknownType(config.plugin_type.clone()))?;
        factory(config)
    }

    /// Instantiate every enabled config. Unknown types and factory errors
    /// are logged and skipped.
    pub fn build(&self, configs: &[PluginConfig]) -> Vec<Arc<dyn Plugin>> {
        let mut plugins = Vec::new();
        for config in configs {
            if !config.enabled {
                debug!(plugin = %config.name, "Plugin disabled in config");
                continue;
            }
            match self.create(config) {
                Ok(plugin) => {
                    info!(plugin = %config.name, plugin_type = %config.plugin_type, "Plugin loaded");
                    plugins.push(plugin);
                }
                Err(e) => warn!(plugin = %config.name, error = %e, "Skipping plugin"),
            }
        }
        plugins
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("types", &self.types())
            .finish()
    }
}
