//! Cron scheduler types

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::time::Duration;

/// Result type for cron operations
pub type Result<T> = std::result::Result<T, CronError>;

/// Cron scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    /// Expression could not be parsed
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression {
        /// Offending expression
        expression: String,
        /// Parser message
        reason: String,
    },

    /// Unknown IANA timezone
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No task with that name
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// No plugin with that name
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
}

/// Default pause between consecutive sends from one check
pub const DEFAULT_MESSAGE_DELAY: Duration = Duration::from_millis(100);

/// Cron scheduler configuration
#[derive(Debug, Clone)]
pub struct CronSchedulerConfig {
    /// Timezone cron expressions are evaluated in
    pub timezone: Tz,
    /// Delay between consecutive notifications
    pub message_delay: Duration,
}

impl Default for CronSchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            message_delay: DEFAULT_MESSAGE_DELAY,
        }
    }
}

impl CronSchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timezone
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set inter-message delay
    pub fn with_message_delay(mut self, delay: Duration) -> Self {
        self.message_delay = delay;
        self
    }
}

/// Snapshot of one cron task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// `plugin:schedule_id`
    pub name: String,
    /// Owning plugin
    pub plugin: String,
    /// Stable schedule identifier
    pub schedule_id: String,
    /// Cron expression
    pub expression: String,
    /// Schedule description
    pub description: String,
    /// Whether firings are skipped
    pub paused: bool,
    /// Next firing
    pub next_run: Option<DateTime<Utc>>,
    /// Last completed firing
    pub last_run: Option<DateTime<Utc>>,
    /// Completed firings
    pub run_count: u64,
}
