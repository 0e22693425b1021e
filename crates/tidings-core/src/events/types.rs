//! Scheduled event types and error definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::warn;

use crate::notification::{Notification, Priority};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Event store error types
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An event with this id already exists
    #[error("event already exists: {0}")]
    DuplicateId(String),
    /// File I/O failed
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The persisted file exists but cannot be parsed
    #[error("corrupt event file {path}: {source}")]
    Corrupt {
        /// File involved
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lifecycle status of a scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Waiting; no live timer
    Pending,
    /// Backed by a live timer
    Scheduled,
    /// Delivered (terminal)
    Sent,
    /// Out of retries (terminal)
    Failed,
}

impl EventStatus {
    /// Sent or failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What gets pushed when the event comes due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    /// Headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Delivery priority
    #[serde(default)]
    pub priority: Priority,
    /// Tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Click URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
    /// Attachment URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach: Option<String>,
    /// Plugin-specific fields carried along untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventPayload {
    /// Payload with default priority
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: Priority::Default,
            tags: Vec::new(),
            click: None,
            attach: None,
            extra: Map::new(),
        }
    }

    /// Build the outbound notification
    pub fn to_notification(&self) -> Notification {
        Notification {
            title: self.title.clone(),
            message: self.message.clone(),
            priority: self.priority,
            tags: self.tags.clone(),
            click: self.click.clone(),
            attach: self.attach.clone(),
        }
    }
}

impl From<Notification> for EventPayload {
    fn from(n: Notification) -> Self {
        Self {
            title: n.title,
            message: n.message,
            priority: n.priority,
            tags: n.tags,
            click: n.click,
            attach: n.attach,
            extra: Map::new(),
        }
    }
}

/// A persisted, future-dated notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEvent {
    /// Caller-supplied idempotency key
    pub id: String,
    /// Plugin that registered the event
    pub plugin_name: String,
    /// Free-form event kind, e.g. `low_tide`
    pub event_type: String,
    /// When to deliver
    pub scheduled_for: DateTime<Utc>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Attempts allowed before terminal failure
    pub max_retries: u32,
    /// Notification content
    pub payload: EventPayload,
    /// Caller metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Last delivery attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the event reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Most recent delivery error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ScheduledEvent {
    /// Time left until the event is due (negative when overdue)
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        self.scheduled_for - now
    }
}

/// Default retry budget for new events
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Caller input for [`EventStore::add`](super::EventStore::add)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    /// Idempotency key
    pub id: String,
    /// Registering plugin
    pub plugin_name: String,
    /// Event kind
    pub event_type: String,
    /// Due instant
    pub scheduled_for: DateTime<Utc>,
    /// Retry budget
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Notification content
    pub payload: EventPayload,
    /// Caller metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl NewEvent {
    /// Create a new event input
    pub fn new(
        id: impl Into<String>,
        plugin_name: impl Into<String>,
        event_type: impl Into<String>,
        scheduled_for: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: id.into(),
            plugin_name: plugin_name.into(),
            event_type: event_type.into(),
            scheduled_for,
            max_retries: DEFAULT_MAX_RETRIES,
            payload,
            metadata: Map::new(),
        }
    }

    /// Set max retries
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach a metadata value
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub(crate) fn into_event(self, now: DateTime<Utc>) -> ScheduledEvent {
        ScheduledEvent {
            id: self.id,
            plugin_name: self.plugin_name,
            event_type: self.event_type,
            scheduled_for: self.scheduled_for,
            status: EventStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries,
            payload: self.payload,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            completed_at: None,
            last_error: None,
        }
    }
}

/// Partial update; the id cannot be changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventUpdate {
    /// New status
    pub status: Option<EventStatus>,
    /// New due instant
    pub scheduled_for: Option<DateTime<Utc>>,
    /// New retry count
    pub retry_count: Option<u32>,
    /// New retry budget
    pub max_retries: Option<u32>,
    /// Replacement payload
    pub payload: Option<EventPayload>,
    /// Replacement metadata
    pub metadata: Option<Map<String, Value>>,
    /// Last attempt timestamp
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Completion timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error
    pub last_error: Option<String>,
}

impl EventUpdate {
    /// Terminal records keep their status; other fields still apply.
    pub(crate) fn apply(self, event: &mut ScheduledEvent) {
        if let Some(status) = self.status {
            if event.status.is_terminal() && status != event.status {
                warn!(event_id = %event.id, from = %event.status, to = %status, "Ignoring status change out of a terminal state");
            } else {
                event.status = status;
            }
        }
        if let Some(at) = self.scheduled_for {
            event.scheduled_for = at;
        }
        if let Some(count) = self.retry_count {
            event.retry_count = count;
        }
        if let Some(max) = self.max_retries {
            event.max_retries = max;
        }
        if let Some(payload) = self.payload {
            event.payload = payload;
        }
        if let Some(metadata) = self.metadata {
            event.metadata = metadata;
        }
        if let Some(at) = self.last_attempt_at {
            event.last_attempt_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            event.completed_at = Some(at);
        }
        if let Some(err) = self.last_error {
            event.last_error = Some(err);
        }
    }
}

/// Filter for [`EventStore::query`](super::EventStore::query)
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Accepted statuses; `None` accepts all
    pub statuses: Option<Vec<EventStatus>>,
    /// Only events from this plugin
    pub plugin_name: Option<String>,
    /// Due at or before this instant
    pub before: Option<DateTime<Utc>>,
    /// Due strictly after this instant
    pub after: Option<DateTime<Utc>>,
}

impl EventQuery {
    /// Match everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to statuses
    #[must_use]
    pub fn with_statuses(mut self, statuses: &[EventStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    /// Restrict to one plugin
    #[must_use]
    pub fn with_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = Some(plugin_name.into());
        self
    }

    /// Due at or before
    #[must_use]
    pub fn before(mut self, at: DateTime<Utc>) -> Self {
        self.before = Some(at);
        self
    }

    /// Due strictly after
    #[must_use]
    pub fn after(mut self, at: DateTime<Utc>) -> Self {
        self.after = Some(at);
        self
    }

    pub(crate) fn matches(&self, event: &ScheduledEvent) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&event.status) {
                return false;
            }
        }
        if let Some(plugin) = &self.plugin_name {
            if &event.plugin_name != plugin {
                return false;
            }
        }
        if let Some(before) = self.before {
            if event.scheduled_for > before {
                return false;
            }
        }
        if let Some(after) = self.after {
            if event.scheduled_for <= after {
                return false;
            }
        }
        true
    }
}

/// Per-status record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Total records
    pub total: usize,
    /// Pending records
    pub pending: usize,
    /// Scheduled records
    pub scheduled: usize,
    /// Sent records
    pub sent: usize,
    /// Failed records
    pub failed: usize,
}

/// Longest retry delay
pub const MAX_BACKOFF_SECS: i64 = 60;

/// Delay before retry number `retry_count`: `min(2^retry_count, 60)` seconds
pub fn retry_backoff(retry_count: u32) -> Duration {
    let secs = if retry_count >= 6 {
        MAX_BACKOFF_SECS
    } else {
        (1_i64 << retry_count).min(MAX_BACKOFF_SECS)
    };
    Duration::seconds(secs)
}
