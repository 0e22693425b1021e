//! Notification requests and the delivery gateway seam
//!
//! Everything that ends up on a user's phone goes through a
//! [`NotificationGateway`]. The event scheduler and the cron task scheduler
//! share one gateway instance.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Notification priority, as understood by the push gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Silent, collapsed
    Min,
    /// No sound
    Low,
    /// Gateway default
    #[default]
    Default,
    /// Long vibration
    High,
    /// Pop-over, repeated alert
    Max,
}

impl Priority {
    /// Wire name of the priority
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Low => "low",
            Self::Default => "default",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One notification to push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Headline
    pub title: String,
    /// Body text
    pub message: String,
    /// Delivery priority
    #[serde(default)]
    pub priority: Priority,
    /// Tags (rendered as emoji by ntfy clients)
    #[serde(default)]
    pub tags: Vec<String>,
    /// URL opened when the notification is tapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<String>,
    /// URL of an attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attach: Option<String>,
}

impl Notification {
    /// Create a notification with default priority and no tags
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: Priority::Default,
            tags: Vec::new(),
            click: None,
            attach: None,
        }
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set click URL
    #[must_use]
    pub fn with_click(mut self, url: impl Into<String>) -> Self {
        self.click = Some(url.into());
        self
    }
}

/// Why a delivery attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Gateway rejected the request (4xx); usually a configuration problem
    #[error("gateway rejected request with status {status}: {body}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },
    /// Gateway failed (5xx)
    #[error("gateway error {status}: {body}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },
    /// Request exceeded the delivery timeout
    #[error("delivery timed out after {0}s")]
    Timeout(u64),
    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),
    /// Request could not be built
    #[error("invalid notification: {0}")]
    Invalid(String),
}

impl DeliveryError {
    /// Whether the failure was a 4xx response
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. })
    }
}

/// Result type for deliveries
pub type DeliveryResult<T> = std::result::Result<T, DeliveryError>;

/// Sends one notification to the outside world
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver a single notification
    async fn send(&self, notification: &Notification) -> DeliveryResult<()>;
}
