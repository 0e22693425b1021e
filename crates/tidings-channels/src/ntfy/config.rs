//! ntfy configuration types

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between sends in a bulk delivery
pub const DEFAULT_BULK_DELAY: Duration = Duration::from_millis(100);

/// Authorization scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NtfyAuth {
    /// No `Authorization` header
    None,
    /// HTTP basic credentials
    Basic {
        /// User name
        username: String,
        /// Password
        password: String,
    },
    /// Access token
    Bearer(String),
}

/// ntfy gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NtfyConfig {
    /// Server base URL, e.g. `https://ntfy.sh`
    pub base_url: String,
    /// Topic to publish to
    pub topic: String,
    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Access token; takes precedence over basic credentials
    #[serde(default)]
    pub token: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between bulk sends in milliseconds
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_bulk_delay_ms() -> u64 {
    DEFAULT_BULK_DELAY.as_millis() as u64
}

impl NtfyConfig {
    /// Create with required fields
    #[must_use]
    pub fn new(base_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            topic: topic.into(),
            username: None,
            password: None,
            token: None,
            timeout_secs: default_timeout_secs(),
            bulk_delay_ms: default_bulk_delay_ms(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("NTFY_URL")
            .map_err(|_| Error::Config("NTFY_URL not set".to_string()))?;
        let topic = std::env::var("NTFY_TOPIC")
            .map_err(|_| Error::Config("NTFY_TOPIC not set".to_string()))?;

        let mut config = Self::new(base_url, topic);
        config.username = std::env::var("NTFY_USERNAME").ok();
        config.password = std::env::var("NTFY_PASSWORD").ok();
        config.token = std::env::var("NTFY_TOKEN").ok();
        config.validate()?;
        Ok(config)
    }

    /// Set basic credentials
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set access token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set bulk delay
    #[must_use]
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Bulk delay
    pub fn bulk_delay(&self) -> Duration {
        Duration::from_millis(self.bulk_delay_ms)
    }

    /// Resolved authorization scheme
    pub fn auth(&self) -> NtfyAuth {
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            return NtfyAuth::Bearer(token.to_string());
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => NtfyAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => NtfyAuth::None,
        }
    }

    /// Publish URL for the topic
    pub fn topic_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.topic)
    }

    /// Reject configurations that cannot produce a valid request
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.topic.is_empty() || self.topic.contains('/') {
            return Err(Error::Config(format!("invalid topic '{}'", self.topic)));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "username and password must be set together".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }
}
