//! ntfy gateway

use super::config::{NtfyAuth, NtfyConfig};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tidings_core::notification::{
    DeliveryError, DeliveryResult, Notification, NotificationGateway,
};
use tracing::{debug, error, info, instrument, warn};

/// Longest response body kept in an error
const MAX_ERROR_BODY: usize = 200;

/// Keep printable ASCII only and collapse whitespace.
///
/// Header values cannot carry control characters, and ntfy reads the
/// `Title` header as Latin-1, so anything outside ASCII is dropped.
/// ASCII whitespace and control characters become single spaces.
pub fn sanitize_title(title: &str) -> String {
    let printable: String = title
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c.is_ascii_graphic() { c } else { ' ' })
        .collect();
    printable.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Publishes notifications to an ntfy topic
#[derive(Debug, Clone)]
pub struct NtfyGateway {
    config: NtfyConfig,
    client: Client,
}

impl NtfyGateway {
    /// Create a gateway; validates the config and builds the HTTP client
    pub fn new(config: NtfyConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { config, client })
    }

    /// Create from environment
    pub fn from_env() -> Result<Self> {
        Self::new(NtfyConfig::from_env()?)
    }

    /// Gateway configuration
    pub fn config(&self) -> &NtfyConfig {
        &self.config
    }

    pub(crate) fn build_request(&self, notification: &Notification) -> RequestBuilder {
        let mut request = self
            .client
            .post(self.config.topic_url())
            .header("Priority", notification.priority.as_str())
            .body(notification.message.clone());

        let title = sanitize_title(&notification.title);
        if !title.is_empty() {
            request = request.header("Title", title);
        }
        if !notification.tags.is_empty() {
            request = request.header("Tags", notification.tags.join(","));
        }
        if let Some(click) = &notification.click {
            request = request.header("Click", click.as_str());
        }
        if let Some(attach) = &notification.attach {
            request = request.header("Attach", attach.as_str());
        }

        match self.config.auth() {
            NtfyAuth::None => request,
            NtfyAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            NtfyAuth::Bearer(token) => request.bearer_auth(token),
        }
    }

    /// Send one notification, reporting the failure kind
    #[instrument(skip(self, notification), fields(topic = %self.config.topic))]
    pub async fn try_send(&self, notification: &Notification) -> DeliveryResult<()> {
        let response = match self.build_request(notification).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                error!(title = %notification.title, timeout_secs = self.config.timeout_secs, "ntfy request timed out");
                return Err(DeliveryError::Timeout(self.config.timeout_secs));
            }
            Err(e) if e.is_builder() => {
                error!(title = %notification.title, error = %e, "Invalid ntfy request");
                return Err(DeliveryError::Invalid(e.to_string()));
            }
            Err(e) => {
                error!(title = %notification.title, error = %e, "ntfy request failed");
                return Err(DeliveryError::Network(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(title = %notification.title, status = status.as_u16(), "ntfy accepted notification");
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        if status.is_client_error() {
            warn!(
                title = %notification.title,
                status = status.as_u16(),
                body = %body,
                "ntfy rejected notification (check topic, credentials and headers)"
            );
            Err(DeliveryError::Client {
                status: status.as_u16(),
                body,
            })
        } else {
            error!(
                title = %notification.title,
                status = status.as_u16(),
                body = %body,
                "ntfy server error"
            );
            Err(DeliveryError::Server {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Send one notification. Returns whether the server accepted it.
    pub async fn send_notification(&self, notification: &Notification) -> bool {
        self.try_send(notification).await.is_ok()
    }

    /// Send sequentially with the configured delay between sends. Returns
    /// how many were accepted.
    pub async fn send_bulk_notifications(&self, notifications: &[Notification]) -> usize {
        let delay = self.config.bulk_delay();
        let mut sent = 0;
        for (i, notification) in notifications.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.send_notification(notification).await {
                sent += 1;
            }
        }
        info!(sent, total = notifications.len(), "Bulk delivery complete");
        sent
    }
}

#[async_trait]
impl NotificationGateway for NtfyGateway {
    async fn send(&self, notification: &Notification) -> DeliveryResult<()> {
        self.try_send(notification).await
    }
}
