//! Server configuration types
//!
//! Mirrors `config/default.toml`. Each section converts into the explicit
//! config struct its library component takes.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tidings_channels::NtfyConfig;
use tidings_core::cron::parse_timezone;
use tidings_core::{CronSchedulerConfig, EventSchedulerConfig, EventStoreConfig, PluginConfig};

/// Name of the event file inside `data_dir`
pub const EVENTS_FILE_NAME: &str = "scheduled-events.json";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreAppConfig,
    #[serde(default)]
    pub scheduler: SchedulerAppConfig,
    #[serde(default)]
    pub cron: CronAppConfig,
    pub ntfy: NtfyConfig,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl AppConfig {
    /// Location of the persisted event file
    pub fn events_file(&self) -> PathBuf {
        self.store
            .file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(EVENTS_FILE_NAME))
    }
}

/// Admin HTTP server
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

/// Event store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreAppConfig {
    /// Overrides `<data_dir>/scheduled-events.json`
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_flush_debounce_ms")]
    pub flush_debounce_ms: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

impl Default for StoreAppConfig {
    fn default() -> Self {
        Self {
            file: None,
            flush_debounce_ms: default_flush_debounce_ms(),
            retention_hours: default_retention_hours(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_flush_debounce_ms() -> u64 {
    1000
}

fn default_retention_hours() -> i64 {
    48
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

impl StoreAppConfig {
    pub fn to_store_config(&self) -> EventStoreConfig {
        EventStoreConfig::new()
            .with_flush_debounce(Duration::from_millis(self.flush_debounce_ms))
            .with_retention(ChronoDuration::hours(self.retention_hours))
            .with_cleanup_interval(Duration::from_secs(
                self.cleanup_interval_hours.max(1) * 3600,
            ))
    }
}

/// Event scheduler settings
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerAppConfig {
    #[serde(default = "default_horizon_hours")]
    pub horizon_hours: i64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Retry 4xx gateway responses like any other failure
    #[serde(default = "default_true")]
    pub retry_client_errors: bool,
}

impl Default for SchedulerAppConfig {
    fn default() -> Self {
        Self {
            horizon_hours: default_horizon_hours(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            retry_client_errors: true,
        }
    }
}

fn default_horizon_hours() -> i64 {
    6
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

impl SchedulerAppConfig {
    pub fn to_scheduler_config(&self) -> EventSchedulerConfig {
        EventSchedulerConfig::new()
            .with_horizon(ChronoDuration::hours(self.horizon_hours.max(1)))
            .with_reconcile_interval(Duration::from_secs(self.reconcile_interval_secs.max(1)))
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .with_retry_client_errors(self.retry_client_errors)
    }
}

/// Cron task settings
#[derive(Debug, Clone, Deserialize)]
pub struct CronAppConfig {
    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_message_delay_ms")]
    pub message_delay_ms: u64,
}

impl Default for CronAppConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            message_delay_ms: default_message_delay_ms(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_message_delay_ms() -> u64 {
    100
}

impl CronAppConfig {
    pub fn to_cron_config(&self) -> Result<CronSchedulerConfig> {
        let timezone = parse_timezone(&self.timezone)
            .with_context(|| format!("Invalid cron timezone '{}'", self.timezone))?;
        Ok(CronSchedulerConfig::default()
            .with_timezone(timezone)
            .with_message_delay(Duration::from_millis(self.message_delay_ms)))
    }
}
