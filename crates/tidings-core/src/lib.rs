//! Tidings Core - Scheduling Engine
//!
//! This crate provides the scheduling logic behind the Tidings notifier:
//! - Events: a durable store of future-dated notifications plus the hybrid
//!   timer/reconciliation scheduler that delivers them
//! - Cron: plugin condition checks on cron cadences
//! - Plugin: the plugin contract and type registry
//! - Notification: the delivery gateway abstraction
//! - Clock: injectable time sources

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod cron;
pub mod events;
pub mod notification;
pub mod plugin;

pub use crate::cron::{
    CronError, CronExpression, CronSchedulerConfig, CronTaskScheduler, TaskInfo,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use events::{
    EventPayload, EventPersistence, EventQuery, EventScheduler, EventSchedulerConfig, EventStatus,
    EventStore, EventStoreConfig, EventUpdate, JsonFilePersistence, MemoryPersistence, NewEvent,
    ScheduledEvent, SchedulerError, SchedulerStatus, StoreError, StoreStats,
};
pub use notification::{DeliveryError, DeliveryResult, Notification, NotificationGateway, Priority};
pub use plugin::{
    CheckContext, Plugin, PluginConfig, PluginError, PluginRegistry, PluginResult, PluginSchedule,
};
