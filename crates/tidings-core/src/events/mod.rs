//! Durable future-dated notification events
//!
//! Two halves:
//!
//! - [`EventStore`]: the source of truth. Records are persisted as one JSON
//!   array, rewritten through a temp file + rename after a short coalescing
//!   window.
//! - [`EventScheduler`]: turns due dates into delivery attempts. Events due
//!   within the horizon get an in-process timer; a reconciliation loop picks
//!   up everything the timers missed, including after a restart.
//!
//! ```text
//! add_event ──► EventStore ◄── reconcile (every 60s)
//!                   │                │
//!                   ▼                ▼
//!              arm timer ──fire──► deliver ──► NotificationGateway
//!                                    │
//!                         mark_as_sent / mark_as_failed (+ re-arm)
//! ```

mod flush;
mod persistence;
mod scheduler;
mod store;
mod types;

pub use flush::{FlushPolicy, PendingFlush, DEFAULT_FLUSH_DEBOUNCE};
pub use persistence::{EventPersistence, JsonFilePersistence, MemoryPersistence};
pub use scheduler::{
    EventScheduler, EventSchedulerConfig, ReconcileReport, SchedulerError, SchedulerStatus,
};
pub use store::{EventStore, EventStoreConfig, NEXT_PENDING_WINDOW_SECS};
pub use types::{
    retry_backoff, EventPayload, EventQuery, EventStatus, EventUpdate, NewEvent,
    Result as StoreResult, ScheduledEvent, StoreError, StoreStats, DEFAULT_MAX_RETRIES,
    MAX_BACKOFF_SECS,
};
