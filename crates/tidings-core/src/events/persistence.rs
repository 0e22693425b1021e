//! Persistence backends for the event store
//!
//! The whole record set is written on each flush. The file backend writes a
//! temporary sibling and renames it over the primary file, so readers see
//! either the previous or the new snapshot, never a partial one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

use super::types::{Result, ScheduledEvent, StoreError};

/// Backend that loads and saves the full event set
#[async_trait]
pub trait EventPersistence: Send + Sync {
    /// Load every persisted event; a missing backing file is an empty set
    async fn load(&self) -> Result<Vec<ScheduledEvent>>;

    /// Replace the persisted set with `events`
    async fn save(&self, events: &[ScheduledEvent]) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    /// Persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Primary file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "scheduled-events.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl EventPersistence for JsonFilePersistence {
    async fn load(&self) -> Result<Vec<ScheduledEvent>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No event file yet, starting empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    async fn save(&self, events: &[ScheduledEvent]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let content = serde_json::to_vec_pretty(events)?;
        let temp_path = self.temp_path();

        fs::write(&temp_path, content)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        debug!(path = %self.path.display(), count = events.len(), "Event file written");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory backend; keeps the last saved snapshot
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshot: Mutex<Vec<ScheduledEvent>>,
}

impl MemoryPersistence {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-seeded with events, as if loaded from disk
    pub fn with_events(events: Vec<ScheduledEvent>) -> Self {
        Self {
            snapshot: Mutex::new(events),
        }
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Vec<ScheduledEvent> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventPersistence for MemoryPersistence {
    async fn load(&self) -> Result<Vec<ScheduledEvent>> {
        Ok(self.snapshot())
    }

    async fn save(&self, events: &[ScheduledEvent]) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = events.to_vec();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
