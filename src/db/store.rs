use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

use crate::remote::RemoteEntity;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Bookkeeping saved next to the entity map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// When the in-memory mirror last changed
    pub last_update: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    /// Remote records seen at hydration plus records created since
    pub total_records: usize,
    pub unique_keys: usize,
}

/// Persisted copy of an entity cache
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub entities: HashMap<String, RemoteEntity>,
    pub meta: SnapshotMeta,
}

/// Durable key-value blob store for cache snapshots (allows mocking for tests)
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError>;
    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError>;
    async fn delete(&self) -> Result<(), SnapshotError>;
}

/// Snapshot store that lives only as long as the process
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, for warm-start scenarios
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Snapshot>> {
        // A poisoned lock still holds a usable snapshot
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        *self.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        Ok(self.lock().clone())
    }

    async fn delete(&self) -> Result<(), SnapshotError> {
        *self.lock() = None;
        Ok(())
    }
}
