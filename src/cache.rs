use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::db::{Snapshot, SnapshotError, SnapshotMeta, SnapshotStore};
use crate::remote::{
    fetch_all_records, FieldMap, RemoteEntity, RemoteError, RemoteTables, TableRef,
    SCAN_PAGE_SIZE,
};

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Where `ensure_loaded` found its data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Memory,
    Snapshot,
    Remote,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub loaded: bool,
    pub record_count: usize,
    pub unique_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub age_seconds: Option<i64>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, RemoteEntity>,
    loaded: bool,
    last_update: Option<DateTime<Utc>>,
    total_records: usize,
}

/// Keyed in-memory mirror of one remote table.
///
/// Entries are keyed by the natural key stored under `key_field`. The mirror is
/// best-effort: writes made by other actors are only seen after the next hydration.
pub struct EntityCache {
    key_field: String,
    store: Arc<dyn SnapshotStore>,
    state: RwLock<CacheState>,
    /// Serializes loading so concurrent callers hydrate once
    load_lock: Mutex<()>,
}

impl EntityCache {
    pub fn new(key_field: impl Into<String>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            key_field: key_field.into(),
            store,
            state: RwLock::new(CacheState::default()),
            load_lock: Mutex::new(()),
        }
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Page through the whole remote table and replace the in-memory state
    pub async fn hydrate(
        &self,
        remote: &dyn RemoteTables,
        table: &TableRef,
    ) -> Result<usize, CacheError> {
        info!("Hydrating entity cache from {}...", table);
        let records = fetch_all_records(remote, table, SCAN_PAGE_SIZE).await?;
        let total_records = records.len();

        let mut entries = HashMap::with_capacity(total_records);
        let mut without_key = 0usize;
        for record in records {
            match record.natural_key(&self.key_field) {
                Some(key) => {
                    if entries.insert(key.clone(), record).is_some() {
                        debug!("Duplicate natural key '{}' in {}, keeping the later record", key, table);
                    }
                }
                None => without_key += 1,
            }
        }

        if without_key > 0 {
            warn!(
                "{} record(s) in {} have no '{}' and were not cached",
                without_key, table, self.key_field
            );
        }

        let unique = entries.len();
        {
            let mut state = self.state.write().await;
            state.entries = entries;
            state.loaded = true;
            state.last_update = Some(Utc::now());
            state.total_records = total_records;
        }

        info!(
            "✓ Cache hydrated: {} record(s), {} unique key(s)",
            total_records, unique
        );

        if let Err(e) = self.flush().await {
            warn!("Could not save cache snapshot: {}", e);
        }

        Ok(unique)
    }

    /// Warm-first, cold-fallback loading: memory, then snapshot, then remote
    pub async fn ensure_loaded(
        &self,
        remote: &dyn RemoteTables,
        table: &TableRef,
    ) -> Result<CacheSource, CacheError> {
        if self.state.read().await.loaded {
            return Ok(CacheSource::Memory);
        }

        let _guard = self.load_lock.lock().await;

        // Another caller may have finished loading while we waited
        if self.state.read().await.loaded {
            return Ok(CacheSource::Memory);
        }

        match self.store.load().await {
            Ok(Some(snapshot)) => {
                let unique = snapshot.entities.len();
                let mut state = self.state.write().await;
                state.entries = snapshot.entities;
                state.loaded = true;
                state.last_update = Some(snapshot.meta.last_update);
                state.total_records = snapshot.meta.total_records;
                info!(
                    "✓ Cache restored from snapshot saved at {} ({} unique key(s))",
                    snapshot.meta.saved_at.to_rfc3339(),
                    unique
                );
                return Ok(CacheSource::Snapshot);
            }
            Ok(None) => debug!("No cache snapshot found"),
            Err(e) => warn!("Could not read cache snapshot, hydrating instead: {}", e),
        }

        self.hydrate(remote, table).await?;
        Ok(CacheSource::Remote)
    }

    pub async fn get(&self, key: &str) -> Option<RemoteEntity> {
        self.state.read().await.entries.get(key).cloned()
    }

    /// Look up several keys at once; missing keys are absent from the result
    pub async fn get_batch(&self, keys: &[String]) -> HashMap<String, RemoteEntity> {
        let state = self.state.read().await;
        keys.iter()
            .filter_map(|key| {
                state
                    .entries
                    .get(key)
                    .map(|entity| (key.clone(), entity.clone()))
            })
            .collect()
    }

    /// Record the latest remote state of an entity after a create or update
    pub async fn upsert(&self, key: &str, entity: RemoteEntity) {
        let mut state = self.state.write().await;
        if state.entries.insert(key.to_string(), entity).is_none() {
            state.total_records += 1;
        }
        state.last_update = Some(Utc::now());
        debug!("Cache upsert for '{}'", key);
    }

    /// Apply a partial update to a cached entity. Returns false if the key is not cached.
    pub async fn merge_fields(&self, key: &str, fields: &FieldMap) -> bool {
        let mut state = self.state.write().await;
        let Some(entity) = state.entries.get_mut(key) else {
            return false;
        };
        entity
            .fields
            .extend(fields.iter().map(|(name, value)| (name.clone(), value.clone())));
        state.last_update = Some(Utc::now());
        true
    }

    /// Persist the current state; does nothing until the cache has been loaded
    pub async fn flush(&self) -> Result<(), CacheError> {
        let snapshot = {
            let state = self.state.read().await;
            if !state.loaded {
                debug!("Cache not loaded, skipping flush");
                return Ok(());
            }
            let now = Utc::now();
            Snapshot {
                entities: state.entries.clone(),
                meta: SnapshotMeta {
                    last_update: state.last_update.unwrap_or(now),
                    saved_at: now,
                    total_records: state.total_records,
                    unique_keys: state.entries.len(),
                },
            }
        };

        self.store.save(&snapshot).await?;
        debug!("Cache flushed ({} entities)", snapshot.entities.len());
        Ok(())
    }

    /// Drop the in-memory state and delete the persisted snapshot
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        {
            let mut state = self.state.write().await;
            *state = CacheState::default();
        }
        self.store.delete().await?;
        info!("Cache cleared");
        Ok(())
    }

    pub async fn status(&self) -> CacheStatus {
        let state = self.state.read().await;
        CacheStatus {
            loaded: state.loaded,
            record_count: state.total_records,
            unique_count: state.entries.len(),
            last_update: state.last_update,
            age_seconds: state
                .last_update
                .map(|t| (Utc::now() - t).num_seconds().max(0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySnapshotStore;
    use crate::remote::{FieldSchema, FieldValue, RecordPage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves fixed records two per page and counts queries
    struct PagedTable {
        records: Vec<RemoteEntity>,
        queries: AtomicUsize,
    }

    impl PagedTable {
        fn new(keys: &[&str]) -> Self {
            let records = keys
                .iter()
                .enumerate()
                .map(|(i, key)| entity(&format!("rec{}", i), key))
                .collect();
            Self {
                records,
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteTables for PagedTable {
        async fn list_fields(&self, _table: &TableRef) -> Result<Vec<FieldSchema>, RemoteError> {
            Ok(vec![])
        }

        async fn query_records(
            &self,
            _table: &TableRef,
            _page_size: u32,
            page_token: Option<&str>,
        ) -> Result<RecordPage, RemoteError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
            let end = (start + 2).min(self.records.len());
            let has_more = end < self.records.len();
            Ok(RecordPage {
                records: self.records[start..end].to_vec(),
                has_more,
                next_page_token: has_more.then(|| end.to_string()),
            })
        }

        async fn create_record(
            &self,
            _table: &TableRef,
            _fields: &FieldMap,
        ) -> Result<RemoteEntity, RemoteError> {
            Err(RemoteError::Decode("read only".to_string()))
        }

        async fn update_record(
            &self,
            _table: &TableRef,
            _record_id: &str,
            _fields: &FieldMap,
        ) -> Result<RemoteEntity, RemoteError> {
            Err(RemoteError::Decode("read only".to_string()))
        }
    }

    fn entity(record_id: &str, key: &str) -> RemoteEntity {
        let mut fields = FieldMap::new();
        fields.insert("user_id".to_string(), FieldValue::text(key));
        RemoteEntity::new(record_id, fields)
    }

    fn table() -> TableRef {
        TableRef::new("app", "tbl")
    }

    #[tokio::test]
    async fn test_hydrate_pages_and_keeps_last_duplicate() {
        let remote = PagedTable::new(&["u1", "u2", "u3", "u1", "u4"]);
        let cache = EntityCache::new("user_id", Arc::new(MemorySnapshotStore::new()));

        let unique = cache.hydrate(&remote, &table()).await.unwrap();

        assert_eq!(unique, 4);
        assert_eq!(remote.queries.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get("u1").await.unwrap().record_id, "rec3");

        let status = cache.status().await;
        assert!(status.loaded);
        assert_eq!(status.record_count, 5);
        assert_eq!(status.unique_count, 4);
    }

    #[tokio::test]
    async fn test_ensure_loaded_prefers_memory_then_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let remote = PagedTable::new(&["u1", "u2"]);

        let cache = EntityCache::new("user_id", store.clone());
        assert_eq!(
            cache.ensure_loaded(&remote, &table()).await.unwrap(),
            CacheSource::Remote
        );
        assert_eq!(
            cache.ensure_loaded(&remote, &table()).await.unwrap(),
            CacheSource::Memory
        );
        assert!(store.has_snapshot());

        // A fresh cache over the same store warms up without touching the remote
        let queries_before = remote.queries.load(Ordering::SeqCst);
        let warm = EntityCache::new("user_id", store);
        assert_eq!(
            warm.ensure_loaded(&remote, &table()).await.unwrap(),
            CacheSource::Snapshot
        );
        assert_eq!(remote.queries.load(Ordering::SeqCst), queries_before);
        assert!(warm.get("u2").await.is_some());
    }

    #[tokio::test]
    async fn test_upsert_and_merge_fields() {
        let cache = EntityCache::new("user_id", Arc::new(MemorySnapshotStore::new()));
        cache.upsert("u9", entity("rec9", "u9")).await;

        let mut patch = FieldMap::new();
        patch.insert("city".to_string(), FieldValue::text("Beijing"));
        assert!(cache.merge_fields("u9", &patch).await);
        assert!(!cache.merge_fields("missing", &patch).await);

        let cached = cache.get("u9").await.unwrap();
        assert_eq!(cached.fields["city"], FieldValue::text("Beijing"));

        let batch = cache
            .get_batch(&["u9".to_string(), "nope".to_string()])
            .await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_drops_state_and_snapshot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let remote = PagedTable::new(&["u1"]);
        let cache = EntityCache::new("user_id", store.clone());

        cache.hydrate(&remote, &table()).await.unwrap();
        cache.invalidate().await.unwrap();

        assert!(!cache.status().await.loaded);
        assert!(cache.get("u1").await.is_none());
        assert!(!store.has_snapshot());
    }

    #[tokio::test]
    async fn test_flush_skipped_until_loaded() {
        let store = Arc::new(MemorySnapshotStore::new());
        let cache = EntityCache::new("user_id", store.clone());
        cache.upsert("u1", entity("rec1", "u1")).await;

        cache.flush().await.unwrap();
        assert!(!store.has_snapshot());
    }
}
