use std::sync::Arc;
use tracing::info;

use crate::cache::CacheStatus;
use crate::import::ImportContext;
use crate::sync::orchestrator::{SyncOrchestrator, TableCheck};
use crate::sync::result::{ConflictResolution, ConflictSelection, Envelope, SyncSummary};

/// Downstream surface: every call answers with an `Envelope`
#[derive(Clone)]
pub struct SyncService {
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncService {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub async fn sync(
        &self,
        payload: &[u8],
        filename: &str,
        context: &ImportContext,
    ) -> Envelope<SyncSummary> {
        let outcome = self.orchestrator.sync(payload, filename, context).await;
        if outcome.success {
            Envelope::ok(outcome.message, outcome.summary)
        } else {
            Envelope::failed(outcome.message, Some(outcome.summary))
        }
    }

    pub async fn resolve_conflicts(
        &self,
        selected: &[ConflictSelection],
    ) -> Envelope<ConflictResolution> {
        if selected.is_empty() {
            return Envelope::failed("No conflicts selected", None);
        }

        match self.orchestrator.resolve_conflicts(selected).await {
            Ok(resolution) => {
                let message = format!(
                    "Conflict update finished: {} updated, {} failed",
                    resolution.updated_count, resolution.failed_count
                );
                Envelope::ok(message, resolution)
            }
            Err(e) => Envelope::failed(e.to_string(), None),
        }
    }

    pub async fn cache_status(&self) -> Envelope<CacheStatus> {
        let status = self.orchestrator.cache().status().await;
        let message = if status.loaded {
            "Cache loaded"
        } else {
            "Cache not loaded"
        };
        Envelope::ok(message, status)
    }

    /// Re-read the whole parent table into the cache
    pub async fn cache_refresh(&self) -> Envelope<CacheStatus> {
        let table = self.orchestrator.config().parent_table();
        let cache = self.orchestrator.cache();

        match cache
            .hydrate(self.orchestrator.remote().as_ref(), &table)
            .await
        {
            Ok(unique) => {
                info!("Cache refreshed with {} unique key(s)", unique);
                Envelope::ok("Cache refreshed", cache.status().await)
            }
            Err(e) => Envelope::failed(format!("Cache refresh failed: {}", e), None),
        }
    }

    pub async fn cache_clear(&self) -> Envelope<CacheStatus> {
        let cache = self.orchestrator.cache();
        match cache.invalidate().await {
            Ok(()) => Envelope::ok("Cache cleared", cache.status().await),
            Err(e) => Envelope::failed(format!("Cache clear failed: {}", e), None),
        }
    }

    pub async fn check_tables(&self) -> Envelope<Vec<TableCheck>> {
        let checks = self.orchestrator.check_tables().await;
        if checks.iter().all(|check| check.ok) {
            Envelope::ok("Table check passed", checks)
        } else {
            Envelope::failed("Table check failed", Some(checks))
        }
    }
}
