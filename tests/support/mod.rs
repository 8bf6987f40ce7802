#![allow(dead_code)]

pub mod mock_remote;

pub use mock_remote::MockRemoteStore;

use rostersync::cache::EntityCache;
use rostersync::config::Config;
use rostersync::db::MemorySnapshotStore;
use rostersync::remote::{FieldMap, FieldType, FieldValue, TableRef};
use rostersync::sync::SyncOrchestrator;
use std::sync::Arc;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.app_id = "cli_test".to_string();
    config.app_secret = "secret".to_string();
    config.parent.app_token = "app".to_string();
    config.parent.table_id = "tbl_parent".to_string();
    config.detail.app_token = "app".to_string();
    config.detail.table_id = "tbl_detail".to_string();
    config.batch_pause_ms = 0;
    config
}

pub fn parent_table() -> TableRef {
    TableRef::new("app", "tbl_parent")
}

pub fn detail_table() -> TableRef {
    TableRef::new("app", "tbl_detail")
}

/// Mock store with both tables defined
pub fn mock_remote() -> Arc<MockRemoteStore> {
    let remote = Arc::new(MockRemoteStore::new());
    remote.define_table(
        &parent_table(),
        &[
            ("user_id", FieldType::Text),
            ("nickname", FieldType::Text),
            ("phone", FieldType::Text),
            ("city", FieldType::Text),
            ("age", FieldType::Number),
        ],
    );
    remote.define_table(
        &detail_table(),
        &[
            ("user_id", FieldType::Text),
            ("nickname", FieldType::Text),
            ("course", FieldType::SingleSelect),
            ("learning_date", FieldType::Date),
            ("student", FieldType::Link),
        ],
    );
    remote
}

pub struct Harness {
    pub remote: Arc<MockRemoteStore>,
    pub store: Arc<MemorySnapshotStore>,
    pub cache: Arc<EntityCache>,
    pub orchestrator: SyncOrchestrator,
}

pub fn harness(remote: Arc<MockRemoteStore>) -> Harness {
    tracing_init();
    let store = Arc::new(MemorySnapshotStore::new());
    let cache = Arc::new(EntityCache::new("user_id", store.clone()));
    let orchestrator = SyncOrchestrator::new(test_config(), remote.clone(), cache.clone());
    Harness {
        remote,
        store,
        cache,
        orchestrator,
    }
}

pub fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), FieldValue::text(*value)))
        .collect()
}
