// # Snapshot Storage
//
// Durable copies of the entity cache, so a restart can skip a full hydration:
//
// - **SnapshotStore**: save / load / delete trait seam
// - **SqliteSnapshotStore**: one SQLite file, rows scoped per cache
// - **MemorySnapshotStore**: process-local store for tests and dry runs

mod sqlite;
mod store;

pub use sqlite::SqliteSnapshotStore;
pub use store::{MemorySnapshotStore, Snapshot, SnapshotError, SnapshotMeta, SnapshotStore};
