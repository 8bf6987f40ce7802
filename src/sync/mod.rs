// # Sync Module
//
// Run-level sequencing on top of the cache, reconciler and remote client:
//
// - **SyncOrchestrator**: parse -> partition -> resolve parents -> create details -> finalize;
//   plus forced resolution of operator-selected conflicts
// - **SyncResult**: counters and messages, frozen into a `SyncSummary`
// - **SyncService**: the caller-facing surface, returning `Envelope`s

mod orchestrator;
mod result;
mod service;

pub use orchestrator::{reference_date_millis, FieldInfo, SyncOrchestrator, TableCheck};
pub use result::{
    ConflictResolution, ConflictSelection, Envelope, SyncOutcome, SyncResult, SyncSummary,
};
pub use service::SyncService;
