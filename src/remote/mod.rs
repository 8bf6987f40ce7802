// # Remote Module
//
// Typed access to the remote tabular store:
//
// - **CredentialBroker**: app access token with single-flight refresh
// - **RemoteTableClient**: field schema, paginated query, create, update
// - **RemoteTables**: trait seam the cache and orchestrator depend on, with the
//   batch-create pacing and the full-scan helpers built on top of it

mod client;
mod credentials;
mod error;
mod models;
mod tables;

pub use client::{ClientSettings, RemoteTableClient, DEFAULT_BASE_URL};
pub use credentials::{Credential, CredentialBroker};
pub use error::RemoteError;
pub use models::{
    DestinationSchema, FieldMap, FieldSchema, FieldType, FieldValue, RecordPage, RemoteEntity,
    TableRef,
};
pub use tables::{
    fetch_all_records, find_by_natural_key, BatchOptions, BatchOutcome, RemoteTables,
    SCAN_PAGE_SIZE,
};
