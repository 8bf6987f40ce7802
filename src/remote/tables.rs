use std::time::Duration;
use tracing::{debug, info, warn};

use crate::remote::error::RemoteError;
use crate::remote::models::{FieldMap, FieldSchema, RecordPage, RemoteEntity, TableRef};

/// Page size for full-table scans
pub const SCAN_PAGE_SIZE: u32 = 500;

/// Chunking and pacing for batch creation
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between consecutive batches, to stay under the remote rate limit
    pub pause: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pause: Duration::from_millis(100),
        }
    }
}

/// Outcome of one record in a batch create, in input order
pub type BatchOutcome = Result<RemoteEntity, RemoteError>;

/// Table operations against the remote store (allows mocking for tests)
#[async_trait::async_trait]
pub trait RemoteTables: Send + Sync {
    async fn list_fields(&self, table: &TableRef) -> Result<Vec<FieldSchema>, RemoteError>;

    async fn query_records(
        &self,
        table: &TableRef,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<RecordPage, RemoteError>;

    async fn create_record(
        &self,
        table: &TableRef,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError>;

    async fn update_record(
        &self,
        table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError>;

    /// Create records in fixed-size batches with a pause between batches.
    ///
    /// A failed record does not stop the batch; its error is returned in its slot.
    async fn batch_create_records(
        &self,
        table: &TableRef,
        records: &[FieldMap],
        options: &BatchOptions,
    ) -> Vec<BatchOutcome> {
        let batch_size = options.batch_size.max(1);
        let batch_count = records.len().div_ceil(batch_size);
        let mut outcomes = Vec::with_capacity(records.len());

        for (index, batch) in records.chunks(batch_size).enumerate() {
            info!(
                "Batch {}/{}: creating {} record(s) in {}",
                index + 1,
                batch_count,
                batch.len(),
                table
            );

            for fields in batch {
                let outcome = self.create_record(table, fields).await;
                if let Err(e) = &outcome {
                    warn!("Batch create failed for one record: {}", e);
                }
                outcomes.push(outcome);
            }

            if index + 1 < batch_count && !options.pause.is_zero() {
                tokio::time::sleep(options.pause).await;
            }
        }

        let created = outcomes.iter().filter(|o| o.is_ok()).count();
        info!("Batch create finished: {}/{} succeeded", created, records.len());
        outcomes
    }
}

/// Page through an entire table
pub async fn fetch_all_records(
    remote: &dyn RemoteTables,
    table: &TableRef,
    page_size: u32,
) -> Result<Vec<RemoteEntity>, RemoteError> {
    let mut all_records = Vec::new();
    let mut page_token: Option<String> = None;
    let mut page_count = 0usize;

    loop {
        let page = remote
            .query_records(table, page_size, page_token.as_deref())
            .await?;
        all_records.extend(page.records);
        page_count += 1;

        if page_count % 10 == 0 {
            info!("Scan progress: {} record(s) loaded...", all_records.len());
        }

        if !page.has_more {
            break;
        }
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => break,
        }
    }

    debug!(
        "Scanned {} record(s) in {} page(s) from {}",
        all_records.len(),
        page_count,
        table
    );
    Ok(all_records)
}

/// Find the first record whose `key_field` equals `key`, scanning page by page.
///
/// Server-side filters are not used; matching happens on this side.
pub async fn find_by_natural_key(
    remote: &dyn RemoteTables,
    table: &TableRef,
    key_field: &str,
    key: &str,
) -> Result<Option<RemoteEntity>, RemoteError> {
    let mut page_token: Option<String> = None;

    loop {
        let page = remote
            .query_records(table, SCAN_PAGE_SIZE, page_token.as_deref())
            .await?;

        if let Some(found) = page
            .records
            .into_iter()
            .find(|record| record.natural_key(key_field).as_deref() == Some(key))
        {
            return Ok(Some(found));
        }

        if !page.has_more {
            return Ok(None);
        }
        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return Ok(None),
        }
    }
}
