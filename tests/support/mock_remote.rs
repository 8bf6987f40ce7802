use rostersync::remote::{
    FieldMap, FieldSchema, FieldType, RecordPage, RemoteEntity, RemoteError, RemoteTables,
    TableRef,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Table {
    fields: Vec<FieldSchema>,
    records: Vec<RemoteEntity>,
}

/// In-memory remote store with call counters
#[derive(Default)]
pub struct MockRemoteStore {
    tables: Mutex<HashMap<TableRef, Table>>,
    next_id: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    fail_auth: AtomicBool,
    fail_schema: AtomicBool,
    failing_creates: Mutex<HashSet<String>>,
    failing_updates: Mutex<HashSet<String>>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_table(&self, table: &TableRef, fields: &[(&str, FieldType)]) {
        let fields = fields
            .iter()
            .enumerate()
            .map(|(i, (name, field_type))| FieldSchema {
                field_id: format!("fld{}", i),
                field_name: name.to_string(),
                field_type: *field_type,
            })
            .collect();
        self.tables.lock().unwrap().entry(table.clone()).or_default().fields = fields;
    }

    /// Insert a record directly, bypassing counters
    pub fn seed(&self, table: &TableRef, fields: FieldMap) -> String {
        let record_id = self.allocate_id();
        self.tables
            .lock()
            .unwrap()
            .entry(table.clone())
            .or_default()
            .records
            .push(RemoteEntity::new(&record_id, fields));
        record_id
    }

    pub fn records(&self, table: &TableRef) -> Vec<RemoteEntity> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    pub fn record(&self, table: &TableRef, record_id: &str) -> Option<RemoteEntity> {
        self.records(table)
            .into_iter()
            .find(|r| r.record_id == record_id)
    }

    pub fn fail_auth(&self, enabled: bool) {
        self.fail_auth.store(enabled, Ordering::SeqCst);
    }

    pub fn fail_schema(&self, enabled: bool) {
        self.fail_schema.store(enabled, Ordering::SeqCst);
    }

    /// Reject creates whose `user_id` field equals `key`
    pub fn fail_create_for(&self, key: &str) {
        self.failing_creates.lock().unwrap().insert(key.to_string());
    }

    /// Reject updates of `record_id`
    pub fn fail_update_for(&self, record_id: &str) {
        self.failing_updates.lock().unwrap().insert(record_id.to_string());
    }

    pub fn remote_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
            + self.query_calls.load(Ordering::SeqCst)
            + self.create_calls.load(Ordering::SeqCst)
            + self.update_calls.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> String {
        format!("rec{:04}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_auth(&self) -> Result<(), RemoteError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            Err(RemoteError::Auth("invalid app secret".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RemoteTables for MockRemoteStore {
    async fn list_fields(&self, table: &TableRef) -> Result<Vec<FieldSchema>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;
        if self.fail_schema.load(Ordering::SeqCst) {
            return Err(RemoteError::Api {
                code: 91402,
                message: "NOTEXIST".to_string(),
            });
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.fields.clone())
            .unwrap_or_default())
    }

    async fn query_records(
        &self,
        table: &TableRef,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<RecordPage, RemoteError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;

        let records = self.records(table);
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + page_size as usize).min(records.len());
        let has_more = end < records.len();

        Ok(RecordPage {
            records: records[start.min(end)..end].to_vec(),
            has_more,
            next_page_token: has_more.then(|| end.to_string()),
        })
    }

    async fn create_record(
        &self,
        table: &TableRef,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;

        let key = fields.get("user_id").and_then(|v| v.as_text());
        if key.is_some_and(|key| self.failing_creates.lock().unwrap().contains(&key)) {
            return Err(RemoteError::Api {
                code: 1254001,
                message: "WrongRequestBody".to_string(),
            });
        }

        let entity = RemoteEntity::new(self.allocate_id(), fields.clone());
        self.tables
            .lock()
            .unwrap()
            .entry(table.clone())
            .or_default()
            .records
            .push(entity.clone());
        Ok(entity)
    }

    async fn update_record(
        &self,
        table: &TableRef,
        record_id: &str,
        fields: &FieldMap,
    ) -> Result<RemoteEntity, RemoteError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth()?;

        if self.failing_updates.lock().unwrap().contains(record_id) {
            return Err(RemoteError::Api {
                code: 1254291,
                message: "Write conflict".to_string(),
            });
        }

        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .get_mut(table)
            .and_then(|t| t.records.iter_mut().find(|r| r.record_id == record_id))
            .ok_or_else(|| RemoteError::Api {
                code: 1254043,
                message: "RecordIdNotFound".to_string(),
            })?;
        record
            .fields
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(record.clone())
    }
}
