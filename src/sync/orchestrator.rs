use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, EntityCache};
use crate::config::Config;
use crate::import::{
    partition, CsvImportParser, DetailRow, ImportContext, ImportParser, ImportRecord,
    UniqueEntity,
};
use crate::reconcile::{Candidate, FieldReconciler};
use crate::remote::{
    fetch_all_records, find_by_natural_key, DestinationSchema, FieldMap, FieldValue,
    RemoteEntity, RemoteError, RemoteTables, SCAN_PAGE_SIZE,
};
use crate::sync::result::{
    ConflictResolution, ConflictSelection, SyncOutcome, SyncResult,
};

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

/// Millisecond timestamp (local midnight for plain dates), `None` if unparsable
pub fn reference_date_millis(value: &str) -> Option<i64> {
    let value = value.trim();
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Field listing of one configured table
#[derive(Debug, Clone, Serialize)]
pub struct TableCheck {
    pub role: String,
    pub table: String,
    pub ok: bool,
    pub field_count: usize,
    pub fields: Vec<FieldInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_code: i64,
    pub type_name: String,
}

/// Drives an import run: partition rows, resolve or create parent records,
/// then create linked detail records.
pub struct SyncOrchestrator {
    config: Config,
    remote: Arc<dyn RemoteTables>,
    cache: Arc<EntityCache>,
    parser: Arc<dyn ImportParser>,
}

impl SyncOrchestrator {
    pub fn new(config: Config, remote: Arc<dyn RemoteTables>, cache: Arc<EntityCache>) -> Self {
        Self {
            config,
            remote,
            cache,
            parser: Arc::new(CsvImportParser::new()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ImportParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn remote(&self) -> &Arc<dyn RemoteTables> {
        &self.remote
    }

    /// Parse an upload and reconcile it against the remote tables
    pub async fn sync(&self, payload: &[u8], filename: &str, context: &ImportContext) -> SyncOutcome {
        let mut result = SyncResult::new();
        info!("Starting sync {} of {}", result.run_id(), filename);

        if let Err(message) = self.check_config() {
            result.add_error(message.clone());
            return failed(message, result);
        }

        let parsed = match self.parser.parse(payload, filename, context) {
            Ok(parsed) => parsed,
            Err(e) => {
                let message = format!("Import parsing failed: {}", e);
                result.add_error(message.clone());
                return failed(message, result);
            }
        };

        for invalid in &parsed.invalid_rows {
            result.add_warning(format!("Row {} skipped: {}", invalid.row, invalid.error));
        }

        self.run(&parsed.records, result).await
    }

    /// Reconcile already-validated records
    pub async fn sync_records(&self, records: &[ImportRecord]) -> SyncOutcome {
        let mut result = SyncResult::new();
        if let Err(message) = self.check_config() {
            result.add_error(message.clone());
            return failed(message, result);
        }
        self.run(records, result).await
    }

    fn check_config(&self) -> Result<(), String> {
        let report = self.config.validate();
        if report.valid {
            Ok(())
        } else {
            Err(format!("Invalid configuration: {}", report.errors.join("; ")))
        }
    }

    async fn run(&self, records: &[ImportRecord], mut result: SyncResult) -> SyncOutcome {
        if records.is_empty() {
            let message = "No import data".to_string();
            result.add_error(message.clone());
            return failed(message, result);
        }

        let split = partition(records);
        result.total = split.details.len();
        info!(
            "Import holds {} unique entities and {} detail rows",
            split.entities.len(),
            split.details.len()
        );
        for mismatch in split.name_mismatches {
            result.add_warning(mismatch);
        }

        let mut reconciler =
            FieldReconciler::new(self.config.field_names.clone(), self.config.rules());

        let outcome = match self
            .resolve_parents(&split.entities, &mut reconciler, &mut result)
            .await
        {
            Ok(record_ids) => {
                self.create_details(&split.details, &record_ids, &mut result)
                    .await
            }
            Err(e) => Err(e),
        };

        result.set_reconcile_summary(reconciler.into_summary());

        if let Err(e) = outcome {
            let message = e.to_string();
            result.add_error(message.clone());
            return failed(message, result);
        }

        if let Err(e) = self.cache.flush().await {
            result.add_warning(format!("Could not save cache snapshot: {}", e));
        }

        let message = format!(
            "Sync finished: {} created, {} updated, {} detail record(s) linked",
            result.created, result.updated, result.linked
        );
        info!("✓ {}", message);

        SyncOutcome {
            success: true,
            message,
            summary: result.finish(),
        }
    }

    /// Returns natural key -> remote record id for every resolved parent.
    ///
    /// Only an authentication failure aborts; other remote failures are recorded
    /// per entity.
    async fn resolve_parents(
        &self,
        entities: &[UniqueEntity],
        reconciler: &mut FieldReconciler,
        result: &mut SyncResult,
    ) -> Result<HashMap<String, String>, RemoteError> {
        let table = self.config.parent_table();
        let parent = &self.config.parent;

        let schema = match self.remote.list_fields(&table).await {
            Ok(fields) => DestinationSchema::new(&fields),
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => {
                result.add_error(format!("Could not fetch fields of {}: {}", table, e));
                DestinationSchema::default()
            }
        };

        let keys: Vec<String> = entities.iter().map(|e| e.natural_key.clone()).collect();
        let existing = match self.cache.ensure_loaded(self.remote.as_ref(), &table).await {
            Ok(source) => {
                debug!("Entity cache ready ({:?})", source);
                self.cache.get_batch(&keys).await
            }
            Err(CacheError::Remote(e)) if e.is_auth() => return Err(e),
            Err(e) => {
                result.add_warning(format!(
                    "Entity cache unavailable, scanning {} directly: {}",
                    table, e
                ));
                self.scan_for_keys(&keys, result).await?
            }
        };
        info!("{} of {} entities already exist", existing.len(), entities.len());

        let mut record_ids = HashMap::with_capacity(entities.len());

        for entity in entities {
            let key = &entity.natural_key;
            let mut candidates: Vec<Candidate> = entity
                .attributes
                .iter()
                .map(|(column, value)| Candidate::column(column, value))
                .collect();
            if let Some(phone) = &entity.phone {
                candidates.push(Candidate::targeted("phone", &parent.phone_field, phone));
            }

            match existing.get(key) {
                Some(current) => {
                    record_ids.insert(key.clone(), current.record_id.clone());

                    let plan = reconciler.reconcile(
                        key,
                        &entity.display_name,
                        &candidates,
                        &schema,
                        Some(current),
                    );

                    if !plan.conflicts.is_empty() {
                        let details: Vec<String> = plan
                            .conflicts
                            .iter()
                            .map(|c| {
                                format!("{}: existing '{}' vs new '{}'", c.field_name, c.existing_value, c.new_value)
                            })
                            .collect();
                        result.add_warning(format!(
                            "{} ({}) has conflicting fields awaiting confirmation: {}",
                            entity.display_name,
                            key,
                            details.join("; ")
                        ));
                    }

                    if plan.safe_writes.is_empty() {
                        result.processed += 1;
                        continue;
                    }

                    match self
                        .remote
                        .update_record(&table, &current.record_id, &plan.safe_writes)
                        .await
                    {
                        Ok(_) => {
                            if !self.cache.merge_fields(key, &plan.safe_writes).await {
                                let mut cached = current.clone();
                                cached.fields.extend(plan.safe_writes.clone());
                                self.cache.upsert(key, cached).await;
                            }
                            result.updated += 1;
                            result.processed += 1;
                        }
                        Err(e) if e.is_auth() => return Err(e),
                        Err(e) => result.add_error(format!("Failed to update {}: {}", key, e)),
                    }
                }
                None => {
                    let plan =
                        reconciler.reconcile(key, &entity.display_name, &candidates, &schema, None);

                    let mut fields = plan.safe_writes;
                    fields.insert(parent.key_field.clone(), FieldValue::text(key));
                    fields.insert(
                        parent.name_field.clone(),
                        FieldValue::text(&entity.display_name),
                    );

                    match self.remote.create_record(&table, &fields).await {
                        Ok(created) => {
                            let mut cached_fields = fields;
                            cached_fields.extend(created.fields);
                            self.cache
                                .upsert(key, RemoteEntity::new(&created.record_id, cached_fields))
                                .await;
                            record_ids.insert(key.clone(), created.record_id);
                            result.created += 1;
                            result.processed += 1;
                        }
                        Err(e) if e.is_auth() => return Err(e),
                        Err(e) => result.add_error(format!("Failed to create {}: {}", key, e)),
                    }
                }
            }
        }

        Ok(record_ids)
    }

    /// Cache fallback: one full scan, filtered to the import's keys
    async fn scan_for_keys(
        &self,
        keys: &[String],
        result: &mut SyncResult,
    ) -> Result<HashMap<String, RemoteEntity>, RemoteError> {
        let table = self.config.parent_table();
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();

        match fetch_all_records(self.remote.as_ref(), &table, SCAN_PAGE_SIZE).await {
            Ok(records) => Ok(records
                .into_iter()
                .filter_map(|record| {
                    let key = record.natural_key(&self.config.parent.key_field)?;
                    wanted.contains(key.as_str()).then_some((key, record))
                })
                .collect()),
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                result.add_error(format!("Could not scan {}: {}", table, e));
                Ok(HashMap::new())
            }
        }
    }

    async fn create_details(
        &self,
        details: &[DetailRow],
        record_ids: &HashMap<String, String>,
        result: &mut SyncResult,
    ) -> Result<(), RemoteError> {
        let table = self.config.detail_table();
        let detail = &self.config.detail;

        let mut keys = Vec::new();
        let mut records = Vec::new();

        for row in details {
            let Some(parent_id) = record_ids.get(&row.natural_key) else {
                result.add_warning(format!(
                    "{} has no resolved parent record, detail row skipped",
                    row.natural_key
                ));
                continue;
            };

            let millis = reference_date_millis(&row.reference_date).unwrap_or_else(|| {
                result.add_warning(format!(
                    "Could not parse date '{}' for {}, using current time",
                    row.reference_date, row.natural_key
                ));
                Local::now().timestamp_millis()
            });

            let mut fields = FieldMap::new();
            fields.insert(detail.key_field.clone(), FieldValue::text(&row.natural_key));
            fields.insert(detail.name_field.clone(), FieldValue::text(&row.display_name));
            fields.insert(detail.category_field.clone(), FieldValue::text(&row.category));
            fields.insert(detail.date_field.clone(), FieldValue::Int(millis));
            if !detail.link_field.is_empty() {
                fields.insert(
                    detail.link_field.clone(),
                    FieldValue::Links(vec![parent_id.clone()]),
                );
            }

            keys.push(row.natural_key.as_str());
            records.push(fields);
        }

        if records.is_empty() {
            return Ok(());
        }

        let outcomes = self
            .remote
            .batch_create_records(&table, &records, &self.config.batch_options())
            .await;

        let mut auth_failure = None;
        for (key, outcome) in keys.into_iter().zip(outcomes) {
            match outcome {
                Ok(_) => result.linked += 1,
                Err(e) if e.is_auth() => {
                    auth_failure.get_or_insert(e);
                }
                Err(e) => result.add_error(format!("Failed to create detail record for {}: {}", key, e)),
            }
        }

        match auth_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Force-apply operator-approved values, one update per natural key.
    ///
    /// Counts are per field. An authentication failure stops the pass and is
    /// returned as the error; keys applied before it stay applied.
    pub async fn resolve_conflicts(
        &self,
        selections: &[ConflictSelection],
    ) -> Result<ConflictResolution, RemoteError> {
        let mut resolution = ConflictResolution::default();

        // Group by key, keeping first-seen order
        let mut groups: Vec<(String, FieldMap)> = Vec::new();
        for selection in selections {
            let position = match groups.iter().position(|(key, _)| *key == selection.natural_key) {
                Some(position) => position,
                None => {
                    groups.push((selection.natural_key.clone(), FieldMap::new()));
                    groups.len() - 1
                }
            };
            groups[position]
                .1
                .insert(selection.field_name.clone(), selection.new_value.clone());
        }

        info!(
            "Applying {} selected field(s) across {} record(s)",
            selections.len(),
            groups.len()
        );

        let outcome = self.apply_selected(groups, &mut resolution).await;

        if let Err(e) = self.cache.flush().await {
            warn!("Could not save cache snapshot: {}", e);
        }

        outcome.map(|()| resolution)
    }

    async fn apply_selected(
        &self,
        groups: Vec<(String, FieldMap)>,
        resolution: &mut ConflictResolution,
    ) -> Result<(), RemoteError> {
        let table = self.config.parent_table();
        let key_field = &self.config.parent.key_field;

        for (key, fields) in groups {
            let target = match self.cache.get(&key).await {
                Some(entity) => Ok(Some(entity)),
                None => find_by_natural_key(self.remote.as_ref(), &table, key_field, &key).await,
            };

            let entity = match target {
                Ok(Some(entity)) => entity,
                Ok(None) => {
                    resolution.failed_count += fields.len();
                    resolution.errors.push(format!("{} not found", key));
                    continue;
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    resolution.failed_count += fields.len();
                    resolution.errors.push(format!("{} lookup failed: {}", key, e));
                    continue;
                }
            };

            match self
                .remote
                .update_record(&table, &entity.record_id, &fields)
                .await
            {
                Ok(_) => {
                    if !self.cache.merge_fields(&key, &fields).await {
                        let mut cached = entity;
                        cached.fields.extend(fields.clone());
                        self.cache.upsert(&key, cached).await;
                    }
                    resolution.updated_count += fields.len();
                    info!("✓ Applied {} field(s) to {}", fields.len(), key);
                }
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!("✗ Failed to apply selected fields to {}: {}", key, e);
                    resolution.failed_count += fields.len();
                    resolution.errors.push(format!("{} update failed: {}", key, e));
                }
            }
        }

        Ok(())
    }

    /// List the fields of both configured tables
    pub async fn check_tables(&self) -> Vec<TableCheck> {
        let tables = [
            ("parent", self.config.parent_table()),
            ("detail", self.config.detail_table()),
        ];

        let checks = tables.iter().map(|(role, table)| async move {
            match self.remote.list_fields(table).await {
                Ok(fields) => TableCheck {
                    role: role.to_string(),
                    table: table.to_string(),
                    ok: true,
                    field_count: fields.len(),
                    fields: fields
                        .iter()
                        .map(|f| FieldInfo {
                            name: f.field_name.clone(),
                            type_code: f.field_type.into(),
                            type_name: f.field_type.name(),
                        })
                        .collect(),
                    error: None,
                },
                Err(e) => {
                    warn!("✗ Table check failed for {}: {}", table, e);
                    TableCheck {
                        role: role.to_string(),
                        table: table.to_string(),
                        ok: false,
                        field_count: 0,
                        fields: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        join_all(checks).await
    }
}

fn failed(message: String, result: SyncResult) -> SyncOutcome {
    SyncOutcome {
        success: false,
        message,
        summary: result.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_date_formats() {
        let day = reference_date_millis("2024-01-15").unwrap();
        let next = reference_date_millis("2024/01/16").unwrap();
        assert_eq!(next - day, 86_400_000);

        let with_time = reference_date_millis("2024-01-15 12:00:00").unwrap();
        assert_eq!(with_time - day, 12 * 3_600_000);
        assert_eq!(reference_date_millis("2024/01/15 12:00:00"), Some(with_time));

        assert_eq!(reference_date_millis("15.01.2024"), None);
        assert_eq!(reference_date_millis(""), None);
    }
}
