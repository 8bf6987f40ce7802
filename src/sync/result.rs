use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::reconcile::{FieldConflict, ReconcileSummary};
use crate::remote::FieldValue;

/// Counters and messages accumulated during one run
#[derive(Debug)]
pub struct SyncResult {
    run_id: Uuid,
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub linked: usize,
    errors: Vec<String>,
    warnings: Vec<String>,
    reconcile: ReconcileSummary,
    started_at: DateTime<Utc>,
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncResult {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            total: 0,
            processed: 0,
            created: 0,
            updated: 0,
            linked: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            reconcile: ReconcileSummary::default(),
            started_at: Utc::now(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("✗ [{}] {}", self.run_id, message);
        self.errors.push(message);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] {}", self.run_id, message);
        self.warnings.push(message);
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn set_reconcile_summary(&mut self, summary: ReconcileSummary) {
        self.reconcile = summary;
    }

    /// Freeze the counters into the reported summary
    pub fn finish(self) -> SyncSummary {
        let finished_at = Utc::now();
        let duration = finished_at - self.started_at;
        let success_rate = if self.total > 0 {
            self.processed as f64 / self.total as f64
        } else {
            0.0
        };

        SyncSummary {
            run_id: self.run_id,
            total_records: self.total,
            processed_records: self.processed,
            created: self.created,
            updated: self.updated,
            linked: self.linked,
            error_count: self.errors.len(),
            warning_count: self.warnings.len(),
            errors: self.errors,
            warnings: self.warnings,
            has_conflicts: self.reconcile.has_conflicts(),
            conflicts_count: self.reconcile.conflicts.len(),
            updated_fields_count: self.reconcile.updated_fields.len(),
            skipped_fields_count: self.reconcile.skipped_fields.len(),
            field_mapping: self.reconcile,
            started_at: self.started_at,
            finished_at,
            duration_seconds: duration.num_milliseconds() as f64 / 1000.0,
            success_rate,
        }
    }
}

/// Finalized report of one run
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub total_records: usize,
    pub processed_records: usize,
    pub created: usize,
    pub updated: usize,
    pub linked: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub field_mapping: ReconcileSummary,
    pub has_conflicts: bool,
    pub conflicts_count: usize,
    pub updated_fields_count: usize,
    pub skipped_fields_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub success_rate: f64,
}

impl SyncSummary {
    pub fn conflicts(&self) -> &[FieldConflict] {
        &self.field_mapping.conflicts
    }
}

/// Outcome of a sync call; `success` is false only for run-level failures
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub summary: SyncSummary,
}

/// A reported conflict the operator chose to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSelection {
    #[serde(alias = "user_id")]
    pub natural_key: String,
    #[serde(alias = "field")]
    pub field_name: String,
    pub new_value: FieldValue,
}

impl From<&FieldConflict> for ConflictSelection {
    fn from(conflict: &FieldConflict) -> Self {
        Self {
            natural_key: conflict.natural_key.clone(),
            field_name: conflict.field_name.clone(),
            new_value: conflict.new_value.clone(),
        }
    }
}

/// Per-field tally of a conflict resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub updated_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

/// Uniform response shape of the service surface
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
