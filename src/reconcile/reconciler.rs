use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::reconcile::coerce::{normalize, RuleSet, SkipReason};
use crate::reconcile::mapping::{FieldNameTable, Resolution};
use crate::remote::{DestinationSchema, FieldMap, FieldValue, RemoteEntity};

/// One import attribute offered for writing
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub column: String,
    pub value: String,
    /// Destination field known up front (core fields); bypasses the name table
    pub target: Option<String>,
}

impl Candidate {
    pub fn column(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            target: None,
        }
    }

    pub fn targeted(
        column: impl Into<String>,
        target: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
            target: Some(target.into()),
        }
    }
}

/// A proposed value that differs from an existing non-empty remote value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field_name: String,
    pub existing_value: FieldValue,
    pub new_value: FieldValue,
    pub natural_key: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedField {
    pub column: String,
    pub reason: SkipReason,
}

impl SkippedField {
    pub fn label(&self) -> String {
        format!("{} ({})", self.column, self.reason)
    }
}

/// Classification of one entity's candidates
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub safe_writes: FieldMap,
    pub skipped: Vec<SkippedField>,
    pub conflicts: Vec<FieldConflict>,
    pub warnings: Vec<String>,
}

/// Running totals over a whole reconciliation pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub updated_fields: Vec<String>,
    pub skipped_fields: Vec<String>,
    pub conflicts: Vec<FieldConflict>,
    pub warnings: Vec<String>,
}

impl ReconcileSummary {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Maps import columns onto a destination schema and sorts each value into
/// safe write, conflict or skip.
#[derive(Debug, Clone)]
pub struct FieldReconciler {
    names: FieldNameTable,
    rules: RuleSet,
    summary: ReconcileSummary,
}

impl FieldReconciler {
    pub fn new(names: FieldNameTable, rules: RuleSet) -> Self {
        Self {
            names,
            rules,
            summary: ReconcileSummary::default(),
        }
    }

    /// Classify `candidates` for one subject against its existing remote state.
    ///
    /// With no existing entity every validated candidate is a safe write.
    pub fn reconcile(
        &mut self,
        natural_key: &str,
        display_name: &str,
        candidates: &[Candidate],
        schema: &DestinationSchema,
        existing: Option<&RemoteEntity>,
    ) -> Reconciliation {
        let mut outcome = Reconciliation::default();
        let mut written_labels = Vec::new();
        // Destination fields already taken by an earlier valid candidate
        let mut claimed: HashSet<String> = HashSet::new();

        for candidate in candidates {
            let field = match &candidate.target {
                Some(target) => target.clone(),
                None => match self.names.resolve(&candidate.column, schema) {
                    Resolution::Field(field) => field,
                    Resolution::DetailField(_) => continue,
                    Resolution::NotInSchema(field) => {
                        outcome.skip(&candidate.column, SkipReason::NotInSchema(field));
                        continue;
                    }
                    Resolution::Unmapped => {
                        outcome.skip(&candidate.column, SkipReason::Unmapped);
                        continue;
                    }
                },
            };

            let Some(value) = normalize(&candidate.value) else {
                outcome.skip(&candidate.column, SkipReason::Empty);
                continue;
            };

            let coerced = match self.rules.rule_for(&field, schema).coerce(value) {
                Ok(coerced) => coerced,
                Err(reason) => {
                    outcome.skip(&candidate.column, reason);
                    continue;
                }
            };

            if !claimed.insert(field.clone()) {
                outcome.skip(&candidate.column, SkipReason::DuplicateTarget(field));
                continue;
            }

            if let Some(warning) = coerced.warning {
                warn!("{} '{}' for {}: {}", field, value, natural_key, warning);
                outcome
                    .warnings
                    .push(format!("{} ({}): {}", field, natural_key, warning));
            }

            let existing_value = existing
                .and_then(|entity| entity.fields.get(&field))
                .filter(|v| !v.is_empty());

            match existing_value {
                None => {
                    written_labels.push(format!("{} -> {}", candidate.column, field));
                    outcome.safe_writes.insert(field, coerced.value);
                }
                Some(current) if current.comparable() == coerced.value.comparable() => {
                    debug!("{} for {} already up to date", field, natural_key);
                }
                Some(current) => {
                    outcome.conflicts.push(FieldConflict {
                        field_name: field,
                        existing_value: current.clone(),
                        new_value: coerced.value,
                        natural_key: natural_key.to_string(),
                        display_name: display_name.to_string(),
                    });
                }
            }
        }

        self.summary.updated_fields.extend(written_labels);
        self.summary
            .skipped_fields
            .extend(outcome.skipped.iter().map(SkippedField::label));
        self.summary
            .conflicts
            .extend(outcome.conflicts.iter().cloned());
        self.summary
            .warnings
            .extend(outcome.warnings.iter().cloned());

        outcome
    }

    pub fn summary(&self) -> &ReconcileSummary {
        &self.summary
    }

    pub fn into_summary(self) -> ReconcileSummary {
        self.summary
    }
}

impl Reconciliation {
    fn skip(&mut self, column: &str, reason: SkipReason) {
        debug!("Skipping column '{}': {}", column, reason);
        self.skipped.push(SkippedField {
            column: column.to_string(),
            reason,
        });
    }
}
