// # Reconcile Module
//
// Turns loosely named import columns into typed destination writes:
//
// - **FieldNameTable**: column -> field lookup with table prefixes
// - **RuleSet / FieldRule**: normalization and per-field coercion
// - **FieldReconciler**: safe write vs. conflict vs. skip, with a running summary

mod coerce;
mod mapping;
mod reconciler;

pub use coerce::{normalize, Coerced, FieldRule, RuleSet, SkipReason};
pub use mapping::{FieldNameTable, Resolution};
pub use reconciler::{
    Candidate, FieldConflict, FieldReconciler, ReconcileSummary, Reconciliation, SkippedField,
};
