use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::remote::DestinationSchema;

const PARENT_PREFIX: &str = "parent.";
const DETAIL_PREFIX: &str = "detail.";

/// Outcome of looking up an import column in the name table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Column maps to an existing parent-table field
    Field(String),
    /// Column belongs to the detail table and is handled elsewhere
    DetailField(String),
    /// Mapped, but the destination schema has no such field
    NotInSchema(String),
    Unmapped,
}

/// Import column name -> destination field name.
///
/// Targets may carry a `parent.` prefix (stripped) or a `detail.` prefix
/// (belongs to the detail table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNameTable {
    #[serde(default)]
    entries: BTreeMap<String, String>,
    /// Fall back to a destination field whose name equals the column with whitespace removed
    #[serde(default = "default_identity_match")]
    identity_match: bool,
}

fn default_identity_match() -> bool {
    true
}

impl Default for FieldNameTable {
    fn default() -> Self {
        let entries = [
            ("Name", "name"),
            ("City", "city"),
            ("Gender", "gender"),
            ("Age", "age"),
            ("Address", "address"),
            ("Industry", "industry"),
            ("WeChat", "wechat"),
            ("Wechat ID", "wechat"),
        ]
        .into_iter()
        .map(|(column, field)| (column.to_string(), field.to_string()))
        .collect();

        Self {
            entries,
            identity_match: true,
        }
    }
}

impl FieldNameTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries,
            identity_match: true,
        }
    }

    pub fn with_identity_match(mut self, enabled: bool) -> Self {
        self.identity_match = enabled;
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, target: impl Into<String>) {
        self.entries.insert(column.into(), target.into());
    }

    /// Overlay another table; its entries win
    pub fn extend(&mut self, other: &FieldNameTable) {
        self.entries
            .extend(other.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.identity_match = other.identity_match;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, column: &str, schema: &DestinationSchema) -> Resolution {
        if let Some(target) = self.entries.get(column) {
            if let Some(detail) = target.strip_prefix(DETAIL_PREFIX) {
                return Resolution::DetailField(detail.to_string());
            }
            let field = target.strip_prefix(PARENT_PREFIX).unwrap_or(target);
            return if schema.contains(field) {
                Resolution::Field(field.to_string())
            } else {
                Resolution::NotInSchema(field.to_string())
            };
        }

        if self.identity_match {
            let compact: String = column.chars().filter(|c| !c.is_whitespace()).collect();
            if !compact.is_empty() && schema.contains(&compact) {
                return Resolution::Field(compact);
            }
        }

        Resolution::Unmapped
    }
}
