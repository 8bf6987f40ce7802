use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Category used when neither the row nor the caller supplies one
pub const DEFAULT_CATEGORY: &str = "Basic info import";

/// Out-of-band values applied to every row of one import
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportContext {
    /// Overrides each row's category when set
    pub category: Option<String>,
    /// Overrides each row's reference date when set
    pub reference_date: Option<String>,
}

impl ImportContext {
    pub fn new(category: Option<String>, reference_date: Option<String>) -> Self {
        Self {
            category: category.filter(|c| !c.trim().is_empty()),
            reference_date: reference_date.filter(|d| !d.trim().is_empty()),
        }
    }
}

/// A validated import row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub natural_key: String,
    pub display_name: String,
    pub phone: Option<String>,
    /// Every non-core column of the row, by original column name
    pub attributes: BTreeMap<String, String>,
    pub category: String,
    pub reference_date: String,
}

/// One subject after rows sharing a natural key are merged
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueEntity {
    pub natural_key: String,
    pub display_name: String,
    pub phone: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

/// One detail record to create, linked to its parent by natural key
#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub natural_key: String,
    pub display_name: String,
    pub category: String,
    pub reference_date: String,
}

/// A row that failed validation (1-based data row number)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRow {
    pub row: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedImport {
    pub records: Vec<ImportRecord>,
    pub invalid_rows: Vec<InvalidRow>,
    /// Core fields no column could be matched to
    pub missing_columns: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Import file is empty")]
    Empty,
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),
    #[error("Required column missing: {0}")]
    MissingColumn(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Turns raw upload bytes into validated import records
pub trait ImportParser: Send + Sync {
    fn parse(
        &self,
        raw: &[u8],
        filename: &str,
        context: &ImportContext,
    ) -> Result<ParsedImport, ParseError>;
}
