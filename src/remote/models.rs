use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered field name -> value mapping used for both source and destination records
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single field value as read from or written to the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Cross-reference to records in another table, by remote identifier
    Links(Vec<String>),
    /// Anything else the remote returns (user fields, attachments, rich text)
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// True when the value carries nothing a human would call data
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Links(ids) => ids.is_empty(),
            FieldValue::Json(value) => match value {
                serde_json::Value::Null => true,
                serde_json::Value::String(s) => s.trim().is_empty(),
                serde_json::Value::Array(items) => items.is_empty(),
                serde_json::Value::Object(map) => map.is_empty(),
                _ => false,
            },
            FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Float(_) => false,
        }
    }

    /// Normalized textual form used when comparing an existing value with a proposed one.
    ///
    /// Whole floats render without a fraction so a number field read back as `25.0`
    /// compares equal to an imported `25`. Rich-text segment arrays render as their text.
    pub fn comparable(&self) -> String {
        match self {
            FieldValue::Text(s) => s.trim().to_string(),
            FieldValue::Int(n) => n.to_string(),
            FieldValue::Float(f) => format_float(*f),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Links(ids) => ids.join(","),
            FieldValue::Json(value) => json_text(value).trim().to_string(),
        }
    }

    /// Best-effort plain text, `None` for empty values
    pub fn as_text(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.comparable())
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.comparable())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) => format_float(f),
            None => n.to_string(),
        },
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(items) => {
            // Text fields come back as segments: [{"type": "text", "text": "..."}]
            let all_segments = items
                .iter()
                .all(|item| item.get("text").and_then(|t| t.as_str()).is_some());
            if all_segments {
                items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                    .collect::<String>()
            } else {
                items.iter().map(json_text).collect::<Vec<_>>().join(",")
            }
        }
        serde_json::Value::Object(map) => match map.get("text").and_then(|t| t.as_str()) {
            Some(text) => text.to_string(),
            None => value.to_string(),
        },
    }
}

/// One record of a remote table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub record_id: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl RemoteEntity {
    pub fn new(record_id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            record_id: record_id.into(),
            fields,
        }
    }

    /// Natural key carried in `key_field`, if present and non-empty
    pub fn natural_key(&self, key_field: &str) -> Option<String> {
        self.fields.get(key_field).and_then(FieldValue::as_text)
    }
}

/// Addresses one table of the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub app_token: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(app_token: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            app_token: app_token.into(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_token, self.table_id)
    }
}

/// Destination field type class, from the remote type code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum FieldType {
    Text,
    Number,
    SingleSelect,
    MultiSelect,
    Date,
    Checkbox,
    User,
    Phone,
    Url,
    Attachment,
    Link,
    SingleLineText,
    Other(i64),
}

impl From<i64> for FieldType {
    fn from(code: i64) -> Self {
        match code {
            1 => FieldType::Text,
            2 => FieldType::Number,
            3 => FieldType::SingleSelect,
            4 => FieldType::MultiSelect,
            5 => FieldType::Date,
            7 => FieldType::Checkbox,
            11 => FieldType::User,
            13 => FieldType::Phone,
            15 => FieldType::Url,
            17 => FieldType::Attachment,
            1001 => FieldType::Link,
            1005 => FieldType::SingleLineText,
            other => FieldType::Other(other),
        }
    }
}

impl From<FieldType> for i64 {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => 1,
            FieldType::Number => 2,
            FieldType::SingleSelect => 3,
            FieldType::MultiSelect => 4,
            FieldType::Date => 5,
            FieldType::Checkbox => 7,
            FieldType::User => 11,
            FieldType::Phone => 13,
            FieldType::Url => 15,
            FieldType::Attachment => 17,
            FieldType::Link => 1001,
            FieldType::SingleLineText => 1005,
            FieldType::Other(code) => code,
        }
    }
}

impl FieldType {
    pub fn name(&self) -> String {
        match self {
            FieldType::Text => "text".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::SingleSelect => "single_select".to_string(),
            FieldType::MultiSelect => "multi_select".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::Checkbox => "checkbox".to_string(),
            FieldType::User => "user".to_string(),
            FieldType::Phone => "phone".to_string(),
            FieldType::Url => "url".to_string(),
            FieldType::Attachment => "attachment".to_string(),
            FieldType::Link => "link".to_string(),
            FieldType::SingleLineText => "single_line_text".to_string(),
            FieldType::Other(code) => format!("unknown({})", code),
        }
    }
}

/// Field definition of a destination table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(default)]
    pub field_id: String,
    pub field_name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Destination schema: which field names exist and their type class
#[derive(Debug, Clone, Default)]
pub struct DestinationSchema {
    fields: BTreeMap<String, FieldType>,
}

impl DestinationSchema {
    pub fn new(fields: &[FieldSchema]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|f| (f.field_name.clone(), f.field_type))
                .collect(),
        }
    }

    pub fn contains(&self, field_name: &str) -> bool {
        self.fields.contains_key(field_name)
    }

    pub fn field_type(&self, field_name: &str) -> Option<FieldType> {
        self.fields.get(field_name).copied()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One page of a record query
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<RemoteEntity>,
    pub has_more: bool,
    pub next_page_token: Option<String>,
}
