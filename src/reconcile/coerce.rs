use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::remote::{DestinationSchema, FieldType, FieldValue};

const NULL_SENTINELS: [&str; 3] = ["nan", "null", "none"];

/// Plausible digit count for phone-like identifiers
pub const PHONE_MIN_DIGITS: usize = 7;
pub const PHONE_MAX_DIGITS: usize = 15;

/// Why a candidate value was not written
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("empty value")]
    Empty,
    #[error("no mapping rule")]
    Unmapped,
    #[error("no such field in table: {0}")]
    NotInSchema(String),
    #[error("detail table field: {0}")]
    DetailField(String),
    #[error("not a number: {0}")]
    NotANumber(String),
    #[error("out of range: {0}")]
    OutOfRange(i64),
    #[error("no digits: {0}")]
    NoDigits(String),
    #[error("duplicate target: {0}")]
    DuplicateTarget(String),
}

/// How a destination field's value is produced from import text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Digits {
        #[serde(default = "default_min_digits")]
        min_len: usize,
        #[serde(default = "default_max_digits")]
        max_len: usize,
    },
    Text,
}

fn default_min_digits() -> usize {
    PHONE_MIN_DIGITS
}

fn default_max_digits() -> usize {
    PHONE_MAX_DIGITS
}

impl FieldRule {
    pub fn phone() -> Self {
        FieldRule::Digits {
            min_len: PHONE_MIN_DIGITS,
            max_len: PHONE_MAX_DIGITS,
        }
    }

    /// Apply the rule to an already-normalized value
    pub fn coerce(&self, value: &str) -> Result<Coerced, SkipReason> {
        match self {
            FieldRule::Integer { min, max } => {
                let number = parse_integer(value)?;
                if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                    return Err(SkipReason::OutOfRange(number));
                }
                Ok(Coerced::new(FieldValue::Int(number)))
            }
            FieldRule::Digits { min_len, max_len } => {
                let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    return Err(SkipReason::NoDigits(value.to_string()));
                }
                let warning = (digits.len() < *min_len || digits.len() > *max_len).then(|| {
                    format!("unusual digit count: {} ({} digits)", digits, digits.len())
                });
                Ok(Coerced {
                    value: FieldValue::Text(digits),
                    warning,
                })
            }
            FieldRule::Text => Ok(Coerced::new(FieldValue::text(value))),
        }
    }
}

/// A coerced value, possibly with a warning that does not block the write
#[derive(Debug, Clone, PartialEq)]
pub struct Coerced {
    pub value: FieldValue,
    pub warning: Option<String>,
}

impl Coerced {
    fn new(value: FieldValue) -> Self {
        Self {
            value,
            warning: None,
        }
    }
}

/// Trimmed value, or `None` for blank and null-looking input
pub fn normalize(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if NULL_SENTINELS
        .iter()
        .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
    {
        return None;
    }
    Some(trimmed)
}

/// Accepts "25" and "25.0"; fractional values truncate toward zero
fn parse_integer(value: &str) -> Result<i64, SkipReason> {
    if let Ok(n) = value.parse::<i64>() {
        return Ok(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.abs() < i64::MAX as f64 => Ok(f.trunc() as i64),
        _ => Err(SkipReason::NotANumber(value.to_string())),
    }
}

/// Per-field rules with a fallback on the destination field type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: BTreeMap<String, FieldRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "age".to_string(),
            FieldRule::Integer {
                min: Some(1),
                max: Some(120),
            },
        );
        rules.insert("phone".to_string(), FieldRule::phone());
        Self { rules }
    }
}

impl RuleSet {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, rule: FieldRule) {
        self.rules.insert(field.into(), rule);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.rules.contains_key(field)
    }

    /// Overlay another rule set; its rules win
    pub fn extend(&mut self, other: &RuleSet) {
        self.rules
            .extend(other.rules.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn rule_for(&self, field: &str, schema: &DestinationSchema) -> FieldRule {
        if let Some(rule) = self.rules.get(field) {
            return rule.clone();
        }
        match schema.field_type(field) {
            Some(FieldType::Number) => FieldRule::Integer {
                min: None,
                max: None,
            },
            Some(FieldType::Phone) => FieldRule::phone(),
            _ => FieldRule::Text,
        }
    }
}
