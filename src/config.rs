use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::reconcile::{FieldNameTable, FieldRule, RuleSet};
use crate::remote::{BatchOptions, ClientSettings, TableRef, DEFAULT_BASE_URL};

const ENV_PREFIX: &str = "ROSTERSYNC_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config file error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// The table holding one record per subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentTableConfig {
    pub app_token: String,
    pub table_id: String,
    pub key_field: String,
    pub name_field: String,
    pub phone_field: String,
}

impl Default for ParentTableConfig {
    fn default() -> Self {
        Self {
            app_token: String::new(),
            table_id: String::new(),
            key_field: "user_id".to_string(),
            name_field: "nickname".to_string(),
            phone_field: "phone".to_string(),
        }
    }
}

/// The table receiving one linked record per import row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailTableConfig {
    pub app_token: String,
    pub table_id: String,
    pub key_field: String,
    pub name_field: String,
    pub category_field: String,
    pub date_field: String,
    /// Link field pointing at the parent record
    pub link_field: String,
}

impl Default for DetailTableConfig {
    fn default() -> Self {
        Self {
            app_token: String::new(),
            table_id: String::new(),
            key_field: "user_id".to_string(),
            name_field: "nickname".to_string(),
            category_field: "course".to_string(),
            date_field: "learning_date".to_string(),
            link_field: "student".to_string(),
        }
    }
}

/// Application configuration.
///
/// Loaded from an optional JSON file, then overridden by `ROSTERSYNC_*`
/// environment variables (a `.env` file is read first).
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_id: String,
    pub app_secret: String,
    pub base_url: String,
    pub parent: ParentTableConfig,
    pub detail: DetailTableConfig,
    /// Import column -> destination field overrides, layered on the defaults
    pub field_names: FieldNameTable,
    /// Per-field coercion rules, layered on the defaults
    pub field_rules: RuleSet,
    pub snapshot_path: PathBuf,
    pub request_timeout_secs: u64,
    pub batch_size: usize,
    pub batch_pause_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            parent: ParentTableConfig::default(),
            detail: DetailTableConfig::default(),
            field_names: FieldNameTable::default(),
            field_rules: RuleSet::default(),
            snapshot_path: default_snapshot_path(),
            request_timeout_secs: 30,
            batch_size: 100,
            batch_pause_ms: 100,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("app_id", &self.app_id)
            .field("app_secret", &"***")
            .field("base_url", &self.base_url)
            .field("parent", &self.parent)
            .field("detail", &self.detail)
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

/// `~/.rostersync/cache.db`, or a relative path when there is no home directory
pub fn default_snapshot_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".rostersync"))
        .unwrap_or_else(|| PathBuf::from(".rostersync"))
        .join("cache.db")
}

/// Result of `Config::validate`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Config {
    /// Load `.env`, the optional JSON file, then the process environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }

        let env_file = std::env::var(format!("{}CONFIG", ENV_PREFIX))
            .ok()
            .map(PathBuf::from);
        let file = file.map(Path::to_path_buf).or(env_file);

        let base = match &file {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        base.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&text)?;

        // File entries extend the built-in tables instead of replacing them
        let mut names = FieldNameTable::default();
        names.extend(&config.field_names);
        config.field_names = names;

        let mut rules = RuleSet::default();
        rules.extend(&config.field_rules);
        config.field_rules = rules;

        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    /// Overlay `ROSTERSYNC_*` variables provided by `lookup`
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, suffix)).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = var("APP_ID") {
            self.app_id = v.trim().to_string();
        }
        if let Some(v) = var("APP_SECRET") {
            self.app_secret = v.trim().to_string();
        }
        if let Some(v) = var("BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("PARENT_APP_TOKEN") {
            self.parent.app_token = v;
        }
        if let Some(v) = var("PARENT_TABLE_ID") {
            self.parent.table_id = v;
        }
        if let Some(v) = var("DETAIL_APP_TOKEN") {
            self.detail.app_token = v;
        }
        if let Some(v) = var("DETAIL_TABLE_ID") {
            self.detail.table_id = v;
        }
        if let Some(v) = var("SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("BATCH_SIZE") {
            self.batch_size = parse_number("BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("BATCH_PAUSE_MS") {
            self.batch_pause_ms = parse_number("BATCH_PAUSE_MS", &v)?;
        }

        // The detail table usually lives in the same app as the parent table
        if self.detail.app_token.is_empty() {
            self.detail.app_token = self.parent.app_token.clone();
        }

        Ok(self)
    }

    /// Write the config as JSON, leaving the credentials out
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut redacted = self.clone();
        redacted.app_id.clear();
        redacted.app_secret.clear();

        std::fs::write(path, serde_json::to_string_pretty(&redacted)?)?;
        info!("Config saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> ConfigReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.app_id.trim().is_empty() {
            errors.push("missing app id".to_string());
        }
        if self.app_secret.trim().is_empty() {
            errors.push("missing app secret".to_string());
        }

        for (label, app_token, table_id) in [
            ("parent table", &self.parent.app_token, &self.parent.table_id),
            ("detail table", &self.detail.app_token, &self.detail.table_id),
        ] {
            if app_token.trim().is_empty() {
                errors.push(format!("{} is missing its app token", label));
            }
            if table_id.trim().is_empty() {
                errors.push(format!("{} is missing its table id", label));
            }
        }

        if self.parent.key_field.trim().is_empty() {
            errors.push("parent table key field is empty".to_string());
        }
        if self.request_timeout_secs == 0 {
            errors.push("request timeout must be positive".to_string());
        }
        if self.batch_size == 0 {
            errors.push("batch size must be positive".to_string());
        }

        if self.parent.table_id == self.detail.table_id
            && self.parent.app_token == self.detail.app_token
            && !self.parent.table_id.is_empty()
        {
            warnings.push("parent and detail tables are the same table".to_string());
        }
        if self.detail.link_field.trim().is_empty() {
            warnings.push("detail table has no link field; detail rows will not be linked".to_string());
        }

        ConfigReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate and turn errors into a `ConfigError`
    pub fn ensure_valid(&self) -> Result<ConfigReport, ConfigError> {
        let report = self.validate();
        if report.valid {
            Ok(report)
        } else {
            Err(ConfigError::Invalid(report.errors))
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            app_id: self.app_id.clone(),
            app_secret: self.app_secret.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn parent_table(&self) -> TableRef {
        TableRef::new(&self.parent.app_token, &self.parent.table_id)
    }

    pub fn detail_table(&self) -> TableRef {
        TableRef::new(&self.detail.app_token, &self.detail.table_id)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            batch_size: self.batch_size.max(1),
            pause: Duration::from_millis(self.batch_pause_ms),
        }
    }

    /// Field rules with the configured phone field forced to digits-only
    pub fn rules(&self) -> RuleSet {
        let mut rules = self.field_rules.clone();
        if !rules.contains(&self.parent.phone_field) {
            rules.insert(self.parent.phone_field.clone(), FieldRule::phone());
        }
        rules
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            name: format!("{}{}", ENV_PREFIX, name),
            value: value.to_string(),
        })
}
