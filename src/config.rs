use serde::Deserialize;

use crate::error::Result;
use crate::index::Bucketing;
use crate::query::DEFAULT_RECUR_DATE_BOUNDS;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IndexConfig {
    pub field: String,
    pub bucketing: Bucketing,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_recur_date_bounds")]
    pub recur_date_bounds: usize, // cap on expanded schedule occurrences per condition
    #[serde(default = "default_splits_enabled")]
    pub splits_enabled: bool,
    #[serde(default = "default_indexes")]
    pub indexes: Vec<IndexConfig>,
    #[serde(default = "default_database")]
    pub database: String, // ":memory:" or a path to the rule store
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_recur_date_bounds() -> usize {
    DEFAULT_RECUR_DATE_BOUNDS
}

fn default_splits_enabled() -> bool {
    true
}

fn default_indexes() -> Vec<IndexConfig> {
    vec![
        IndexConfig {
            field: "imported_payee".to_string(),
            bucketing: Bucketing::FirstChar,
        },
        IndexConfig {
            field: "payee".to_string(),
            bucketing: Bucketing::Exact,
        },
    ]
}

fn default_database() -> String {
    ":memory:".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recur_date_bounds: default_recur_date_bounds(),
            splits_enabled: default_splits_enabled(),
            indexes: default_indexes(),
            database: default_database(),
            log_filter: default_log_filter(),
        }
    }
}

impl EngineConfig {
    /// Reads an optional config file (TOML, JSON, ...) and then `TXRULES_*`
    /// environment variables, which take precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("TXRULES"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
