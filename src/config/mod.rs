use serde::{Deserialize, Serialize};

use crate::refresh::RefreshMode;
use crate::{MatViewError, MatViewResult};

/// Maximum depth for cascade recompilation
/// Prevents runaway recursion through overly deep view hierarchies
pub const MAX_DEPENDENCY_DEPTH: usize = 32;

/// Schema used for names that are not schema-qualified
pub const DEFAULT_SCHEMA: &str = "public";

/// Longest identifier accepted by DDL
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Prefix of generated column names (`C1`, `C2`, ...)
pub const GENERATED_COLUMN_PREFIX: &str = "C";

/// Runtime settings of a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatViewConfig {
    pub default_schema: String,
    pub max_cascade_depth: usize,
    pub refresh_mode: RefreshMode,
    pub staleness_cache: bool,
    pub plan_cache: bool,
    pub generated_column_prefix: String,
    pub max_identifier_length: usize,
}

impl Default for MatViewConfig {
    fn default() -> Self {
        Self {
            default_schema: DEFAULT_SCHEMA.to_string(),
            max_cascade_depth: MAX_DEPENDENCY_DEPTH,
            refresh_mode: RefreshMode::Each,
            staleness_cache: true,
            plan_cache: true,
            generated_column_prefix: GENERATED_COLUMN_PREFIX.to_string(),
            max_identifier_length: MAX_IDENTIFIER_LENGTH,
        }
    }
}

impl MatViewConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json(json: &str) -> MatViewResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `MATVIEW_*` environment variables.
    pub fn from_env() -> MatViewResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MatViewResult<Self> {
        let mut config = Self::default();

        if let Some(schema) = lookup("MATVIEW_DEFAULT_SCHEMA") {
            config.default_schema = schema;
        }
        if let Some(depth) = lookup("MATVIEW_MAX_CASCADE_DEPTH") {
            config.max_cascade_depth = parse_setting("MATVIEW_MAX_CASCADE_DEPTH", &depth)?;
        }
        if let Some(mode) = lookup("MATVIEW_REFRESH_MODE") {
            config.refresh_mode = match mode.to_ascii_lowercase().as_str() {
                "each" => RefreshMode::Each,
                "exactly_one" => RefreshMode::ExactlyOne,
                _ => {
                    return Err(MatViewError::ConfigError {
                        setting: "MATVIEW_REFRESH_MODE".to_string(),
                        value: mode,
                        reason: "expected 'each' or 'exactly_one'".to_string(),
                    })
                }
            };
        }
        if let Some(flag) = lookup("MATVIEW_STALENESS_CACHE") {
            config.staleness_cache = parse_setting("MATVIEW_STALENESS_CACHE", &flag)?;
        }
        if let Some(flag) = lookup("MATVIEW_PLAN_CACHE") {
            config.plan_cache = parse_setting("MATVIEW_PLAN_CACHE", &flag)?;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> MatViewResult<()> {
        if self.max_cascade_depth == 0 {
            return Err(MatViewError::ConfigError {
                setting: "max_cascade_depth".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.generated_column_prefix.is_empty() {
            return Err(MatViewError::ConfigError {
                setting: "generated_column_prefix".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }
        crate::validation::validate_sql_identifier(&self.default_schema, "default_schema")
    }
}

fn parse_setting<T: std::str::FromStr>(setting: &str, value: &str) -> MatViewResult<T> {
    value.trim().parse().map_err(|_| MatViewError::ConfigError {
        setting: setting.to_string(),
        value: value.to_string(),
        reason: "could not parse value".to_string(),
    })
}
