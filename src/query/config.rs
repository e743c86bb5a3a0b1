//! Builder configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How table aliases are generated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasStrategy {
    /// `e0`, `e1`, ... from the configured prefix.
    #[default]
    Sequential,
    /// The table name itself, suffixed with the counter on collision.
    TableName,
}

/// Tunables consulted by [`QueryBuilder`](crate::query::QueryBuilder).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryConfig {
    /// Alias generation strategy.
    pub alias_strategy: AliasStrategy,
    /// Prefix for sequential aliases.
    pub alias_prefix: String,
    /// Maximum nesting depth accepted by the criteria tree.
    pub max_criteria_depth: usize,
    /// Drop `$nin: []` predicates instead of rendering `1 = 1`.
    pub elide_empty_nin: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            alias_strategy: AliasStrategy::Sequential,
            alias_prefix: "e".to_owned(),
            max_criteria_depth: 256,
            elide_empty_nin: false,
        }
    }
}

impl QueryConfig {
    /// Aliases named after their tables, for SQL meant to be read by people.
    pub fn readable() -> Self {
        Self {
            alias_strategy: AliasStrategy::TableName,
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents).map_err(ConfigError::Parse)?;
        convert(raw)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

fn convert(raw: RawConfig) -> Result<QueryConfig, ConfigError> {
    let defaults = QueryConfig::default();
    let alias_prefix = raw.alias_prefix.unwrap_or(defaults.alias_prefix);
    if alias_prefix.is_empty()
        || !alias_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        || alias_prefix.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(ConfigError::InvalidValue {
            field: "alias_prefix",
            value: alias_prefix,
        });
    }
    let max_criteria_depth = raw.max_criteria_depth.unwrap_or(defaults.max_criteria_depth);
    if max_criteria_depth == 0 {
        return Err(ConfigError::InvalidValue {
            field: "max_criteria_depth",
            value: max_criteria_depth.to_string(),
        });
    }
    Ok(QueryConfig {
        alias_strategy: raw.alias_strategy.unwrap_or(defaults.alias_strategy),
        alias_prefix,
        max_criteria_depth,
        elide_empty_nin: raw.elide_empty_nin.unwrap_or(defaults.elide_empty_nin),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    alias_strategy: Option<AliasStrategy>,
    alias_prefix: Option<String>,
    max_criteria_depth: Option<usize>,
    elide_empty_nin: Option<bool>,
}

/// Errors raised while loading a [`QueryConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The document is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
    /// A field holds an unusable value.
    #[error("invalid value '{value}' for {field}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Rejected value.
        value: String,
    },
}
