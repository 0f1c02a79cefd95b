//! Configuration schema and loading for shadowcheck.
//!
//! The config file is JSON, not the teacher's Styx format: the wire and
//! config format are both fixed to JSON by the specification this crate
//! implements, so loading goes through `serde_json` with
//! `#[serde(deny_unknown_fields)]` standing in for schema validation.

use serde::{Deserialize, Serialize};
use shadowcheck_proto::{ColTypesFormat, CustomSqlTypeMapping, Delimiter, UniqueTableColumnType};
use std::path::Path;
use thiserror::Error;

/// Configuration loaded from the project's `shadowcheck.json` (or
/// equivalent) config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: String,

    #[serde(default)]
    pub postgres_version: Option<String>,

    #[serde(default)]
    pub col_types_format: ColTypesFormatConfig,

    #[serde(default)]
    pub strict_date_time_checking: bool,

    #[serde(default)]
    pub custom_sql_type_mappings: Vec<CustomSqlTypeMapping>,

    #[serde(default)]
    pub unique_table_column_types: Vec<UniqueTableColumnType>,
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            migrations_dir: default_migrations_dir(),
            postgres_version: None,
            col_types_format: ColTypesFormatConfig::default(),
            strict_date_time_checking: false,
            custom_sql_type_mappings: Vec::new(),
            unique_table_column_types: Vec::new(),
        }
    }
}

/// JSON-serializable mirror of [`ColTypesFormat`]; kept separate so the
/// config crate doesn't need a `Copy` bound on `Delimiter`'s wire repr.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ColTypesFormatConfig {
    #[serde(default)]
    pub include_region_marker: bool,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_delimiter() -> char {
    ','
}

impl Default for ColTypesFormatConfig {
    fn default() -> Self {
        Self {
            include_region_marker: false,
            delimiter: default_delimiter(),
        }
    }
}

impl ColTypesFormatConfig {
    pub fn to_wire(self) -> Result<ColTypesFormat, ConfigError> {
        let delimiter = match self.delimiter {
            ',' => Delimiter::Comma,
            ';' => Delimiter::Semicolon,
            other => return Err(ConfigError::InvalidDelimiter { found: other }),
        };
        Ok(ColTypesFormat {
            include_region_marker: self.include_region_marker,
            delimiter,
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("colTypesFormat.delimiter must be ',' or ';', found {found:?}")]
    InvalidDelimiter { found: char },
}

impl Config {
    /// Load and validate a config file from disk.
    ///
    /// Unknown keys are rejected by `#[serde(deny_unknown_fields)]`, which
    /// satisfies the "unknown keys are rejected" requirement without a
    /// separate JSON-schema validation pass.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents, path)
    }

    /// Parse a config file's contents. Split out from [`Config::load`] so
    /// tests can exercise parsing without touching the filesystem.
    pub fn parse(contents: &str, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}
