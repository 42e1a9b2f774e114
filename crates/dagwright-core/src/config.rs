//! Project configuration schema (dagwright.toml)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use crate::schema::SourceColumn;

/// Environment variable consulted when the target has no connection string
pub const PG_CONNECTION_ENV: &str = "DAGWRIGHT_PG_CONNECTION";

/// SQL dialect of the target store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded SQLite
    Sqlite,

    /// PostgreSQL
    Postgres,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::Sqlite
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Postgres => write!(f, "postgres"),
        }
    }
}

/// Target store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name exposed to templates (dev, prod, ...)
    #[serde(default = "default_target_name")]
    pub name: String,

    /// Store type
    #[serde(rename = "type", default)]
    pub dialect: Dialect,

    /// SQLite database file (`:memory:` when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// PostgreSQL connection string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Use TLS for PostgreSQL connections
    #[serde(default)]
    pub tls: bool,

    /// Maximum number of models built concurrently
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_target_name() -> String {
    "dev".to_string()
}

fn default_threads() -> usize {
    1
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: default_target_name(),
            dialect: Dialect::default(),
            path: None,
            connection: None,
            tls: false,
            threads: default_threads(),
        }
    }
}

impl TargetConfig {
    /// Connection string from config, falling back to the environment
    pub fn connection_string(&self) -> Option<String> {
        self.connection
            .clone()
            .or_else(|| std::env::var(PG_CONNECTION_ENV).ok())
    }
}

/// Per-layer model defaults (`[models.staging]`, `[models.marts]`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialized: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// A declared raw source namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Namespace used in `source('<name>', ...)`
    pub name: String,

    /// Physical schema (defaults to the namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub tables: Vec<SourceTableConfig>,
}

impl SourceConfig {
    pub fn physical_schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(&self.name)
    }
}

/// A declared raw source table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTableConfig {
    pub name: String,

    #[serde(default)]
    pub columns: Vec<SourceColumn>,

    /// Natural key used by the loaders to skip duplicate rows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_key: Vec<String>,
}

/// Built-in generic column tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericTestKind {
    Unique,
    NotNull,
    AcceptedValues,
    Relationships,
}

impl GenericTestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::NotNull => "not_null",
            Self::AcceptedValues => "accepted_values",
            Self::Relationships => "relationships",
        }
    }
}

/// A generic test declared in `[[tests]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericTestConfig {
    pub model: String,

    pub column: String,

    #[serde(rename = "test")]
    pub kind: GenericTestKind,

    /// Allowed values (accepted_values)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,

    /// Referenced model (relationships)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Referenced column (relationships)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Directories scanned for models
    #[serde(default = "default_model_paths")]
    pub model_paths: Vec<String>,

    /// Directories scanned for singular assertions
    #[serde(default = "default_assertion_paths")]
    pub assertion_paths: Vec<String>,

    /// Output directory for compiled SQL and run results
    #[serde(default = "default_target_path")]
    pub target_path: String,

    #[serde(default)]
    pub target: TargetConfig,

    /// Template variables (`var('name')`)
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,

    /// Per-layer model defaults
    #[serde(default)]
    pub models: BTreeMap<String, LayerDefaults>,

    /// Raw source catalog
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Generic column tests
    #[serde(default)]
    pub tests: Vec<GenericTestConfig>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

fn default_model_paths() -> Vec<String> {
    vec!["models".to_string()]
}

fn default_assertion_paths() -> Vec<String> {
    vec!["assertions".to_string()]
}

fn default_target_path() -> String {
    "target".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "dagwright_project".to_string(),
            model_paths: default_model_paths(),
            assertion_paths: default_assertion_paths(),
            target_path: default_target_path(),
            target: TargetConfig::default(),
            vars: BTreeMap::new(),
            models: BTreeMap::new(),
            sources: Vec::new(),
            tests: Vec::new(),
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl ProjectConfig {
    /// Config file name looked up in a project directory
    pub const FILE_NAME: &'static str = "dagwright.toml";

    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: ProjectConfig = toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.threads == 0 {
            return Err(ConfigError::Invalid("target.threads must be at least 1".to_string()));
        }

        for test in &self.tests {
            match test.kind {
                GenericTestKind::AcceptedValues if test.values.is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "accepted_values test on {}.{} needs `values`",
                        test.model, test.column
                    )));
                }
                GenericTestKind::Relationships if test.to.is_none() || test.field.is_none() => {
                    return Err(ConfigError::Invalid(format!(
                        "relationships test on {}.{} needs `to` and `field`",
                        test.model, test.column
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Resolve a project-relative path
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.project_root.join(relative)
    }

    /// Defaults for a model layer, if configured
    pub fn layer_defaults(&self, layer: &str) -> Option<&LayerDefaults> {
        self.models.get(layer)
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogicalType;

    const SAMPLE: &str = r#"
name = "medical_warehouse"
model-paths = ["models"]

[target]
type = "sqlite"
threads = 2

[vars]
message_date_floor = "2020-01-01"
future_tolerance_days = 1

[models.staging]
materialized = "view"

[[sources]]
name = "raw"

[[sources.tables]]
name = "telegram_messages"
unique_key = ["message_id", "channel_name"]
columns = [
    { name = "message_id", type = "text" },
    { name = "views", type = "int" },
]

[[tests]]
model = "dim_channels"
column = "channel_key"
test = "unique"
"#;

    #[test]
    fn default_config() {
        let config = ProjectConfig::default();
        assert_eq!(config.target.dialect, Dialect::Sqlite);
        assert_eq!(config.model_paths, vec!["models".to_string()]);
        assert_eq!(config.target.threads, 1);
    }

    #[test]
    fn parse_sample_config() {
        let config = ProjectConfig::from_toml(SAMPLE).unwrap();

        assert_eq!(config.name, "medical_warehouse");
        assert_eq!(config.target.threads, 2);
        assert_eq!(config.vars["future_tolerance_days"], serde_json::json!(1));
        assert_eq!(
            config.layer_defaults("staging").and_then(|d| d.materialized.as_deref()),
            Some("view")
        );

        let raw = &config.sources[0];
        assert_eq!(raw.physical_schema(), "raw");
        assert_eq!(raw.tables[0].columns[1].logical_type, LogicalType::Int);
        assert_eq!(config.tests[0].kind, GenericTestKind::Unique);
    }

    #[test]
    fn relationships_test_requires_target() {
        let toml = r#"
name = "p"

[[tests]]
model = "fct_messages"
column = "channel_key"
test = "relationships"
"#;
        let err = ProjectConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn accepted_values_requires_values() {
        let toml = r#"
name = "p"

[[tests]]
model = "fct_messages"
column = "product_category"
test = "accepted_values"
values = []
"#;
        let err = ProjectConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("accepted_values")));
    }

    #[test]
    fn zero_threads_rejected() {
        let toml = "name = \"p\"\n[target]\nthreads = 0\n";
        assert!(matches!(ProjectConfig::from_toml(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = ProjectConfig::from_toml(SAMPLE).unwrap();
        let toml = toml::to_string(&config).unwrap();
        let parsed = ProjectConfig::from_toml(&toml).unwrap();
        assert_eq!(config.sources, parsed.sources);
        assert_eq!(config.target, parsed.target);
    }
}
