//! dagwright core
//!
//! Core domain model shared by every crate in the workspace.
//! Diagnostic codes and the report schema are versioned - never rename them.

pub mod value;
pub mod surrogate_key;
pub mod diagnostic;
pub mod schema;
pub mod report;
pub mod config;
pub mod sql;

pub use value::{Value, Row, RowSet};
pub use surrogate_key::{canonical_form, generate_surrogate_key, SurrogateKey, KEY_DELIMITER, NULL_SENTINEL};
pub use diagnostic::{Diagnostic, DiagnosticCode, Severity, Location};
pub use schema::{LogicalType, SourceColumn};
pub use report::{
    RunReport, ReportVersion, BuildReport, ModelResult, ModelStatus, BuildStrategy,
    AssertionReport, AssertionResult, AssertionStatus,
};
pub use config::{
    ProjectConfig, TargetConfig, Dialect, LayerDefaults, SourceConfig, SourceTableConfig,
    GenericTestConfig, GenericTestKind, ConfigError, PG_CONNECTION_ENV,
};
