//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::diagnostic::{Diagnostic, DiagnosticCode, Severity};
use crate::value::Row;

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Terminal status of a model in a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// How a model was materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategy {
    /// View (re)created; no data moved
    View,

    /// Table built from scratch (no prior relation)
    Create,

    /// Rows upserted into an existing table by unique key
    Upsert,

    /// Table dropped and recreated (no unique key, or full refresh)
    Replace,
}

impl std::fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Create => write!(f, "create"),
            Self::Upsert => write!(f, "upsert"),
            Self::Replace => write!(f, "replace"),
        }
    }
}

/// Outcome of building a single model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: String,

    /// Rendered relation name in the store
    pub relation: String,

    pub status: ModelStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BuildStrategy>,

    pub duration_ms: u64,

    /// Failure reason or skip cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-model build report, in the order models reached a terminal status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub results: Vec<ModelResult>,

    /// Whether the build was cancelled before completion
    #[serde(default)]
    pub cancelled: bool,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal status; each model is recorded at most once
    pub fn record(&mut self, result: ModelResult) {
        if self.get(&result.model).is_none() {
            self.results.push(result);
        }
    }

    pub fn get(&self, model: &str) -> Option<&ModelResult> {
        self.results.iter().find(|r| r.model == model)
    }

    pub fn status_of(&self, model: &str) -> Option<ModelStatus> {
        self.get(model).map(|r| r.status)
    }

    pub fn count(&self, status: ModelStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// True iff every recorded model succeeded
    pub fn success(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.status == ModelStatus::Succeeded)
    }

    /// Diagnostics for failed and skipped models
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.results
            .iter()
            .filter_map(|r| {
                let message = r.message.clone().unwrap_or_default();
                match r.status {
                    ModelStatus::Failed => Some(
                        Diagnostic::error(
                            DiagnosticCode::ModelBuildError,
                            format!("Model '{}' failed: {}", r.model, message),
                        )
                        .with_subject(&r.model),
                    ),
                    ModelStatus::Skipped => Some(
                        Diagnostic::new(
                            DiagnosticCode::ModelSkipped,
                            Severity::Warn,
                            format!("Model '{}' skipped: {}", r.model, message),
                        )
                        .with_subject(&r.model),
                    ),
                    ModelStatus::Succeeded => None,
                }
            })
            .collect()
    }
}

/// Outcome of a single assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssertionStatus {
    /// Query returned no rows
    Passed,

    /// Query returned violating rows
    Failed,

    /// Query could not be executed
    Error,
}

impl std::fmt::Display for AssertionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Result of running one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub name: String,

    /// Informational: the model the assertion checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_model: Option<String>,

    pub status: AssertionStatus,

    pub passed: bool,

    pub violating_row_count: usize,

    /// First violating rows, for diagnosis
    #[serde(default)]
    pub sample_rows: Vec<Row>,

    /// Execution error (status = error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

/// Results of an assertion run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertionReport {
    pub results: Vec<AssertionResult>,
}

impl AssertionReport {
    pub fn get(&self, name: &str) -> Option<&AssertionResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn count(&self, status: AssertionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// True iff every assertion ran and passed
    pub fn success(&self) -> bool {
        self.results.iter().all(|r| r.status == AssertionStatus::Passed)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.results
            .iter()
            .filter_map(|r| match r.status {
                AssertionStatus::Failed => Some(
                    Diagnostic::error(
                        DiagnosticCode::AssertionFailed,
                        format!(
                            "Assertion '{}' found {} violating row(s)",
                            r.name, r.violating_row_count
                        ),
                    )
                    .with_subject(&r.name),
                ),
                AssertionStatus::Error => Some(
                    Diagnostic::error(
                        DiagnosticCode::AssertionExecutionError,
                        format!(
                            "Assertion '{}' could not run: {}",
                            r.name,
                            r.error.as_deref().unwrap_or("unknown error")
                        ),
                    )
                    .with_subject(&r.name),
                ),
                AssertionStatus::Passed => None,
            })
            .collect()
    }
}

/// Run report (run_results.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    pub invocation_id: String,

    /// Timestamp (ISO 8601)
    pub generated_at: String,

    /// Target the run executed against
    pub target: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReport>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertions: Option<AssertionReport>,

    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub fn new(invocation_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            invocation_id: invocation_id.into(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            target: target.into(),
            build: None,
            assertions: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_build(mut self, build: BuildReport) -> Self {
        self.diagnostics.extend(build.diagnostics());
        self.build = Some(build);
        self
    }

    pub fn with_assertions(mut self, assertions: AssertionReport) -> Self {
        self.diagnostics.extend(assertions.diagnostics());
        self.assertions = Some(assertions);
        self
    }

    /// Any failed/skipped model, failed assertion or assertion error
    pub fn has_failures(&self) -> bool {
        let build_failed = self.build.as_ref().is_some_and(|b| !b.success());
        let assertions_failed = self.assertions.as_ref().is_some_and(|a| !a.success());
        build_failed || assertions_failed
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file, creating the parent directory if needed
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
    }
}
