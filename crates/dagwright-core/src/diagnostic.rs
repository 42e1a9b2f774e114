//! Diagnostic codes and error reporting
//!
//! IMPORTANT: Diagnostic codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Diagnostic code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiagnosticCode {
    // Project configuration
    /// Two models share the same name
    DuplicateModel,

    /// A model was looked up by a name the registry does not hold
    UnknownModel,

    /// A body references a model or source that does not exist
    UnresolvedReference,

    /// Model references form a cycle
    CyclicDependency,

    /// A model or assertion template failed to parse or render
    TemplateError,

    /// Invalid project configuration
    ConfigError,

    // Build
    /// The store rejected a model build
    ModelBuildError,

    /// A model was not built because an upstream model failed
    ModelSkipped,

    // Assertions
    /// An assertion returned violating rows
    AssertionFailed,

    /// An assertion query could not be executed
    AssertionExecutionError,
}

impl DiagnosticCode {
    /// Get the diagnostic code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateModel => "DUPLICATE_MODEL",
            Self::UnknownModel => "UNKNOWN_MODEL",
            Self::UnresolvedReference => "UNRESOLVED_REFERENCE",
            Self::CyclicDependency => "CYCLIC_DEPENDENCY",
            Self::TemplateError => "TEMPLATE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::ModelBuildError => "MODEL_BUILD_ERROR",
            Self::ModelSkipped => "MODEL_SKIPPED",
            Self::AssertionFailed => "ASSERTION_FAILED",
            Self::AssertionExecutionError => "ASSERTION_EXECUTION_ERROR",
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warn,

    /// Error - fails the run
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source location in a project file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to project root
    pub file: String,

    /// Optional line number (1-indexed)
    pub line: Option<usize>,
}

impl Location {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

/// A diagnostic message with structured metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable diagnostic code
    pub code: DiagnosticCode,

    /// Severity level
    pub severity: Severity,

    /// Human-readable message
    pub message: String,

    /// Source location (best-effort)
    pub location: Option<Location>,

    /// Model or assertion the diagnostic is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    /// Downstream models impacted by this issue
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub impact: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with minimal fields
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            location: None,
            subject: None,
            impact: Vec::new(),
        }
    }

    /// Shorthand for an error-severity diagnostic
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_impact(mut self, impact: Vec<String>) -> Self {
        self.impact = impact;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_code_stability() {
        assert_eq!(DiagnosticCode::CyclicDependency.as_str(), "CYCLIC_DEPENDENCY");
        assert_eq!(DiagnosticCode::AssertionExecutionError.as_str(), "ASSERTION_EXECUTION_ERROR");
    }

    #[test]
    fn codes_serialize_as_their_stable_names() {
        let codes = [
            DiagnosticCode::DuplicateModel,
            DiagnosticCode::UnknownModel,
            DiagnosticCode::UnresolvedReference,
            DiagnosticCode::CyclicDependency,
            DiagnosticCode::TemplateError,
            DiagnosticCode::ConfigError,
            DiagnosticCode::ModelBuildError,
            DiagnosticCode::ModelSkipped,
            DiagnosticCode::AssertionFailed,
            DiagnosticCode::AssertionExecutionError,
        ];

        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn diagnostic_serialization() {
        let diag = Diagnostic::error(
            DiagnosticCode::UnresolvedReference,
            "Model 'fct_messages' references unknown model 'stg_missing'",
        )
        .with_location(Location::new("models/marts/fct_messages.sql"))
        .with_subject("fct_messages");

        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("UNRESOLVED_REFERENCE"));
        assert!(json.contains("\"error\""));
        assert!(!json.contains("impact"));
    }
}
