//! Engine error types

use dagwright_core::{Diagnostic, DiagnosticCode};
use dagwright_jinja::RenderError;
use dagwright_project::ProjectError;
use dagwright_store::StoreError;
use std::path::PathBuf;

/// Errors that stop a pipeline before or around the build
///
/// Per-model build failures and assertion failures are not errors; they are
/// recorded in the reports.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("{0}")]
    Render(#[from] RenderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Convert to a diagnostic for reporting
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            Self::Project(e) => e.to_diagnostic(),
            Self::Render(e) => e.to_diagnostic(),
            Self::Store(e) => Diagnostic::error(DiagnosticCode::ConfigError, e.to_string()),
            Self::Io { .. } => Diagnostic::error(DiagnosticCode::ConfigError, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_errors_keep_their_code() {
        let err = EngineError::from(ProjectError::CyclicDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        });
        assert_eq!(err.to_diagnostic().code, DiagnosticCode::CyclicDependency);
        assert_eq!(err.to_string(), "Cyclic dependency: A -> B -> A");
    }

    #[test]
    fn store_errors_are_configuration_diagnostics() {
        let err = EngineError::from(StoreError::Connection("refused".to_string()));
        assert_eq!(err.to_diagnostic().code, DiagnosticCode::ConfigError);
    }
}
