//! Configuration-time errors
//!
//! Every variant is fatal: nothing is built once one is raised.

use dagwright_core::{ConfigError, Diagnostic, DiagnosticCode, Location};
use std::path::PathBuf;

/// Errors raised while loading, registering or resolving a project
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Duplicate model '{name}'")]
    DuplicateModel {
        name: String,
        path: Option<PathBuf>,
    },

    #[error("Duplicate assertion '{name}'")]
    DuplicateAssertion {
        name: String,
        path: Option<PathBuf>,
    },

    #[error("Unknown model '{0}'")]
    UnknownModel(String),

    #[error("'{model}' references unknown {kind} '{name}'")]
    UnresolvedReference {
        /// The missing model name or `namespace.table`
        name: String,
        /// `model` or `source`
        kind: &'static str,
        /// The model or assertion holding the reference
        model: String,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Template error in {}: {message}", .path.display())]
    Template {
        path: PathBuf,
        message: String,
        line: Option<usize>,
    },

    #[error("Invalid model '{model}': {message}")]
    InvalidModel { model: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error reading {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl ProjectError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::DuplicateModel { .. } | Self::DuplicateAssertion { .. } => {
                DiagnosticCode::DuplicateModel
            }
            Self::UnknownModel(_) => DiagnosticCode::UnknownModel,
            Self::UnresolvedReference { .. } => DiagnosticCode::UnresolvedReference,
            Self::CyclicDependency { .. } => DiagnosticCode::CyclicDependency,
            Self::Template { .. } => DiagnosticCode::TemplateError,
            Self::InvalidModel { .. } | Self::Config(_) | Self::Io { .. } => {
                DiagnosticCode::ConfigError
            }
        }
    }

    /// Convert to a diagnostic for display and reporting
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diagnostic = Diagnostic::error(self.code(), self.to_string());

        match self {
            Self::DuplicateModel { name, path } | Self::DuplicateAssertion { name, path } => {
                let diagnostic = diagnostic.with_subject(name);
                match path {
                    Some(path) => diagnostic.with_location(Location::new(path.display().to_string())),
                    None => diagnostic,
                }
            }
            Self::UnresolvedReference { model, .. } => diagnostic.with_subject(model),
            Self::CyclicDependency { cycle } => match cycle.first() {
                Some(first) => diagnostic.with_subject(first).with_impact(cycle.clone()),
                None => diagnostic,
            },
            Self::Template { path, line, .. } => {
                let file = path.display().to_string();
                diagnostic.with_location(match line {
                    Some(line) => Location::with_line(file, *line),
                    None => Location::new(file),
                })
            }
            Self::InvalidModel { model, .. } => diagnostic.with_subject(model),
            Self::Io { path, .. } => diagnostic.with_location(Location::new(path.display().to_string())),
            Self::UnknownModel(name) => diagnostic.with_subject(name),
            Self::Config(_) => diagnostic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_and_diagnostic() {
        let err = ProjectError::CyclicDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: A -> B -> A");

        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::CyclicDependency);
        assert_eq!(diag.impact.len(), 3);
    }

    #[test]
    fn template_error_carries_line() {
        let err = ProjectError::Template {
            path: PathBuf::from("models/marts/fct_messages.sql"),
            message: "unterminated '{{' expression".to_string(),
            line: Some(4),
        };
        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::TemplateError);
        assert_eq!(diag.location.and_then(|l| l.line), Some(4));
    }
}
