//! SQL rendering
//!
//! Substitutes typed references with relation names, then renders the
//! remaining Jinja against the run context.

use crate::context::RunContext;
use dagwright_core::{Diagnostic, DiagnosticCode, Location};
use dagwright_project::{ModelBody, Reference, Segment};
use minijinja::{Environment, Error as JinjaError, UndefinedBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error during rendering
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Jinja render error: {message}")]
    RenderError {
        message: String,
        file_path: Option<PathBuf>,
        line: Option<usize>,
    },

    #[error("Undefined variable: {name}")]
    UndefinedVariable {
        name: String,
        file_path: Option<PathBuf>,
    },
}

impl RenderError {
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            Self::RenderError { file_path, .. } | Self::UndefinedVariable { file_path, .. } => {
                file_path.as_deref()
            }
        }
    }

    /// Convert to a TEMPLATE_ERROR diagnostic
    pub fn to_diagnostic(&self) -> Diagnostic {
        let mut diag = Diagnostic::error(DiagnosticCode::TemplateError, self.to_string());

        if let Some(path) = self.file_path() {
            let file = path.display().to_string();
            let location = match self {
                Self::RenderError { line: Some(line), .. } => Location::with_line(file, *line),
                _ => Location::new(file),
            };
            diag = diag.with_location(location);
        }

        diag
    }
}

/// Renders model and assertion bodies to SQL
pub struct SqlRenderer {
    env: Environment<'static>,
    context: Arc<RunContext>,
}

impl SqlRenderer {
    pub fn new(context: RunContext) -> Self {
        let context = Arc::new(context);
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        crate::functions::register(&mut env, Arc::clone(&context));

        Self { env, context }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Check if text contains Jinja templates
    pub fn has_jinja(sql: &str) -> bool {
        sql.contains("{{") || sql.contains("{%") || sql.contains("{#")
    }

    /// Render a body, naming each reference with `relation_for`
    pub fn render<F>(
        &self,
        body: &ModelBody,
        relation_for: F,
        file_path: Option<&Path>,
    ) -> Result<String, RenderError>
    where
        F: Fn(&Reference) -> String,
    {
        let mut template = String::with_capacity(body.raw().len());
        for segment in body.segments() {
            match segment {
                Segment::Text(text) => template.push_str(text),
                Segment::Ref(reference) => template.push_str(&relation_for(reference)),
            }
        }

        self.render_str(&template, file_path)
    }

    /// Render template text that holds no references
    pub fn render_str(&self, template: &str, file_path: Option<&Path>) -> Result<String, RenderError> {
        if !Self::has_jinja(template) {
            return Ok(template.to_string());
        }

        self.env
            .render_str(template, self.context.to_minijinja_value())
            .map_err(|e| Self::to_render_error(e, file_path))
    }

    fn to_render_error(error: JinjaError, file_path: Option<&Path>) -> RenderError {
        let file_path = file_path.map(Path::to_path_buf);

        if error.kind() == minijinja::ErrorKind::UndefinedError {
            if let Some(name) = Self::extract_variable_name(&error.to_string()) {
                return RenderError::UndefinedVariable { name, file_path };
            }
        }

        RenderError::RenderError {
            message: error.to_string(),
            line: error.line(),
            file_path,
        }
    }

    /// Extract variable name from error message
    fn extract_variable_name(message: &str) -> Option<String> {
        let start = message.find('\'')?;
        let end = message[start + 1..].find('\'')?;
        Some(message[start + 1..start + 1 + end].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dagwright_core::Dialect;

    fn renderer(dialect: Dialect) -> SqlRenderer {
        SqlRenderer::new(
            RunContext::builder()
                .dialect(dialect)
                .run_started_at(Utc.with_ymd_and_hms(2025, 7, 10, 0, 0, 0).unwrap())
                .var("message_date_floor", serde_json::json!("2020-01-01"))
                .build(),
        )
    }

    fn relation(reference: &Reference) -> String {
        match reference {
            Reference::Model(m) => format!("\"marts__{}\"", m.name),
            Reference::Source(s) => format!("\"{}__{}\"", s.namespace, s.table),
        }
    }

    #[test]
    fn references_become_relations() {
        let body = ModelBody::parse(
            "select * from {{ ref('fct_messages') }} join {{ source('raw', 'telegram_messages') }} using (message_id)",
        )
        .unwrap();

        let sql = renderer(Dialect::Sqlite).render(&body, relation, None).unwrap();
        assert_eq!(
            sql,
            "select * from \"marts__fct_messages\" join \"raw__telegram_messages\" using (message_id)"
        );
    }

    #[test]
    fn plain_sql_passthrough() {
        let body = ModelBody::parse("select 1").unwrap();
        assert_eq!(renderer(Dialect::Sqlite).render(&body, relation, None).unwrap(), "select 1");
    }

    #[test]
    fn assertion_bounds_render_with_context() {
        let body = ModelBody::parse(
            "where message_date < {{ timestamp_literal(var('message_date_floor')) }}\n\
             or message_date > {{ dateadd_days(timestamp_literal(run_started_at), var('future_tolerance_days', 1)) }}",
        )
        .unwrap();

        let sql = renderer(Dialect::Sqlite).render(&body, relation, None).unwrap();
        assert!(sql.contains("message_date < datetime('2020-01-01')"));
        assert!(sql.contains("message_date > datetime(datetime('2025-07-10 00:00:00'), '+1 days')"));

        let sql = renderer(Dialect::Postgres).render(&body, relation, None).unwrap();
        assert!(sql.contains("(cast('2025-07-10 00:00:00' as timestamptz) + interval '1 days')"));
    }

    #[test]
    fn surrogate_key_in_template() {
        let body = ModelBody::parse(
            "select {{ surrogate_key(['channel_name', 'message_id']) }} as message_key",
        )
        .unwrap();
        let sql = renderer(Dialect::Sqlite).render(&body, relation, None).unwrap();
        assert_eq!(sql, "select dagwright_surrogate_key(channel_name, message_id) as message_key");
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let body = ModelBody::parse("select {{ var('nope') }}").unwrap();
        let err = renderer(Dialect::Sqlite)
            .render(&body, relation, Some(Path::new("models/marts/x.sql")))
            .unwrap_err();

        let diag = err.to_diagnostic();
        assert_eq!(diag.code, DiagnosticCode::TemplateError);
        assert_eq!(diag.location.map(|l| l.file), Some("models/marts/x.sql".to_string()));
    }

    #[test]
    fn unknown_template_variable_is_strict() {
        assert!(renderer(Dialect::Sqlite).render_str("select {{ nope }}", None).is_err());
    }

    #[test]
    fn jinja_comment_removal() {
        let sql = renderer(Dialect::Sqlite)
            .render_str("{#- note -#}\nselect 1", None)
            .unwrap();
        assert_eq!(sql.trim(), "select 1");
    }
}
