//! Run context for Jinja templates
//!
//! Built once per invocation and read-only afterwards. The compiler, the
//! scheduler and the assertion runner all see the same values.

use chrono::{DateTime, SubsecRound, Utc};
use dagwright_core::{Dialect, ProjectConfig};
use minijinja::Value as MinijinjaValue;
use serde::Serialize;
use std::collections::BTreeMap;

/// Format of `run_started_at` as seen by templates
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Per-invocation values exposed to templates
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    invocation_id: String,
    run_started_at: DateTime<Utc>,
    target: TargetContext,
    vars: BTreeMap<String, serde_json::Value>,
}

/// Target context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetContext {
    pub name: String,
    #[serde(rename = "type")]
    pub dialect: Dialect,
}

/// What templates can read as variables
#[derive(Serialize)]
struct TemplateGlobals<'a> {
    invocation_id: &'a str,
    run_started_at: String,
    target: &'a TargetContext,
}

impl RunContext {
    pub fn builder() -> RunContextBuilder {
        RunContextBuilder::new()
    }

    /// Context for a project's configured target and vars
    pub fn from_config(config: &ProjectConfig) -> Self {
        RunContextBuilder::new()
            .target_name(&config.target.name)
            .dialect(config.target.dialect)
            .vars(config.vars.clone())
            .build()
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn run_started_at(&self) -> DateTime<Utc> {
        self.run_started_at
    }

    pub fn target(&self) -> &TargetContext {
        &self.target
    }

    pub fn dialect(&self) -> Dialect {
        self.target.dialect
    }

    pub fn var(&self, name: &str) -> Option<&serde_json::Value> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.vars
    }

    /// Convert to MiniJinja value for rendering
    pub fn to_minijinja_value(&self) -> MinijinjaValue {
        MinijinjaValue::from_serialize(TemplateGlobals {
            invocation_id: &self.invocation_id,
            run_started_at: self.run_started_at.format(TIMESTAMP_FORMAT).to_string(),
            target: &self.target,
        })
    }
}

/// Builder for RunContext
pub struct RunContextBuilder {
    invocation_id: Option<String>,
    run_started_at: Option<DateTime<Utc>>,
    target: TargetContext,
    vars: BTreeMap<String, serde_json::Value>,
}

impl RunContextBuilder {
    pub fn new() -> Self {
        Self {
            invocation_id: None,
            run_started_at: None,
            target: TargetContext {
                name: "dev".to_string(),
                dialect: Dialect::default(),
            },
            vars: BTreeMap::new(),
        }
    }

    pub fn invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    /// Pin the run start time (tests)
    pub fn run_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_started_at = Some(at);
        self
    }

    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target.name = name.into();
        self
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.target.dialect = dialect;
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    pub fn vars(mut self, vars: BTreeMap<String, serde_json::Value>) -> Self {
        self.vars.extend(vars);
        self
    }

    pub fn build(self) -> RunContext {
        RunContext {
            invocation_id: self
                .invocation_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            run_started_at: self
                .run_started_at
                .unwrap_or_else(|| Utc::now().trunc_subsecs(0)),
            target: self.target,
            vars: self.vars,
        }
    }
}

impl Default for RunContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn builder_defaults() {
        let ctx = RunContext::builder().build();
        assert_eq!(ctx.target().name, "dev");
        assert_eq!(ctx.dialect(), Dialect::Sqlite);
        assert_eq!(ctx.invocation_id().len(), 36);
    }

    #[test]
    fn invocation_ids_differ() {
        let a = RunContext::builder().build();
        let b = RunContext::builder().build();
        assert_ne!(a.invocation_id(), b.invocation_id());
    }

    #[test]
    fn pinned_start_time_is_exposed_to_templates() {
        let at = Utc.with_ymd_and_hms(2025, 7, 10, 8, 30, 0).unwrap();
        let ctx = RunContext::builder()
            .run_started_at(at)
            .dialect(Dialect::Postgres)
            .var("future_tolerance_days", serde_json::json!(1))
            .build();

        let value = ctx.to_minijinja_value();
        let started = value.get_attr("run_started_at").unwrap();
        assert_eq!(started.as_str(), Some("2025-07-10 08:30:00"));
        assert_eq!(ctx.var("future_tolerance_days"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn from_config_copies_target_and_vars() {
        let mut config = ProjectConfig::default();
        config.target.name = "prod".to_string();
        config.vars.insert("message_date_floor".to_string(), serde_json::json!("2020-01-01"));

        let ctx = RunContext::from_config(&config);
        assert_eq!(ctx.target().name, "prod");
        assert!(ctx.var("message_date_floor").is_some());
    }
}
