//! Compilation: render every model and assertion to SQL
//!
//! Compilation runs entirely before the first store statement, so a template
//! error anywhere aborts the run without building anything.

use crate::error::EngineError;
use dagwright_jinja::{RunContext, SqlRenderer};
use dagwright_project::{DependencyGraph, Materialization, Project, Reference};
use dagwright_store::{Relation, StoreAdapter};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A model ready to be materialized
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledModel {
    pub name: String,
    pub relation: Relation,
    /// Relation name as the store spells it
    pub rendered_relation: String,
    pub materialization: Materialization,
    pub unique_key: Option<Vec<String>>,
    pub sql: String,
    pub path: Option<PathBuf>,
}

/// An assertion ready to be executed
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAssertion {
    pub name: String,
    pub target_model: Option<String>,
    pub sql: String,
    pub path: Option<PathBuf>,
}

/// Rendered SQL for a whole project
#[derive(Debug, Clone, Default)]
pub struct CompiledProject {
    models: HashMap<String, CompiledModel>,
    assertions: Vec<CompiledAssertion>,
}

impl CompiledProject {
    pub fn model(&self, name: &str) -> Option<&CompiledModel> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &CompiledModel> {
        self.models.values()
    }

    pub fn assertions(&self) -> &[CompiledAssertion] {
        &self.assertions
    }

    /// Write `compiled/<model>.sql` and `compiled/assertions/<name>.sql`
    /// under `target_dir`; returns the files written
    pub fn write_to(&self, target_dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
        let compiled_dir = target_dir.join("compiled");
        let assertions_dir = compiled_dir.join("assertions");
        std::fs::create_dir_all(&assertions_dir).map_err(|e| EngineError::io(&assertions_dir, e))?;

        let mut names: Vec<&String> = self.models.keys().collect();
        names.sort();

        let mut written = Vec::new();
        for name in names {
            let path = compiled_dir.join(format!("{}.sql", name));
            std::fs::write(&path, &self.models[name].sql).map_err(|e| EngineError::io(&path, e))?;
            written.push(path);
        }

        for assertion in &self.assertions {
            let path = assertions_dir.join(format!("{}.sql", assertion.name));
            std::fs::write(&path, &assertion.sql).map_err(|e| EngineError::io(&path, e))?;
            written.push(path);
        }

        Ok(written)
    }
}

/// Render every model in `graph` and every project assertion
pub fn compile(
    project: &Project,
    graph: &DependencyGraph,
    context: &RunContext,
    adapter: &dyn StoreAdapter,
) -> Result<CompiledProject, EngineError> {
    let renderer = SqlRenderer::new(context.clone());
    let relation_for = |reference: &Reference| relation_name(project, adapter, reference);

    let mut compiled = CompiledProject::default();
    for name in graph.execution_order() {
        let model = project.registry().get(name)?;
        let sql = renderer.render(&model.body, relation_for, model.path.as_deref())?;
        let relation = Relation::new(&model.schema, &model.name);

        tracing::debug!(model = %model.name, relation = %relation, "compiled model");
        compiled.models.insert(
            model.name.clone(),
            CompiledModel {
                name: model.name.clone(),
                rendered_relation: adapter.render_relation(&relation),
                relation,
                materialization: model.materialization,
                unique_key: model.unique_key.as_ref().map(|k| k.columns().to_vec()),
                sql,
                path: model.path.clone(),
            },
        );
    }

    for assertion in project.assertions() {
        let sql = renderer.render(&assertion.body, relation_for, assertion.path.as_deref())?;
        compiled.assertions.push(CompiledAssertion {
            name: assertion.name.clone(),
            target_model: assertion.target_model.clone(),
            sql,
            path: assertion.path.clone(),
        });
    }

    tracing::info!(
        models = compiled.models.len(),
        assertions = compiled.assertions.len(),
        "compiled project"
    );
    Ok(compiled)
}

/// Store name of a referenced model or source
///
/// References are validated by `Project::resolve`; anything unknown here is
/// rendered verbatim and left for the store to reject.
fn relation_name(project: &Project, adapter: &dyn StoreAdapter, reference: &Reference) -> String {
    match reference {
        Reference::Model(model_ref) => match project.registry().get(&model_ref.name) {
            Ok(model) => adapter.render_relation(&Relation::new(&model.schema, &model.name)),
            Err(_) => model_ref.name.clone(),
        },
        Reference::Source(source_ref) => match project.catalog().table(source_ref) {
            Some(table) => adapter.render_relation(&Relation::new(&table.schema, &table.name)),
            None => source_ref.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagwright_core::{ProjectConfig, SourceConfig, SourceTableConfig};
    use dagwright_project::{ModelBody, ModelRegistry, Model, SourceCatalog, Assertion};
    use dagwright_store::SqliteStore;

    fn project() -> Project {
        let config = ProjectConfig {
            sources: vec![SourceConfig {
                name: "raw".to_string(),
                schema: None,
                tables: vec![SourceTableConfig {
                    name: "telegram_messages".to_string(),
                    columns: vec![],
                    unique_key: vec![],
                }],
            }],
            ..ProjectConfig::default()
        };

        let mut registry = ModelRegistry::new();
        let stg = ModelBody::parse(
            "select {{ surrogate_key(['channel_name', 'message_id']) }} as message_key \
             from {{ source('raw', 'telegram_messages') }}",
        )
        .unwrap();
        registry
            .register(Model::from_body("stg_messages", stg, Some("staging"), &config).unwrap())
            .unwrap();

        let fct = ModelBody::parse(
            "{{ config(materialized='table', unique_key='message_key') }}\nselect * from {{ ref('stg_messages') }}",
        )
        .unwrap();
        registry
            .register(Model::from_body("fct_messages", fct, Some("marts"), &config).unwrap())
            .unwrap();

        let assertion = Assertion::new(
            "assert_keys",
            ModelBody::parse("select * from {{ ref('fct_messages') }} where message_key is null").unwrap(),
        );

        let catalog = SourceCatalog::from_config(&config.sources);
        Project::from_parts(config, registry, catalog, vec![assertion])
    }

    #[test]
    fn compile_substitutes_relations() {
        let project = project();
        let graph = project.resolve().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let context = RunContext::builder().build();

        let compiled = compile(&project, &graph, &context, &store).unwrap();

        let stg = compiled.model("stg_messages").unwrap();
        assert_eq!(stg.rendered_relation, "\"staging__stg_messages\"");
        assert!(stg.sql.contains("dagwright_surrogate_key(channel_name, message_id)"));
        assert!(stg.sql.contains("from \"raw__telegram_messages\""));

        let fct = compiled.model("fct_messages").unwrap();
        assert_eq!(fct.unique_key, Some(vec!["message_key".to_string()]));
        assert!(fct.sql.trim().starts_with("select * from \"staging__stg_messages\""));

        assert_eq!(
            compiled.assertions()[0].sql,
            "select * from \"marts__fct_messages\" where message_key is null"
        );
    }

    #[test]
    fn compiled_sql_is_written_to_target() {
        let project = project();
        let graph = project.resolve().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let compiled = compile(&project, &graph, &RunContext::builder().build(), &store).unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let written = compiled.write_to(dir.path()).unwrap();

        assert_eq!(written.len(), 3);
        assert!(dir.path().join("compiled/fct_messages.sql").exists());
        assert!(dir.path().join("compiled/assertions/assert_keys.sql").exists());
    }
}
