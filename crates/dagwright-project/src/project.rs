//! Project loading
//!
//! Reads `dagwright.toml`, discovers model and assertion files, and builds the
//! registry, source catalog and assertion list.

use crate::assertion::Assertion;
use crate::dag::{self, DependencyGraph};
use crate::error::ProjectError;
use crate::model::Model;
use crate::registry::ModelRegistry;
use crate::source::SourceCatalog;
use crate::template::ModelBody;
use dagwright_core::ProjectConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A loaded project; immutable once built
#[derive(Debug, Clone)]
pub struct Project {
    config: ProjectConfig,
    registry: ModelRegistry,
    catalog: SourceCatalog,
    assertions: Vec<Assertion>,
}

impl Project {
    /// Load the project rooted at `dir`
    pub fn load(dir: &Path) -> Result<Self, ProjectError> {
        let config = ProjectConfig::from_file(&dir.join(ProjectConfig::FILE_NAME))?;
        Self::from_config(config)
    }

    /// Discover models and assertions for an already-parsed config
    pub fn from_config(config: ProjectConfig) -> Result<Self, ProjectError> {
        config.validate()?;

        let mut registry = ModelRegistry::new();
        for model_path in &config.model_paths {
            let root = config.resolve_path(model_path);
            for file in sql_files(&root)? {
                let model = load_model(&file, &root, &config)?;
                tracing::debug!(model = %model.name, path = %file.display(), "registered model");
                registry.register(model)?;
            }
        }

        let mut assertions = Vec::new();
        let mut seen = HashSet::new();
        for assertion_path in &config.assertion_paths {
            let root = config.resolve_path(assertion_path);
            for file in sql_files(&root)? {
                let assertion = load_assertion(&file)?;
                if !seen.insert(assertion.name.clone()) {
                    return Err(ProjectError::DuplicateAssertion {
                        name: assertion.name,
                        path: Some(file),
                    });
                }
                assertions.push(assertion);
            }
        }

        for test in &config.tests {
            let assertion = Assertion::from_generic_test(test)?;
            if !seen.insert(assertion.name.clone()) {
                return Err(ProjectError::DuplicateAssertion {
                    name: assertion.name,
                    path: None,
                });
            }
            assertions.push(assertion);
        }

        let catalog = SourceCatalog::from_config(&config.sources);

        tracing::info!(
            project = %config.name,
            models = registry.len(),
            assertions = assertions.len(),
            sources = catalog.len(),
            "loaded project"
        );

        Ok(Self::from_parts(config, registry, catalog, assertions))
    }

    /// Assemble a project from in-memory parts
    pub fn from_parts(
        config: ProjectConfig,
        registry: ModelRegistry,
        catalog: SourceCatalog,
        assertions: Vec<Assertion>,
    ) -> Self {
        Self {
            config,
            registry,
            catalog,
            assertions,
        }
    }

    /// Resolve model references into a graph and validate assertion references
    pub fn resolve(&self) -> Result<DependencyGraph, ProjectError> {
        let graph = dag::resolve(&self.registry, &self.catalog)?;
        for assertion in &self.assertions {
            dag::check_references(&assertion.name, &assertion.body, &self.registry, &self.catalog)?;
        }
        Ok(graph)
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    /// Output directory for compiled SQL and run results
    pub fn target_dir(&self) -> PathBuf {
        self.config.resolve_path(&self.config.target_path)
    }
}

/// `.sql` files under `root`, sorted by path; a missing directory is empty
fn sql_files(root: &Path) -> Result<Vec<PathBuf>, ProjectError> {
    if !root.exists() {
        tracing::debug!(path = %root.display(), "directory not found, skipping");
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| ProjectError::Io {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn read_body(path: &Path) -> Result<ModelBody, ProjectError> {
    let text = std::fs::read_to_string(path).map_err(|e| ProjectError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    ModelBody::parse(&text).map_err(|e| ProjectError::Template {
        path: path.to_path_buf(),
        message: e.message,
        line: Some(e.line),
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn load_model(path: &Path, root: &Path, config: &ProjectConfig) -> Result<Model, ProjectError> {
    let body = read_body(path)?;

    // First directory under the model path names the layer
    let relative = path.strip_prefix(root).unwrap_or(path);
    let directory_layer = relative
        .parent()
        .and_then(|p| p.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned());

    Ok(Model::from_body(file_stem(path), body, directory_layer.as_deref(), config)?.with_path(path))
}

fn load_assertion(path: &Path) -> Result<Assertion, ProjectError> {
    Ok(Assertion::new(file_stem(path), read_body(path)?).with_path(path))
}
