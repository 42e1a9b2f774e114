//! Pipeline facade
//!
//! Ties loading, resolution, compilation, building and assertions together.
//! Everything up to compilation happens in [`Pipeline::new`]; once a pipeline
//! exists the project is known to be buildable.

use crate::assertions::AssertionRunner;
use crate::cancel::CancellationToken;
use crate::compile::{compile, CompiledAssertion, CompiledProject};
use crate::error::EngineError;
use crate::scheduler::{BuildOptions, Builder};
use dagwright_core::{AssertionReport, BuildReport, RunReport};
use dagwright_jinja::RunContext;
use dagwright_project::{DependencyGraph, NodeId, Project};
use dagwright_store::StoreAdapter;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File the run report is written to, under the target directory
pub const RUN_RESULTS_FILE: &str = "run_results.json";

/// Options for `run` and `build`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Model selectors (`name`, `+name`, `name+`); empty selects everything
    pub select: Vec<String>,

    pub full_refresh: bool,

    /// Overrides `target.threads`
    pub threads: Option<usize>,

    pub cancel: CancellationToken,
}

/// A resolved and compiled project bound to a store
pub struct Pipeline {
    project: Project,
    graph: DependencyGraph,
    context: RunContext,
    compiled: CompiledProject,
    adapter: Arc<dyn StoreAdapter>,
}

impl Pipeline {
    /// Resolve and compile `project`; fails before touching the store
    pub fn new(project: Project, context: RunContext, adapter: Arc<dyn StoreAdapter>) -> Result<Self, EngineError> {
        let graph = project.resolve()?;
        let compiled = compile(&project, &graph, &context, adapter.as_ref())?;

        Ok(Self {
            project,
            graph,
            context,
            compiled,
            adapter,
        })
    }

    /// Load the project in `dir` and connect to its configured target
    pub async fn open(dir: &Path) -> Result<Self, EngineError> {
        Self::connect(Project::load(dir)?).await
    }

    /// Connect to the project's configured target
    pub async fn connect(project: Project) -> Result<Self, EngineError> {
        let context = RunContext::from_config(project.config());
        let adapter = dagwright_store::connect(&project.config().target, &project.config().project_root).await?;
        Self::new(project, context, adapter)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn compiled(&self) -> &CompiledProject {
        &self.compiled
    }

    pub fn adapter(&self) -> &Arc<dyn StoreAdapter> {
        &self.adapter
    }

    /// Where `run_results.json` goes
    pub fn run_results_path(&self) -> PathBuf {
        self.project.target_dir().join(RUN_RESULTS_FILE)
    }

    /// Write the rendered SQL under the target directory
    pub fn write_compiled(&self) -> Result<Vec<PathBuf>, EngineError> {
        self.compiled.write_to(&self.project.target_dir())
    }

    /// Build the selected models
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, EngineError> {
        let build = self.build_models(options).await?;
        Ok(self.report().with_build(build))
    }

    /// Run assertions against the current relations
    pub async fn test(&self, select: &[String]) -> Result<RunReport, EngineError> {
        let assertions = self.run_assertions(select).await?;
        Ok(self.report().with_assertions(assertions))
    }

    /// Build, then run assertions
    pub async fn build(&self, options: &RunOptions) -> Result<RunReport, EngineError> {
        let build = self.build_models(options).await?;
        let assertions = if build.cancelled {
            AssertionReport::default()
        } else {
            self.run_assertions(&options.select).await?
        };
        Ok(self.report().with_build(build).with_assertions(assertions))
    }

    async fn build_models(&self, options: &RunOptions) -> Result<BuildReport, EngineError> {
        let build_options = BuildOptions {
            threads: options.threads.unwrap_or(self.project.config().target.threads).max(1),
            full_refresh: options.full_refresh,
            selected: self.selection(&options.select)?,
            cancel: options.cancel.clone(),
        };

        let builder = Builder::new(Arc::clone(&self.adapter)).with_options(build_options);
        Ok(builder.build(&self.compiled, &self.graph).await)
    }

    async fn run_assertions(&self, select: &[String]) -> Result<AssertionReport, EngineError> {
        let assertions: Vec<CompiledAssertion> = match self.selection(select)? {
            Some(selected) => {
                let selected: HashSet<NodeId> = selected.into_iter().collect();
                self.compiled
                    .assertions()
                    .iter()
                    .filter(|a| a.target_model.as_ref().map_or(false, |m| selected.contains(m)))
                    .cloned()
                    .collect()
            }
            None => self.compiled.assertions().to_vec(),
        };

        Ok(AssertionRunner::new(Arc::clone(&self.adapter)).run_all(&assertions).await)
    }

    fn selection(&self, select: &[String]) -> Result<Option<Vec<NodeId>>, EngineError> {
        if select.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.graph.select(select)?))
        }
    }

    fn report(&self) -> RunReport {
        RunReport::new(self.context.invocation_id(), &self.context.target().name)
    }
}
