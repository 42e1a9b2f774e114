//! DAG scheduler
//!
//! Materializes compiled models in dependency order. A model whose build
//! fails takes its whole downstream subtree with it (reported as skipped);
//! independent branches keep going. Nothing is rolled back.
//!
//! With more than one thread and a store that accepts concurrent statements,
//! independent models run as tokio tasks bounded by a semaphore. Otherwise
//! models are built one at a time in execution order.

use crate::cancel::CancellationToken;
use crate::compile::{CompiledModel, CompiledProject};
use dagwright_core::{BuildReport, BuildStrategy, ModelResult, ModelStatus};
use dagwright_project::{DependencyGraph, Materialization, NodeId};
use dagwright_store::{StoreAdapter, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

const CANCELLED: &str = "run cancelled";

/// Options for a build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Maximum number of models built at once
    pub threads: usize,

    /// Rebuild incremental tables from scratch
    pub full_refresh: bool,

    /// Models to build, in execution order; `None` builds everything
    pub selected: Option<Vec<NodeId>>,

    pub cancel: CancellationToken,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            full_refresh: false,
            selected: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Builds a compiled project against a store
pub struct Builder {
    adapter: Arc<dyn StoreAdapter>,
    options: BuildOptions,
}

impl Builder {
    pub fn new(adapter: Arc<dyn StoreAdapter>) -> Self {
        Self {
            adapter,
            options: BuildOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Build every selected model and report each terminal status once
    pub async fn build(&self, compiled: &CompiledProject, graph: &DependencyGraph) -> BuildReport {
        let order: Vec<NodeId> = match &self.options.selected {
            Some(selected) => {
                let wanted: HashSet<&NodeId> = selected.iter().collect();
                graph
                    .execution_order()
                    .iter()
                    .filter(|n| wanted.contains(n))
                    .cloned()
                    .collect()
            }
            None => graph.execution_order().to_vec(),
        };

        let concurrent = self.options.threads > 1 && self.adapter.supports_concurrency();
        tracing::info!(
            models = order.len(),
            threads = self.options.threads,
            concurrent,
            full_refresh = self.options.full_refresh,
            "starting build"
        );

        let report = if concurrent {
            self.build_concurrent(compiled, graph, &order).await
        } else {
            self.build_sequential(compiled, graph, &order).await
        };

        tracing::info!(
            succeeded = report.count(ModelStatus::Succeeded),
            failed = report.count(ModelStatus::Failed),
            skipped = report.count(ModelStatus::Skipped),
            cancelled = report.cancelled,
            "build finished"
        );
        report
    }

    async fn build_sequential(
        &self,
        compiled: &CompiledProject,
        graph: &DependencyGraph,
        order: &[NodeId],
    ) -> BuildReport {
        let mut report = BuildReport::new();
        let in_run: HashSet<&str> = order.iter().map(String::as_str).collect();

        for name in order {
            if report.get(name).is_some() {
                continue;
            }

            if self.options.cancel.is_cancelled() {
                report.cancelled = true;
                report.record(skipped(compiled, name, CANCELLED.to_string()));
                continue;
            }

            let result = match compiled.model(name) {
                Some(model) => {
                    build_model(self.adapter.as_ref(), model, self.options.full_refresh).await
                }
                None => missing(name),
            };

            let failed = result.status != ModelStatus::Succeeded;
            report.record(result);
            if failed {
                skip_downstream(&mut report, compiled, graph, name, &in_run);
            }
        }

        report
    }

    async fn build_concurrent(
        &self,
        compiled: &CompiledProject,
        graph: &DependencyGraph,
        order: &[NodeId],
    ) -> BuildReport {
        let mut report = BuildReport::new();
        let in_run: HashSet<&str> = order.iter().map(String::as_str).collect();
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();

        // Parents inside this run that have not succeeded yet
        let mut waiting: HashMap<&str, usize> = order
            .iter()
            .map(|n| {
                let count = graph
                    .parents(n)
                    .iter()
                    .filter(|p| in_run.contains(p.as_str()))
                    .count();
                (n.as_str(), count)
            })
            .collect();

        let mut ready: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|n| waiting.get(n) == Some(&0))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.options.threads));
        let mut tasks: JoinSet<ModelResult> = JoinSet::new();

        loop {
            // Start ready models in execution order
            for name in ready.drain(..) {
                if report.get(name).is_some() || self.options.cancel.is_cancelled() {
                    continue;
                }

                let Some(model) = compiled.model(name).cloned() else {
                    report.record(missing(name));
                    skip_downstream(&mut report, compiled, graph, name, &in_run);
                    continue;
                };

                let adapter = Arc::clone(&self.adapter);
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.options.cancel.clone();
                let full_refresh = self.options.full_refresh;

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    if cancel.is_cancelled() {
                        return skipped_model(&model, CANCELLED.to_string());
                    }

                    // A panicking build must still report under its model's name
                    let build = {
                        let model = model.clone();
                        tokio::spawn(async move { build_model(adapter.as_ref(), &model, full_refresh).await })
                    };
                    match build.await {
                        Ok(result) => result,
                        Err(e) => {
                            tracing::error!(model = %model.name, error = %e, "model task aborted");
                            failed_model(&model, format!("build task aborted: {}", e))
                        }
                    }
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "model task aborted");
                    continue;
                }
            };

            let name = result.model.clone();
            let status = result.status;
            report.record(result);

            match status {
                ModelStatus::Succeeded => {
                    for child in graph.children(&name) {
                        if let Some(count) = waiting.get_mut(child.as_str()) {
                            *count = count.saturating_sub(1);
                            if *count == 0 && report.get(child).is_none() {
                                ready.push(child.as_str());
                            }
                        }
                    }
                    ready.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));
                }
                ModelStatus::Failed => {
                    skip_downstream(&mut report, compiled, graph, &name, &in_run);
                }
                // Cancelled before it started; the rest is swept up below
                ModelStatus::Skipped => {}
            }
        }

        // Anything never finished was cut off by cancellation or a crashed task
        let cancelled = self.options.cancel.is_cancelled();
        for name in order {
            if report.get(name).is_none() {
                if cancelled {
                    report.record(skipped(compiled, name, CANCELLED.to_string()));
                } else {
                    report.record(missing(name));
                }
            }
        }
        report.cancelled = report
            .results
            .iter()
            .any(|r| r.message.as_deref() == Some(CANCELLED));

        report
    }
}

/// Materialize one model, choosing the strategy from its config and the
/// store's current state
pub async fn build_model(adapter: &dyn StoreAdapter, model: &CompiledModel, full_refresh: bool) -> ModelResult {
    let span = tracing::info_span!("model", model = %model.name, relation = %model.relation);

    let start = Instant::now();
    let outcome = materialize(adapter, model, full_refresh).instrument(span).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(strategy) => {
            tracing::info!(model = %model.name, %strategy, duration_ms, "model built");
            ModelResult {
                model: model.name.clone(),
                relation: model.rendered_relation.clone(),
                status: ModelStatus::Succeeded,
                strategy: Some(strategy),
                duration_ms,
                message: None,
            }
        }
        Err((strategy, error)) => {
            tracing::error!(model = %model.name, %strategy, error = %error, "model failed");
            ModelResult {
                model: model.name.clone(),
                relation: model.rendered_relation.clone(),
                status: ModelStatus::Failed,
                strategy: Some(strategy),
                duration_ms,
                message: Some(error.to_string()),
            }
        }
    }
}

async fn materialize(
    adapter: &dyn StoreAdapter,
    model: &CompiledModel,
    full_refresh: bool,
) -> Result<BuildStrategy, (BuildStrategy, StoreError)> {
    let relation = &model.relation;

    if model.materialization == Materialization::View {
        return adapter
            .create_or_replace_view(relation, &model.sql)
            .await
            .map(|_| BuildStrategy::View)
            .map_err(|e| (BuildStrategy::View, e));
    }

    let exists = adapter
        .table_exists(relation)
        .await
        .map_err(|e| (BuildStrategy::Create, e))?;

    if !exists {
        return adapter
            .create_table(relation, &model.sql)
            .await
            .map(|_| BuildStrategy::Create)
            .map_err(|e| (BuildStrategy::Create, e));
    }

    match (&model.unique_key, full_refresh) {
        (Some(key), false) => match adapter.upsert_table(relation, &model.sql, key).await {
            Ok(()) => Ok(BuildStrategy::Upsert),
            // The existing relation is a view; start the table over
            Err(StoreError::NotFound(_)) => adapter
                .create_table(relation, &model.sql)
                .await
                .map(|_| BuildStrategy::Replace)
                .map_err(|e| (BuildStrategy::Replace, e)),
            Err(e) => Err((BuildStrategy::Upsert, e)),
        },
        _ => adapter
            .create_table(relation, &model.sql)
            .await
            .map(|_| BuildStrategy::Replace)
            .map_err(|e| (BuildStrategy::Replace, e)),
    }
}

/// Mark every not-yet-finished model downstream of `failed` as skipped
fn skip_downstream(
    report: &mut BuildReport,
    compiled: &CompiledProject,
    graph: &DependencyGraph,
    failed: &str,
    in_run: &HashSet<&str>,
) {
    for child in graph.downstream(failed) {
        if in_run.contains(child.as_str()) && report.get(&child).is_none() {
            tracing::warn!(model = %child, upstream = %failed, "skipping model");
            report.record(skipped(
                compiled,
                &child,
                format!("upstream model '{}' failed", failed),
            ));
        }
    }
}

fn skipped(compiled: &CompiledProject, name: &str, message: String) -> ModelResult {
    match compiled.model(name) {
        Some(model) => skipped_model(model, message),
        None => ModelResult {
            model: name.to_string(),
            relation: String::new(),
            status: ModelStatus::Skipped,
            strategy: None,
            duration_ms: 0,
            message: Some(message),
        },
    }
}

fn skipped_model(model: &CompiledModel, message: String) -> ModelResult {
    ModelResult {
        model: model.name.clone(),
        relation: model.rendered_relation.clone(),
        status: ModelStatus::Skipped,
        strategy: None,
        duration_ms: 0,
        message: Some(message),
    }
}

fn failed_model(model: &CompiledModel, message: String) -> ModelResult {
    ModelResult {
        model: model.name.clone(),
        relation: model.rendered_relation.clone(),
        status: ModelStatus::Failed,
        strategy: None,
        duration_ms: 0,
        message: Some(message),
    }
}

fn missing(name: &str) -> ModelResult {
    ModelResult {
        model: name.to_string(),
        relation: String::new(),
        status: ModelStatus::Failed,
        strategy: None,
        duration_ms: 0,
        message: Some(format!("model '{}' was not compiled", name)),
    }
}
