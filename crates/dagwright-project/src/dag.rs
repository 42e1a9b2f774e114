//! Reference resolution and dependency graph
//!
//! Builds forward and reverse dependency edges from typed model references,
//! rejects unknown references and cycles, and fixes a reproducible execution
//! order.

use crate::error::ProjectError;
use crate::registry::ModelRegistry;
use crate::source::SourceCatalog;
use crate::template::{ModelBody, Reference, SourceRef};
use std::collections::{HashMap, HashSet, VecDeque};

/// Node identifier (model name)
pub type NodeId = String;

/// Dependency graph with forward and reverse edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// All nodes in declaration order
    nodes: Vec<NodeId>,

    /// Forward edges: node -> models it references (parents)
    parents: HashMap<NodeId, Vec<NodeId>>,

    /// Reverse edges: node -> models referencing it (children)
    children: HashMap<NodeId, Vec<NodeId>>,

    /// Sources read by each node; they produce no edges
    sources: HashMap<NodeId, Vec<SourceRef>>,

    /// Dependency-first order
    order: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Resolve every model reference and build the graph
pub fn resolve(registry: &ModelRegistry, catalog: &SourceCatalog) -> Result<DependencyGraph, ProjectError> {
    let mut nodes = Vec::with_capacity(registry.len());
    let mut parents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    let mut sources: HashMap<NodeId, Vec<SourceRef>> = HashMap::new();

    for model in registry.all() {
        check_references(&model.name, &model.body, registry, catalog)?;
        nodes.push(model.name.clone());

        let mut deps: Vec<NodeId> = Vec::new();
        for name in model.body.model_refs() {
            if !deps.iter().any(|d| d == name) {
                deps.push(name.to_string());
            }
        }
        // Parents are visited in declaration order
        deps.sort_by_key(|d| registry.position(d).unwrap_or(usize::MAX));

        for dep in &deps {
            children.entry(dep.clone()).or_default().push(model.name.clone());
        }
        parents.insert(model.name.clone(), deps);

        let mut read: Vec<SourceRef> = Vec::new();
        for source in model.body.source_refs() {
            if !read.contains(source) {
                read.push(source.clone());
            }
        }
        sources.insert(model.name.clone(), read);
    }

    let mut graph = DependencyGraph {
        nodes,
        parents,
        children,
        sources,
        order: Vec::new(),
    };
    graph.order = graph.topological_sort()?;

    tracing::debug!(models = graph.nodes.len(), "resolved dependency graph");
    Ok(graph)
}

/// Validate the typed references of a model or assertion body
pub fn check_references(
    owner: &str,
    body: &ModelBody,
    registry: &ModelRegistry,
    catalog: &SourceCatalog,
) -> Result<(), ProjectError> {
    for reference in body.references() {
        match reference {
            Reference::Model(r) if !registry.contains(&r.name) => {
                return Err(ProjectError::UnresolvedReference {
                    name: r.name.clone(),
                    kind: "model",
                    model: owner.to_string(),
                });
            }
            Reference::Source(s) if !catalog.contains(s) => {
                return Err(ProjectError::UnresolvedReference {
                    name: s.to_string(),
                    kind: "source",
                    model: owner.to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

impl DependencyGraph {
    /// Get all nodes in declaration order
    pub fn all_nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.parents.contains_key(node_id)
    }

    /// Get immediate parents (dependencies) of a node
    pub fn parents(&self, node_id: &str) -> &[NodeId] {
        self.parents.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Get immediate children (dependents) of a node
    pub fn children(&self, node_id: &str) -> &[NodeId] {
        self.children.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Sources read by a node
    pub fn sources_of(&self, node_id: &str) -> &[SourceRef] {
        self.sources.get(node_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Dependency-first order, ties broken by declaration order
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Get all downstream nodes (transitive closure of children)
    ///
    /// This is the "blast radius" - everything skipped if this node fails.
    pub fn downstream(&self, node_id: &str) -> Vec<NodeId> {
        self.traverse(node_id, &self.children)
    }

    /// Get all upstream nodes (transitive closure of parents)
    pub fn upstream(&self, node_id: &str) -> Vec<NodeId> {
        self.traverse(node_id, &self.parents)
    }

    /// Check if there's a path from source to target
    pub fn has_path(&self, source: &str, target: &str) -> bool {
        self.downstream(source).iter().any(|n| n == target)
    }

    /// Select nodes by `name`, `+name` (with ancestors) or `name+` (with descendants)
    ///
    /// The result follows the execution order.
    pub fn select(&self, selectors: &[String]) -> Result<Vec<NodeId>, ProjectError> {
        let mut selected: HashSet<NodeId> = HashSet::new();

        for selector in selectors {
            let selector = selector.trim();
            let with_ancestors = selector.starts_with('+');
            let with_descendants = selector.ends_with('+') && selector.len() > 1;
            let name = selector.trim_start_matches('+').trim_end_matches('+');

            if !self.contains(name) {
                return Err(ProjectError::UnknownModel(name.to_string()));
            }

            selected.insert(name.to_string());
            if with_ancestors {
                selected.extend(self.upstream(name));
            }
            if with_descendants {
                selected.extend(self.downstream(name));
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|n| selected.contains(*n))
            .cloned()
            .collect())
    }

    fn traverse(&self, node_id: &str, edges: &HashMap<NodeId, Vec<NodeId>>) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();
        let mut result = Vec::new();

        if let Some(next) = edges.get(node_id) {
            queue.extend(next);
        }

        // BFS over the given edge direction
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            if let Some(next) = edges.get(current) {
                queue.extend(next.iter().filter(|n| !visited.contains(*n)));
            }
        }

        result
    }

    /// Depth-first post-order with three colours
    ///
    /// Roots are visited in declaration order; a back-edge to an in-progress
    /// node is reported as the cycle found by unwinding the DFS stack.
    fn topological_sort(&self) -> Result<Vec<NodeId>, ProjectError> {
        let mut marks: HashMap<NodeId, Mark> = HashMap::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut order = Vec::with_capacity(self.nodes.len());

        for node in &self.nodes {
            self.visit(node, &mut marks, &mut stack, &mut order)?;
        }

        Ok(order)
    }

    fn visit(
        &self,
        node: &NodeId,
        marks: &mut HashMap<NodeId, Mark>,
        stack: &mut Vec<NodeId>,
        order: &mut Vec<NodeId>,
    ) -> Result<(), ProjectError> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(node.clone());
                return Err(ProjectError::CyclicDependency { cycle });
            }
            None => {}
        }

        marks.insert(node.clone(), Mark::InProgress);
        stack.push(node.clone());

        for parent in self.parents(node) {
            self.visit(parent, marks, stack, order)?;
        }

        stack.pop();
        marks.insert(node.clone(), Mark::Done);
        order.push(node.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::source::SourceTable;
    use dagwright_core::ProjectConfig;
    use pretty_assertions::assert_eq;

    fn registry(models: &[(&str, &str)]) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for (name, sql) in models {
            let body = ModelBody::parse(sql).unwrap();
            registry
                .register(Model::from_body(*name, body, None, &ProjectConfig::default()).unwrap())
                .unwrap();
        }
        registry
    }

    fn catalog() -> SourceCatalog {
        let mut catalog = SourceCatalog::new();
        catalog.declare(SourceTable {
            namespace: "raw".to_string(),
            schema: "raw".to_string(),
            name: "telegram_messages".to_string(),
            columns: Vec::new(),
            unique_key: Vec::new(),
        });
        catalog
    }

    fn warehouse() -> ModelRegistry {
        // Declared out of dependency order on purpose
        registry(&[
            ("fct_messages", "select * from {{ ref('stg_messages') }} join {{ ref('dim_channels') }} on true join {{ ref('dim_channels') }} on true"),
            ("dim_channels", "select * from {{ ref('stg_messages') }}"),
            ("stg_messages", "select * from {{ source('raw', 'telegram_messages') }}"),
            ("dim_dates", "select 1"),
        ])
    }

    #[test]
    fn execution_order_is_dependency_first() {
        let graph = resolve(&warehouse(), &catalog()).unwrap();

        assert_eq!(
            graph.execution_order(),
            &["stg_messages", "dim_channels", "fct_messages", "dim_dates"]
        );
        assert_eq!(graph.parents("fct_messages"), &["dim_channels", "stg_messages"]);
        assert_eq!(graph.sources_of("stg_messages")[0], SourceRef::new("raw", "telegram_messages"));
    }

    #[test]
    fn order_is_stable_across_resolutions() {
        let first = resolve(&warehouse(), &catalog()).unwrap();
        for _ in 0..10 {
            let again = resolve(&warehouse(), &catalog()).unwrap();
            assert_eq!(first.execution_order(), again.execution_order());
        }
    }

    #[test]
    fn nodes_equal_registry_names() {
        let registry = warehouse();
        let graph = resolve(&registry, &catalog()).unwrap();
        let mut nodes: Vec<_> = graph.all_nodes().to_vec();
        let mut names: Vec<_> = registry.names().map(str::to_string).collect();
        nodes.sort();
        names.sort();
        assert_eq!(nodes, names);
    }

    #[test]
    fn duplicate_refs_produce_one_edge() {
        let graph = resolve(&warehouse(), &catalog()).unwrap();
        assert_eq!(graph.children("dim_channels"), &["fct_messages"]);
    }

    #[test]
    fn two_node_cycle() {
        let registry = registry(&[
            ("A", "select * from {{ ref('B') }}"),
            ("B", "select * from {{ ref('A') }}"),
        ]);
        let err = resolve(&registry, &catalog()).unwrap_err();
        match err {
            ProjectError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["A", "B", "A"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let registry = registry(&[("A", "select * from {{ ref('A') }}")]);
        let err = resolve(&registry, &catalog()).unwrap_err();
        assert!(matches!(err, ProjectError::CyclicDependency { ref cycle } if cycle == &["A", "A"]));
    }

    #[test]
    fn cycle_reported_from_entry_point() {
        let registry = registry(&[
            ("root", "select * from {{ ref('B') }}"),
            ("B", "select * from {{ ref('C') }}"),
            ("C", "select * from {{ ref('B') }}"),
        ]);
        let err = resolve(&registry, &catalog()).unwrap_err();
        assert!(matches!(err, ProjectError::CyclicDependency { ref cycle } if cycle == &["B", "C", "B"]));
    }

    #[test]
    fn unknown_model_reference() {
        let registry = registry(&[("A", "select * from {{ ref('missing') }}")]);
        let err = resolve(&registry, &catalog()).unwrap_err();
        assert!(matches!(
            err,
            ProjectError::UnresolvedReference { ref name, kind: "model", ref model } if name == "missing" && model == "A"
        ));
    }

    #[test]
    fn unknown_source_reference() {
        let registry = registry(&[("A", "select * from {{ source('raw', 'nope') }}")]);
        let err = resolve(&registry, &catalog()).unwrap_err();
        assert!(matches!(err, ProjectError::UnresolvedReference { kind: "source", .. }));
    }

    #[test]
    fn downstream_and_upstream() {
        let graph = resolve(&warehouse(), &catalog()).unwrap();

        let mut downstream = graph.downstream("stg_messages");
        downstream.sort();
        assert_eq!(downstream, vec!["dim_channels", "fct_messages"]);

        let mut upstream = graph.upstream("fct_messages");
        upstream.sort();
        assert_eq!(upstream, vec!["dim_channels", "stg_messages"]);

        assert!(graph.has_path("stg_messages", "fct_messages"));
        assert!(!graph.has_path("fct_messages", "stg_messages"));
    }

    #[test]
    fn selection_syntax() {
        let graph = resolve(&warehouse(), &catalog()).unwrap();

        assert_eq!(graph.select(&["dim_channels".to_string()]).unwrap(), vec!["dim_channels"]);
        assert_eq!(
            graph.select(&["+dim_channels".to_string()]).unwrap(),
            vec!["stg_messages", "dim_channels"]
        );
        assert_eq!(
            graph.select(&["dim_channels+".to_string()]).unwrap(),
            vec!["dim_channels", "fct_messages"]
        );
        assert!(matches!(
            graph.select(&["nope".to_string()]),
            Err(ProjectError::UnknownModel(_))
        ));
    }
}
