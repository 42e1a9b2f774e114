//! Project definitions and dependency resolution
//!
//! This crate handles:
//! - Parsing model templates into typed `ref()`/`source()` references
//! - The model registry and source catalog
//! - Resolving references into a dependency graph (DAG)
//! - Singular assertions and generic column tests
//! - Loading a project directory

pub mod template;
pub mod model;
pub mod registry;
pub mod source;
pub mod assertion;
pub mod dag;
pub mod project;
pub mod error;

pub use template::{ModelBody, ModelConfig, ModelRef, Reference, Segment, SourceRef, TemplateError};
pub use model::{Layer, Materialization, Model, UniqueKey};
pub use registry::ModelRegistry;
pub use source::{SourceCatalog, SourceTable};
pub use assertion::{generic_test_name, Assertion};
pub use dag::{check_references, resolve, DependencyGraph, NodeId};
pub use project::Project;
pub use error::ProjectError;
