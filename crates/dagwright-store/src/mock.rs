//! Mock store for testing
//!
//! Records every materialization without touching a database. It is useful
//! for:
//! - Unit testing the scheduler (order, skips, concurrency)
//! - Simulating adapter failures on specific relations
//! - Canned query results for the assertion runner
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dagwright_store::{MockStore, StoreAdapter, StoreError, Relation};
//!
//! let store = MockStore::new();
//! store
//!     .add_error_for_relation(
//!         Relation::new("marts", "dim_channels"),
//!         StoreError::Query("division by zero".to_string()),
//!     )
//!     .await;
//!
//! // Later: inspect what the scheduler did
//! let ops = store.operations().await;
//! ```

use crate::adapter::{Relation, StoreAdapter, StoreError};
use dagwright_core::{Dialect, RowSet, SourceColumn, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Kind of relation held by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRelationKind {
    View,
    Table,
}

/// A recorded store call
#[derive(Debug, Clone, PartialEq)]
pub enum MockOperation {
    Query { sql: String },
    CreateView { relation: String, sql: String },
    CreateTable { relation: String, sql: String },
    Upsert { relation: String, sql: String, unique_key: Vec<String> },
    Drop { relation: String },
    CreateSource { relation: String },
    Insert { relation: String, rows: usize },
}

impl MockOperation {
    /// Relation touched by the call, if any
    pub fn relation(&self) -> Option<&str> {
        match self {
            Self::Query { .. } => None,
            Self::CreateView { relation, .. }
            | Self::CreateTable { relation, .. }
            | Self::Upsert { relation, .. }
            | Self::Drop { relation }
            | Self::CreateSource { relation }
            | Self::Insert { relation, .. } => Some(relation),
        }
    }
}

/// Mock store
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
pub struct MockStore {
    /// Existing relations by FQN
    relations: Arc<RwLock<HashMap<String, MockRelationKind>>>,

    /// Calls in the order they were made
    operations: Arc<RwLock<Vec<MockOperation>>>,

    /// Errors to return for specific relations
    errors: Arc<RwLock<HashMap<String, StoreError>>>,

    /// Canned query results, matched by substring of the SQL
    query_results: Arc<RwLock<Vec<(String, Result<RowSet, StoreError>)>>>,

    /// Calls currently in progress
    in_flight: Arc<AtomicUsize>,

    /// Highest number of calls seen in progress at once
    max_in_flight: Arc<AtomicUsize>,

    /// Simulate connection failure
    fail_connection: bool,

    /// Simulate statement latency (milliseconds)
    latency_ms: u64,

    /// Value of `supports_concurrency()`
    concurrent: bool,

    dialect: Dialect,

    /// Name to return from name() method
    adapter_name: &'static str,
}

impl MockStore {
    /// Create an empty mock store
    pub fn new() -> Self {
        MockStoreBuilder::new().build()
    }

    /// Configure an error to be returned whenever `relation` is materialized
    pub async fn add_error_for_relation(&self, relation: Relation, error: StoreError) {
        self.errors.write().await.insert(relation.fqn(), error);
    }

    /// Return `result` for any query whose SQL contains `pattern`
    ///
    /// Later registrations win over earlier ones.
    pub async fn add_query_result(&self, pattern: impl Into<String>, result: Result<RowSet, StoreError>) {
        self.query_results.write().await.push((pattern.into(), result));
    }

    /// Pretend `relation` already exists
    pub async fn add_relation(&self, relation: Relation, kind: MockRelationKind) {
        self.relations.write().await.insert(relation.fqn(), kind);
    }

    /// Clear all stored errors
    pub async fn clear_errors(&self) {
        self.errors.write().await.clear();
    }

    /// Configure to fail all connection tests
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure simulated latency for every statement
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Advertise support for concurrent statements
    pub fn with_concurrency(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Set a custom adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// Recorded calls, oldest first
    pub async fn operations(&self) -> Vec<MockOperation> {
        self.operations.read().await.clone()
    }

    /// Relations materialized (view, table or upsert), in call order
    pub async fn materialized(&self) -> Vec<String> {
        self.operations
            .read()
            .await
            .iter()
            .filter_map(|op| match op {
                MockOperation::CreateView { relation, .. }
                | MockOperation::CreateTable { relation, .. }
                | MockOperation::Upsert { relation, .. } => Some(relation.clone()),
                _ => None,
            })
            .collect()
    }

    /// Kind of relation currently held under `relation`
    pub async fn relation_kind(&self, relation: &Relation) -> Option<MockRelationKind> {
        self.relations.read().await.get(&relation.fqn()).copied()
    }

    /// Highest number of statements observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, operation: MockOperation) {
        self.operations.write().await.push(operation);
    }

    /// Track an in-progress statement and simulate latency
    async fn enter(&self) -> InFlight {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }

        InFlight(Arc::clone(&self.in_flight))
    }

    async fn check_error(&self, relation: &Relation) -> Result<(), StoreError> {
        match self.errors.read().await.get(&relation.fqn()) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockStore {
    fn clone(&self) -> Self {
        Self {
            relations: Arc::clone(&self.relations),
            operations: Arc::clone(&self.operations),
            errors: Arc::clone(&self.errors),
            query_results: Arc::clone(&self.query_results),
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            concurrent: self.concurrent,
            dialect: self.dialect,
            adapter_name: self.adapter_name,
        }
    }
}

#[async_trait::async_trait]
impl StoreAdapter for MockStore {
    fn name(&self) -> &'static str {
        self.adapter_name
    }

    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn render_relation(&self, relation: &Relation) -> String {
        relation.fqn()
    }

    fn supports_concurrency(&self) -> bool {
        self.concurrent
    }

    async fn execute_query(&self, sql: &str) -> Result<RowSet, StoreError> {
        let _guard = self.enter().await;
        self.record(MockOperation::Query { sql: sql.to_string() }).await;

        let results = self.query_results.read().await;
        match results.iter().rev().find(|(pattern, _)| sql.contains(pattern.as_str())) {
            Some((_, result)) => result.clone(),
            None => Ok(RowSet::default()),
        }
    }

    async fn create_or_replace_view(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let _guard = self.enter().await;
        self.check_error(relation).await?;

        self.record(MockOperation::CreateView {
            relation: relation.fqn(),
            sql: sql.to_string(),
        })
        .await;
        self.relations.write().await.insert(relation.fqn(), MockRelationKind::View);
        Ok(())
    }

    async fn create_table(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let _guard = self.enter().await;
        self.check_error(relation).await?;

        self.record(MockOperation::CreateTable {
            relation: relation.fqn(),
            sql: sql.to_string(),
        })
        .await;
        self.relations.write().await.insert(relation.fqn(), MockRelationKind::Table);
        Ok(())
    }

    async fn upsert_table(&self, relation: &Relation, sql: &str, unique_key: &[String]) -> Result<(), StoreError> {
        let _guard = self.enter().await;
        self.check_error(relation).await?;

        if self.relation_kind(relation).await != Some(MockRelationKind::Table) {
            return Err(StoreError::NotFound(relation.fqn()));
        }

        self.record(MockOperation::Upsert {
            relation: relation.fqn(),
            sql: sql.to_string(),
            unique_key: unique_key.to_vec(),
        })
        .await;
        Ok(())
    }

    async fn drop_table(&self, relation: &Relation) -> Result<(), StoreError> {
        let _guard = self.enter().await;
        self.record(MockOperation::Drop { relation: relation.fqn() }).await;
        self.relations.write().await.remove(&relation.fqn());
        Ok(())
    }

    async fn table_exists(&self, relation: &Relation) -> Result<bool, StoreError> {
        Ok(self.relations.read().await.contains_key(&relation.fqn()))
    }

    async fn test_connection(&self) -> Result<(), StoreError> {
        let _guard = self.enter().await;

        if self.fail_connection {
            Err(StoreError::Connection("Simulated connection failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn create_source_table(
        &self,
        relation: &Relation,
        _columns: &[SourceColumn],
        _unique_key: &[String],
    ) -> Result<(), StoreError> {
        self.check_error(relation).await?;
        self.record(MockOperation::CreateSource { relation: relation.fqn() }).await;
        self.relations
            .write()
            .await
            .entry(relation.fqn())
            .or_insert(MockRelationKind::Table);
        Ok(())
    }

    async fn insert_rows(
        &self,
        relation: &Relation,
        _columns: &[String],
        rows: &[Vec<Value>],
        _conflict_key: &[String],
    ) -> Result<u64, StoreError> {
        self.check_error(relation).await?;
        self.record(MockOperation::Insert {
            relation: relation.fqn(),
            rows: rows.len(),
        })
        .await;
        Ok(rows.len() as u64)
    }
}

/// Builder for a pre-configured MockStore
///
/// ```rust,ignore
/// let store = MockStoreBuilder::new()
///     .with_error("marts", "dim_channels", StoreError::Query("boom".to_string()))
///     .with_latency(20)
///     .with_concurrency()
///     .build();
/// ```
pub struct MockStoreBuilder {
    relations: HashMap<String, MockRelationKind>,
    errors: HashMap<String, StoreError>,
    query_results: Vec<(String, Result<RowSet, StoreError>)>,
    fail_connection: bool,
    latency_ms: u64,
    concurrent: bool,
    dialect: Dialect,
    adapter_name: &'static str,
}

impl MockStoreBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            errors: HashMap::new(),
            query_results: Vec::new(),
            fail_connection: false,
            latency_ms: 0,
            concurrent: false,
            dialect: Dialect::Sqlite,
            adapter_name: "Mock",
        }
    }

    /// Pretend a relation already exists
    pub fn with_relation(mut self, schema: &str, name: &str, kind: MockRelationKind) -> Self {
        self.relations.insert(Relation::new(schema, name).fqn(), kind);
        self
    }

    /// Add an error for a specific relation
    pub fn with_error(mut self, schema: &str, name: &str, error: StoreError) -> Self {
        self.errors.insert(Relation::new(schema, name).fqn(), error);
        self
    }

    /// Return `result` for queries containing `pattern`
    pub fn with_query_result(mut self, pattern: &str, result: Result<RowSet, StoreError>) -> Self {
        self.query_results.push((pattern.to_string(), result));
        self
    }

    /// Configure connection failure
    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Configure latency
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Advertise concurrency support
    pub fn with_concurrency(mut self) -> Self {
        self.concurrent = true;
        self
    }

    /// Dialect reported to the renderer
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Set adapter name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.adapter_name = name;
        self
    }

    /// Build the MockStore
    pub fn build(self) -> MockStore {
        MockStore {
            relations: Arc::new(RwLock::new(self.relations)),
            operations: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(self.errors)),
            query_results: Arc::new(RwLock::new(self.query_results)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
            concurrent: self.concurrent,
            dialect: self.dialect,
            adapter_name: self.adapter_name,
        }
    }
}

impl Default for MockStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
