//! Store adapter trait
//!
//! The engine materializes models and runs assertions only through this
//! trait, so the warehouse backend can be swapped without touching the
//! scheduler.

use dagwright_core::{Dialect, RowSet, SourceColumn, Value};
use std::fmt;

/// Identifies a relation (table or view) in the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Relation {
    /// Schema name
    pub schema: String,

    /// Relation name
    pub name: String,
}

impl Relation {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Get fully qualified name
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Errors raised by a store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Relation not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Trait for stores that can materialize models
#[async_trait::async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Get the adapter name (e.g., "SQLite", "PostgreSQL")
    fn name(&self) -> &'static str;

    /// SQL dialect the store speaks
    fn dialect(&self) -> Dialect;

    /// Name of `relation` as it appears in SQL
    fn render_relation(&self, relation: &Relation) -> String;

    /// Run a query and collect its rows
    async fn execute_query(&self, sql: &str) -> Result<RowSet, StoreError>;

    /// Create or replace a view; a same-named table is dropped first
    async fn create_or_replace_view(&self, relation: &Relation, sql: &str) -> Result<(), StoreError>;

    /// Build a table from scratch, dropping any same-named relation
    async fn create_table(&self, relation: &Relation, sql: &str) -> Result<(), StoreError>;

    /// Merge the query result into an existing table by key
    ///
    /// Rows whose key matches a new row are replaced (NULL keys compare equal);
    /// rows absent from the new result are kept.
    async fn upsert_table(&self, relation: &Relation, sql: &str, unique_key: &[String]) -> Result<(), StoreError>;

    /// Drop a table or view if it exists
    async fn drop_table(&self, relation: &Relation) -> Result<(), StoreError>;

    /// Whether a table or view exists
    async fn table_exists(&self, relation: &Relation) -> Result<bool, StoreError>;

    /// Test the connection to the store
    async fn test_connection(&self) -> Result<(), StoreError>;

    /// Whether independent statements may run concurrently
    fn supports_concurrency(&self) -> bool {
        false
    }

    /// Create a raw source table if it does not exist
    ///
    /// A non-empty `unique_key` is enforced so `insert_rows` can skip conflicts.
    async fn create_source_table(
        &self,
        relation: &Relation,
        columns: &[SourceColumn],
        unique_key: &[String],
    ) -> Result<(), StoreError>;

    /// Insert rows, skipping those that conflict on `conflict_key`
    ///
    /// Returns the number of rows inserted.
    async fn insert_rows(
        &self,
        relation: &Relation,
        columns: &[String],
        rows: &[Vec<Value>],
        conflict_key: &[String],
    ) -> Result<u64, StoreError>;
}
