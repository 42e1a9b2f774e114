//! Store adapters for dagwright
//!
//! The engine talks to the warehouse only through [`StoreAdapter`]. This
//! crate provides:
//! - [`SqliteStore`] - embedded store, always available
//! - [`PostgresStore`] - PostgreSQL (enable the `postgres` feature)
//! - [`MockStore`] - in-memory recorder for tests
//! - Raw data loaders for the declared source tables
//!
//! ## Features
//!
//! - `postgres` - PostgreSQL support via tokio-postgres

pub mod adapter;
pub mod statements;
pub mod sqlite;
pub mod postgres;
pub mod mock;
pub mod loader;

pub use adapter::{Relation, StoreAdapter, StoreError};
pub use sqlite::SqliteStore;
pub use postgres::PostgresStore;
pub use mock::{MockOperation, MockRelationKind, MockStore, MockStoreBuilder};
pub use loader::{load_detections_csv, load_messages_json, LoadError, LoadSummary};

use dagwright_core::{Dialect, TargetConfig};
use std::path::Path;
use std::sync::Arc;

/// Open the store described by a target
///
/// A relative SQLite path is resolved against `project_root`; no path means
/// an in-memory database. PostgreSQL takes its connection string from the
/// target or from `DAGWRIGHT_PG_CONNECTION`.
pub async fn connect(target: &TargetConfig, project_root: &Path) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    match target.dialect {
        Dialect::Sqlite => {
            let store = match target.path.as_deref() {
                None | Some(":memory:") => SqliteStore::open_in_memory()?,
                Some(path) => SqliteStore::open(&project_root.join(path))?,
            };
            Ok(Arc::new(store))
        }
        Dialect::Postgres => {
            let conn_str = target.connection_string().ok_or_else(|| {
                StoreError::Config(format!(
                    "target `{}` has no connection string; set `connection` or {}",
                    target.name,
                    dagwright_core::PG_CONNECTION_ENV
                ))
            })?;

            let store = if target.tls {
                PostgresStore::from_connection_string_with_tls(&conn_str).await?
            } else {
                PostgresStore::from_connection_string(&conn_str).await?
            };
            tracing::info!(host = store.host(), database = store.database(), "connected to PostgreSQL");
            Ok(Arc::new(store))
        }
    }
}
