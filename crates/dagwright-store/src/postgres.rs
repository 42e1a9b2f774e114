//! PostgreSQL store
//!
//! Materializes models in a PostgreSQL database through a single
//! `tokio-postgres` client. Statements are serialized on that client, so the
//! store does not advertise concurrency.
//!
//! ## Usage
//!
//! ```rust,ignore
//! // Plain connection
//! let store = PostgresStore::from_connection_string(
//!     "host=localhost port=5432 dbname=warehouse user=postgres password=secret"
//! ).await?;
//!
//! // TLS connection
//! let store = PostgresStore::from_connection_string_with_tls(
//!     "host=db.example.com port=5432 dbname=warehouse user=postgres password=secret"
//! ).await?;
//! ```
//!
//! Query results are read back as `row_to_json` text, which keeps the value
//! mapping independent of PostgreSQL's binary type zoo.

use crate::adapter::{Relation, StoreAdapter, StoreError};
use dagwright_core::{Dialect, RowSet, SourceColumn, Value};

#[cfg(feature = "postgres")]
use crate::statements;

use dagwright_core::sql::quote_identifier;

#[cfg(feature = "postgres")]
use tokio_postgres::{Client, Config as PgConfig, NoTls};

#[cfg(feature = "postgres")]
use postgres_native_tls::MakeTlsConnector;

#[cfg(feature = "postgres")]
use native_tls::TlsConnector;

#[cfg(not(feature = "postgres"))]
const NOT_COMPILED: &str =
    "PostgreSQL support not compiled. Rebuild with: cargo build --features postgres";

/// PostgreSQL store
pub struct PostgresStore {
    /// PostgreSQL client (only available with postgres feature)
    #[cfg(feature = "postgres")]
    client: tokio::sync::Mutex<Client>,

    /// Connection host
    host: String,

    /// Database name
    database: String,

    /// Placeholder for when feature is disabled
    #[cfg(not(feature = "postgres"))]
    _phantom: std::marker::PhantomData<()>,
}

#[cfg(feature = "postgres")]
fn describe(conn_str: &str) -> Result<(String, String), StoreError> {
    let config: PgConfig = conn_str
        .parse()
        .map_err(|e| StoreError::Config(format!("Invalid connection string: {}", e)))?;

    let host = config
        .get_hosts()
        .first()
        .map(|h| format!("{:?}", h))
        .unwrap_or_else(|| "localhost".to_string());
    let database = config.get_dbname().unwrap_or("postgres").to_string();

    Ok((host, database))
}

#[cfg(feature = "postgres")]
fn query_error(error: tokio_postgres::Error) -> StoreError {
    match error.as_db_error() {
        Some(db) => StoreError::Query(db.message().to_string()),
        None => StoreError::Query(error.to_string()),
    }
}

impl PostgresStore {
    /// Connect using a PostgreSQL connection string
    #[cfg(feature = "postgres")]
    pub async fn from_connection_string(conn_str: &str) -> Result<Self, StoreError> {
        let (host, database) = describe(conn_str)?;

        let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect: {}", e)))?;

        let host_clone = host.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(host = %host_clone, error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Self {
            client: tokio::sync::Mutex::new(client),
            host,
            database,
        })
    }

    /// Create store without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn from_connection_string(_conn_str: &str) -> Result<Self, StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    /// Connect using a PostgreSQL connection string over TLS
    #[cfg(feature = "postgres")]
    pub async fn from_connection_string_with_tls(conn_str: &str) -> Result<Self, StoreError> {
        let (host, database) = describe(conn_str)?;

        let connector = TlsConnector::builder()
            .build()
            .map_err(|e| StoreError::Config(format!("Failed to create TLS connector: {}", e)))?;
        let tls = MakeTlsConnector::new(connector);

        let (client, connection) = tokio_postgres::connect(conn_str, tls)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect with TLS: {}", e)))?;

        let host_clone = host.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(host = %host_clone, error = %e, "PostgreSQL TLS connection error");
            }
        });

        Ok(Self {
            client: tokio::sync::Mutex::new(client),
            host,
            database,
        })
    }

    /// Create store without postgres feature (returns error)
    #[cfg(not(feature = "postgres"))]
    pub async fn from_connection_string_with_tls(_conn_str: &str) -> Result<Self, StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    /// Server host, as parsed from the connection string
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Database name
    pub fn database(&self) -> &str {
        &self.database
    }

    /// `BASE TABLE`, `VIEW`, or None
    #[cfg(feature = "postgres")]
    async fn object_type<C: tokio_postgres::GenericClient + Sync>(
        client: &C,
        relation: &Relation,
    ) -> Result<Option<String>, StoreError> {
        let row = client
            .query_opt(
                "SELECT table_type::text FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&relation.schema, &relation.name],
            )
            .await
            .map_err(query_error)?;
        Ok(row.map(|r| r.get(0)))
    }

    /// Drop whatever occupies `relation`, along with dependent views
    #[cfg(feature = "postgres")]
    async fn drop_existing<C: tokio_postgres::GenericClient + Sync>(
        client: &C,
        relation: &Relation,
        rendered: &str,
    ) -> Result<(), StoreError> {
        let keyword = match Self::object_type(client, relation).await?.as_deref() {
            Some("VIEW") => "VIEW",
            Some(_) => "TABLE",
            None => return Ok(()),
        };
        client
            .batch_execute(&format!("DROP {} IF EXISTS {} CASCADE", keyword, rendered))
            .await
            .map_err(query_error)
    }

    #[cfg(feature = "postgres")]
    fn create_schema_sql(relation: &Relation) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(&relation.schema))
    }

    #[cfg(feature = "postgres")]
    async fn replace_with(&self, relation: &Relation, ddl: String) -> Result<(), StoreError> {
        let rendered = self.render_relation(relation);
        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(query_error)?;

        tx.batch_execute(&Self::create_schema_sql(relation))
            .await
            .map_err(query_error)?;
        Self::drop_existing(&tx, relation, &rendered).await?;
        tx.batch_execute(&ddl).await.map_err(query_error)?;

        tx.commit().await.map_err(query_error)
    }
}

#[cfg(feature = "postgres")]
#[async_trait::async_trait]
impl StoreAdapter for PostgresStore {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn render_relation(&self, relation: &Relation) -> String {
        format!("{}.{}", quote_identifier(&relation.schema), quote_identifier(&relation.name))
    }

    async fn execute_query(&self, sql: &str) -> Result<RowSet, StoreError> {
        let sql = statements::trim_statement(sql);
        let client = self.client.lock().await;

        let columns: Vec<String> = client
            .prepare(sql)
            .await
            .map_err(query_error)?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = client
            .query(&format!("SELECT row_to_json(__q)::text FROM (\n{}\n) AS __q", sql), &[])
            .await
            .map_err(query_error)?;

        let mut result = RowSet::new(columns.clone());
        for row in rows {
            let text: String = row.get(0);
            let object: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| StoreError::Query(format!("Unreadable row: {}", e)))?;
            result.push(
                columns
                    .iter()
                    .map(|c| object.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect(),
            );
        }

        Ok(result)
    }

    async fn create_or_replace_view(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE VIEW {} AS\n{}",
            self.render_relation(relation),
            statements::trim_statement(sql)
        );
        self.replace_with(relation, ddl).await
    }

    async fn create_table(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE {} AS\n{}",
            self.render_relation(relation),
            statements::trim_statement(sql)
        );
        self.replace_with(relation, ddl).await
    }

    async fn upsert_table(&self, relation: &Relation, sql: &str, unique_key: &[String]) -> Result<(), StoreError> {
        if unique_key.is_empty() {
            return Err(StoreError::Config(format!("upsert into {} needs a unique key", relation)));
        }

        let target = self.render_relation(relation);
        let stage = statements::stage_name(&format!("{}__{}", relation.schema, relation.name));

        let mut client = self.client.lock().await;
        if Self::object_type(&*client, relation).await?.as_deref() != Some("BASE TABLE") {
            return Err(StoreError::NotFound(relation.fqn()));
        }

        let tx = client.transaction().await.map_err(query_error)?;
        tx.batch_execute(&format!(
            "CREATE TEMP TABLE {} ON COMMIT DROP AS\n{}",
            stage,
            statements::trim_statement(sql)
        ))
        .await
        .map_err(query_error)?;

        let columns: Vec<String> = tx
            .prepare(&format!("SELECT * FROM {}", stage))
            .await
            .map_err(query_error)?
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let deleted = tx
            .execute(&statements::delete_matching(Dialect::Postgres, &target, &stage, unique_key), &[])
            .await
            .map_err(query_error)?;
        let inserted = tx
            .execute(&statements::insert_from_stage(&target, &stage, &columns), &[])
            .await
            .map_err(query_error)?;
        tx.batch_execute(&format!("DROP TABLE {}", stage))
            .await
            .map_err(query_error)?;
        tx.commit().await.map_err(query_error)?;

        tracing::debug!(relation = %relation, deleted, inserted, "upserted rows");
        Ok(())
    }

    async fn drop_table(&self, relation: &Relation) -> Result<(), StoreError> {
        let rendered = self.render_relation(relation);
        let client = self.client.lock().await;
        Self::drop_existing(&*client, relation, &rendered).await
    }

    async fn table_exists(&self, relation: &Relation) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        Ok(Self::object_type(&*client, relation).await?.is_some())
    }

    async fn test_connection(&self) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| StoreError::Connection(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    async fn create_source_table(
        &self,
        relation: &Relation,
        columns: &[SourceColumn],
        unique_key: &[String],
    ) -> Result<(), StoreError> {
        let ddl = statements::create_source_table(
            Dialect::Postgres,
            &self.render_relation(relation),
            columns,
            unique_key,
        );
        let client = self.client.lock().await;
        client
            .batch_execute(&format!("{};\n{}", Self::create_schema_sql(relation), ddl))
            .await
            .map_err(query_error)
    }

    async fn insert_rows(
        &self,
        relation: &Relation,
        columns: &[String],
        rows: &[Vec<Value>],
        conflict_key: &[String],
    ) -> Result<u64, StoreError> {
        let sql = statements::insert_ignoring_conflicts(
            Dialect::Postgres,
            &self.render_relation(relation),
            columns,
            conflict_key,
        );

        let mut client = self.client.lock().await;
        let tx = client.transaction().await.map_err(query_error)?;
        let stmt = tx.prepare(&sql).await.map_err(query_error)?;

        let mut inserted = 0u64;
        for row in rows {
            let record: serde_json::Map<String, serde_json::Value> = columns
                .iter()
                .zip(row)
                .map(|(c, v)| (c.clone(), serde_json::to_value(v).unwrap_or(serde_json::Value::Null)))
                .collect();
            let record = serde_json::Value::Object(record).to_string();
            inserted += tx.execute(&stmt, &[&record]).await.map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;

        Ok(inserted)
    }
}

#[cfg(not(feature = "postgres"))]
#[async_trait::async_trait]
impl StoreAdapter for PostgresStore {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn render_relation(&self, relation: &Relation) -> String {
        format!("{}.{}", quote_identifier(&relation.schema), quote_identifier(&relation.name))
    }

    async fn execute_query(&self, _sql: &str) -> Result<RowSet, StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn create_or_replace_view(&self, _relation: &Relation, _sql: &str) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn create_table(&self, _relation: &Relation, _sql: &str) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn upsert_table(&self, _relation: &Relation, _sql: &str, _unique_key: &[String]) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn drop_table(&self, _relation: &Relation) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn table_exists(&self, _relation: &Relation) -> Result<bool, StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn test_connection(&self) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn create_source_table(
        &self,
        _relation: &Relation,
        _columns: &[SourceColumn],
        _unique_key: &[String],
    ) -> Result<(), StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }

    async fn insert_rows(
        &self,
        _relation: &Relation,
        _columns: &[String],
        _rows: &[Vec<Value>],
        _conflict_key: &[String],
    ) -> Result<u64, StoreError> {
        Err(StoreError::Config(NOT_COMPILED.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "postgres"))]
    #[tokio::test]
    async fn constructors_fail_without_feature() {
        let err = PostgresStore::from_connection_string("host=localhost")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Config(ref m) if m.contains("--features postgres")));

        assert!(PostgresStore::from_connection_string_with_tls("host=localhost").await.is_err());
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn invalid_connection_string_is_a_config_error() {
        let err = PostgresStore::from_connection_string("host=localhost port=notaport")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
