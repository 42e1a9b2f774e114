//! Embedded SQLite store
//!
//! Runs the whole warehouse in a single SQLite database (a file or
//! `:memory:`). SQLite views cannot reference other attached databases, so a
//! relation `schema.name` is stored as the table `"schema__name"`.
//!
//! Two deterministic functions are registered on the connection:
//!
//! - `dagwright_surrogate_key(...)` - variadic, wraps [`generate_surrogate_key`]
//! - `dagwright_regexp_extract(text, pattern)` - first match (or first capture
//!   group), NULL when nothing matches

use crate::adapter::{Relation, StoreAdapter, StoreError};
use crate::statements;
use dagwright_core::sql::{quote_identifier, REGEXP_EXTRACT_FN, SURROGATE_KEY_FN};
use dagwright_core::{generate_surrogate_key, Dialect, RowSet, SourceColumn, Value};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SQLite store
pub struct SqliteStore {
    conn: Mutex<Connection>,

    /// Database file; `None` for in-memory stores
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Connection(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("{}: {}", path.display(), e)))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        register_functions(&conn).map_err(|e| StoreError::Connection(e.to_string()))?;
        tracing::debug!(path = ?path, "opened SQLite store");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Database file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connection("SQLite connection lock poisoned".to_string()))
    }

    fn flat_name(relation: &Relation) -> String {
        format!("{}__{}", relation.schema, relation.name)
    }

    /// `table`, `view`, or None
    fn object_type(conn: &Connection, name: &str) -> Result<Option<String>, StoreError> {
        conn.query_row(
            "SELECT type FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            [name],
            |row| row.get(0),
        )
        .optional()
        .map_err(query_error)
    }

    fn drop_sql(conn: &Connection, relation: &Relation) -> Result<Option<String>, StoreError> {
        let name = Self::flat_name(relation);
        Ok(Self::object_type(conn, &name)?.map(|kind| {
            let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
            format!("DROP {} IF EXISTS {}", keyword, quote_identifier(&name))
        }))
    }
}

fn query_error(error: rusqlite::Error) -> StoreError {
    StoreError::Query(error.to_string())
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(hex::encode(b)),
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function(SURROGATE_KEY_FN, -1, flags, |ctx| {
        let values: Vec<Value> = (0..ctx.len()).map(|i| value_from_ref(ctx.get_raw(i))).collect();
        Ok(generate_surrogate_key(&values).into_string())
    })?;

    conn.create_scalar_function(REGEXP_EXTRACT_FN, 2, flags, |ctx| {
        // Compiled once per statement
        let regex: Arc<Regex> = ctx.get_or_create_aux(1, |vr| -> Result<_, BoxError> {
            Ok(Regex::new(vr.as_str()?)?)
        })?;

        let text = match ctx.get_raw(0) {
            ValueRef::Null => return Ok(None),
            ValueRef::Integer(i) => i.to_string(),
            ValueRef::Real(f) => f.to_string(),
            ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
        };

        Ok(regex.captures(&text).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().to_string())
        }))
    })?;

    Ok(())
}

#[async_trait::async_trait]
impl StoreAdapter for SqliteStore {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn render_relation(&self, relation: &Relation) -> String {
        quote_identifier(&Self::flat_name(relation))
    }

    async fn execute_query(&self, sql: &str) -> Result<RowSet, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(statements::trim_statement(sql)).map_err(query_error)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut result = RowSet::new(columns.clone());

        let mut rows = stmt.query([]).map_err(query_error)?;
        while let Some(row) = rows.next().map_err(query_error)? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(value_from_ref))
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_error)?;
            result.push(values);
        }

        Ok(result)
    }

    async fn create_or_replace_view(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_error)?;

        if let Some(drop) = Self::drop_sql(&tx, relation)? {
            tx.execute_batch(&drop).map_err(query_error)?;
        }
        tx.execute_batch(&format!(
            "CREATE VIEW {} AS\n{}",
            self.render_relation(relation),
            statements::trim_statement(sql)
        ))
        .map_err(query_error)?;

        tx.commit().map_err(query_error)
    }

    async fn create_table(&self, relation: &Relation, sql: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_error)?;

        if let Some(drop) = Self::drop_sql(&tx, relation)? {
            tx.execute_batch(&drop).map_err(query_error)?;
        }
        tx.execute_batch(&format!(
            "CREATE TABLE {} AS\n{}",
            self.render_relation(relation),
            statements::trim_statement(sql)
        ))
        .map_err(query_error)?;

        tx.commit().map_err(query_error)
    }

    async fn upsert_table(&self, relation: &Relation, sql: &str, unique_key: &[String]) -> Result<(), StoreError> {
        if unique_key.is_empty() {
            return Err(StoreError::Config(format!("upsert into {} needs a unique key", relation)));
        }

        let target = self.render_relation(relation);
        let stage = statements::stage_name(&Self::flat_name(relation));

        let mut conn = self.lock()?;
        if Self::object_type(&conn, &Self::flat_name(relation))?.as_deref() != Some("table") {
            return Err(StoreError::NotFound(relation.fqn()));
        }

        let tx = conn.transaction().map_err(query_error)?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {stage};\nCREATE TEMP TABLE {stage} AS\n{}",
            statements::trim_statement(sql)
        ))
        .map_err(query_error)?;

        let columns: Vec<String> = {
            let stmt = tx
                .prepare(&format!("SELECT * FROM {}", stage))
                .map_err(query_error)?;
            stmt.column_names().into_iter().map(String::from).collect()
        };

        let deleted = tx
            .execute(&statements::delete_matching(Dialect::Sqlite, &target, &stage, unique_key), [])
            .map_err(query_error)?;
        let inserted = tx
            .execute(&statements::insert_from_stage(&target, &stage, &columns), [])
            .map_err(query_error)?;
        tx.execute_batch(&format!("DROP TABLE {}", stage)).map_err(query_error)?;
        tx.commit().map_err(query_error)?;

        tracing::debug!(relation = %relation, deleted, inserted, "upserted rows");
        Ok(())
    }

    async fn drop_table(&self, relation: &Relation) -> Result<(), StoreError> {
        let conn = self.lock()?;
        if let Some(drop) = Self::drop_sql(&conn, relation)? {
            conn.execute_batch(&drop).map_err(query_error)?;
        }
        Ok(())
    }

    async fn table_exists(&self, relation: &Relation) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        Ok(Self::object_type(&conn, &Self::flat_name(relation))?.is_some())
    }

    async fn test_connection(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StoreError::Connection(format!("Connection test failed: {}", e)))?;
        Ok(())
    }

    async fn create_source_table(
        &self,
        relation: &Relation,
        columns: &[SourceColumn],
        unique_key: &[String],
    ) -> Result<(), StoreError> {
        let sql = statements::create_source_table(
            Dialect::Sqlite,
            &self.render_relation(relation),
            columns,
            unique_key,
        );
        let conn = self.lock()?;
        conn.execute_batch(&sql).map_err(query_error)
    }

    async fn insert_rows(
        &self,
        relation: &Relation,
        columns: &[String],
        rows: &[Vec<Value>],
        conflict_key: &[String],
    ) -> Result<u64, StoreError> {
        let sql = statements::insert_ignoring_conflicts(
            Dialect::Sqlite,
            &self.render_relation(relation),
            columns,
            conflict_key,
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(query_error)?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(&sql).map_err(query_error)?;
            for row in rows {
                let params = rusqlite::params_from_iter(row.iter().map(to_sql_value));
                inserted += stmt.execute(params).map_err(query_error)? as u64;
            }
        }
        tx.commit().map_err(query_error)?;

        Ok(inserted)
    }
}
