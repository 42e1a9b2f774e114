//! Raw data loaders
//!
//! Bring scraper output into the declared source tables:
//! - `load_messages_json` reads JSON arrays of message objects into
//!   `raw.telegram_messages`
//! - `load_detections_csv` reads the object-detection CSV into
//!   `external.yolo_detections`
//!
//! Both create the target table from the source catalog first and skip rows
//! that conflict on the table's declared unique key, so reloading the same
//! files is a no-op.

use crate::adapter::{Relation, StoreAdapter, StoreError};
use dagwright_core::{LogicalType, Value};
use dagwright_project::{SourceCatalog, SourceRef, SourceTable};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Namespace and table receiving scraped messages
pub const MESSAGES_SOURCE: (&str, &str) = ("raw", "telegram_messages");

/// Namespace and table receiving detection results
pub const DETECTIONS_SOURCE: (&str, &str) = ("external", "yolo_detections");

/// Errors raised while loading raw data
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Source {0} is not declared in the project")]
    UnknownSource(String),

    #[error("Cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Invalid CSV in {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Files read successfully
    pub files: usize,

    /// Files skipped because they could not be parsed
    pub skipped_files: usize,

    /// Records read from the files
    pub records: usize,

    /// Records actually inserted (conflicts excluded)
    pub inserted: u64,
}

/// Load every JSON file under `paths` into the messages source
///
/// A path may be a file or a directory; directories are searched
/// recursively for `*.json`. A file that is not a JSON array of objects is
/// logged and skipped.
pub async fn load_messages_json(
    store: &dyn StoreAdapter,
    catalog: &SourceCatalog,
    paths: &[PathBuf],
) -> Result<LoadSummary, LoadError> {
    let table = declared(catalog, MESSAGES_SOURCE)?;
    let relation = prepare(store, table).await?;

    let mut summary = LoadSummary::default();
    for file in json_files(paths) {
        let records = match read_json_records(&file) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "skipping unreadable file");
                summary.skipped_files += 1;
                continue;
            }
        };

        if records.is_empty() {
            tracing::warn!(file = %file.display(), "no messages in file");
        }

        let rows: Vec<Vec<Value>> = records
            .iter()
            .map(|record| {
                table
                    .columns
                    .iter()
                    .map(|c| coerce(record.get(&c.name).map(Value::from_json).unwrap_or(Value::Null), c.logical_type))
                    .collect()
            })
            .collect();

        let inserted = insert(store, &relation, table, &rows).await?;
        tracing::info!(file = %file.display(), records = rows.len(), inserted, "loaded messages");

        summary.files += 1;
        summary.records += rows.len();
        summary.inserted += inserted;
    }

    Ok(summary)
}

/// Load the detection results CSV into the detections source
///
/// Columns are matched by header name; declared columns missing from the
/// file and empty cells load as NULL.
pub async fn load_detections_csv(
    store: &dyn StoreAdapter,
    catalog: &SourceCatalog,
    path: &Path,
) -> Result<LoadSummary, LoadError> {
    let table = declared(catalog, DETECTIONS_SOURCE)?;

    let csv_error = |e: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let positions: Vec<Option<usize>> = table
        .columns
        .iter()
        .map(|c| headers.iter().position(|h| h.trim() == c.name))
        .collect();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| LoadError::Csv {
            path: path.to_path_buf(),
            message: format!("row {}: {}", idx + 1, e),
        })?;

        let row = table
            .columns
            .iter()
            .zip(&positions)
            .map(|(column, position)| {
                let cell = position
                    .and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty());
                match cell {
                    Some(text) => coerce(Value::from(text), column.logical_type),
                    None => Value::Null,
                }
            })
            .collect();
        rows.push(row);
    }

    let relation = prepare(store, table).await?;
    let inserted = insert(store, &relation, table, &rows).await?;
    tracing::info!(file = %path.display(), records = rows.len(), inserted, "loaded detections");

    Ok(LoadSummary {
        files: 1,
        skipped_files: 0,
        records: rows.len(),
        inserted,
    })
}

fn declared<'a>(catalog: &'a SourceCatalog, (namespace, name): (&str, &str)) -> Result<&'a SourceTable, LoadError> {
    let source = SourceRef::new(namespace, name);
    catalog
        .table(&source)
        .ok_or_else(|| LoadError::UnknownSource(source.to_string()))
}

async fn prepare(store: &dyn StoreAdapter, table: &SourceTable) -> Result<Relation, LoadError> {
    let relation = Relation::new(&table.schema, &table.name);
    store
        .create_source_table(&relation, &table.columns, &table.unique_key)
        .await?;
    Ok(relation)
}

async fn insert(
    store: &dyn StoreAdapter,
    relation: &Relation,
    table: &SourceTable,
    rows: &[Vec<Value>],
) -> Result<u64, LoadError> {
    if rows.is_empty() {
        return Ok(0);
    }

    let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
    Ok(store
        .insert_rows(relation, &columns, rows, &table.unique_key)
        .await?)
}

fn json_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| p.extension().map_or(false, |ext| ext == "json")),
            );
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn read_json_records(path: &Path) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, LoadError> {
    let io_error = |message: String| LoadError::Io {
        path: path.to_path_buf(),
        message,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| io_error(e.to_string()))?;
    let parsed: serde_json::Value = serde_json::from_str(&contents).map_err(|e| io_error(e.to_string()))?;

    match parsed {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(map) => Ok(map),
                other => Err(io_error(format!("expected a message object, found {}", other))),
            })
            .collect(),
        _ => Err(io_error("expected a JSON array of messages".to_string())),
    }
}

/// Convert a loosely typed value to the column's logical type
///
/// Values that cannot be converted are kept as text so nothing is silently
/// lost; the staging models decide what to do with them.
fn coerce(value: Value, logical_type: LogicalType) -> Value {
    match (logical_type, value) {
        (_, Value::Null) => Value::Null,
        (LogicalType::Int, Value::Float(f)) if f.fract() == 0.0 => Value::Int(f as i64),
        (LogicalType::Int, Value::Text(s)) => match s.parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => match s.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 => Value::Int(f as i64),
                _ => Value::Text(s),
            },
        },
        (LogicalType::Float, Value::Int(i)) => Value::Float(i as f64),
        (LogicalType::Float, Value::Text(s)) => match s.parse::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => Value::Text(s),
        },
        (LogicalType::Bool, Value::Int(i)) => Value::Bool(i != 0),
        (LogicalType::Bool, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Value::Bool(true),
            "false" | "f" | "0" | "no" => Value::Bool(false),
            _ => Value::Text(s),
        },
        (LogicalType::Text | LogicalType::Date | LogicalType::Timestamp, Value::Int(i)) => Value::Text(i.to_string()),
        (LogicalType::Text | LogicalType::Date | LogicalType::Timestamp, Value::Float(f)) => Value::Text(f.to_string()),
        (LogicalType::Text | LogicalType::Date | LogicalType::Timestamp, Value::Bool(b)) => Value::Text(b.to_string()),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockStore, SqliteStore};
    use dagwright_core::{SourceColumn, SourceConfig, SourceTableConfig};

    fn catalog() -> SourceCatalog {
        SourceCatalog::from_config(&[
            SourceConfig {
                name: "raw".to_string(),
                schema: None,
                tables: vec![SourceTableConfig {
                    name: "telegram_messages".to_string(),
                    columns: vec![
                        SourceColumn::new("message_id", LogicalType::Int),
                        SourceColumn::new("channel_name", LogicalType::Text),
                        SourceColumn::new("has_media", LogicalType::Bool),
                        SourceColumn::new("views", LogicalType::Int),
                    ],
                    unique_key: vec!["message_id".to_string(), "channel_name".to_string()],
                }],
            },
            SourceConfig {
                name: "external".to_string(),
                schema: None,
                tables: vec![SourceTableConfig {
                    name: "yolo_detections".to_string(),
                    columns: vec![
                        SourceColumn::new("filename", LogicalType::Text),
                        SourceColumn::new("detection_count", LogicalType::Int),
                        SourceColumn::new("classification_confidence", LogicalType::Float),
                    ],
                    unique_key: vec!["filename".to_string()],
                }],
            },
        ])
    }

    #[test]
    fn coerce_follows_logical_type() {
        assert_eq!(coerce(Value::from("42"), LogicalType::Int), Value::Int(42));
        assert_eq!(coerce(Value::from("3.0"), LogicalType::Int), Value::Int(3));
        assert_eq!(coerce(Value::from("True"), LogicalType::Bool), Value::Bool(true));
        assert_eq!(coerce(Value::Int(7), LogicalType::Text), Value::from("7"));
        assert_eq!(coerce(Value::from("n/a"), LogicalType::Float), Value::from("n/a"));
        assert_eq!(coerce(Value::Null, LogicalType::Int), Value::Null);
    }

    #[tokio::test]
    async fn messages_reload_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let day = dir.path().join("2025-07-10");
        std::fs::create_dir_all(&day).unwrap();
        std::fs::write(
            day.join("chemed.json"),
            r#"[
                {"message_id": 1, "channel_name": "CheMed", "has_media": true, "views": 10},
                {"message_id": 2, "channel_name": "CheMed", "views": 5}
            ]"#,
        )
        .unwrap();
        std::fs::write(day.join("broken.json"), "{ not json").unwrap();
        std::fs::write(day.join("notes.txt"), "ignored").unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        let catalog = catalog();
        let paths = vec![dir.path().to_path_buf()];

        let first = load_messages_json(&store, &catalog, &paths).await.unwrap();
        assert_eq!(first.files, 1);
        assert_eq!(first.skipped_files, 1);
        assert_eq!(first.inserted, 2);

        let second = load_messages_json(&store, &catalog, &paths).await.unwrap();
        assert_eq!(second.records, 2);
        assert_eq!(second.inserted, 0);

        let rows = store
            .execute_query("select has_media from \"raw__telegram_messages\" order by message_id")
            .await
            .unwrap();
        assert_eq!(rows.rows[0].get("has_media"), Some(&Value::Int(1)));
        assert_eq!(rows.rows[1].get("has_media"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn detections_csv_matches_headers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("detection_results.csv");
        std::fs::write(
            &path,
            "classification_confidence,filename,extra\n0.8,CheMed_12.jpg,x\n,lobelia_3.jpg,y\n",
        )
        .unwrap();

        let store = SqliteStore::open_in_memory().unwrap();
        let summary = load_detections_csv(&store, &catalog(), &path).await.unwrap();
        assert_eq!(summary.inserted, 2);

        let rows = store
            .execute_query(
                "select filename, detection_count, classification_confidence \
                 from \"external__yolo_detections\" order by filename",
            )
            .await
            .unwrap();
        assert_eq!(rows.rows[0].get("classification_confidence"), Some(&Value::Float(0.8)));
        assert_eq!(rows.rows[0].get("detection_count"), Some(&Value::Null));
        assert_eq!(rows.rows[1].get("classification_confidence"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn undeclared_source_is_rejected() {
        let store = MockStore::new();
        let err = load_messages_json(&store, &SourceCatalog::new(), &[]).await.unwrap_err();
        assert!(matches!(err, LoadError::UnknownSource(ref s) if s == "raw.telegram_messages"));
    }
}
