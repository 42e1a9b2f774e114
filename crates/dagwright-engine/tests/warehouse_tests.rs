//! End-to-end runs of the medical warehouse project on SQLite
//!
//! The project under `medical_warehouse/` is loaded from disk, its sample data
//! is loaded into an in-memory store, and every model and assertion runs for
//! real.

use chrono::{TimeZone, Utc};
use dagwright_core::{AssertionStatus, Dialect, ModelStatus, ProjectConfig, RowSet, Value};
use dagwright_engine::{Pipeline, RunOptions};
use dagwright_jinja::RunContext;
use dagwright_store::{load_detections_csv, load_messages_json, Relation, SqliteStore, StoreAdapter};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

fn warehouse_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../medical_warehouse")
}

async fn loaded_warehouse() -> (Pipeline, Arc<SqliteStore>) {
    let dir = warehouse_dir();
    let config = ProjectConfig::from_file(&dir.join(ProjectConfig::FILE_NAME)).unwrap();
    let context = RunContext::builder()
        .dialect(Dialect::Sqlite)
        .run_started_at(Utc.with_ymd_and_hms(2025, 7, 10, 12, 0, 0).unwrap())
        .vars(config.vars.clone())
        .build();
    let project = dagwright_project::Project::from_config(config).unwrap();

    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    load_messages_json(store.as_ref(), project.catalog(), &[dir.join("data/raw/telegram_messages")])
        .await
        .unwrap();
    load_detections_csv(
        store.as_ref(),
        project.catalog(),
        &dir.join("data/processed/yolo_results/detection_results.csv"),
    )
    .await
    .unwrap();

    let adapter: Arc<dyn StoreAdapter> = store.clone();
    match Pipeline::new(project, context, adapter) {
        Ok(pipeline) => (pipeline, store),
        Err(e) => panic!("warehouse should compile: {e}"),
    }
}

async fn query(store: &SqliteStore, sql: &str) -> RowSet {
    store.execute_query(sql).await.unwrap()
}

/// Replace the message fact table with hand-written rows
async fn replace_facts(store: &SqliteStore, select: &str) {
    store
        .create_table(&Relation::new("marts", "fct_messages"), select)
        .await
        .unwrap();
}

#[tokio::test]
async fn warehouse_builds_and_passes_assertions() {
    let (pipeline, store) = loaded_warehouse().await;

    let report = pipeline.build(&RunOptions::default()).await.unwrap();
    let build = report.build.as_ref().unwrap();
    for result in &build.results {
        assert_eq!(result.status, ModelStatus::Succeeded, "{}: {:?}", result.model, result.message);
    }
    assert_eq!(build.results.len(), 6);

    let assertions = report.assertions.as_ref().unwrap();
    for result in &assertions.results {
        assert_eq!(result.status, AssertionStatus::Passed, "{}: {:?}", result.name, result.error);
    }
    assert!(!report.has_failures());

    let facts = query(&store, "select count(*) as n from \"marts__fct_messages\"").await;
    // The "test" message is dropped in staging
    assert_eq!(facts.rows[0].get("n"), Some(&Value::Int(6)));

    let dates = query(&store, "select count(*) as n from \"marts__dim_dates\"").await;
    assert_eq!(dates.rows[0].get("n"), Some(&Value::Int(5)));
}

#[tokio::test]
async fn paracetamol_message_is_classified() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let rows = query(
        &store,
        "select product_category, has_urgency_indicator, has_price_mention \
         from \"marts__fct_messages\" where message_id = 101",
    )
    .await;
    assert_eq!(rows.len(), 1);
    let row = &rows.rows[0];
    assert_eq!(row.get("product_category"), Some(&Value::from("Paracetamol")));
    assert_eq!(row.get("has_urgency_indicator"), Some(&Value::Int(1)));
    assert_eq!(row.get("has_price_mention"), Some(&Value::Int(0)));
}

#[tokio::test]
async fn staging_clamps_negative_counts() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let rows = query(
        &store,
        "select view_count, forward_count from \"staging__stg_telegram_messages\" where message_id = 2202",
    )
    .await;
    assert_eq!(rows.rows[0].get("view_count"), Some(&Value::Int(0)));
    assert_eq!(rows.rows[0].get("forward_count"), Some(&Value::Int(0)));
}

#[tokio::test]
async fn channels_are_typed() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let rows = query(
        &store,
        "select channel_name, channel_type, total_posts from \"marts__dim_channels\" order by channel_name",
    )
    .await;
    let summary: Vec<(Option<&str>, Option<&str>, Option<i64>)> = rows
        .rows
        .iter()
        .map(|r| {
            (
                r.get("channel_name").and_then(Value::as_str),
                r.get("channel_type").and_then(Value::as_str),
                r.get("total_posts").and_then(Value::as_i64),
            )
        })
        .collect();

    assert_eq!(
        summary,
        vec![
            (Some("CheMed123"), Some("Medical Equipment"), Some(2)),
            (Some("lobelia4cosmetics"), Some("Cosmetics"), Some(2)),
            (Some("tikvahpharma"), Some("Pharmaceutical"), Some(2)),
        ]
    );
}

#[tokio::test]
async fn detections_fall_back_to_channel() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let by_id = query(
        &store,
        "select d.message_key, f.message_id from \"marts__fct_image_detections\" d \
         join \"marts__fct_messages\" f on f.message_key = d.message_key \
         where d.filename = '101.jpg'",
    )
    .await;
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id.rows[0].get("message_id"), Some(&Value::Int(101)));

    // No id in the filename: one row per message of the channel
    let fallback = query(
        &store,
        "select count(*) as n from \"marts__fct_image_detections\" where filename = 'cream_tube.jpg'",
    )
    .await;
    assert_eq!(fallback.rows[0].get("n"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn detection_ids_match_within_their_channel() {
    let (pipeline, store) = loaded_warehouse().await;

    // Same message id as CheMed123/101.jpg, posted in another channel
    let columns: Vec<String> = ["message_id", "channel_name", "message_date", "message_text", "views", "forwards"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    let row = vec![
        Value::Int(101),
        Value::from("lobelia4cosmetics"),
        Value::from("2025-07-08T09:00:00+00:00"),
        Value::from("Sunscreen SPF 50 back on the shelves"),
        Value::Int(120),
        Value::Int(3),
    ];
    let inserted = store
        .insert_rows(
            &Relation::new("raw", "telegram_messages"),
            &columns,
            &[row],
            &["channel_name".to_string(), "message_id".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    let report = pipeline.run(&RunOptions::default()).await.unwrap();
    assert!(!report.has_failures());

    let rows = query(
        &store,
        "select f.channel_name from \"marts__fct_image_detections\" d \
         join \"marts__fct_messages\" f on f.message_key = d.message_key \
         where d.filename = '101.jpg'",
    )
    .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows.rows[0].get("channel_name"), Some(&Value::from("CheMed123")));
}

#[tokio::test]
async fn rebuild_is_idempotent() {
    let (pipeline, store) = loaded_warehouse().await;
    let count_sql = "select count(*) as n, count(distinct message_key) as keys from \"marts__fct_messages\"";

    pipeline.run(&RunOptions::default()).await.unwrap();
    let first = query(&store, count_sql).await;

    let second_report = pipeline.run(&RunOptions::default()).await.unwrap();
    assert!(!second_report.has_failures());
    let second = query(&store, count_sql).await;

    assert_eq!(first.rows[0].values, second.rows[0].values);
    assert_eq!(second.rows[0].get("n"), second.rows[0].get("keys"));
}

#[tokio::test]
async fn negative_views_fail_with_sample() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    replace_facts(
        &store,
        "select 'k1' as message_key, 'CheMed123' as channel_name, -1 as view_count, 0 as forward_count, \
         datetime('2023-06-01') as message_date",
    )
    .await;

    let report = pipeline.test(&[]).await.unwrap();
    let result = report.assertions.as_ref().unwrap().get("assert_non_negative_views").unwrap();
    assert_eq!(result.status, AssertionStatus::Failed);
    assert!(!result.passed);
    assert_eq!(result.violating_row_count, 1);
    assert_eq!(result.sample_rows[0].get("view_count"), Some(&Value::Int(-1)));

    replace_facts(
        &store,
        "select 'k1' as message_key, 'CheMed123' as channel_name, 0 as view_count, 3 as forward_count, \
         datetime('2023-06-01') as message_date",
    )
    .await;

    let report = pipeline.test(&[]).await.unwrap();
    let result = report.assertions.as_ref().unwrap().get("assert_non_negative_views").unwrap();
    assert!(result.passed);
}

#[tokio::test]
async fn message_dates_are_bounded() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    // run_started_at is 2025-07-10 12:00:00 with one day of tolerance
    let cases = [
        ("2019-01-01 00:00:00", false),
        ("2025-07-12 12:00:00", false),
        ("2023-06-01 00:00:00", true),
    ];

    for (date, should_pass) in cases {
        replace_facts(
            &store,
            &format!(
                "select 'k1' as message_key, 'CheMed123' as channel_name, 0 as view_count, \
                 0 as forward_count, '{}' as message_date",
                date
            ),
        )
        .await;

        let report = pipeline.test(&["fct_messages".to_string()]).await.unwrap();
        let result = report
            .assertions
            .as_ref()
            .unwrap()
            .get("assert_valid_message_dates")
            .unwrap();
        assert_eq!(result.passed, should_pass, "message_date {}", date);
    }
}

#[tokio::test]
async fn broken_assertion_is_an_error_not_a_failure() {
    let (pipeline, store) = loaded_warehouse().await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    // Drop the column the assertion reads
    replace_facts(&store, "select 'k1' as message_key, '2023-06-01 00:00:00' as message_date").await;

    let report = pipeline.test(&[]).await.unwrap();
    let result = report.assertions.as_ref().unwrap().get("assert_non_negative_views").unwrap();
    assert_eq!(result.status, AssertionStatus::Error);
    assert!(result.error.is_some());
    assert!(report.has_failures());
}

#[tokio::test]
async fn compiled_sql_and_results_are_written() {
    let dir = tempfile::TempDir::new().unwrap();
    let source = warehouse_dir();

    let mut config = ProjectConfig::from_file(&source.join(ProjectConfig::FILE_NAME)).unwrap();
    config.target_path = dir.path().display().to_string();
    let project = dagwright_project::Project::from_config(config).unwrap();

    let adapter: Arc<dyn StoreAdapter> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let Ok(pipeline) = Pipeline::new(project, RunContext::builder().build(), adapter) else {
        panic!("warehouse should compile");
    };

    let written = pipeline.write_compiled().unwrap();
    assert!(written.iter().any(|p| p.ends_with("compiled/fct_messages.sql")));
    assert!(dir.path().join("compiled/assertions/assert_valid_message_dates.sql").exists());

    let report = pipeline.test(&[]).await.unwrap();
    report.save_to_file(&pipeline.run_results_path()).unwrap();
    assert!(dir.path().join("run_results.json").exists());
}
