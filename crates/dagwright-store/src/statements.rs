//! DDL and merge statements shared by the SQL stores

use dagwright_core::sql::quote_identifier;
use dagwright_core::{Dialect, LogicalType, SourceColumn};

/// Physical column type for a logical source type
pub fn column_type(dialect: Dialect, logical_type: LogicalType) -> &'static str {
    match (dialect, logical_type) {
        (Dialect::Sqlite, LogicalType::Bool) => "INTEGER",
        (Dialect::Sqlite, LogicalType::Int) => "INTEGER",
        (Dialect::Sqlite, LogicalType::Float) => "REAL",
        (Dialect::Sqlite, _) => "TEXT",
        (Dialect::Postgres, LogicalType::Bool) => "BOOLEAN",
        (Dialect::Postgres, LogicalType::Int) => "BIGINT",
        (Dialect::Postgres, LogicalType::Float) => "DOUBLE PRECISION",
        (Dialect::Postgres, LogicalType::Text) => "TEXT",
        (Dialect::Postgres, LogicalType::Date) => "DATE",
        (Dialect::Postgres, LogicalType::Timestamp) => "TIMESTAMPTZ",
    }
}

/// `CREATE TABLE IF NOT EXISTS` for a declared source table
///
/// A non-empty `unique_key` becomes a unique constraint so conflicting
/// inserts can be skipped.
pub fn create_source_table(
    dialect: Dialect,
    relation: &str,
    columns: &[SourceColumn],
    unique_key: &[String],
) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_identifier(&c.name), column_type(dialect, c.logical_type)))
        .collect();

    if !unique_key.is_empty() {
        defs.push(format!("UNIQUE ({})", column_list(unique_key)));
    }

    format!("CREATE TABLE IF NOT EXISTS {} ({})", relation, defs.join(", "))
}

pub fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Null-safe equality between two expressions
pub fn null_safe_eq(dialect: Dialect, left: &str, right: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("{} IS {}", left, right),
        Dialect::Postgres => format!("{} IS NOT DISTINCT FROM {}", left, right),
    }
}

/// Delete target rows whose key matches a staged row
pub fn delete_matching(dialect: Dialect, target: &str, stage: &str, unique_key: &[String]) -> String {
    let predicate = unique_key
        .iter()
        .map(|k| {
            let column = quote_identifier(k);
            null_safe_eq(
                dialect,
                &format!("{}.{}", target, column),
                &format!("s.{}", column),
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "DELETE FROM {target} WHERE EXISTS (SELECT 1 FROM {stage} AS s WHERE {predicate})"
    )
}

/// Copy every staged row into the target with an explicit column list
pub fn insert_from_stage(target: &str, stage: &str, columns: &[String]) -> String {
    let columns = column_list(columns);
    format!("INSERT INTO {target} ({columns}) SELECT {columns} FROM {stage}")
}

/// Insert one row, skipping it if it violates a unique constraint
///
/// SQLite binds one positional parameter per column. PostgreSQL binds the
/// whole row as a single JSON object, so the server coerces each field to the
/// column type.
pub fn insert_ignoring_conflicts(
    dialect: Dialect,
    relation: &str,
    columns: &[String],
    conflict_key: &[String],
) -> String {
    let column_sql = column_list(columns);
    let source = match dialect {
        Dialect::Sqlite => {
            let placeholders = (1..=columns.len())
                .map(|i| format!("?{}", i))
                .collect::<Vec<_>>()
                .join(", ");
            format!("VALUES ({})", placeholders)
        }
        Dialect::Postgres => format!(
            "SELECT {} FROM json_populate_record(NULL::{}, $1::text::json)",
            column_sql, relation
        ),
    };

    let conflict = if conflict_key.is_empty() {
        String::new()
    } else {
        format!(" ON CONFLICT ({}) DO NOTHING", column_list(conflict_key))
    };

    format!("INSERT INTO {} ({}) {}{}", relation, column_sql, source, conflict)
}

/// Strip trailing semicolons so a body can be embedded in DDL
pub fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Name of the stage table used while upserting `name`
pub fn stage_name(name: &str) -> String {
    quote_identifier(&format!("__dagwright_stage_{}", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_uses_null_safe_match() {
        let sql = delete_matching(
            Dialect::Sqlite,
            "\"marts__fct_messages\"",
            "\"stage\"",
            &["message_key".to_string()],
        );
        assert_eq!(
            sql,
            "DELETE FROM \"marts__fct_messages\" WHERE EXISTS (SELECT 1 FROM \"stage\" AS s WHERE \"marts__fct_messages\".\"message_key\" IS s.\"message_key\")"
        );

        let sql = delete_matching(Dialect::Postgres, "t", "s2", &["a".to_string(), "b".to_string()]);
        assert!(sql.contains("t.\"a\" IS NOT DISTINCT FROM s.\"a\" AND t.\"b\" IS NOT DISTINCT FROM s.\"b\""));
    }

    #[test]
    fn source_table_ddl() {
        let sql = create_source_table(
            Dialect::Postgres,
            "\"raw\".\"telegram_messages\"",
            &[
                SourceColumn::new("message_id", LogicalType::Int),
                SourceColumn::new("message_date", LogicalType::Timestamp),
            ],
            &["message_id".to_string()],
        );
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"raw\".\"telegram_messages\" (\"message_id\" BIGINT, \"message_date\" TIMESTAMPTZ, UNIQUE (\"message_id\"))"
        );
    }

    #[test]
    fn trailing_semicolons_are_trimmed() {
        assert_eq!(trim_statement("select 1;\n"), "select 1");
        assert_eq!(trim_statement("  select 1 ;; "), "select 1");
    }

    #[test]
    fn insert_statement_per_dialect() {
        let columns = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            insert_ignoring_conflicts(Dialect::Sqlite, "t", &columns, &[]),
            "INSERT INTO t (\"a\", \"b\") VALUES (?1, ?2)"
        );
        assert_eq!(
            insert_ignoring_conflicts(Dialect::Postgres, "t", &columns, &["a".to_string()]),
            "INSERT INTO t (\"a\", \"b\") SELECT \"a\", \"b\" FROM json_populate_record(NULL::t, $1::text::json) ON CONFLICT (\"a\") DO NOTHING"
        );
    }
}
