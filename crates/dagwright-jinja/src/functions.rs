//! Dialect-aware template functions
//!
//! Every function returns a SQL fragment for the target dialect, so models
//! stay portable between the embedded store and PostgreSQL. The `*_sql`
//! helpers are plain functions; `register` wires them into an environment.

use crate::calendar::{DAY_NAMES, SEASONS};
use crate::context::RunContext;
use dagwright_core::sql::{quote_literal, REGEXP_EXTRACT_FN, SURROGATE_KEY_FN};
use dagwright_core::{Dialect, KEY_DELIMITER, NULL_SENTINEL};
use minijinja::{Environment, Error, ErrorKind, Value};
use std::sync::Arc;

/// Date parts accepted by `date_part()`
pub const DATE_PARTS: [&str; 6] = ["year", "quarter", "month", "day", "dow", "doy"];

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

/// Register every function on `env`
pub fn register(env: &mut Environment<'static>, context: Arc<RunContext>) {
    let dialect = context.dialect();

    let ctx = Arc::clone(&context);
    env.add_function("var", move |name: String, default: Option<Value>| -> Result<Value, Error> {
        var_value(&ctx, &name, default)
    });

    env.add_function("surrogate_key", move |columns: Value| -> Result<String, Error> {
        let columns = string_list(&columns)?;
        if columns.is_empty() {
            return Err(invalid("surrogate_key() needs at least one column"));
        }
        Ok(surrogate_key_sql(dialect, &columns))
    });

    env.add_function("to_date", move |expr: String| to_date_sql(dialect, &expr));
    env.add_function("to_timestamp", move |expr: String| to_timestamp_sql(dialect, &expr));
    env.add_function("timestamp_literal", move |text: String| timestamp_literal_sql(dialect, &text));

    env.add_function("dateadd_days", move |expr: String, days: Value| -> Result<String, Error> {
        Ok(dateadd_days_sql(dialect, &expr, day_count(&days)?))
    });
    env.add_function("date_add_day", move |expr: String, days: Option<Value>| -> Result<String, Error> {
        let days = match days {
            Some(v) => day_count(&v)?,
            None => 1,
        };
        Ok(date_add_day_sql(dialect, &expr, days))
    });

    env.add_function("date_part", move |part: String, expr: String| -> Result<String, Error> {
        date_part_sql(dialect, &part, &expr)
            .ok_or_else(|| invalid(format!("date_part() does not support '{}'", part)))
    });
    env.add_function("date_key", move |expr: String| date_key_sql(dialect, &expr));
    env.add_function("regexp_extract", move |expr: String, pattern: String| {
        regexp_extract_sql(dialect, &expr, &pattern)
    });
    env.add_function("season", move |expr: String| season_sql(dialect, &expr));
    env.add_function("day_name", move |expr: String| day_name_sql(dialect, &expr));
}

/// var() - project variable or default; unknown without default is an error
pub fn var_value(ctx: &RunContext, name: &str, default: Option<Value>) -> Result<Value, Error> {
    match (ctx.var(name), default) {
        (Some(value), _) => Ok(Value::from_serialize(value)),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(Error::new(
            ErrorKind::UndefinedError,
            format!("Variable '{}' is not defined", name),
        )),
    }
}

fn string_list(value: &Value) -> Result<Vec<String>, Error> {
    if let Some(single) = value.as_str() {
        return Ok(vec![single.to_string()]);
    }
    value
        .try_iter()?
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| invalid("surrogate_key() columns must be strings"))
        })
        .collect()
}

/// Day counts are interpolated into SQL, so only integers are accepted
fn day_count(value: &Value) -> Result<i64, Error> {
    if let Ok(n) = i64::try_from(value.clone()) {
        return Ok(n);
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| invalid(format!("expected a whole number of days, got {}", value)))
}

/// Hex SHA-256 over the canonical key form
pub fn surrogate_key_sql(dialect: Dialect, columns: &[String]) -> String {
    match dialect {
        Dialect::Sqlite => format!("{}({})", SURROGATE_KEY_FN, columns.join(", ")),
        Dialect::Postgres => {
            let delimiter = quote_literal(&KEY_DELIMITER.to_string());
            let parts = columns
                .iter()
                .map(|col| {
                    format!(
                        "coalesce(replace(replace(cast({} as text), '\\', '\\\\'), '|', '\\|'), {})",
                        col,
                        quote_literal(NULL_SENTINEL)
                    )
                })
                .collect::<Vec<_>>()
                .join(&format!(" || {} || ", delimiter));
            format!("encode(sha256(convert_to({}, 'UTF8')), 'hex')", parts)
        }
    }
}

pub fn to_date_sql(dialect: Dialect, expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("date({})", expr),
        Dialect::Postgres => format!("cast({} as date)", expr),
    }
}

pub fn to_timestamp_sql(dialect: Dialect, expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("datetime({})", expr),
        Dialect::Postgres => format!("cast({} as timestamptz)", expr),
    }
}

pub fn timestamp_literal_sql(dialect: Dialect, text: &str) -> String {
    to_timestamp_sql(dialect, &quote_literal(text))
}

pub fn dateadd_days_sql(dialect: Dialect, expr: &str, days: i64) -> String {
    match dialect {
        Dialect::Sqlite => format!("datetime({}, '{:+} days')", expr, days),
        Dialect::Postgres => format!("({} + interval '{} days')", expr, days),
    }
}

pub fn date_add_day_sql(dialect: Dialect, expr: &str, days: i64) -> String {
    match dialect {
        Dialect::Sqlite => format!("date({}, '{:+} days')", expr, days),
        Dialect::Postgres => format!("(cast({} as date) + {})", expr, days),
    }
}

pub fn date_part_sql(dialect: Dialect, part: &str, expr: &str) -> Option<String> {
    let part = part.to_ascii_lowercase();
    if !DATE_PARTS.contains(&part.as_str()) {
        return None;
    }

    let sql = match dialect {
        Dialect::Sqlite => {
            let strftime = |fmt: &str| format!("cast(strftime('{}', {}) as integer)", fmt, expr);
            match part.as_str() {
                "year" => strftime("%Y"),
                "quarter" => format!("((cast(strftime('%m', {}) as integer) + 2) / 3)", expr),
                "month" => strftime("%m"),
                "day" => strftime("%d"),
                "dow" => strftime("%w"),
                _ => strftime("%j"),
            }
        }
        Dialect::Postgres => format!("cast(extract({} from {}) as integer)", part, expr),
    };
    Some(sql)
}

/// Integer YYYYMMDD
pub fn date_key_sql(dialect: Dialect, expr: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("cast(strftime('%Y%m%d', {}) as integer)", expr),
        Dialect::Postgres => format!("cast(to_char({}, 'YYYYMMDD') as integer)", expr),
    }
}

/// First match (or first capture group), NULL when nothing matches
pub fn regexp_extract_sql(dialect: Dialect, expr: &str, pattern: &str) -> String {
    match dialect {
        Dialect::Sqlite => format!("{}({}, {})", REGEXP_EXTRACT_FN, expr, quote_literal(pattern)),
        Dialect::Postgres => format!("substring({} from {})", expr, quote_literal(pattern)),
    }
}

pub fn season_sql(dialect: Dialect, expr: &str) -> String {
    let month = date_part_sql(dialect, "month", expr).unwrap_or_default();
    let mut sql = String::from("case");
    for (season, months) in SEASONS {
        let months = months.iter().map(u32::to_string).collect::<Vec<_>>().join(", ");
        sql.push_str(&format!(" when {} in ({}) then '{}'", month, months, season.name()));
    }
    sql.push_str(" end");
    sql
}

pub fn day_name_sql(dialect: Dialect, expr: &str) -> String {
    let dow = date_part_sql(dialect, "dow", expr).unwrap_or_default();
    let mut sql = format!("case {}", dow);
    for (i, name) in DAY_NAMES.iter().enumerate() {
        sql.push_str(&format!(" when {} then '{}'", i, name));
    }
    sql.push_str(" end");
    sql
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surrogate_key_sqlite_calls_udf() {
        let sql = surrogate_key_sql(Dialect::Sqlite, &["channel_name".to_string(), "message_id".to_string()]);
        assert_eq!(sql, "dagwright_surrogate_key(channel_name, message_id)");
    }

    #[test]
    fn surrogate_key_postgres_escapes_and_joins() {
        let sql = surrogate_key_sql(Dialect::Postgres, &["a".to_string(), "b".to_string()]);
        assert!(sql.starts_with("encode(sha256(convert_to("));
        assert!(sql.contains("replace(replace(cast(a as text), '\\', '\\\\'), '|', '\\|')"));
        assert!(sql.contains(" || '|' || "));
        assert!(sql.contains("'\\N')"));
    }

    #[test]
    fn date_parts_per_dialect() {
        assert_eq!(
            date_part_sql(Dialect::Sqlite, "dow", "d").unwrap(),
            "cast(strftime('%w', d) as integer)"
        );
        assert_eq!(
            date_part_sql(Dialect::Postgres, "YEAR", "d").unwrap(),
            "cast(extract(year from d) as integer)"
        );
        assert!(date_part_sql(Dialect::Sqlite, "week", "d").is_none());
    }

    #[test]
    fn dateadd_sign() {
        assert_eq!(dateadd_days_sql(Dialect::Sqlite, "x", 1), "datetime(x, '+1 days')");
        assert_eq!(dateadd_days_sql(Dialect::Sqlite, "x", -3), "datetime(x, '-3 days')");
        assert_eq!(dateadd_days_sql(Dialect::Postgres, "x", 2), "(x + interval '2 days')");
    }

    #[test]
    fn timestamp_literal_is_quoted() {
        assert_eq!(
            timestamp_literal_sql(Dialect::Sqlite, "2020-01-01"),
            "datetime('2020-01-01')"
        );
    }

    #[test]
    fn season_case_covers_all_seasons() {
        let sql = season_sql(Dialect::Sqlite, "full_date");
        assert!(sql.contains("in (10, 11, 12, 1) then 'Bega'"));
        assert!(sql.contains("then 'Belg'"));
        assert!(sql.contains("then 'Kiremt'"));
    }

    #[test]
    fn var_lookup() {
        let ctx = RunContext::builder()
            .var("future_tolerance_days", serde_json::json!(1))
            .build();

        assert_eq!(
            var_value(&ctx, "future_tolerance_days", None).unwrap(),
            Value::from(1)
        );
        assert_eq!(
            var_value(&ctx, "missing", Some(Value::from("x"))).unwrap(),
            Value::from("x")
        );
        assert!(var_value(&ctx, "missing", None).is_err());
    }

    #[test]
    fn day_counts_must_be_integers() {
        assert_eq!(day_count(&Value::from(3)).unwrap(), 3);
        assert_eq!(day_count(&Value::from("2")).unwrap(), 2);
        assert!(day_count(&Value::from("1; drop table x")).is_err());
    }
}
