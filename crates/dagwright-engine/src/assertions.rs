//! Assertion runner
//!
//! An assertion is a query that selects violating rows: it passes when the
//! query returns nothing. Content failures and execution errors are kept
//! apart so a broken query is never mistaken for bad data.

use crate::compile::CompiledAssertion;
use dagwright_core::{AssertionReport, AssertionResult, AssertionStatus};
use dagwright_store::StoreAdapter;
use std::sync::Arc;
use std::time::Instant;

/// Violating rows kept per assertion
pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

/// Runs compiled assertions against a store
pub struct AssertionRunner {
    adapter: Arc<dyn StoreAdapter>,
    sample_limit: usize,
}

impl AssertionRunner {
    pub fn new(adapter: Arc<dyn StoreAdapter>) -> Self {
        Self {
            adapter,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Run every assertion; never fails as a whole
    pub async fn run_all(&self, assertions: &[CompiledAssertion]) -> AssertionReport {
        let mut report = AssertionReport::default();
        for assertion in assertions {
            report.results.push(self.run(assertion).await);
        }

        tracing::info!(
            passed = report.count(AssertionStatus::Passed),
            failed = report.count(AssertionStatus::Failed),
            errors = report.count(AssertionStatus::Error),
            "assertions finished"
        );
        report
    }

    /// Run one assertion
    pub async fn run(&self, assertion: &CompiledAssertion) -> AssertionResult {
        let start = Instant::now();
        let outcome = self.adapter.execute_query(&assertion.sql).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = AssertionResult {
            name: assertion.name.clone(),
            target_model: assertion.target_model.clone(),
            status: AssertionStatus::Passed,
            passed: true,
            violating_row_count: 0,
            sample_rows: Vec::new(),
            error: None,
            duration_ms,
        };

        match outcome {
            Ok(rows) if rows.is_empty() => {
                tracing::info!(assertion = %assertion.name, duration_ms, "assertion passed");
            }
            Ok(rows) => {
                tracing::warn!(assertion = %assertion.name, violations = rows.len(), "assertion failed");
                result.status = AssertionStatus::Failed;
                result.passed = false;
                result.violating_row_count = rows.len();
                result.sample_rows = rows.rows.into_iter().take(self.sample_limit).collect();
            }
            Err(e) => {
                tracing::error!(assertion = %assertion.name, error = %e, "assertion could not run");
                result.status = AssertionStatus::Error;
                result.passed = false;
                result.error = Some(e.to_string());
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagwright_core::{RowSet, Value};
    use dagwright_store::{MockStoreBuilder, StoreError};

    fn assertion(name: &str, sql: &str) -> CompiledAssertion {
        CompiledAssertion {
            name: name.to_string(),
            target_model: Some("fct_messages".to_string()),
            sql: sql.to_string(),
            path: None,
        }
    }

    #[tokio::test]
    async fn failures_errors_and_passes_are_distinct() {
        let mut violations = RowSet::new(vec!["message_key".to_string(), "view_count".to_string()]);
        for i in 0..15 {
            violations.push(vec![Value::from(format!("k{}", i)), Value::Int(-1)]);
        }

        let store = MockStoreBuilder::new()
            .with_query_result("view_count < 0", Ok(violations))
            .with_query_result("missing_column", Err(StoreError::Query("no such column".to_string())))
            .build();
        let runner = AssertionRunner::new(Arc::new(store));

        let report = runner
            .run_all(&[
                assertion("negative", "select * from t where view_count < 0"),
                assertion("broken", "select missing_column from t"),
                assertion("clean", "select * from t where 1 = 0"),
            ])
            .await;

        let negative = report.get("negative").unwrap();
        assert_eq!(negative.status, AssertionStatus::Failed);
        assert!(!negative.passed);
        assert_eq!(negative.violating_row_count, 15);
        assert_eq!(negative.sample_rows.len(), DEFAULT_SAMPLE_LIMIT);

        let broken = report.get("broken").unwrap();
        assert_eq!(broken.status, AssertionStatus::Error);
        assert!(broken.error.as_deref().unwrap().contains("no such column"));

        assert_eq!(report.get("clean").unwrap().status, AssertionStatus::Passed);
        assert!(!report.success());
    }

    #[tokio::test]
    async fn sample_limit_is_configurable() {
        let mut rows = RowSet::new(vec!["a".to_string()]);
        rows.push(vec![Value::Int(1)]);
        rows.push(vec![Value::Int(2)]);

        let store = MockStoreBuilder::new().with_query_result("from t", Ok(rows)).build();
        let runner = AssertionRunner::new(Arc::new(store)).with_sample_limit(1);

        let result = runner.run(&assertion("a", "select a from t")).await;
        assert_eq!(result.violating_row_count, 2);
        assert_eq!(result.sample_rows.len(), 1);
    }
}
