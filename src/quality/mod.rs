// src/quality/mod.rs

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::QualityCheck;
use crate::error::{CheckFailure, EtlError, Result};
use crate::warehouse::{row_count, Scalar, Warehouse};

/// Outcome of a passing quality run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub table: String,
    pub rows: i64,
    pub checks: usize,
}

/// Assert `table` has rows, then evaluate every check.
///
/// Every check runs even after one has failed; the error lists them all.
#[instrument(level = "info", skip(warehouse, checks), fields(checks = checks.len()))]
pub async fn check_table(
    warehouse: &dyn Warehouse,
    table: &str,
    checks: &[QualityCheck],
) -> Result<QualityReport> {
    let rows = row_count(warehouse, table).await?;
    if rows < 1 {
        return Err(EtlError::EmptyTable {
            table: table.to_string(),
        });
    }

    let mut failures = Vec::new();
    for check in checks {
        if let Some(failure) = evaluate(warehouse, check).await? {
            warn!(%failure, "quality check failed");
            failures.push(failure);
        }
    }

    if !failures.is_empty() {
        return Err(EtlError::QualityCheck {
            table: table.to_string(),
            failures,
        });
    }

    info!(rows, "quality checks passed");
    Ok(QualityReport {
        table: table.to_string(),
        rows,
        checks: checks.len(),
    })
}

/// `None` when the check passes. Warehouse errors are returned as errors,
/// not as failures: they say nothing about the data.
async fn evaluate(warehouse: &dyn Warehouse, check: &QualityCheck) -> Result<Option<CheckFailure>> {
    let result = warehouse.query(&check.sql).await?;
    Ok(compare(&check.sql, &check.expected, &result))
}

fn compare(sql: &str, expected: &Scalar, result: &[Vec<Scalar>]) -> Option<CheckFailure> {
    match result {
        [row] if row.len() == 1 => {
            let actual = &row[0];
            if actual.matches(expected) {
                None
            } else {
                Some(CheckFailure::Mismatch {
                    query: sql.to_string(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                })
            }
        }
        _ => Some(CheckFailure::Shape {
            query: sql.to_string(),
            rows: result.len(),
            columns: result.first().map_or(0, Vec::len),
        }),
    }
}
