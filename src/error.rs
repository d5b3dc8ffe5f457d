// src/error.rs

use std::fmt;
use thiserror::Error;

use crate::warehouse::Scalar;

pub type Result<T, E = EtlError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything that can fail a load, a check or a copy.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("marker `{marker}` not found in label file")]
    NotFound { marker: String },

    #[error("block `{marker}` has no terminating `;`")]
    UnterminatedBlock { marker: String },

    #[error("malformed label line {line_no} in block `{marker}`: {line:?}")]
    Parse {
        marker: String,
        line_no: usize,
        line: String,
    },

    #[error("table {table} has no rows")]
    EmptyTable { table: String },

    #[error("{} quality check(s) failed on {table}: {}", .failures.len(), join_failures(.failures))]
    QualityCheck {
        table: String,
        failures: Vec<CheckFailure>,
    },

    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("invalid IAM role ARN `{0}`")]
    InvalidIamRole(String),

    #[error("no credentials available to copy {location} into {table}")]
    MissingCredentials { table: String, location: String },

    #[error("cannot render key template `{template}`: unknown placeholder `{placeholder}`")]
    Template {
        template: String,
        placeholder: String,
    },

    #[error("config: {0}")]
    Config(String),

    #[error("object store error reading {location}")]
    ObjectStore {
        location: String,
        #[source]
        source: BoxError,
    },

    #[error("warehouse error: {0}")]
    Warehouse(#[source] BoxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("task {0} panicked")]
    TaskPanicked(String),
}

impl EtlError {
    /// Errors worth retrying: the external systems might answer differently next time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EtlError::ObjectStore { .. } | EtlError::Warehouse(_) | EtlError::Io(_)
        )
    }

    pub fn object_store(location: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EtlError::ObjectStore {
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn warehouse(source: impl Into<BoxError>) -> Self {
        EtlError::Warehouse(source.into())
    }
}

impl From<duckdb::Error> for EtlError {
    fn from(e: duckdb::Error) -> Self {
        EtlError::warehouse(e)
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(e: sqlx::Error) -> Self {
        EtlError::warehouse(e)
    }
}

/// Why a single quality check did not pass.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckFailure {
    Mismatch {
        query: String,
        expected: Scalar,
        actual: Scalar,
    },
    Shape {
        query: String,
        rows: usize,
        columns: usize,
    },
}

impl CheckFailure {
    pub fn query(&self) -> &str {
        match self {
            CheckFailure::Mismatch { query, .. } | CheckFailure::Shape { query, .. } => query,
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckFailure::Mismatch {
                query,
                expected,
                actual,
            } => write!(f, "`{}` returned {} (expected {})", query, actual, expected),
            CheckFailure::Shape {
                query,
                rows,
                columns,
            } => write!(
                f,
                "`{}` returned {}x{} (expected a single value)",
                query, rows, columns
            ),
        }
    }
}

fn join_failures(failures: &[CheckFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
