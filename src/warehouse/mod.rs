// src/warehouse/mod.rs

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EtlError, Result};

pub mod copy;
pub mod ddl;
pub mod duck;
pub mod redshift;

pub use copy::{AccessKeys, CopyCredentials, CopyRequest, FileFormat, IamRole};
pub use duck::DuckWarehouse;
pub use redshift::RedshiftWarehouse;

/// SQL flavour a warehouse speaks; drives DDL and COPY rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    DuckDb,
    Redshift,
}

/// A relational warehouse the loaders and checkers can talk to.
///
/// Every call owns its connection and transaction for the duration of the
/// call, so independent tables can be processed concurrently.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run one or more statements outside of any explicit transaction.
    async fn execute(&self, sql: &str) -> Result<()>;

    /// Delete every row of `table` and insert `rows`, atomically.
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<String>>,
    ) -> Result<u64>;

    /// Delete every row of `request.table` and bulk-copy the object at
    /// `request.location` into it, atomically.
    async fn replace_from_copy(&self, request: &CopyRequest) -> Result<()>;

    /// Run a query and return every row as scalar cells.
    async fn query(&self, sql: &str) -> Result<Vec<Vec<Scalar>>>;
}

/// A single cell returned by the warehouse, or an expected value in a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Equality with integer/float coercion; everything else must match exactly.
    pub fn matches(&self, other: &Scalar) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("NULL"),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "'{}'", v),
        }
    }
}

static IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("identifier pattern is valid")
});

/// Reject anything that is not a plain (optionally schema-qualified) name.
/// Table and column names are spliced into SQL text, never bound.
pub fn validate_identifier(name: &str) -> Result<&str> {
    if IDENT.is_match(name) {
        Ok(name)
    } else {
        Err(EtlError::InvalidIdentifier(name.to_string()))
    }
}

/// Validate `table` and its destination columns; at least one column is required.
pub(crate) fn validate_columns<'a>(table: &str, columns: &'a [String]) -> Result<Vec<&'a str>> {
    let table = validate_identifier(table)?;
    if columns.is_empty() {
        return Err(EtlError::Config(format!("no columns given for {}", table)));
    }
    columns.iter().map(|c| validate_identifier(c)).collect()
}

/// Every row must carry exactly `width` values.
pub(crate) fn check_widths(rows: &[Vec<String>], width: usize) -> Result<()> {
    match rows.iter().position(|r| r.len() != width) {
        Some(idx) => Err(EtlError::Config(format!(
            "row {} has {} values, expected {}",
            idx,
            rows[idx].len(),
            width
        ))),
        None => Ok(()),
    }
}

/// Quote a string literal for SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Count the rows of `table`.
pub async fn row_count(warehouse: &dyn Warehouse, table: &str) -> Result<i64> {
    let table = validate_identifier(table)?;
    let rows = warehouse
        .query(&format!("SELECT COUNT(*) FROM {}", table))
        .await?;
    rows.first()
        .and_then(|r| r.first())
        .and_then(Scalar::as_i64)
        .ok_or_else(|| EtlError::warehouse(format!("COUNT(*) on {} returned no value", table)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("dim_i94cit").is_ok());
        assert!(validate_identifier("public.dim_i94cit").is_ok());
        assert!(validate_identifier("_x1").is_ok());
        for bad in ["", "1abc", "a.b.c", "t; DROP TABLE x", "a b", "\"quoted\""] {
            assert!(
                matches!(validate_identifier(bad), Err(EtlError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_scalar_matching() {
        assert!(Scalar::Int(0).matches(&Scalar::Float(0.0)));
        assert!(Scalar::Float(3.0).matches(&Scalar::Int(3)));
        assert!(!Scalar::Int(1).matches(&Scalar::Int(0)));
        assert!(!Scalar::Text("0".into()).matches(&Scalar::Int(0)));
        assert!(Scalar::Null.matches(&Scalar::Null));
        assert!(Scalar::Text("x".into()).matches(&Scalar::Text("x".into())));
    }

    #[test]
    fn test_scalar_from_yaml() {
        let parsed: Vec<Scalar> = serde_yaml::from_str("[0, 1.5, 'abc', true, null]").unwrap();
        assert_eq!(
            parsed,
            vec![
                Scalar::Int(0),
                Scalar::Float(1.5),
                Scalar::Text("abc".into()),
                Scalar::Bool(true),
                Scalar::Null,
            ]
        );
    }

    #[test]
    fn test_validate_columns() {
        let cols = vec!["code".to_string(), "country".to_string()];
        assert_eq!(
            validate_columns("public.dim_i94cit", &cols).unwrap(),
            vec!["code", "country"]
        );
        assert!(matches!(
            validate_columns("public.dim_i94cit", &[]),
            Err(EtlError::Config(_))
        ));
        assert!(matches!(
            validate_columns("dim; --", &cols),
            Err(EtlError::InvalidIdentifier(_))
        ));
        let bad = vec!["code".to_string(), "x y".to_string()];
        assert!(matches!(
            validate_columns("t", &bad),
            Err(EtlError::InvalidIdentifier(c)) if c == "x y"
        ));
    }

    #[test]
    fn test_check_widths() {
        let rows = vec![vec!["1".to_string(), "a".to_string()], vec!["2".to_string()]];
        assert!(check_widths(&rows[..1], 2).is_ok());
        assert!(check_widths(&[], 2).is_ok());
        let err = check_widths(&rows, 2).unwrap_err();
        assert_eq!(err.to_string(), "config: row 1 has 1 values, expected 2");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
