// src/warehouse/duck.rs

use async_trait::async_trait;
use duckdb::types::ValueRef;
use duckdb::{params_from_iter, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use super::{
    check_widths, quote_literal, validate_columns, validate_identifier, CopyCredentials,
    CopyRequest, Dialect, FileFormat, Scalar, Warehouse,
};
use crate::error::{EtlError, Result};

/// Embedded DuckDB warehouse, on disk or in memory.
///
/// Holds one root connection; every call works on its own clone of it, on the
/// blocking pool.
pub struct DuckWarehouse {
    root: Mutex<Connection>,
}

impl DuckWarehouse {
    /// Open a DuckDB database on disk at `path`, creating the file if it doesn't exist.
    pub fn open_disk(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Open a DuckDB in‐memory database
    pub fn open_mem() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            root: Mutex::new(conn),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let root = self
            .root
            .lock()
            .map_err(|_| EtlError::warehouse("duckdb root connection poisoned"))?;
        Ok(root.try_clone()?)
    }

    /// Run `f` on a fresh connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let mut conn = self.connect()?;
        tokio::task::spawn_blocking(move || f(&mut conn))
            .await
            .map_err(|e| EtlError::warehouse(format!("duckdb worker failed: {}", e)))?
    }
}

#[async_trait]
impl Warehouse for DuckWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    #[instrument(level = "debug", skip(self, columns, rows), fields(rows = rows.len()))]
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<String>>,
    ) -> Result<u64> {
        let delete_sql = format!("DELETE FROM {}", validate_identifier(table)?);
        let insert_sql = insert_statement(table, columns)?;
        check_widths(&rows, columns.len())?;

        self.with_conn(move |conn| {
            let start = Instant::now();
            let tx = conn.transaction()?;
            let deleted = tx.execute(&delete_sql, [])?;
            {
                let mut stmt = tx.prepare(&insert_sql)?;
                for row in &rows {
                    stmt.execute(params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            debug!(deleted, inserted = rows.len(), elapsed = ?start.elapsed(), "replaced rows");
            Ok(rows.len() as u64)
        })
        .await
    }

    #[instrument(level = "debug", skip(self, request), fields(table = %request.table, location = %request.location))]
    async fn replace_from_copy(&self, request: &CopyRequest) -> Result<()> {
        let delete_sql = format!("DELETE FROM {}", validate_identifier(&request.table)?);
        let insert_sql = format!(
            "INSERT INTO {} SELECT * FROM {}",
            request.table,
            reader_expr(&request.location, &request.format)
        );
        let setup_sql = s3_setup(&request.location, &request.credentials);

        self.with_conn(move |conn| {
            if let Some(setup) = setup_sql {
                conn.execute_batch(&setup)?;
            }
            let tx = conn.transaction()?;
            tx.execute(&delete_sql, [])?;
            let copied = tx.execute(&insert_sql, [])?;
            tx.commit()?;
            debug!(copied, "copied into table");
            Ok(())
        })
        .await
    }

    async fn query(&self, sql: &str) -> Result<Vec<Vec<Scalar>>> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let column_count = match rows.as_ref() {
                Some(s) => s.column_count(),
                None => return Ok(Vec::new()),
            };

            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut cells = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    cells.push(to_scalar(row.get_ref(i)?));
                }
                out.push(cells);
            }
            Ok(out)
        })
        .await
    }
}

fn insert_statement(table: &str, columns: &[String]) -> Result<String> {
    let cols = validate_columns(table, columns)?;
    let placeholders = vec!["?"; cols.len()].join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        cols.join(", "),
        placeholders
    ))
}

/// Table function reading the staged object.
fn reader_expr(location: &str, format: &FileFormat) -> String {
    match format {
        FileFormat::Csv {
            delimiter,
            ignore_header,
        } => format!(
            "read_csv({}, header = {}, skip = {}, delim = {}, all_varchar = true)",
            quote_literal(location),
            *ignore_header > 0,
            ignore_header.saturating_sub(1),
            quote_literal(&delimiter.to_string())
        ),
        FileFormat::Parquet => {
            let pattern = if location.ends_with(".parquet") {
                location.to_string()
            } else {
                format!("{}/**/*.parquet", location.trim_end_matches('/'))
            };
            format!("read_parquet({})", quote_literal(&pattern))
        }
    }
}

/// httpfs + secret statements when the object lives in S3.
fn s3_setup(location: &str, credentials: &CopyCredentials) -> Option<String> {
    if !location.starts_with("s3://") {
        return None;
    }
    let secret = match credentials {
        CopyCredentials::AccessKeys(keys) => {
            let mut s = format!(
                "TYPE S3, KEY_ID {}, SECRET {}",
                quote_literal(&keys.access_key_id),
                quote_literal(&keys.secret_access_key)
            );
            if let Some(token) = &keys.session_token {
                s.push_str(&format!(", SESSION_TOKEN {}", quote_literal(token)));
            }
            s
        }
        // DuckDB cannot assume a role itself; fall back to the local chain.
        CopyCredentials::IamRole(role) => {
            warn!(
                role = role.as_str(),
                location,
                "duckdb cannot assume an IAM role; reading with the local credential chain"
            );
            "TYPE S3, PROVIDER CREDENTIAL_CHAIN".to_string()
        }
        CopyCredentials::Ambient => "TYPE S3, PROVIDER CREDENTIAL_CHAIN".to_string(),
    };
    Some(format!(
        "INSTALL httpfs; LOAD httpfs; INSTALL aws; LOAD aws; \
         CREATE OR REPLACE TEMPORARY SECRET i94etl_s3 ({});",
        secret
    ))
}

fn to_scalar(value: ValueRef<'_>) -> Scalar {
    match value {
        ValueRef::Null => Scalar::Null,
        ValueRef::Boolean(v) => Scalar::Bool(v),
        ValueRef::TinyInt(v) => Scalar::Int(v as i64),
        ValueRef::SmallInt(v) => Scalar::Int(v as i64),
        ValueRef::Int(v) => Scalar::Int(v as i64),
        ValueRef::BigInt(v) => Scalar::Int(v),
        ValueRef::HugeInt(v) => i64::try_from(v)
            .map(Scalar::Int)
            .unwrap_or(Scalar::Float(v as f64)),
        ValueRef::UTinyInt(v) => Scalar::Int(v as i64),
        ValueRef::USmallInt(v) => Scalar::Int(v as i64),
        ValueRef::UInt(v) => Scalar::Int(v as i64),
        ValueRef::UBigInt(v) => i64::try_from(v)
            .map(Scalar::Int)
            .unwrap_or(Scalar::Float(v as f64)),
        ValueRef::Float(v) => Scalar::Float(v as f64),
        ValueRef::Double(v) => Scalar::Float(v),
        ValueRef::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Scalar::Float)
            .unwrap_or_else(|_| Scalar::Text(d.to_string())),
        ValueRef::Text(bytes) => Scalar::Text(String::from_utf8_lossy(bytes).into_owned()),
        other => Scalar::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::IamRole;
    use std::io::Write;
    use tempfile::tempdir;

    async fn mem_with_table() -> DuckWarehouse {
        let wh = DuckWarehouse::open_mem().unwrap();
        wh.execute("CREATE SCHEMA IF NOT EXISTS public; CREATE TABLE public.t (code FLOAT, name VARCHAR);")
            .await
            .unwrap();
        wh
    }

    fn rows(pairs: &[(&str, &str)]) -> Vec<Vec<String>> {
        pairs
            .iter()
            .map(|(a, b)| vec![a.to_string(), b.to_string()])
            .collect()
    }

    fn cols() -> Vec<String> {
        vec!["code".to_string(), "name".to_string()]
    }

    #[tokio::test]
    async fn test_replace_rows_replaces_not_appends() {
        let wh = mem_with_table().await;
        wh.replace_rows("public.t", &cols(), rows(&[("1", "a"), ("2", "b"), ("3", "c")]))
            .await
            .unwrap();
        let n = wh
            .replace_rows("public.t", &cols(), rows(&[("4", "d"), ("5", "e")]))
            .await
            .unwrap();
        assert_eq!(n, 2);

        let got = wh.query("SELECT code, name FROM public.t ORDER BY code").await.unwrap();
        assert_eq!(
            got,
            vec![
                vec![Scalar::Float(4.0), Scalar::Text("d".into())],
                vec![Scalar::Float(5.0), Scalar::Text("e".into())],
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_insert_rolls_back() {
        let wh = mem_with_table().await;
        wh.replace_rows("public.t", &cols(), rows(&[("1", "a"), ("2", "b")]))
            .await
            .unwrap();

        // "x" cannot be cast to FLOAT; the delete must be undone with it
        let err = wh
            .replace_rows("public.t", &cols(), rows(&[("3", "c"), ("x", "bad")]))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Warehouse(_)));

        let count = super::super::row_count(&wh, "public.t").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_identifiers_and_widths() {
        let wh = mem_with_table().await;
        let err = wh
            .replace_rows("public.t; DROP TABLE public.t", &cols(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::InvalidIdentifier(_)));

        let err = wh
            .replace_rows("public.t", &cols(), vec![vec!["1".to_string()]])
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[tokio::test]
    async fn test_copy_from_local_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("codes.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "code;name").unwrap();
        writeln!(f, "1;one").unwrap();
        writeln!(f, "2;two").unwrap();
        drop(f);

        let wh = mem_with_table().await;
        wh.replace_rows("public.t", &cols(), rows(&[("9", "old")]))
            .await
            .unwrap();

        let req = CopyRequest {
            table: "public.t".into(),
            location: path.display().to_string(),
            format: FileFormat::Csv {
                delimiter: ';',
                ignore_header: 1,
            },
            credentials: CopyCredentials::Ambient,
        };
        wh.replace_from_copy(&req).await.unwrap();

        let got = wh.query("SELECT name FROM public.t ORDER BY code").await.unwrap();
        assert_eq!(
            got,
            vec![vec![Scalar::Text("one".into())], vec![Scalar::Text("two".into())]]
        );
    }

    #[tokio::test]
    async fn test_query_shapes() {
        let wh = DuckWarehouse::open_mem().unwrap();
        let got = wh.query("SELECT 1, 'a', NULL, 2.5::DOUBLE, true").await.unwrap();
        assert_eq!(
            got,
            vec![vec![
                Scalar::Int(1),
                Scalar::Text("a".into()),
                Scalar::Null,
                Scalar::Float(2.5),
                Scalar::Bool(true),
            ]]
        );
        let empty = wh.query("SELECT 1 WHERE false").await.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_reader_exprs() {
        assert_eq!(
            reader_expr("s3://b/sas_data", &FileFormat::Parquet),
            "read_parquet('s3://b/sas_data/**/*.parquet')"
        );
        assert_eq!(
            reader_expr(
                "/tmp/a.csv",
                &FileFormat::Csv {
                    delimiter: ',',
                    ignore_header: 1
                }
            ),
            "read_csv('/tmp/a.csv', header = true, skip = 0, delim = ',', all_varchar = true)"
        );
        assert!(s3_setup("/tmp/a.csv", &CopyCredentials::Ambient).is_none());
        assert!(s3_setup("s3://b/k", &CopyCredentials::Ambient)
            .unwrap()
            .contains("CREDENTIAL_CHAIN"));
        // a role cannot be assumed locally; the chain is used with a warning
        let role = IamRole::parse("arn:aws:iam::123456789012:role/myRedshiftRole").unwrap();
        let setup = s3_setup("s3://b/k", &CopyCredentials::IamRole(role)).unwrap();
        assert!(setup.contains("PROVIDER CREDENTIAL_CHAIN"), "{setup}");
        assert!(!setup.contains("myRedshiftRole"), "{setup}");
    }
}
