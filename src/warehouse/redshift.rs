// src/warehouse/redshift.rs

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, QueryBuilder, Row, TypeInfo};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{check_widths, validate_columns, CopyRequest, Dialect, Scalar, Warehouse};
use crate::error::{EtlError, Result};

/// Rows per multi-row INSERT; keeps statements well below Redshift's 16 MB limit.
const INSERT_CHUNK: usize = 1_000;

/// Redshift (or any Postgres-wire warehouse) behind a connection pool.
///
/// `TRUNCATE` commits implicitly on Redshift, so replacements use `DELETE FROM`
/// inside the same transaction as the insert or `COPY`.
pub struct RedshiftWarehouse {
    pool: PgPool,
}

impl RedshiftWarehouse {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await?;
        info!(max_connections, "connected to redshift");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    fn dialect(&self) -> Dialect {
        Dialect::Redshift
    }

    async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, columns, rows), fields(rows = rows.len()))]
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<String>>,
    ) -> Result<u64> {
        let columns = validate_columns(table, columns)?;
        check_widths(&rows, columns.len())?;

        let mut tx = self.pool.begin().await?;
        let types = column_types(&mut tx, table).await?;
        let casts = column_casts(table, &columns, &types)?;

        sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0u64;
        for mut insert in insert_statements(table, &columns, &casts, &rows) {
            inserted += insert.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, "replaced rows");
        Ok(inserted)
    }

    #[instrument(level = "debug", skip(self, request), fields(table = %request.table, location = %request.location))]
    async fn replace_from_copy(&self, request: &CopyRequest) -> Result<()> {
        let copy_sql = request.to_redshift_sql()?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {}", request.table))
            .execute(&mut *tx)
            .await?;
        // one statement, no binds
        sqlx::query(&copy_sql).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Vec<Scalar>>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_scalars).collect()
    }
}

#[derive(Debug)]
struct ColumnType {
    data_type: String,
    precision: Option<i32>,
    scale: Option<i32>,
}

impl ColumnType {
    /// `None` for character columns, which accept text binds as they are.
    fn cast_target(&self) -> Option<String> {
        let ty = self.data_type.to_lowercase();
        if ty.starts_with("character") || ty == "text" {
            return None;
        }
        match (ty.as_str(), self.precision, self.scale) {
            ("numeric", Some(p), Some(s)) => Some(format!("numeric({},{})", p, s)),
            _ => Some(ty),
        }
    }
}

/// Cast target per destination column, in column order.
/// Binds arrive as text; non-character columns get an explicit cast.
fn column_casts(
    table: &str,
    columns: &[&str],
    types: &HashMap<String, ColumnType>,
) -> Result<Vec<Option<String>>> {
    columns
        .iter()
        .map(|c| match types.get(&c.to_lowercase()) {
            Some(ty) => Ok(ty.cast_target()),
            None => Err(EtlError::Config(format!("{} has no column {}", table, c))),
        })
        .collect()
}

/// Multi-row INSERTs of at most `INSERT_CHUNK` rows each; none for no rows.
fn insert_statements<'a>(
    table: &str,
    columns: &[&str],
    casts: &[Option<String>],
    rows: &'a [Vec<String>],
) -> Vec<QueryBuilder<'a, Postgres>> {
    rows.chunks(INSERT_CHUNK)
        .map(|chunk| {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, columns.join(", ")));
            qb.push_values(chunk, |mut b, row| {
                for (value, cast) in row.iter().zip(casts) {
                    match cast {
                        Some(ty) => {
                            b.push("CAST(")
                                .push_bind_unseparated(value.as_str())
                                .push_unseparated(format!(" AS {})", ty));
                        }
                        None => {
                            b.push_bind(value.as_str());
                        }
                    }
                }
            });
            qb
        })
        .collect()
}

/// Declared type of every column of `table`, keyed by lower-case name.
async fn column_types(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    table: &str,
) -> Result<HashMap<String, ColumnType>> {
    let (schema, name) = table.split_once('.').unwrap_or(("public", table));
    // information_schema columns are domain types; cast them to plain ones
    let rows = sqlx::query(
        "SELECT column_name::varchar, data_type::varchar, \
                numeric_precision::int, numeric_scale::int \
         FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2",
    )
    .bind(schema.to_lowercase())
    .bind(name.to_lowercase())
    .fetch_all(&mut **tx)
    .await?;

    let columns = rows
        .iter()
        .map(|r| -> Result<(String, ColumnType)> {
            let col: String = r.try_get(0)?;
            let ty = ColumnType {
                data_type: r.try_get(1)?,
                precision: r.try_get(2)?,
                scale: r.try_get(3)?,
            };
            Ok((col.to_lowercase(), ty))
        })
        .collect::<Result<Vec<_>>>()?;
    types_by_column(table, columns)
}

/// A table without columns does not exist; retrying won't create it.
fn types_by_column(
    table: &str,
    columns: Vec<(String, ColumnType)>,
) -> Result<HashMap<String, ColumnType>> {
    if columns.is_empty() {
        return Err(EtlError::Config(format!("table {} does not exist", table)));
    }
    Ok(columns.into_iter().collect())
}

/// Result types `cell` knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
}

impl CellKind {
    fn from_type_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BOOL" => Ok(CellKind::Bool),
            "INT2" => Ok(CellKind::Int2),
            "INT4" => Ok(CellKind::Int4),
            "INT8" => Ok(CellKind::Int8),
            "FLOAT4" => Ok(CellKind::Float4),
            "FLOAT8" => Ok(CellKind::Float8),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Ok(CellKind::Text),
            other => Err(EtlError::Config(format!(
                "unsupported result type {}; cast it to BIGINT, FLOAT8 or VARCHAR",
                other
            ))),
        }
    }
}

fn row_scalars(row: &PgRow) -> Result<Vec<Scalar>> {
    (0..row.columns().len())
        .map(|i| cell(row, i))
        .collect()
}

fn cell(row: &PgRow, i: usize) -> Result<Scalar> {
    let value = match CellKind::from_type_name(row.column(i).type_info().name())? {
        CellKind::Bool => row.try_get::<Option<bool>, _>(i)?.map(Scalar::Bool),
        CellKind::Int2 => row.try_get::<Option<i16>, _>(i)?.map(|v| Scalar::Int(v as i64)),
        CellKind::Int4 => row.try_get::<Option<i32>, _>(i)?.map(|v| Scalar::Int(v as i64)),
        CellKind::Int8 => row.try_get::<Option<i64>, _>(i)?.map(Scalar::Int),
        CellKind::Float4 => row.try_get::<Option<f32>, _>(i)?.map(|v| Scalar::Float(v as f64)),
        CellKind::Float8 => row.try_get::<Option<f64>, _>(i)?.map(Scalar::Float),
        CellKind::Text => row.try_get::<Option<String>, _>(i)?.map(Scalar::Text),
    };
    Ok(value.unwrap_or(Scalar::Null))
}
