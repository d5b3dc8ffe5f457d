// src/load/mod.rs

use std::time::Instant;
use tracing::{info, instrument};

use crate::config::DimensionTable;
use crate::error::Result;
use crate::labels::{extract_labels, LabelRecord};
use crate::store::ObjectStore;
use crate::warehouse::Warehouse;

/// Replace the contents of `table` with `records`, under `columns`.
///
/// Delete and insert share one transaction: on any error the table keeps its
/// previous rows. Returns the number of rows inserted.
#[instrument(level = "info", skip(warehouse, records), fields(records = records.len()))]
pub async fn load_labels(
    warehouse: &dyn Warehouse,
    table: &str,
    columns: &[String; 2],
    records: &[LabelRecord],
) -> Result<u64> {
    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| vec![r.code.clone(), r.value.clone()])
        .collect();
    warehouse.replace_rows(table, columns, rows).await
}

/// Read the label file, extract the block for `dim` and load it.
///
/// The whole file is parsed before the warehouse is touched, so a missing
/// marker or a malformed line leaves the table as it was.
#[instrument(level = "info", skip_all, fields(table = %dim.table, marker = %dim.marker))]
pub async fn load_dimension(
    warehouse: &dyn Warehouse,
    store: &dyn ObjectStore,
    bucket: &str,
    labels_key: &str,
    dim: &DimensionTable,
) -> Result<u64> {
    let start = Instant::now();

    // 1) Fetch
    let text = store.read_text(bucket, labels_key).await?;

    // 2) Extract
    let records = extract_labels(&text, &dim.marker)?;

    // 3) Replace
    let loaded = load_labels(warehouse, &dim.table, &dim.columns, &records).await?;

    info!(
        location = %store.locate(bucket, labels_key),
        loaded,
        elapsed = ?start.elapsed(),
        "loaded dimension"
    );
    Ok(loaded)
}
