// src/stage/mod.rs

//! Bulk copies of raw objects into staging tables.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::config::StagingTable;
use crate::error::{EtlError, Result};
use crate::store::ObjectStore;
use crate::warehouse::{AccessKeys, CopyCredentials, CopyRequest, FileFormat, IamRole, Warehouse};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is valid"));

/// Substitute `{ds}` (`YYYY-MM-DD`) and `{ds_nodash}` (`YYYYMMDD`) in an object key.
pub fn render_key(template: &str, run_date: NaiveDate) -> Result<String> {
    if let Some(unknown) = PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| name != "ds" && name != "ds_nodash")
    {
        return Err(EtlError::Template {
            template: template.to_string(),
            placeholder: unknown,
        });
    }

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        if &caps[1] == "ds" {
            run_date.format("%Y-%m-%d").to_string()
        } else {
            run_date.format("%Y%m%d").to_string()
        }
    });
    Ok(rendered.into_owned())
}

/// Pick how the warehouse authenticates for one copy.
///
/// Parquet prefers the IAM role and CSV the store's access keys; each falls
/// back to the other, then to whatever the warehouse already has.
pub fn resolve_credentials(
    format: &FileFormat,
    iam_role: Option<&IamRole>,
    access_keys: Option<AccessKeys>,
) -> CopyCredentials {
    let role = iam_role.cloned().map(CopyCredentials::IamRole);
    let keys = access_keys.map(CopyCredentials::AccessKeys);
    let preferred = match format {
        FileFormat::Parquet => role.or(keys),
        FileFormat::Csv { .. } => keys.or(role),
    };
    preferred.unwrap_or(CopyCredentials::Ambient)
}

/// Replace the contents of a staging table with the object it is keyed to.
#[instrument(level = "info", skip_all, fields(table = %staging.table))]
pub async fn stage_table(
    warehouse: &dyn Warehouse,
    store: &dyn ObjectStore,
    bucket: &str,
    iam_role: Option<&IamRole>,
    staging: &StagingTable,
    run_date: NaiveDate,
) -> Result<()> {
    let start = Instant::now();

    let key = render_key(&staging.key, run_date)?;
    let location = store.locate(bucket, &key);
    debug!(%key, %location, "rendered staging key");

    // Only ask the store for keys when a role can't be used.
    let access_keys = match (&staging.format, iam_role) {
        (FileFormat::Parquet, Some(_)) => None,
        _ => store.access_keys().await?,
    };
    let credentials = resolve_credentials(&staging.format, iam_role, access_keys);

    let request = CopyRequest {
        table: staging.table.clone(),
        location,
        format: staging.format.clone(),
        credentials,
    };
    warehouse.replace_from_copy(&request).await?;

    info!(location = %request.location, elapsed = ?start.elapsed(), "staged table");
    Ok(())
}
