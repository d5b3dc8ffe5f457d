// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::warehouse::{validate_identifier, FileFormat, IamRole, Scalar};

mod defaults;

pub use defaults::{default_dimensions, default_staging};

/// A single `(query, expected scalar)` assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub sql: String,
    pub expected: Scalar,
}

impl QualityCheck {
    pub fn new(sql: impl Into<String>, expected: Scalar) -> Self {
        Self {
            sql: sql.into(),
            expected,
        }
    }
}

/// A dimension table filled from one SAS label block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionTable {
    pub table: String,
    /// Marker introducing the block in the label file.
    pub marker: String,
    /// Destination columns for `(code, value)`.
    pub columns: [String; 2],
    #[serde(default)]
    pub checks: Vec<QualityCheck>,
}

/// A staging table bulk-copied from the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingTable {
    pub table: String,
    /// Object key or key prefix; may contain `{ds}` / `{ds_nodash}`.
    pub key: String,
    #[serde(flatten)]
    pub format: FileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay_secs: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            delay_secs: 60,
        }
    }
}

fn default_labels_key() -> String {
    "i94_data/I94_SAS_Labels_Descriptions.SAS".to_string()
}

fn default_concurrency() -> usize {
    4
}

/// Everything a pipeline run needs besides its connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub bucket: String,
    #[serde(default = "default_labels_key")]
    pub labels_key: String,
    #[serde(default)]
    pub iam_role: Option<IamRole>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<DimensionTable>,
    #[serde(default = "default_staging")]
    pub staging: Vec<StagingTable>,
}

impl Settings {
    /// Built-in tables for `bucket`.
    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            labels_key: default_labels_key(),
            iam_role: None,
            concurrency: default_concurrency(),
            retry: RetryPolicy::default(),
            dimensions: default_dimensions(),
            staging: default_staging(),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_yaml(&text)?;
        info!(
            path = %path.display(),
            dimensions = settings.dimensions.len(),
            staging = settings.staging.len(),
            "loaded settings"
        );
        Ok(settings)
    }

    /// Every dimension, or just the one named `table`; an unknown name is an error.
    pub fn dimensions_named(&self, table: Option<&str>) -> Result<Vec<&DimensionTable>> {
        let Some(table) = table else {
            return Ok(self.dimensions.iter().collect());
        };
        let found: Vec<&DimensionTable> =
            self.dimensions.iter().filter(|d| d.table == table).collect();
        if found.is_empty() {
            return Err(EtlError::Config(format!(
                "no configured dimension named {}",
                table
            )));
        }
        Ok(found)
    }

    /// Reject anything that would only fail later, halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(EtlError::Config("bucket must not be empty".into()));
        }
        if self.concurrency == 0 {
            return Err(EtlError::Config("concurrency must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for dim in &self.dimensions {
            validate_identifier(&dim.table)?;
            for c in &dim.columns {
                validate_identifier(c)?;
            }
            if dim.columns[0] == dim.columns[1] {
                return Err(EtlError::Config(format!(
                    "{}: both columns are named {}",
                    dim.table, dim.columns[0]
                )));
            }
            if dim.marker.trim().is_empty() {
                return Err(EtlError::Config(format!("{}: empty marker", dim.table)));
            }
            if !seen.insert(dim.table.as_str()) {
                return Err(EtlError::Config(format!("{} configured twice", dim.table)));
            }
        }
        for st in &self.staging {
            validate_identifier(&st.table)?;
            if !seen.insert(st.table.as_str()) {
                return Err(EtlError::Config(format!("{} configured twice", st.table)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let s = Settings::with_bucket("i94-bucket");
        s.validate().unwrap();
        assert_eq!(s.dimensions.len(), 5);
        assert_eq!(s.staging.len(), 4);
        let visa = s
            .dimensions
            .iter()
            .find(|d| d.table == "public.dim_i94visa")
            .unwrap();
        assert_eq!(visa.marker, "I94VISA");
        assert_eq!(visa.columns, ["code".to_string(), "type".to_string()]);
    }

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let s = Settings::from_yaml("bucket: b\n").unwrap();
        assert_eq!(s, Settings::with_bucket("b"));
        assert_eq!(s.retry.delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_full_yaml_from_file() {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
bucket: my-bucket
iam_role: arn:aws:iam::123456789012:role/dwhRole
concurrency: 2
retry: {{ retries: 3, delay_secs: 5 }}
dimensions:
  - table: public.dim_i94visa
    marker: I94VISA
    columns: [code, type]
    checks:
      - sql: SELECT COUNT(*) FROM public.dim_i94visa WHERE code IS NULL
        expected: 0
staging:
  - table: public.staging_demographics
    key: demographics/{{ds}}/us-cities-demographics.csv
    format: csv
    delimiter: ";"
  - table: public.staging_immigration
    key: sas_data
    format: parquet
"#
        )
        .unwrap();

        let s = Settings::load(f.path()).unwrap();
        assert_eq!(s.concurrency, 2);
        assert_eq!(
            s.retry,
            RetryPolicy {
                retries: 3,
                delay_secs: 5
            }
        );
        assert_eq!(s.dimensions[0].checks[0].expected, Scalar::Int(0));
        assert_eq!(
            s.staging[0].format,
            FileFormat::Csv {
                delimiter: ';',
                ignore_header: 1
            }
        );
        assert_eq!(s.staging[1].format, FileFormat::Parquet);
        assert_eq!(s.staging[0].key, "demographics/{ds}/us-cities-demographics.csv");
    }

    #[test]
    fn test_dimensions_named() {
        let s = Settings::with_bucket("b");
        assert_eq!(s.dimensions_named(None).unwrap().len(), s.dimensions.len());

        let one = s.dimensions_named(Some("public.dim_i94visa")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].marker, "I94VISA");

        let err = s.dimensions_named(Some("public.dim_typo")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config: no configured dimension named public.dim_typo"
        );
    }

    #[test]
    fn test_rejects_bad_iam_role() {
        let err = Settings::from_yaml("bucket: b\niam_role: not-an-arn\n").unwrap_err();
        assert!(err.to_string().contains("invalid IAM role"), "{err}");
    }

    #[test]
    fn test_rejects_bad_tables() {
        let yaml = "bucket: b\ndimensions:\n  - table: \"x; drop\"\n    marker: m\n    columns: [a, b]\n";
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(EtlError::InvalidIdentifier(_))
        ));

        let yaml = "bucket: b\ndimensions:\n  - table: t\n    marker: m\n    columns: [a, a]\n";
        assert!(matches!(Settings::from_yaml(yaml), Err(EtlError::Config(_))));

        let yaml = "bucket: b\ndimensions:\n  - table: t\n    marker: m\n    columns: [a, b, c]\n";
        assert!(matches!(Settings::from_yaml(yaml), Err(EtlError::Yaml(_))));
    }
}
