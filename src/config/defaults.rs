// src/config/defaults.rs

use once_cell::sync::Lazy;

use super::{DimensionTable, QualityCheck, StagingTable};
use crate::warehouse::{FileFormat, Scalar};

// (table, marker, value column)
const DIMENSIONS: &[(&str, &str, &str)] = &[
    ("public.dim_i94cit", "i94cntyl", "country"),
    ("public.dim_i94port", "i94prtl", "port"),
    ("public.dim_i94mode", "i94model", "mode"),
    ("public.dim_i94addr", "i94addrl", "addr"),
    ("public.dim_i94visa", "I94VISA", "type"),
];

static DEFAULT_DIMENSIONS: Lazy<Vec<DimensionTable>> = Lazy::new(|| {
    DIMENSIONS
        .iter()
        .map(|&(table, marker, value_column)| DimensionTable {
            table: table.to_string(),
            marker: marker.to_string(),
            columns: ["code".to_string(), value_column.to_string()],
            checks: vec![QualityCheck::new(
                format!("SELECT COUNT(*) FROM {} WHERE code IS NULL", table),
                Scalar::Int(0),
            )],
        })
        .collect()
});

static DEFAULT_STAGING: Lazy<Vec<StagingTable>> = Lazy::new(|| {
    let csv = |delimiter| FileFormat::Csv {
        delimiter,
        ignore_header: 1,
    };
    vec![
        StagingTable {
            table: "public.staging_immigration".into(),
            key: "sas_data".into(),
            format: FileFormat::Parquet,
        },
        StagingTable {
            table: "public.staging_airports".into(),
            key: "airport/airport-codes_csv.csv".into(),
            format: csv(','),
        },
        StagingTable {
            table: "public.staging_temperature".into(),
            key: "temperature/GlobalLandTemperaturesByCity.csv".into(),
            format: csv(','),
        },
        StagingTable {
            table: "public.staging_demographics".into(),
            key: "demographics/us-cities-demographics.csv".into(),
            format: csv(';'),
        },
    ]
});

/// The five I-94 lookup tables and their null-code checks.
pub fn default_dimensions() -> Vec<DimensionTable> {
    DEFAULT_DIMENSIONS.clone()
}

pub fn default_staging() -> Vec<StagingTable> {
    DEFAULT_STAGING.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::ddl;

    #[test]
    fn test_defaults_match_table_definitions() {
        for dim in default_dimensions() {
            let def = ddl::find(&dim.table).unwrap();
            let names: Vec<&str> = def.columns.iter().map(|c| c.name).collect();
            assert_eq!(names, dim.columns.iter().map(String::as_str).collect::<Vec<_>>());
        }
        for st in default_staging() {
            assert!(ddl::find(&st.table).is_some(), "{}", st.table);
        }
    }
}
