// src/warehouse/ddl.rs

//! Table definitions for the I-94 star schema, rendered per dialect.

use super::Dialect;

pub const SCHEMA: &str = "public";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    None,
    Primary,
    Sort,
    Dist,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: &'static str,
    pub key: Key,
    pub references: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    /// Replicate to every node (small lookup tables).
    pub dist_all: bool,
}

const fn col(name: &'static str, ty: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        key: Key::None,
        references: None,
    }
}

const fn keyed(name: &'static str, ty: &'static str, key: Key) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        key,
        references: None,
    }
}

const fn fk(name: &'static str, ty: &'static str, references: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        ty,
        key: Key::None,
        references: Some(references),
    }
}

const fn dim(name: &'static str, columns: &'static [ColumnDef]) -> TableDef {
    TableDef {
        name,
        columns,
        dist_all: true,
    }
}

pub const DIMENSION_TABLES: &[TableDef] = &[
    dim(
        "public.dim_i94cit",
        &[keyed("code", "FLOAT", Key::Primary), col("country", "VARCHAR")],
    ),
    dim(
        "public.dim_i94port",
        &[keyed("code", "CHAR(3)", Key::Primary), col("port", "VARCHAR")],
    ),
    dim(
        "public.dim_i94mode",
        &[keyed("code", "FLOAT", Key::Primary), col("mode", "VARCHAR")],
    ),
    dim(
        "public.dim_i94addr",
        &[keyed("code", "CHAR(2)", Key::Primary), col("addr", "VARCHAR")],
    ),
    dim(
        "public.dim_i94visa",
        &[keyed("code", "FLOAT", Key::Primary), col("type", "VARCHAR")],
    ),
];

pub const STAGING_TABLES: &[TableDef] = &[
    TableDef {
        name: "public.staging_immigration",
        columns: &[
            keyed("cicid", "FLOAT", Key::Primary),
            keyed("i94yr", "FLOAT", Key::Sort),
            keyed("i94mon", "FLOAT", Key::Dist),
            fk("i94cit", "FLOAT", "public.dim_i94cit(code)"),
            fk("i94res", "FLOAT", "public.dim_i94cit(code)"),
            fk("i94port", "CHAR(3)", "public.dim_i94port(code)"),
            col("arrdate", "FLOAT"),
            fk("i94mode", "FLOAT", "public.dim_i94mode(code)"),
            fk("i94addr", "VARCHAR", "public.dim_i94addr(code)"),
            col("depdate", "FLOAT"),
            col("i94bir", "FLOAT"),
            fk("i94visa", "FLOAT", "public.dim_i94visa(code)"),
            col("count", "FLOAT"),
            col("dtadfile", "VARCHAR"),
            col("visapost", "CHAR(3)"),
            col("occup", "CHAR(3)"),
            col("entdepa", "CHAR(1)"),
            col("entdepd", "CHAR(1)"),
            col("entdepu", "CHAR(1)"),
            col("matflag", "CHAR(1)"),
            col("biryear", "FLOAT"),
            col("dtaddto", "VARCHAR"),
            col("gender", "CHAR(1)"),
            col("insnum", "VARCHAR"),
            col("airline", "VARCHAR"),
            col("admnum", "FLOAT"),
            col("fltno", "VARCHAR"),
            col("visatype", "VARCHAR"),
        ],
        dist_all: false,
    },
    TableDef {
        name: "public.staging_temperature",
        columns: &[
            col("dt", "DATE"),
            col("AverageTemperature", "FLOAT"),
            col("AverageTemperatureUncertainty", "FLOAT"),
            col("City", "VARCHAR"),
            col("Country", "VARCHAR"),
            col("Latitude", "VARCHAR"),
            col("Longitude", "VARCHAR"),
        ],
        dist_all: false,
    },
    TableDef {
        name: "public.staging_demographics",
        columns: &[
            col("city", "VARCHAR"),
            col("state", "VARCHAR"),
            col("median_age", "FLOAT"),
            col("male_population", "INT"),
            col("female_population", "INT"),
            col("total_population", "INT"),
            col("number_of_veterans", "INT"),
            col("foreign_born", "INT"),
            col("average_household_size", "FLOAT"),
            fk("state_code", "CHAR(2)", "public.dim_i94addr(code)"),
            col("race", "VARCHAR"),
            col("count", "INT"),
        ],
        dist_all: true,
    },
    TableDef {
        name: "public.staging_airports",
        columns: &[
            col("ident", "VARCHAR"),
            col("type", "VARCHAR"),
            col("name", "VARCHAR"),
            col("elevation_ft", "FLOAT"),
            col("continent", "VARCHAR"),
            col("iso_country", "VARCHAR"),
            col("iso_region", "VARCHAR"),
            col("municipality", "VARCHAR"),
            col("gps_code", "VARCHAR"),
            col("iata_code", "VARCHAR"),
            col("local_code", "VARCHAR"),
            col("coordinates", "VARCHAR"),
        ],
        dist_all: false,
    },
];

pub fn create_schema_sql() -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", SCHEMA)
}

impl TableDef {
    /// `CREATE TABLE IF NOT EXISTS` for the given dialect.
    ///
    /// DuckDB gets plain columns: label files legitimately repeat codes, and
    /// Redshift only uses the constraints as planner hints anyway.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let cols: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut s = format!("    {} {}", c.name, c.ty);
                if dialect == Dialect::Redshift {
                    match c.key {
                        Key::Primary => s.push_str(" PRIMARY KEY"),
                        Key::Sort => s.push_str(" SORTKEY"),
                        Key::Dist => s.push_str(" DISTKEY"),
                        Key::None => {}
                    }
                    if let Some(r) = c.references {
                        s.push_str(&format!(" REFERENCES {}", r));
                    }
                }
                s
            })
            .collect();

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.name,
            cols.join(",\n")
        );
        if dialect == Dialect::Redshift && self.dist_all {
            sql.push_str("\nDISTSTYLE ALL");
        }
        sql
    }
}

/// Find a definition by its qualified name.
pub fn find(name: &str) -> Option<&'static TableDef> {
    DIMENSION_TABLES
        .iter()
        .chain(STAGING_TABLES.iter())
        .find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::validate_identifier;

    #[test]
    fn test_redshift_dimension_ddl() {
        let sql = find("public.dim_i94visa").unwrap().create_sql(Dialect::Redshift);
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS public.dim_i94visa (\n    code FLOAT PRIMARY KEY,\n    type VARCHAR\n)\nDISTSTYLE ALL"
        );
    }

    #[test]
    fn test_duckdb_drops_redshift_only_clauses() {
        let sql = find("public.staging_immigration")
            .unwrap()
            .create_sql(Dialect::DuckDb);
        for clause in ["PRIMARY KEY", "SORTKEY", "DISTKEY", "REFERENCES", "DISTSTYLE"] {
            assert!(!sql.contains(clause), "{clause} leaked into DuckDB DDL");
        }
        assert!(sql.contains("    i94visa FLOAT,\n"));
    }

    #[test]
    fn test_staging_keys_and_references() {
        let sql = find("public.staging_immigration")
            .unwrap()
            .create_sql(Dialect::Redshift);
        assert!(sql.contains("i94yr FLOAT SORTKEY"));
        assert!(sql.contains("i94mon FLOAT DISTKEY"));
        assert!(sql.contains("i94port CHAR(3) REFERENCES public.dim_i94port(code)"));
        assert!(!sql.contains("DISTSTYLE"));
    }

    #[test]
    fn test_all_names_are_identifiers() {
        for t in DIMENSION_TABLES.iter().chain(STAGING_TABLES.iter()) {
            assert!(validate_identifier(t.name).is_ok(), "{}", t.name);
            for c in t.columns {
                assert!(validate_identifier(c.name).is_ok(), "{}", c.name);
            }
        }
    }
}
