use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use i94etl::{
    config::Settings,
    labels::extract_labels,
    logging,
    pipeline::{Pipeline, RunContext},
    quality::check_table,
    store::{self, ObjectStore},
    warehouse::{ddl, Dialect, DuckWarehouse, RedshiftWarehouse, Warehouse},
};
use std::{path::PathBuf, sync::Arc};
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "i94etl", version, about = "Load I-94 reference data into a warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (YAML). Built-in tables are used when omitted.
    #[arg(long, env = "I94ETL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Bucket holding the raw files; overrides the settings file.
    #[arg(long, env = "I94ETL_BUCKET", global = true)]
    bucket: Option<String>,

    /// DuckDB file, `:memory:`, or a `postgres://` / `redshift://` URL.
    #[arg(long, env = "I94ETL_WAREHOUSE", global = true, default_value = "i94.duckdb")]
    warehouse: String,

    /// `s3://`, `file:///dir` or a local directory.
    #[arg(long, env = "I94ETL_STORE", global = true, default_value = "s3://")]
    store: String,

    /// Logical date of the run (YYYY-MM-DD); defaults to today.
    #[arg(long, env = "I94ETL_RUN_DATE", global = true)]
    run_date: Option<NaiveDate>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "I94ETL_LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create tables, stage raw files, load and check every dimension.
    Run,

    /// Print the records of one label block as JSON.
    Extract {
        /// Marker introducing the block, e.g. `i94cntyl`.
        #[arg(long)]
        marker: String,
    },

    /// Print the DDL for every known table.
    Ddl {
        #[arg(long, value_enum, default_value = "redshift")]
        dialect: DialectArg,
    },

    /// Run the quality checks of the configured dimensions.
    Check {
        /// Only check this table.
        #[arg(long)]
        table: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Duckdb,
    Redshift,
}

impl From<DialectArg> for Dialect {
    fn from(d: DialectArg) -> Self {
        match d {
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Redshift => Dialect::Redshift,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    logging::init_tracing(cli.log_json);

    match &cli.command {
        // needs neither settings nor connections
        Command::Ddl { dialect } => {
            print_ddl(Dialect::from(*dialect));
            Ok(())
        }

        Command::Extract { marker } => {
            let settings = load_settings(&cli)?;
            let store = open_store(&cli).await?;
            let text = store
                .read_text(&settings.bucket, &settings.labels_key)
                .await
                .with_context(|| format!("reading {}", store.locate(&settings.bucket, &settings.labels_key)))?;
            let records = extract_labels(&text, marker)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }

        Command::Check { table } => {
            let settings = load_settings(&cli)?;
            let warehouse = open_warehouse(&cli.warehouse, settings.concurrency).await?;
            let dims = settings.dimensions_named(table.as_deref())?;
            let mut failed = 0;
            for dim in dims {
                match check_table(warehouse.as_ref(), &dim.table, &dim.checks).await {
                    Ok(report) => println!("{}", serde_json::to_string(&report)?),
                    Err(e) => {
                        error!(table = %dim.table, error = %e, "check failed");
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} table(s) failed their quality checks", failed);
            }
            Ok(())
        }

        Command::Run => {
            // ─── 2) settings ─────────────────────────────────────────────
            let settings = load_settings(&cli)?;

            // ─── 3) connect collaborators ────────────────────────────────
            let ctx = RunContext {
                run_date: cli.run_date.unwrap_or_else(|| Local::now().date_naive()),
                warehouse: open_warehouse(&cli.warehouse, settings.concurrency).await?,
                store: open_store(&cli).await?,
            };
            info!(run_date = %ctx.run_date, bucket = %settings.bucket, "startup");

            // ─── 4) run the pipeline ─────────────────────────────────────
            let summary = Pipeline::from_settings(&settings).run(&ctx).await;
            println!("{}", summary.to_json()?);

            let failed = summary.failures().count();
            if failed > 0 {
                bail!("{} task(s) failed", failed);
            }
            Ok(())
        }
    }
}

fn print_ddl(dialect: Dialect) {
    println!("{};", ddl::create_schema_sql());
    for table in ddl::DIMENSION_TABLES.iter().chain(ddl::STAGING_TABLES) {
        println!("\n{};", table.create_sql(dialect));
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match (&cli.config, &cli.bucket) {
        (Some(path), _) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        (None, Some(bucket)) => Settings::with_bucket(bucket.clone()),
        (None, None) => bail!("either --config or --bucket is required"),
    };
    if let Some(bucket) = &cli.bucket {
        settings.bucket = bucket.clone();
    }
    settings.validate()?;
    Ok(settings)
}

async fn open_store(cli: &Cli) -> Result<Arc<dyn ObjectStore>> {
    store::open(&cli.store)
        .await
        .with_context(|| format!("opening store {}", cli.store))
}

async fn open_warehouse(location: &str, concurrency: usize) -> Result<Arc<dyn Warehouse>> {
    if location == ":memory:" {
        return Ok(Arc::new(DuckWarehouse::open_mem()?));
    }
    match Url::parse(location) {
        Ok(mut url) if matches!(url.scheme(), "postgres" | "postgresql" | "redshift") => {
            if url.scheme() == "redshift" && url.set_scheme("postgres").is_err() {
                bail!("cannot rewrite warehouse url scheme");
            }
            let wh = RedshiftWarehouse::connect(url.as_str(), concurrency as u32)
                .await
                .with_context(|| format!("connecting to {}", url.host_str().unwrap_or("warehouse")))?;
            Ok(Arc::new(wh))
        }
        _ => {
            let wh = DuckWarehouse::open_disk(location)
                .with_context(|| format!("opening duckdb at {}", location))?;
            Ok(Arc::new(wh))
        }
    }
}
