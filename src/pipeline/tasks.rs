// src/pipeline/tasks.rs

use async_trait::async_trait;
use tracing::info;

use super::{RunContext, Task, TaskReport};
use crate::config::{DimensionTable, QualityCheck, StagingTable};
use crate::error::Result;
use crate::warehouse::ddl::{create_schema_sql, TableDef};
use crate::warehouse::IamRole;
use crate::{load, quality, stage};

/// `CREATE TABLE IF NOT EXISTS` for a group of tables, in order.
pub struct CreateTables {
    id: String,
    tables: Vec<&'static TableDef>,
}

impl CreateTables {
    pub fn new(id: impl Into<String>, tables: Vec<&'static TableDef>) -> Self {
        Self {
            id: id.into(),
            tables,
        }
    }
}

#[async_trait]
impl Task for CreateTables {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskReport> {
        let dialect = ctx.warehouse.dialect();
        ctx.warehouse.execute(&create_schema_sql()).await?;
        for table in &self.tables {
            ctx.warehouse.execute(&table.create_sql(dialect)).await?;
            info!(table = table.name, "table ready");
        }
        Ok(TaskReport::Created {
            tables: self.tables.iter().map(|t| t.name.to_string()).collect(),
        })
    }
}

/// Copy one staging table from the object store.
pub struct StageTable {
    id: String,
    bucket: String,
    iam_role: Option<IamRole>,
    staging: StagingTable,
}

impl StageTable {
    pub fn new(bucket: impl Into<String>, iam_role: Option<IamRole>, staging: StagingTable) -> Self {
        Self {
            id: format!("load_{}_from_s3", staging.table),
            bucket: bucket.into(),
            iam_role,
            staging,
        }
    }
}

#[async_trait]
impl Task for StageTable {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskReport> {
        stage::stage_table(
            ctx.warehouse.as_ref(),
            ctx.store.as_ref(),
            &self.bucket,
            self.iam_role.as_ref(),
            &self.staging,
            ctx.run_date,
        )
        .await?;
        Ok(TaskReport::Staged {
            table: self.staging.table.clone(),
        })
    }
}

/// Fill one dimension table from its SAS label block.
pub struct LoadLabels {
    id: String,
    bucket: String,
    labels_key: String,
    dimension: DimensionTable,
}

impl LoadLabels {
    pub fn new(
        bucket: impl Into<String>,
        labels_key: impl Into<String>,
        dimension: DimensionTable,
    ) -> Self {
        Self {
            id: format!("load_{}_from_sas", dimension.table),
            bucket: bucket.into(),
            labels_key: labels_key.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Task for LoadLabels {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskReport> {
        let rows = load::load_dimension(
            ctx.warehouse.as_ref(),
            ctx.store.as_ref(),
            &self.bucket,
            &self.labels_key,
            &self.dimension,
        )
        .await?;
        Ok(TaskReport::Loaded {
            table: self.dimension.table.clone(),
            rows,
        })
    }
}

pub struct CheckQuality {
    id: String,
    table: String,
    checks: Vec<QualityCheck>,
}

impl CheckQuality {
    pub fn new(table: impl Into<String>, checks: Vec<QualityCheck>) -> Self {
        let table = table.into();
        Self {
            id: format!("qc_{}_table", table),
            table,
            checks,
        }
    }
}

#[async_trait]
impl Task for CheckQuality {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskReport> {
        let report = quality::check_table(ctx.warehouse.as_ref(), &self.table, &self.checks).await?;
        Ok(TaskReport::Checked(report))
    }
}

/// Run children one after another, stopping at the first error.
pub struct Sequence {
    id: String,
    steps: Vec<Box<dyn Task>>,
}

impl Sequence {
    pub fn new(id: impl Into<String>, steps: Vec<Box<dyn Task>>) -> Self {
        Self {
            id: id.into(),
            steps,
        }
    }
}

#[async_trait]
impl Task for Sequence {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &RunContext) -> Result<TaskReport> {
        let mut reports = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            reports.push(step.run(ctx).await?);
        }
        Ok(TaskReport::Sequence { steps: reports })
    }
}
