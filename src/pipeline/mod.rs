// src/pipeline/mod.rs

//! A small in-process runner: ordered phases of independent tasks.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::config::{RetryPolicy, Settings};
use crate::error::{EtlError, Result};
use crate::quality::QualityReport;
use crate::store::ObjectStore;
use crate::warehouse::{ddl, Warehouse};

mod tasks;

pub use tasks::{CheckQuality, CreateTables, LoadLabels, Sequence, StageTable};

/// What every task gets to work with. Cheap to share between tasks.
#[derive(Clone)]
pub struct RunContext {
    pub run_date: NaiveDate,
    pub warehouse: Arc<dyn Warehouse>,
    pub store: Arc<dyn ObjectStore>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskReport {
    Created { tables: Vec<String> },
    Staged { table: String },
    Loaded { table: String, rows: u64 },
    Checked(QualityReport),
    Sequence { steps: Vec<TaskReport> },
}

#[async_trait]
pub trait Task: Send + Sync {
    fn id(&self) -> &str;
    async fn run(&self, ctx: &RunContext) -> Result<TaskReport>;
}

pub struct Phase {
    pub name: String,
    pub tasks: Vec<Arc<dyn Task>>,
}

impl Phase {
    pub fn new(name: impl Into<String>, tasks: Vec<Arc<dyn Task>>) -> Self {
        Self {
            name: name.into(),
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded { attempts: u32, report: TaskReport },
    Failed { attempts: u32, error: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub phase: String,
    pub task: String,
    #[serde(flatten)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_date: NaiveDate,
    pub succeeded: bool,
    pub tasks: Vec<TaskOutcome>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct Pipeline {
    phases: Vec<Phase>,
    concurrency: usize,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(phases: Vec<Phase>, concurrency: usize, retry: RetryPolicy) -> Self {
        Self {
            phases,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// create dimension tables → create staging tables → stage → load + check
    pub fn from_settings(settings: &Settings) -> Self {
        let dimension_defs = known_tables(settings.dimensions.iter().map(|d| d.table.as_str()));
        let staging_defs = known_tables(settings.staging.iter().map(|s| s.table.as_str()));

        let stage: Vec<Arc<dyn Task>> = settings
            .staging
            .iter()
            .map(|s| {
                Arc::new(StageTable::new(
                    &settings.bucket,
                    settings.iam_role.clone(),
                    s.clone(),
                )) as Arc<dyn Task>
            })
            .collect();

        let load: Vec<Arc<dyn Task>> = settings
            .dimensions
            .iter()
            .map(|d| {
                let steps: Vec<Box<dyn Task>> = vec![
                    Box::new(LoadLabels::new(
                        &settings.bucket,
                        &settings.labels_key,
                        d.clone(),
                    )),
                    Box::new(CheckQuality::new(&d.table, d.checks.clone())),
                ];
                Arc::new(Sequence::new(d.table.clone(), steps)) as Arc<dyn Task>
            })
            .collect();

        let phases = vec![
            Phase::new(
                "create_dimension_tables",
                vec![Arc::new(CreateTables::new("create_dimension_tables", dimension_defs))],
            ),
            Phase::new(
                "create_staging_tables",
                vec![Arc::new(CreateTables::new("create_staging_tables", staging_defs))],
            ),
            Phase::new("copy_staging_tables", stage),
            Phase::new("load_dimension_tables", load),
        ];
        Self::new(phases, settings.concurrency, settings.retry)
    }

    /// Run every phase in order. A phase with a failed task stops the run and
    /// the remaining tasks are reported as skipped.
    #[instrument(level = "info", skip_all, fields(run_date = %ctx.run_date))]
    pub async fn run(&self, ctx: &RunContext) -> RunSummary {
        let start = Instant::now();
        let mut outcomes = Vec::new();
        let mut failed = false;

        for phase in &self.phases {
            if failed {
                outcomes.extend(phase.tasks.iter().map(|t| TaskOutcome {
                    phase: phase.name.clone(),
                    task: t.id().to_string(),
                    status: TaskStatus::Skipped,
                }));
                continue;
            }

            let phase_outcomes = self.run_phase(phase, ctx).await;
            failed = phase_outcomes
                .iter()
                .any(|o| matches!(o.status, TaskStatus::Failed { .. }));
            outcomes.extend(phase_outcomes);
        }

        info!(succeeded = !failed, elapsed = ?start.elapsed(), "run finished");
        RunSummary {
            run_date: ctx.run_date,
            succeeded: !failed,
            tasks: outcomes,
        }
    }

    #[instrument(level = "info", skip_all, fields(phase = %phase.name, tasks = phase.tasks.len()))]
    async fn run_phase(&self, phase: &Phase, ctx: &RunContext) -> Vec<TaskOutcome> {
        let sem = Arc::new(Semaphore::new(self.concurrency));
        let handles: Vec<_> = phase
            .tasks
            .iter()
            .map(|task| {
                let task = Arc::clone(task);
                let ctx = ctx.clone();
                let sem = Arc::clone(&sem);
                let retry = self.retry;
                tokio::spawn(async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(p) => p,
                        Err(e) => return (0, Err(EtlError::Config(e.to_string()))),
                    };
                    run_with_retry(task.as_ref(), &ctx, retry).await
                })
            })
            .collect();

        let results = join_all(handles).await;

        phase
            .tasks
            .iter()
            .zip(results)
            .map(|(task, joined)| {
                let status = match joined {
                    Ok((attempts, Ok(report))) => TaskStatus::Succeeded { attempts, report },
                    Ok((attempts, Err(e))) => {
                        error!(task = task.id(), error = %e, "task failed");
                        TaskStatus::Failed {
                            attempts,
                            error: e.to_string(),
                        }
                    }
                    Err(join_err) => {
                        let e = EtlError::TaskPanicked(task.id().to_string());
                        error!(task = task.id(), error = %join_err, "task aborted");
                        TaskStatus::Failed {
                            attempts: 1,
                            error: e.to_string(),
                        }
                    }
                };
                TaskOutcome {
                    phase: phase.name.clone(),
                    task: task.id().to_string(),
                    status,
                }
            })
            .collect()
    }
}

/// Run `task`, retrying transient errors. Returns the attempts made.
pub async fn run_with_retry(
    task: &dyn Task,
    ctx: &RunContext,
    policy: RetryPolicy,
) -> (u32, Result<TaskReport>) {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match task.run(ctx).await {
            Ok(report) => return (attempts, Ok(report)),
            Err(e) if e.is_transient() && attempts <= policy.retries => {
                warn!(
                    task = task.id(),
                    attempt = attempts,
                    delay = ?policy.delay(),
                    error = %e,
                    "retrying"
                );
                sleep(policy.delay()).await;
            }
            Err(e) => return (attempts, Err(e)),
        }
    }
}

fn known_tables<'a>(names: impl Iterator<Item = &'a str>) -> Vec<&'static ddl::TableDef> {
    names
        .filter_map(|name| {
            let def = ddl::find(name);
            if def.is_none() {
                warn!(table = name, "no table definition; assuming it exists");
            }
            def
        })
        .collect()
}
