//! Task runner for the daily pipeline: raw -> staging -> curated, each task
//! retried before the run is abandoned.

use super::curated::{run_curated_stage, CuratedReport};
use super::raw::{generate_date_range, run_raw_stage, RawReport};
use super::staging::{run_staging_stage, StagingOptions, StagingReport};
use super::Pipeline;
use crate::error::{GatewayError, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Variant {
    /// Pollutants and files staged one after another
    Regular,
    /// Pollutants and files staged concurrently
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum Stage {
    Raw,
    Staging,
    Curated,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Raw, Stage::Staging, Stage::Curated];

    pub fn task_name(self, variant: Variant) -> &'static str {
        match (self, variant) {
            (Stage::Raw, _) => "unpacked_to_raw",
            (Stage::Staging, Variant::Regular) => "preprocess_to_staging",
            (Stage::Staging, Variant::Fast) => "faster_preprocess_to_staging",
            (Stage::Curated, Variant::Regular) => "process_to_curated",
            (Stage::Curated, Variant::Fast) => "faster_process_to_curated",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Raw(RawReport),
    Staging(StagingReport),
    Curated(CuratedReport),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: &'static str,
    pub stage: Stage,
    pub attempts: u32,
    pub duration: Duration,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Failed(_))
    }
}

impl fmt::Display for TaskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} attempt(s), {:.2}s): ",
            self.task,
            self.attempts,
            self.duration.as_secs_f64()
        )?;
        match &self.outcome {
            TaskOutcome::Raw(r) => write!(f, "{} uploaded, {} failed", r.uploaded.len(), r.failed),
            TaskOutcome::Staging(r) => write!(
                f,
                "{} rows inserted into {} table(s), {} pollutant(s) failed",
                r.tables.iter().map(|t| t.inserted).sum::<usize>(),
                r.tables.len(),
                r.failed.len()
            ),
            TaskOutcome::Curated(r) => write!(
                f,
                "{} curated rows, {} with every valeur",
                r.rows, r.all_valeur_rows
            ),
            TaskOutcome::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub tasks: Vec<TaskReport>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(TaskReport::succeeded)
    }

    pub fn total_duration(&self) -> Duration {
        self.tasks.iter().map(|t| t.duration).sum()
    }
}

async fn run_stage(pipeline: &Pipeline, variant: Variant, stage: Stage) -> Result<TaskOutcome> {
    let settings = &pipeline.settings;
    match stage {
        Stage::Raw => {
            let api = pipeline.api.as_deref().ok_or_else(|| {
                GatewayError::Config("GEODAIR_API_KEY is not set in the environment.".into())
            })?;
            let today = chrono::Local::now().date_naive();
            let dates = generate_date_range(today, pipeline.last_n_days);
            let report = run_raw_stage(
                api,
                pipeline.stores.objects.as_ref(),
                &pipeline.stores.bucket,
                &pipeline.pollutants,
                &dates,
                pipeline.polling,
            )
            .await?;
            Ok(TaskOutcome::Raw(report))
        }
        Stage::Staging => {
            let options = match variant {
                Variant::Regular => StagingOptions::regular(settings.batch_size),
                Variant::Fast => StagingOptions::fast(
                    settings.batch_size,
                    settings.max_workers,
                    settings.file_workers,
                ),
            };
            let report = run_staging_stage(&pipeline.stores, &pipeline.pollutants, options).await?;
            Ok(TaskOutcome::Staging(report))
        }
        Stage::Curated => {
            let report = run_curated_stage(pipeline.stores.tables.as_ref()).await?;
            Ok(TaskOutcome::Curated(report))
        }
    }
}

/// Run `stages` in pipeline order. A task that fails every attempt ends the
/// run; its report is the last one returned.
pub async fn run_pipeline(
    pipeline: &Pipeline,
    variant: Variant,
    stages: &[Stage],
    retry: RetryPolicy,
) -> PipelineReport {
    let mut ordered = stages.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut report = PipelineReport::default();
    for stage in ordered {
        let task = stage.task_name(variant);
        info!(task, "task started");
        let started = Instant::now();
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match run_stage(pipeline, variant, stage).await {
                Ok(outcome) => break outcome,
                Err(e) if attempts <= retry.retries => {
                    warn!(task, attempt = attempts, "task failed, retrying in {:?}: {}", retry.delay, e);
                    tokio::time::sleep(retry.delay).await;
                }
                Err(e) => {
                    error!(task, attempts, "task failed: {}", e);
                    break TaskOutcome::Failed(e.to_string());
                }
            }
        };

        let duration = started.elapsed();
        crate::metrics::pipeline::task_duration(task, duration.as_secs_f64());
        let task_report = TaskReport {
            task,
            stage,
            attempts,
            duration,
            outcome,
        };
        info!(task, "{}", task_report);
        let failed = !task_report.succeeded();
        report.tasks.push(task_report);
        if failed {
            break;
        }
    }
    report
}
