//! Monitoring report of the latest execution of a job.
//!
//! The HTML rendering reproduces the job explorer page field for field: one
//! `name:value<br>` line per job field, a blank line, then the same for every
//! step with a leading tab. Timestamps print like `Mon Aug 17 10:00:00 UTC 2020`
//! and missing ones print `null`.

use crate::domain::{JobExecution, StepExecution};
use crate::error::{BatchError, Result};
use crate::repository::JobRepository;
use crate::status::BatchStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S UTC %Y";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Text,
    Html,
    Json,
}

impl FromStr for ReportFormat {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "html" => Ok(ReportFormat::Html),
            "json" => Ok(ReportFormat::Json),
            _ => Err(BatchError::InvalidParameters(format!(
                "unknown report format '{s}', expected text, html or json"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub step_name: String,
    pub step_start_time: Option<DateTime<Utc>>,
    pub step_end_time: Option<DateTime<Utc>>,
    pub step_status: BatchStatus,
    pub step_exit_code: String,
    pub read_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub filter_count: u64,
    pub skip_count: u64,
}

impl From<&StepExecution> for StepReport {
    fn from(step: &StepExecution) -> Self {
        let c = step.counters();
        Self {
            step_name: step.step_name.clone(),
            step_start_time: step.start_time,
            step_end_time: step.end_time,
            step_status: step.status,
            step_exit_code: step.exit_status.exit_code.clone(),
            read_count: c.read_count,
            read_skip_count: c.read_skip_count,
            process_skip_count: c.process_skip_count,
            write_count: c.write_count,
            write_skip_count: c.write_skip_count,
            commit_count: c.commit_count,
            rollback_count: c.rollback_count,
            filter_count: c.filter_count,
            skip_count: c.skip_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_execution_id: i64,
    pub job_name: String,
    pub job_start_time: Option<DateTime<Utc>>,
    pub job_end_time: Option<DateTime<Utc>>,
    pub job_batch_status: BatchStatus,
    pub job_exit_code: String,
    pub steps: Vec<StepReport>,
}

impl From<&JobExecution> for JobReport {
    fn from(execution: &JobExecution) -> Self {
        Self {
            job_execution_id: execution.id,
            job_name: execution.job_name().to_string(),
            job_start_time: execution.start_time,
            job_end_time: execution.end_time,
            job_batch_status: execution.status,
            job_exit_code: execution.exit_status.exit_code.clone(),
            steps: execution.step_executions.iter().map(StepReport::from).collect(),
        }
    }
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "null".to_string(), |t| t.format(TIMESTAMP_FORMAT).to_string())
}

impl JobReport {
    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Html => Ok(self.render_lines("<br>")),
            ReportFormat::Text => Ok(self.render_lines("\n")),
            ReportFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    fn render_lines(&self, br: &str) -> String {
        let mut out = String::new();
        let mut line = |indent: &str, name: &str, value: &dyn std::fmt::Display, end: &str| {
            let _ = write!(out, "{indent}{name}:{value}{end}");
        };
        let end_block = br.repeat(2);

        line("", "jobName", &self.job_name, br);
        line("", "jobStartTime", &timestamp(self.job_start_time), br);
        line("", "jobEndTime", &timestamp(self.job_end_time), br);
        line("", "jobBatchStatus", &self.job_batch_status, br);
        line("", "jobExitCode", &self.job_exit_code, &end_block);

        for step in &self.steps {
            line("\t", "stepName", &step.step_name, br);
            line("\t", "stepStartTime", &timestamp(step.step_start_time), br);
            line("\t", "stepEndTime", &timestamp(step.step_end_time), br);
            line("\t", "stepStatus", &step.step_status, br);
            line("\t", "stepExitCode", &step.step_exit_code, br);
            line("\t", "readCount", &step.read_count, br);
            line("\t", "readSkipCount", &step.read_skip_count, br);
            line("\t", "processSkipCount", &step.process_skip_count, br);
            line("\t", "writeCount", &step.write_count, br);
            line("\t", "writeSkipCount", &step.write_skip_count, br);
            line("\t", "commitCount", &step.commit_count, br);
            line("\t", "rollbackCount", &step.rollback_count, br);
            line("\t", "filterCount", &step.filter_count, br);
            line("\t", "skipCount", &step.skip_count, &end_block);
        }
        out
    }
}

/// Latest execution of the latest instance of `job_name`, with its steps.
pub async fn last_execution(
    repository: &dyn JobRepository,
    job_name: &str,
) -> Result<Option<JobExecution>> {
    match repository.last_instance(job_name).await? {
        Some(instance) => repository.last_execution(instance.id).await,
        None => Ok(None),
    }
}

/// Renders the latest execution of `job_name`. Counters of a running execution
/// are the ones committed so far.
pub async fn describe(
    repository: &dyn JobRepository,
    job_name: &str,
    format: ReportFormat,
) -> Result<String> {
    match last_execution(repository, job_name).await? {
        Some(execution) => JobReport::from(&execution).render(format),
        None => Ok(match format {
            ReportFormat::Json => "null".to_string(),
            ReportFormat::Html => format!("No executions of job '{job_name}'<br>"),
            ReportFormat::Text => format!("No executions of job '{job_name}'\n"),
        }),
    }
}
