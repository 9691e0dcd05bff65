//! Persistent execution records: instances, job executions, step executions.

use crate::error::Result;
use crate::params::JobParameters;
use crate::status::{BatchStatus, ExitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical identity of a job run: job name plus identifying parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: i64,
    pub job_name: String,
    /// Digest of the identifying parameters, see [`JobParameters::job_key`]
    pub job_key: String,
}

/// One attempt at running a [`JobInstance`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: i64,
    pub instance: JobInstance,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Ordered by step execution id
    pub step_executions: Vec<StepExecution>,
}

impl JobExecution {
    pub fn new(id: i64, instance: JobInstance, parameters: JobParameters) -> Self {
        let now = Utc::now();
        Self {
            id,
            instance,
            parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: now,
            start_time: None,
            end_time: None,
            last_updated: Some(now),
            step_executions: Vec::new(),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Moves the execution to `status`, refusing to leave a terminal status.
    pub fn set_status(&mut self, status: BatchStatus) -> Result<()> {
        self.status.check_transition(status)?;
        self.status = status;
        self.last_updated = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn mark_started(&mut self) -> Result<()> {
        self.set_status(BatchStatus::Started)?;
        self.start_time = Some(Utc::now());
        self.exit_status = ExitStatus::executing();
        Ok(())
    }

    pub(crate) fn mark_finished(&mut self, status: BatchStatus, description: &str) -> Result<()> {
        self.set_status(status)?;
        self.end_time = Some(Utc::now());
        self.exit_status = ExitStatus::from(status).with_description(description);
        Ok(())
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|s| s.step_name == step_name)
    }
}

/// Item counters of one step execution. Values only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
}

impl StepCounters {
    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Adds one committed chunk.
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.commit_count += 1;
    }

    /// True when no counter of `self` is below the one in `previous`.
    pub fn dominates(&self, previous: &StepCounters) -> bool {
        self.read_count >= previous.read_count
            && self.write_count >= previous.write_count
            && self.filter_count >= previous.filter_count
            && self.read_skip_count >= previous.read_skip_count
            && self.process_skip_count >= previous.process_skip_count
            && self.write_skip_count >= previous.write_skip_count
            && self.commit_count >= previous.commit_count
            && self.rollback_count >= previous.rollback_count
    }
}

/// Counts produced by one chunk, applied to the step when the chunk commits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepContribution {
    pub read_count: u64,
    pub write_count: u64,
    pub filter_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
}

/// One run of a step inside a [`JobExecution`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: i64,
    pub job_execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub(crate) counters: StepCounters,
}

impl StepExecution {
    pub fn new(id: i64, job_execution_id: i64, step_name: impl Into<String>) -> Self {
        Self {
            id,
            job_execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: None,
            end_time: None,
            last_updated: Some(Utc::now()),
            counters: StepCounters::default(),
        }
    }

    pub fn counters(&self) -> &StepCounters {
        &self.counters
    }

    pub fn read_count(&self) -> u64 {
        self.counters.read_count
    }

    pub fn write_count(&self) -> u64 {
        self.counters.write_count
    }

    pub fn filter_count(&self) -> u64 {
        self.counters.filter_count
    }

    pub fn commit_count(&self) -> u64 {
        self.counters.commit_count
    }

    pub fn rollback_count(&self) -> u64 {
        self.counters.rollback_count
    }

    pub fn skip_count(&self) -> u64 {
        self.counters.skip_count()
    }

    pub(crate) fn apply(&mut self, contribution: &StepContribution) {
        self.counters.apply(contribution);
        self.last_updated = Some(Utc::now());
    }

    pub(crate) fn record_rollback(&mut self) {
        self.counters.rollback_count += 1;
        self.last_updated = Some(Utc::now());
    }

    pub(crate) fn mark_started(&mut self) -> Result<()> {
        self.status.check_transition(BatchStatus::Started)?;
        self.status = BatchStatus::Started;
        self.start_time = Some(Utc::now());
        self.last_updated = self.start_time;
        Ok(())
    }

    pub(crate) fn mark_finished(&mut self, status: BatchStatus, description: &str) -> Result<()> {
        self.status.check_transition(status)?;
        self.status = status;
        self.exit_status = ExitStatus::from(status).with_description(description);
        self.end_time = Some(Utc::now());
        self.last_updated = self.end_time;
        Ok(())
    }
}
