//! Job repository: the single source of truth for instances and executions.
//!
//! Two stores implement [`JobRepository`]:
//!
//! - [`InMemoryJobRepository`]: process-local maps, used by tests and one-shot runs
//! - [`SqliteJobRepository`]: `rusqlite` tables, survives restarts so `describe`
//!   and restart decisions work across processes
//!
//! Both serialize every operation behind one lock, so concurrent updates of
//! the same execution record never interleave, and `create_job_execution`
//! checks identity and inserts atomically.

use crate::domain::{JobExecution, JobInstance, StepExecution};
use crate::error::{BatchError, Result};
use crate::params::JobParameters;
use crate::status::BatchStatus;
use async_trait::async_trait;

mod memory;
mod schema;
mod sqlite;

pub use memory::InMemoryJobRepository;
pub use sqlite::SqliteJobRepository;

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Instance for `(job_name, job_key)` if one was ever created.
    async fn find_instance(&self, job_name: &str, job_key: &str) -> Result<Option<JobInstance>>;

    async fn find_or_create_instance(&self, job_name: &str, job_key: &str) -> Result<JobInstance>;

    /// Most recently created instance of `job_name`.
    async fn last_instance(&self, job_name: &str) -> Result<Option<JobInstance>>;

    /// Newest execution of an instance, with its step executions.
    async fn last_execution(&self, instance_id: i64) -> Result<Option<JobExecution>>;

    /// All executions of an instance, oldest first, with their step executions.
    async fn find_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>>;

    /// Inserts a new STARTING execution without any identity checks.
    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution>;

    /// Resolves the instance and creates an execution for it in one atomic
    /// operation, rejecting duplicates (see [`check_relaunch`]).
    async fn create_job_execution(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution>;

    /// Persists status, exit status and timestamps of a job execution.
    async fn update_execution(&self, execution: &JobExecution) -> Result<()>;

    async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>>;

    async fn add_step_execution(
        &self,
        job_execution_id: i64,
        step_name: &str,
    ) -> Result<StepExecution>;

    /// Persists status and counters of a step execution. Counters may only grow.
    async fn update_step_execution(&self, step: &StepExecution) -> Result<()>;

    /// Newest execution of `step_name` across all executions of an instance.
    async fn last_step_execution(
        &self,
        instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>>;

    /// Flags a running execution; steps stop at their next chunk boundary.
    async fn request_stop(&self, execution_id: i64) -> Result<()>;

    async fn is_stop_requested(&self, execution_id: i64) -> Result<bool>;

    /// Names of all jobs with at least one instance, sorted.
    async fn job_names(&self) -> Result<Vec<String>>;
}

/// Identity rule applied before a new execution of an existing instance:
///
/// - a running execution blocks the launch
/// - a COMPLETED execution means the instance is done
/// - otherwise a re-run is a restart, which the job has to allow
pub fn check_relaunch(
    instance: &JobInstance,
    executions: &[(i64, BatchStatus)],
    restartable: bool,
) -> Result<()> {
    if let Some((execution_id, _)) = executions.iter().find(|(_, status)| status.is_running()) {
        return Err(BatchError::JobExecutionAlreadyRunning {
            job_name: instance.job_name.clone(),
            execution_id: *execution_id,
        });
    }

    if executions
        .iter()
        .any(|(_, status)| *status == BatchStatus::Completed)
    {
        return Err(BatchError::JobInstanceAlreadyComplete {
            job_name: instance.job_name.clone(),
            instance_id: instance.id,
        });
    }

    if !restartable && !executions.is_empty() {
        return Err(BatchError::JobRestartNotAllowed {
            job_name: instance.job_name.clone(),
            instance_id: instance.id,
        });
    }

    Ok(())
}

/// Validates a step update against the stored record.
pub(crate) fn check_step_update(stored: &StepExecution, update: &StepExecution) -> Result<()> {
    stored.status.check_transition(update.status)?;
    if !update.counters().dominates(stored.counters()) {
        return Err(BatchError::repository(format!(
            "counters of step execution {} ('{}') may not decrease",
            update.id, update.step_name
        )));
    }
    Ok(())
}
