//! Steps and the lifecycle shared by every step type.
//!
//! [`run_step`] owns the bookkeeping around a step: restart skipping, the
//! STARTING -> STARTED -> terminal transitions, listener callbacks and the final
//! save. A [`Step`] implementation only does its work and reports progress
//! through the [`StepExecutionHandle`] it is given.

use crate::domain::{StepContribution, StepExecution};
use crate::error::{BatchError, Result};
use crate::params::JobParameters;
use crate::repository::JobRepository;
use crate::status::BatchStatus;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;

mod chunk;

pub use chunk::{ChunkStep, ChunkStepBuilder};

/// What a running step knows about the job execution it belongs to
#[derive(Clone)]
pub struct JobScope {
    pub job_name: String,
    pub job_execution_id: i64,
    pub job_instance_id: i64,
    pub parameters: Arc<JobParameters>,
    pub repository: Arc<dyn JobRepository>,
    /// Check for stop requests between chunks
    pub poll_stop: bool,
}

impl JobScope {
    pub async fn is_stop_requested(&self) -> Result<bool> {
        if !self.poll_stop {
            return Ok(false);
        }
        self.repository.is_stop_requested(self.job_execution_id).await
    }
}

/// Callbacks around one step execution
pub trait StepExecutionListener: Send + Sync {
    /// An error here fails the step before any item is read.
    fn before_step(&self, _execution: &StepExecution) -> anyhow::Result<()> {
        Ok(())
    }

    /// Sees the finished execution before it is saved. Errors are logged.
    fn after_step(&self, _execution: &StepExecution) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// Re-run this step even when it already completed in the same instance.
    fn allow_start_if_complete(&self) -> bool {
        false
    }

    fn listeners(&self) -> &[Arc<dyn StepExecutionListener>] {
        &[]
    }

    /// Does the work of the step and returns COMPLETED or STOPPED; an error
    /// marks the step FAILED.
    async fn execute(&self, scope: &JobScope, execution: &StepExecutionHandle) -> Result<BatchStatus>;
}

/// Shared, persisted view of a running step execution.
///
/// Every mutation is written through to the repository while the lock is
/// held, so monitoring sees counters as soon as a chunk commits.
#[derive(Clone)]
pub struct StepExecutionHandle {
    inner: Arc<Mutex<StepExecution>>,
    repository: Arc<dyn JobRepository>,
}

impl StepExecutionHandle {
    pub fn new(execution: StepExecution, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(execution)),
            repository,
        }
    }

    /// Applies one committed chunk.
    pub async fn commit(&self, contribution: &StepContribution) -> Result<()> {
        let mut execution = self.inner.lock().await;
        execution.apply(contribution);
        self.repository.update_step_execution(&execution).await
    }

    /// Records one failed chunk.
    pub async fn rollback(&self) -> Result<()> {
        let mut execution = self.inner.lock().await;
        execution.record_rollback();
        self.repository.update_step_execution(&execution).await
    }

    async fn finish(&self, status: BatchStatus, description: &str) -> Result<StepExecution> {
        let mut execution = self.inner.lock().await;
        execution.mark_finished(status, description)?;
        Ok(execution.clone())
    }
}

/// Runs `step` inside the job execution described by `scope`.
///
/// A step whose last execution in this instance COMPLETED is skipped (and
/// reported COMPLETED) unless it allows starting again.
pub async fn run_step(step: &dyn Step, scope: &JobScope) -> Result<BatchStatus> {
    let name = step.name().to_string();
    let repository = Arc::clone(&scope.repository);

    if let Some(last) = repository
        .last_step_execution(scope.job_instance_id, &name)
        .await?
    {
        if last.status == BatchStatus::Completed && !step.allow_start_if_complete() {
            tracing::info!(
                step = %name,
                previous_execution = last.job_execution_id,
                "Step already complete for this job instance, skipping"
            );
            return Ok(BatchStatus::Completed);
        }
    }

    let mut execution = repository
        .add_step_execution(scope.job_execution_id, &name)
        .await?;
    execution.mark_started()?;
    repository.update_step_execution(&execution).await?;

    let span = tracing::info_span!("step", step = %name, step_execution_id = execution.id);
    async move {
        tracing::info!("Executing step");

        let mut before_error = None;
        for listener in step.listeners() {
            if let Err(e) = listener.before_step(&execution) {
                before_error = Some(BatchError::listener("before_step", e));
                break;
            }
        }

        let handle = StepExecutionHandle::new(execution, Arc::clone(&repository));
        let result = match before_error {
            Some(err) => Err(err),
            None => step.execute(scope, &handle).await,
        };

        let (status, description) = match &result {
            Ok(status) => (*status, String::new()),
            Err(err) => (BatchStatus::Failed, err.to_string()),
        };
        let finished = handle.finish(status, &description).await?;

        for listener in step.listeners() {
            if let Err(e) = listener.after_step(&finished) {
                tracing::warn!(error = %format!("{e:#}"), "after_step listener failed");
            }
        }
        repository.update_step_execution(&finished).await?;

        let c = finished.counters();
        match &result {
            Ok(_) => tracing::info!(
                status = %finished.status,
                read = c.read_count,
                written = c.write_count,
                filtered = c.filter_count,
                commits = c.commit_count,
                rollbacks = c.rollback_count,
                "Step finished"
            ),
            Err(err) => tracing::error!(
                error = %err,
                read = c.read_count,
                written = c.write_count,
                commits = c.commit_count,
                rollbacks = c.rollback_count,
                "Step failed"
            ),
        }
        result
    }
    .instrument(span)
    .await
}
