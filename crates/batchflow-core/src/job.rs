//! Job definitions and the job execution lifecycle.

use crate::domain::JobExecution;
use crate::error::{BatchError, Result};
use crate::flow::{Flow, FlowBuilder, FlowNode};
use crate::params::{JobParameters, JobParametersIncrementer, JobParametersValidator};
use crate::repository::JobRepository;
use crate::status::BatchStatus;
use crate::step::JobScope;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::Instrument;

/// Callbacks around one job execution
pub trait JobExecutionListener: Send + Sync {
    /// An error here fails the execution before any step runs.
    fn before_job(&self, _execution: &JobExecution) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called exactly once with the finished execution (final status and all
    /// step executions), before it is saved. Errors are logged.
    fn after_job(&self, _execution: &JobExecution) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A named, immutable flow graph plus its identity and launch policies
pub struct Job {
    name: String,
    flow: Flow,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
    validator: Option<Box<dyn JobParametersValidator>>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    restartable: bool,
    identifying_keys: Option<BTreeSet<String>>,
}

impl Job {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn incrementer(&self) -> Option<&dyn JobParametersIncrementer> {
        self.incrementer.as_deref()
    }

    pub fn validator(&self) -> Option<&dyn JobParametersValidator> {
        self.validator.as_deref()
    }

    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    /// Instance key of `params` under this job's identifying keys.
    pub fn job_key(&self, params: &JobParameters) -> String {
        params.job_key(self.identifying_keys.as_ref())
    }

    /// Drives `execution` from STARTING to a terminal status.
    ///
    /// Step and flow failures end up in the returned execution as FAILED with
    /// the error as exit description; only repository failures are returned
    /// as `Err`.
    pub async fn execute(
        &self,
        mut execution: JobExecution,
        repository: Arc<dyn JobRepository>,
        poll_stop: bool,
    ) -> Result<JobExecution> {
        let span = tracing::info_span!(
            "job",
            job = %self.name,
            job_execution_id = execution.id
        );

        async move {
            match self.run_to_end(&mut execution, &repository, poll_stop).await {
                Ok(()) => Ok(execution),
                Err(err) => {
                    Self::abandon(&mut execution, &repository, &err).await;
                    Err(err)
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Best-effort save of a terminal status after a store error, so later
    /// launches of the instance are not blocked by a STARTED record.
    async fn abandon(
        execution: &mut JobExecution,
        repository: &Arc<dyn JobRepository>,
        err: &BatchError,
    ) {
        if execution.status.is_running() {
            if let Err(e) = execution.mark_finished(BatchStatus::Failed, &err.to_string()) {
                tracing::error!(error = %e, "Failed to mark job execution FAILED");
                return;
            }
        }
        if let Err(e) = repository.update_execution(execution).await {
            tracing::error!(error = %e, "Failed to save abandoned job execution");
        }
    }

    async fn run_to_end(
        &self,
        execution: &mut JobExecution,
        repository: &Arc<dyn JobRepository>,
        poll_stop: bool,
    ) -> Result<()> {
        execution.mark_started()?;
        repository.update_execution(execution).await?;
        tracing::info!(parameters = %execution.parameters, "Job started");

        let scope = JobScope {
            job_name: self.name.clone(),
            job_execution_id: execution.id,
            job_instance_id: execution.instance.id,
            parameters: Arc::new(execution.parameters.clone()),
            repository: Arc::clone(repository),
            poll_stop,
        };

        let mut outcome = Ok(BatchStatus::Completed);
        for listener in &self.listeners {
            if let Err(e) = listener.before_job(execution) {
                outcome = Err(BatchError::listener("before_job", e));
                break;
            }
        }
        if outcome.is_ok() {
            outcome = self.flow.execute(&scope).await;
        }

        let (status, description) = match &outcome {
            Ok(status) => (*status, String::new()),
            Err(err) => (BatchStatus::Failed, err.to_string()),
        };

        if let Some(stored) = repository.get_execution(execution.id).await? {
            execution.step_executions = stored.step_executions;
        }
        execution.mark_finished(status, &description)?;

        for listener in &self.listeners {
            if let Err(e) = listener.after_job(execution) {
                tracing::warn!(error = %format!("{e:#}"), "after_job listener failed");
            }
        }
        repository.update_execution(execution).await?;

        match status {
            BatchStatus::Failed => tracing::error!(
                status = %status,
                exit_description = %execution.exit_status.exit_description,
                "Job failed"
            ),
            _ => tracing::info!(
                status = %status,
                steps = execution.step_executions.len(),
                "Job finished"
            ),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("steps", &self.flow.step_names())
            .field("restartable", &self.restartable)
            .field("incrementer", &self.incrementer.as_ref().map(|i| i.key().to_string()))
            .finish()
    }
}

/// Assembles a [`Job`] from explicitly constructed nodes
pub struct JobBuilder {
    name: String,
    flow: FlowBuilder,
    incrementer: Option<Box<dyn JobParametersIncrementer>>,
    validator: Option<Box<dyn JobParametersValidator>>,
    listeners: Vec<Arc<dyn JobExecutionListener>>,
    restartable: bool,
    identifying_keys: Option<BTreeSet<String>>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            flow: FlowBuilder::new(name.clone()),
            name,
            incrementer: None,
            validator: None,
            listeners: Vec::new(),
            restartable: true,
            identifying_keys: None,
        }
    }

    pub fn start(mut self, node: impl Into<FlowNode>) -> Self {
        self.flow = self.flow.start(node);
        self
    }

    pub fn next(mut self, node: impl Into<FlowNode>) -> Self {
        self.flow = self.flow.next(node);
        self
    }

    pub fn split(mut self, name: impl Into<String>, branches: Vec<Flow>) -> Self {
        self.flow = self.flow.split(name, branches);
        self
    }

    pub fn incrementer<I>(mut self, incrementer: I) -> Self
    where
        I: JobParametersIncrementer + 'static,
    {
        self.incrementer = Some(Box::new(incrementer));
        self
    }

    pub fn validator<V>(mut self, validator: V) -> Self
    where
        V: JobParametersValidator + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: JobExecutionListener + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Whether a FAILED or STOPPED instance may be run again (default true).
    pub fn restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    /// Restricts the instance identity to these parameter keys.
    pub fn identifying_keys<K>(mut self, keys: K) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        self.identifying_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Result<Job> {
        if self.name.trim().is_empty() {
            return Err(BatchError::InvalidDefinition("job name cannot be empty".into()));
        }
        let flow = self.flow.build()?;

        let mut seen = HashSet::new();
        for name in flow.step_names() {
            if !seen.insert(name) {
                return Err(BatchError::InvalidDefinition(format!(
                    "job '{}' defines step '{name}' more than once",
                    self.name
                )));
            }
        }

        Ok(Job {
            name: self.name,
            flow,
            incrementer: self.incrementer,
            validator: self.validator,
            listeners: self.listeners,
            restartable: self.restartable,
            identifying_keys: self.identifying_keys,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::item::{CollectingItemWriter, ListItemReader};
    use crate::params::RunIdIncrementer;
    use crate::step::ChunkStepBuilder;

    fn step(name: &str) -> crate::step::ChunkStep<i32, i32> {
        ChunkStepBuilder::new(name, 1)
            .reader(ListItemReader::new(vec![1]))
            .writer(CollectingItemWriter::new())
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let branch = FlowBuilder::new("branch").start(step("load")).build().unwrap();
        let err = JobBuilder::new("dupJob")
            .start(step("load"))
            .split("split", vec![branch])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'load' more than once"));
    }

    #[test]
    fn test_job_without_steps_rejected() {
        assert!(JobBuilder::new("emptyJob").build().is_err());
    }

    #[test]
    fn test_identifying_keys_narrow_the_job_key() {
        let job = JobBuilder::new("keyed")
            .start(step("only"))
            .identifying_keys(["opdate"])
            .incrementer(RunIdIncrementer::new())
            .build()
            .unwrap();
        let a = JobParameters::builder().add("opdate", "20200817").add("run.id", 1_i64).build();
        let b = JobParameters::builder().add("opdate", "20200817").add("run.id", 2_i64).build();
        assert_eq!(job.job_key(&a), job.job_key(&b));
        assert_eq!(job.incrementer().unwrap().key(), "run.id");
    }
}
