//! Launch entry point: resolves job identity and runs jobs.

use crate::config::{BatchConfig, RepositoryConfig};
use crate::domain::JobExecution;
use crate::error::{BatchError, Result};
use crate::job::Job;
use crate::params::JobParameters;
use crate::repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Jobs known to a launcher, registered explicitly by name
#[derive(Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(job.name()) {
            return Err(BatchError::InvalidDefinition(format!(
                "a job named '{}' is already registered",
                job.name()
            )));
        }
        self.jobs.insert(job.name().to_string(), Arc::new(job));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<Job>> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| BatchError::NoSuchJob(name.to_string()))
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }
}

/// Opens the repository selected by `config`.
pub fn open_repository(config: &RepositoryConfig) -> Result<Arc<dyn JobRepository>> {
    Ok(match config {
        RepositoryConfig::InMemory => Arc::new(InMemoryJobRepository::new()),
        RepositoryConfig::Sqlite { path } => Arc::new(SqliteJobRepository::open(path)?),
    })
}

/// A job execution running on its own task
pub struct JobHandle {
    execution_id: i64,
    task: JoinHandle<Result<JobExecution>>,
}

impl JobHandle {
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// Waits for the terminal execution.
    pub async fn wait(self) -> Result<JobExecution> {
        self.task.await.map_err(|e| {
            BatchError::TaskFailed(format!("job execution {} ended abnormally: {e}", self.execution_id))
        })?
    }
}

pub struct JobLauncher {
    registry: Arc<JobRegistry>,
    repository: Arc<dyn JobRepository>,
    config: BatchConfig,
}

impl JobLauncher {
    pub fn new(registry: JobRegistry, repository: Arc<dyn JobRepository>) -> Self {
        Self::with_config(registry, repository, BatchConfig::default())
    }

    pub fn with_config(
        registry: JobRegistry,
        repository: Arc<dyn JobRepository>,
        config: BatchConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            repository,
            config,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repository
    }

    /// Launches `job_name` and waits for the terminal execution.
    ///
    /// Identity conflicts and invalid parameters are returned as errors before
    /// any execution exists. Step failures are not errors: they come back as
    /// a FAILED execution.
    pub async fn run(&self, job_name: &str, params: JobParameters) -> Result<JobExecution> {
        let (_, handle) = self.start(job_name, params).await?;
        handle.wait().await
    }

    /// Launches `job_name` on a background task.
    ///
    /// Returns once the execution has been created, with the STARTING record
    /// and a handle to await the terminal one.
    pub async fn start(
        &self,
        job_name: &str,
        params: JobParameters,
    ) -> Result<(JobExecution, JobHandle)> {
        let job = self.registry.get(job_name)?;
        let params = self.launch_parameters(&job, params).await?;
        let execution = self
            .repository
            .create_job_execution(job.name(), &job.job_key(&params), &params, job.is_restartable())
            .await?;

        tracing::info!(
            job = %job.name(),
            job_execution_id = execution.id,
            job_instance_id = execution.instance.id,
            parameters = %params,
            "Job launched"
        );
        Ok(self.spawn(job, execution))
    }

    /// Runs a new execution of the instance behind a FAILED or STOPPED
    /// execution, with the same parameters.
    ///
    /// Steps that completed in an earlier execution of the instance are
    /// skipped.
    pub async fn restart(&self, execution_id: i64) -> Result<JobExecution> {
        let previous = self
            .repository
            .get_execution(execution_id)
            .await?
            .ok_or(BatchError::NoSuchExecution(execution_id))?;
        let job = self.registry.get(previous.job_name())?;

        let execution = self
            .repository
            .create_job_execution(
                job.name(),
                &previous.instance.job_key,
                &previous.parameters,
                job.is_restartable(),
            )
            .await?;
        tracing::info!(
            job = %job.name(),
            job_execution_id = execution.id,
            previous_execution_id = execution_id,
            "Job restarted"
        );

        let (_, handle) = self.spawn(job, execution);
        handle.wait().await
    }

    /// Asks a running execution to stop at its next chunk boundary.
    pub async fn stop(&self, execution_id: i64) -> Result<()> {
        self.repository.request_stop(execution_id).await?;
        tracing::info!(job_execution_id = execution_id, "Stop requested");
        Ok(())
    }

    /// Validates caller parameters, then lays the incrementer's next value on
    /// top of them.
    async fn launch_parameters(&self, job: &Job, params: JobParameters) -> Result<JobParameters> {
        if let Some(validator) = job.validator() {
            validator.validate(&params)?;
        }

        let Some(incrementer) = job.incrementer() else {
            return Ok(params);
        };

        let previous = match self.repository.last_instance(job.name()).await? {
            Some(instance) => self
                .repository
                .last_execution(instance.id)
                .await?
                .map(|e| e.parameters),
            None => None,
        };
        let next = incrementer.next(previous.as_ref());

        let mut merged = next.merged(&params);
        if let Some(value) = next.get(incrementer.key()) {
            merged = merged.merged(
                &JobParameters::builder()
                    .add(incrementer.key(), value.clone())
                    .build(),
            );
        }
        Ok(merged)
    }

    fn spawn(&self, job: Arc<Job>, execution: JobExecution) -> (JobExecution, JobHandle) {
        let execution_id = execution.id;
        let repository = Arc::clone(&self.repository);
        let poll_stop = self.config.stop_poll_between_chunks;
        let snapshot = execution.clone();

        let task = tokio::spawn(async move { job.execute(execution, repository, poll_stop).await });
        (snapshot, JobHandle { execution_id, task })
    }
}
