//! Shared helpers for engine integration tests

#![allow(dead_code)]

use batchflow_core::{
    InMemoryJobRepository, Job, JobExecution, JobLauncher, JobParameters, JobRegistry,
    JobRepository, StepExecution,
};
use std::sync::Arc;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,batchflow_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Launcher over a fresh in-memory repository with `jobs` registered
pub fn launcher(jobs: Vec<Job>) -> (JobLauncher, Arc<dyn JobRepository>) {
    let mut registry = JobRegistry::new();
    for job in jobs {
        registry.register(job).expect("register job");
    }
    let repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
    (JobLauncher::new(registry, Arc::clone(&repository)), repository)
}

/// Runs `job` once with empty parameters.
pub async fn run_once(job: Job) -> JobExecution {
    let name = job.name().to_string();
    let (launcher, _) = launcher(vec![job]);
    launcher
        .run(&name, JobParameters::new())
        .await
        .expect("launch job")
}

pub fn step<'a>(execution: &'a JobExecution, name: &str) -> &'a StepExecution {
    execution
        .step_execution(name)
        .unwrap_or_else(|| panic!("no step execution named {name}"))
}
