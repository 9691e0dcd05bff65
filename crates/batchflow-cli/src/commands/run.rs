//! `batchflow run` command implementation
//!
//! Launches `importUserJob` and waits for it to finish.

use crate::config::{Config, DEFAULT_OPDATE, JOB_NAME};
use crate::error::{CliError, Result};
use crate::job::{import_user_job, ImportSettings};
use crate::people;
use batchflow_core::{
    fault, open_repository, BatchStatus, JobExecution, JobLauncher, JobParameters, JobRegistry,
    RUN_ID_KEY,
};
use colored::Colorize;
use std::path::PathBuf;

/// Options of one `run` invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub database: PathBuf,
    /// `key=value` or `key(type)=value` launch parameters
    pub params: Vec<String>,
    /// Fail the Nth processed item
    pub fail_on: Option<usize>,
    pub throttle_limit: Option<usize>,
}

/// Run `importUserJob`. A job that ends other than COMPLETED is an error.
pub async fn run(config: Config, options: RunOptions) -> Result<()> {
    let params = launch_parameters(&options.params)?;
    let config = config.with_throttle_limit(options.throttle_limit)?;

    if let Some(parent) = options.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = people::open_database(&options.database)?;

    let settings = ImportSettings {
        input: options.input.clone(),
        output: options.output.clone(),
        throttle_limit: config.batch.throttle_limit,
    };
    let job = import_user_job(&settings, conn, fault::fail_on(options.fail_on))?;

    let mut registry = JobRegistry::new();
    registry.register(job)?;
    let repository = open_repository(&config.batch.repository)?;
    let launcher = JobLauncher::with_config(registry, repository, config.batch);

    let execution = launcher.run(JOB_NAME, params).await?;
    print_summary(&execution, &options);

    if execution.status != BatchStatus::Completed {
        return Err(CliError::JobFailed {
            job: execution.job_name().to_string(),
            execution_id: execution.id,
            status: execution.status.to_string(),
            description: execution.exit_status.exit_description.clone(),
        });
    }
    Ok(())
}

/// Default launch parameters with the caller's `--param` values on top.
///
/// The `run.id` given here only seeds the first launch; the incrementer
/// replaces it on every run.
pub fn launch_parameters(args: &[String]) -> Result<JobParameters> {
    let defaults = JobParameters::builder()
        .add("opdate", DEFAULT_OPDATE)
        .add(RUN_ID_KEY, "1")
        .build();
    Ok(defaults.merged(&JobParameters::parse_args(args)?))
}

fn print_summary(execution: &JobExecution, options: &RunOptions) {
    let status = match execution.status {
        BatchStatus::Completed => execution.status.to_string().green().bold(),
        _ => execution.status.to_string().red().bold(),
    };

    println!("{}", "Job Execution:".cyan().bold());
    println!("  Job:        {}", execution.job_name());
    println!("  Execution:  {}", execution.id);
    println!("  Instance:   {}", execution.instance.id);
    println!("  Parameters: {}", execution.parameters);
    println!("  Status:     {}", status);
    if !execution.exit_status.exit_description.is_empty() {
        println!("  Exit:       {}", execution.exit_status.exit_description);
    }
    println!();

    println!("{}", "Steps:".cyan().bold());
    for step in &execution.step_executions {
        println!(
            "  {:<20} {:<10} read={} write={} filter={} commit={} rollback={}",
            step.step_name,
            step.status.to_string(),
            step.read_count(),
            step.write_count(),
            step.filter_count(),
            step.commit_count(),
            step.rollback_count()
        );
    }

    if execution.status == BatchStatus::Completed {
        println!();
        println!("  Output:     {}", options.output.display());
    }
}
