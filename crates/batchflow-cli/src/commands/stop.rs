//! `batchflow stop` command implementation

use crate::config::Config;
use crate::error::Result;
use batchflow_core::{open_repository, JobLauncher, JobRegistry};
use colored::Colorize;

/// Ask a running execution to stop at its next chunk boundary.
pub async fn run(config: Config, execution_id: i64) -> Result<()> {
    let repository = open_repository(&config.batch.repository)?;
    let launcher = JobLauncher::with_config(JobRegistry::new(), repository, config.batch);

    launcher.stop(execution_id).await?;
    println!(
        "{} Stop requested for execution {}",
        "✓".green(),
        execution_id
    );
    println!("The job stops once its in-flight chunks have committed.");

    Ok(())
}
