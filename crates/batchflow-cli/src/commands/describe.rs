//! `batchflow describe` command implementation
//!
//! Prints the latest execution of a job with its step counters.

use crate::config::Config;
use crate::error::Result;
use batchflow_core::{describe, open_repository, ReportFormat};

/// Show the latest execution of `job` in `format` (`text`, `html` or `json`).
pub async fn run(config: Config, job: &str, format: &str) -> Result<()> {
    let format: ReportFormat = format.parse()?;
    let repository = open_repository(&config.batch.repository)?;

    let report = describe(repository.as_ref(), job, format).await?;
    println!("{}", report.trim_end());

    Ok(())
}
