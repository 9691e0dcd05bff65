//! Configuration for the batchflow CLI
//!
//! Engine settings come from `BATCH_*` variables through
//! [`BatchConfig::from_env`]. The CLI only changes where execution state lives
//! by default: a SQLite file in the working directory, so `describe` and
//! `stop` see executions started by an earlier `run`.

use crate::error::{CliError, Result};
use batchflow_common::env;
use batchflow_core::{BatchConfig, RepositoryConfig};
use std::path::PathBuf;

// ============================================================================
// CLI Configuration Constants
// ============================================================================

/// Name of the job wired by this binary.
pub const JOB_NAME: &str = "importUserJob";

/// CSV imported by `step01_CSV_to_DB` when `--input` is not given.
pub const DEFAULT_INPUT: &str = "data/sample-data.csv";

/// CSV written by `step03_DB_to_CSV` when `--output` is not given.
pub const DEFAULT_OUTPUT: &str = "target/test-outputs/output.txt";

/// SQLite file holding the `people` table.
pub const DEFAULT_DATABASE: &str = "batchflow-people.db";

/// SQLite file holding job execution state when `BATCH_REPOSITORY` is unset.
pub const DEFAULT_REPOSITORY: &str = "batchflow-repository.db";

/// Operation date passed to every launch unless overridden with `--param`.
pub const DEFAULT_OPDATE: &str = "20200817";

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub batch: BatchConfig,
}

impl Config {
    /// Load config from environment variables
    pub fn from_env() -> Result<Self> {
        let mut batch = BatchConfig::from_env().map_err(|e| CliError::config(format!("{e:#}")))?;

        if env::var("BATCH_REPOSITORY").is_none() {
            batch.repository = RepositoryConfig::Sqlite {
                path: PathBuf::from(DEFAULT_REPOSITORY),
            };
        }

        Ok(Self { batch })
    }

    /// Overrides the repository location (`memory` or a SQLite path).
    pub fn with_repository(mut self, location: Option<&str>) -> Self {
        if let Some(location) = location {
            self.batch.repository = RepositoryConfig::parse(location);
        }
        self
    }

    /// Overrides the worker count of the multi-worker import step.
    pub fn with_throttle_limit(mut self, workers: Option<usize>) -> Result<Self> {
        if let Some(workers) = workers {
            self.batch.throttle_limit = workers;
        }
        self.batch
            .validate()
            .map_err(|e| CliError::config(format!("{e:#}")))?;
        Ok(self)
    }
}
