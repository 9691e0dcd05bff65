//! Error types for the batchflow CLI
//!
//! Every variant is user-facing: the message says what went wrong and, where
//! there is one, what to try next.

use batchflow_core::BatchError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    /// Engine rejected the launch or failed outside of a step
    #[error("{0}")]
    Batch(#[from] BatchError),

    /// The job ran but did not complete
    #[error("Job '{job}' ended {status} (execution {execution_id}): {description}. Run 'batchflow describe' for step details.")]
    JobFailed {
        job: String,
        execution_id: i64,
        status: String,
        description: String,
    },

    /// People database could not be prepared
    #[error("Database error: {0}. Check the --db path and its permissions.")]
    Database(#[from] rusqlite::Error),

    #[error("File operation failed: {0}. Check file permissions and disk space.")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your BATCH_* and BATCHFLOW_* environment variables.")]
    Config(String),
}

impl CliError {
    pub fn config(msg: impl Into<String>) -> Self {
        CliError::Config(msg.into())
    }
}
