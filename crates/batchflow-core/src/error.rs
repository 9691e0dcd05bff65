//! Error types for the batch engine.
//!
//! Item ports (readers, processors, writers, listeners) report failures with
//! `anyhow::Error`; the engine folds those into [`BatchError`] at the step
//! boundary so callers can classify them through [`BatchError::kind`].

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, BatchError>;

#[derive(Error, Debug)]
pub enum BatchError {
    /// Parameters rejected before any execution was created
    #[error("Invalid job parameters: {0}")]
    InvalidParameters(String),

    #[error("A job instance already exists and is complete for job '{job_name}' (instance {instance_id}); change the parameters or attach an incrementer to run it again")]
    JobInstanceAlreadyComplete { job_name: String, instance_id: i64 },

    #[error("A job execution for job '{job_name}' is already running (execution {execution_id})")]
    JobExecutionAlreadyRunning { job_name: String, execution_id: i64 },

    #[error("Job '{job_name}' is not restartable and instance {instance_id} has already been run")]
    JobRestartNotAllowed { job_name: String, instance_id: i64 },

    #[error("Read failed in step '{step}': {message}")]
    Read { step: String, message: String },

    #[error("Process failed in step '{step}': {message}")]
    Process { step: String, message: String },

    #[error("Write failed in step '{step}': {message}")]
    Write { step: String, message: String },

    /// A split finished with at least one failed branch
    #[error("Split '{split}' failed in branch(es) {}", branches.join(", "))]
    BranchFailure {
        split: String,
        branches: Vec<String>,
    },

    #[error("Invalid job definition: {0}")]
    InvalidDefinition(String),

    #[error("No job named '{0}' is registered")]
    NoSuchJob(String),

    #[error("No job execution with id {0}")]
    NoSuchExecution(i64),

    #[error("Job execution {0} is not running")]
    JobExecutionNotRunning(i64),

    /// A spawned job task panicked or was aborted
    #[error("Job task failed: {0}")]
    TaskFailed(String),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Listener callback failure
    #[error("Listener '{hook}' failed: {message}")]
    Listener { hook: &'static str, message: String },

    #[error("Job repository error: {0}")]
    Repository(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`BatchError`] values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    IdentityConflict,
    Read,
    Process,
    Write,
    BranchFailure,
    Definition,
    Storage,
}

impl BatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::InvalidParameters(_) => ErrorKind::Validation,
            BatchError::JobInstanceAlreadyComplete { .. }
            | BatchError::JobExecutionAlreadyRunning { .. }
            | BatchError::JobRestartNotAllowed { .. } => ErrorKind::IdentityConflict,
            BatchError::Read { .. } => ErrorKind::Read,
            BatchError::Process { .. } | BatchError::Listener { .. } => ErrorKind::Process,
            BatchError::Write { .. } => ErrorKind::Write,
            BatchError::BranchFailure { .. } => ErrorKind::BranchFailure,
            BatchError::InvalidDefinition(_)
            | BatchError::NoSuchJob(_)
            | BatchError::NoSuchExecution(_)
            | BatchError::JobExecutionNotRunning(_)
            | BatchError::InvalidTransition { .. } => ErrorKind::Definition,
            BatchError::Repository(_)
            | BatchError::TaskFailed(_)
            | BatchError::Io(_)
            | BatchError::Csv(_)
            | BatchError::Sqlite(_)
            | BatchError::Json(_) => ErrorKind::Storage,
        }
    }

    pub fn is_identity_conflict(&self) -> bool {
        self.kind() == ErrorKind::IdentityConflict
    }

    pub fn read(step: &str, err: anyhow::Error) -> Self {
        BatchError::Read {
            step: step.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn process(step: &str, err: anyhow::Error) -> Self {
        BatchError::Process {
            step: step.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn write(step: &str, err: anyhow::Error) -> Self {
        BatchError::Write {
            step: step.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn listener(hook: &'static str, err: anyhow::Error) -> Self {
        BatchError::Listener {
            hook,
            message: format!("{err:#}"),
        }
    }

    pub fn repository(msg: impl Into<String>) -> Self {
        BatchError::Repository(msg.into())
    }
}
