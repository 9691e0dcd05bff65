//! Execution lifecycle status shared by job and step executions.

use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or step execution
///
/// `STARTING -> STARTED -> {COMPLETED | FAILED | STOPPED}`; the last three are
/// terminal and never left again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Starting,
    Started,
    Completed,
    Failed,
    Stopped,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Stopped => "STOPPED",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, BatchStatus::Starting | BatchStatus::Started)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    /// Re-saving the same status is allowed (counter updates).
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Starting, _) => true,
            (Started, Completed | Failed | Stopped) => true,
            _ => false,
        }
    }

    pub fn check_transition(&self, next: BatchStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(BatchError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STARTING" => Ok(BatchStatus::Starting),
            "STARTED" => Ok(BatchStatus::Started),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            "STOPPED" => Ok(BatchStatus::Stopped),
            other => Err(BatchError::repository(format!("unknown batch status '{other}'"))),
        }
    }
}

/// Exit code plus free-form description reported for an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub const UNKNOWN: &'static str = "UNKNOWN";
    pub const EXECUTING: &'static str = "EXECUTING";
    pub const COMPLETED: &'static str = "COMPLETED";
    pub const FAILED: &'static str = "FAILED";
    pub const STOPPED: &'static str = "STOPPED";

    pub fn new(code: impl Into<String>) -> Self {
        Self {
            exit_code: code.into(),
            exit_description: String::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<BatchStatus> for ExitStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Starting => ExitStatus::unknown(),
            BatchStatus::Started => ExitStatus::executing(),
            BatchStatus::Completed => ExitStatus::new(Self::COMPLETED),
            BatchStatus::Failed => ExitStatus::new(Self::FAILED),
            BatchStatus::Stopped => ExitStatus::new(Self::STOPPED),
        }
    }
}
