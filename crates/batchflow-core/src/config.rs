//! Engine configuration

use batchflow_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ============================================================================
// Engine Configuration Constants
// ============================================================================

/// Default number of items per chunk when a step does not set its own.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Default number of concurrent chunk workers of an async step.
pub const DEFAULT_THROTTLE_LIMIT: usize = 4;

/// Value of `BATCH_REPOSITORY` selecting the in-memory store.
pub const IN_MEMORY_REPOSITORY: &str = "memory";

/// Where execution state is kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryConfig {
    InMemory,
    Sqlite { path: PathBuf },
}

impl RepositoryConfig {
    /// `memory` selects the in-memory store, anything else is a SQLite file.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case(IN_MEMORY_REPOSITORY) {
            RepositoryConfig::InMemory
        } else {
            RepositoryConfig::Sqlite {
                path: PathBuf::from(raw),
            }
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub default_chunk_size: usize,
    pub throttle_limit: usize,
    pub repository: RepositoryConfig,
    /// Poll the repository for stop requests between chunks
    pub stop_poll_between_chunks: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: DEFAULT_CHUNK_SIZE,
            throttle_limit: DEFAULT_THROTTLE_LIMIT,
            repository: RepositoryConfig::InMemory,
            stop_poll_between_chunks: true,
        }
    }
}

impl BatchConfig {
    /// Defaults overlaid with `BATCH_*` environment variables
    ///
    /// - `BATCH_CHUNK_SIZE`
    /// - `BATCH_THROTTLE_LIMIT`
    /// - `BATCH_REPOSITORY`: `memory` or a SQLite file path
    /// - `BATCH_STOP_POLL`: boolean
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = BatchConfig {
            default_chunk_size: env::parse_or("BATCH_CHUNK_SIZE", defaults.default_chunk_size)?,
            throttle_limit: env::parse_or("BATCH_THROTTLE_LIMIT", defaults.throttle_limit)?,
            repository: env::var("BATCH_REPOSITORY")
                .map(|raw| RepositoryConfig::parse(&raw))
                .unwrap_or(defaults.repository),
            stop_poll_between_chunks: env::flag(
                "BATCH_STOP_POLL",
                defaults.stop_poll_between_chunks,
            )?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_chunk_size == 0 {
            anyhow::bail!("Chunk size must be at least 1");
        }

        if self.throttle_limit == 0 {
            anyhow::bail!("Throttle limit must be at least 1");
        }

        if let RepositoryConfig::Sqlite { path } = &self.repository {
            if path.as_os_str().is_empty() {
                anyhow::bail!("SQLite repository path cannot be empty");
            }
        }

        Ok(())
    }
}
