//! Batchflow Core
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Chunk-oriented batch execution engine.
//!
//! # Overview
//!
//! - **Jobs**: named flow graphs with an identity derived from their parameters
//! - **Flows**: sequential chains of steps and concurrent splits
//! - **Chunk steps**: read, process and write items in committed chunks,
//!   optionally with several workers sharing one reader
//! - **Repository**: job instances, executions and step counters, in memory or
//!   in SQLite
//! - **Launcher**: identity checks, incrementers, restart and stop
//!
//! # Example
//!
//! ```no_run
//! use batchflow_core::item::{CollectingItemWriter, FnItemProcessor, ListItemReader};
//! use batchflow_core::{
//!     ChunkStepBuilder, InMemoryJobRepository, JobBuilder, JobLauncher, JobParameters,
//!     JobRegistry, RunIdIncrementer,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> batchflow_core::Result<()> {
//! let step = ChunkStepBuilder::new("upperCase", 2)
//!     .reader(ListItemReader::new(vec!["jill".to_string(), "joe".to_string()]))
//!     .processor(FnItemProcessor::new(|name: &String| Ok(Some(name.to_uppercase()))))
//!     .writer(CollectingItemWriter::new())
//!     .build()?;
//!
//! let mut registry = JobRegistry::new();
//! registry.register(
//!     JobBuilder::new("namesJob")
//!         .incrementer(RunIdIncrementer::new())
//!         .start(step)
//!         .build()?,
//! )?;
//!
//! let launcher = JobLauncher::new(registry, Arc::new(InMemoryJobRepository::new()));
//! let execution = launcher.run("namesJob", JobParameters::new()).await?;
//! println!("{}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod error;
pub mod fault;
pub mod flow;
pub mod item;
pub mod job;
pub mod launcher;
pub mod params;
pub mod report;
pub mod repository;
pub mod status;
pub mod step;

pub use config::{BatchConfig, RepositoryConfig};
pub use domain::{JobExecution, JobInstance, StepContribution, StepCounters, StepExecution};
pub use error::{BatchError, ErrorKind, Result};
pub use flow::{Flow, FlowBuilder, FlowNode, Split};
pub use job::{Job, JobBuilder, JobExecutionListener};
pub use launcher::{open_repository, JobHandle, JobLauncher, JobRegistry};
pub use params::{
    DefaultJobParametersValidator, JobParameter, JobParameters, JobParametersIncrementer,
    JobParametersValidator, RunIdIncrementer, RUN_ID_KEY,
};
pub use report::{describe, JobReport, ReportFormat, StepReport};
pub use repository::{InMemoryJobRepository, JobRepository, SqliteJobRepository};
pub use status::{BatchStatus, ExitStatus};
pub use step::{ChunkStep, ChunkStepBuilder, JobScope, Step, StepExecutionHandle, StepExecutionListener};
