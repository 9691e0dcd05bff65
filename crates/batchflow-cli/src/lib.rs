//! Batchflow CLI Library
//!
//! Command-line front end for the sample `importUserJob`.
//!
//! # Overview
//!
//! - **Run**: import a CSV, upper-case first names in parallel branches and
//!   export the result (`batchflow run`)
//! - **Monitor**: report the latest execution with its step counters
//!   (`batchflow describe`)
//! - **Stop**: ask a running execution to stop (`batchflow stop`)
//!
//! Execution state lives in the repository selected by `--repository` or
//! `BATCH_REPOSITORY`, a SQLite file by default.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod error;
pub mod job;
pub mod people;

// Re-export commonly used types
pub use config::Config;
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Batchflow - chunk-oriented batch jobs
#[derive(Parser, Debug)]
#[command(name = "batchflow")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Job repository: `memory` or a SQLite file (overrides BATCH_REPOSITORY)
    #[arg(long, global = true)]
    pub repository: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run importUserJob: CSV to DB, parallel DB updates, DB to CSV
    Run {
        /// CSV file with `firstName,lastName` records
        #[arg(short, long, env = "BATCHFLOW_INPUT", default_value = config::DEFAULT_INPUT)]
        input: PathBuf,

        /// CSV file written by the export step
        #[arg(short, long, env = "BATCHFLOW_OUTPUT", default_value = config::DEFAULT_OUTPUT)]
        output: PathBuf,

        /// SQLite file holding the people table (reset on every run)
        #[arg(long, env = "BATCHFLOW_DB", default_value = config::DEFAULT_DATABASE)]
        db: PathBuf,

        /// Job parameter as key=value or key(type)=value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Fail the Nth processed item to exercise failure handling
        #[arg(long, value_name = "N")]
        fail_on: Option<usize>,

        /// Workers of the import step (overrides BATCH_THROTTLE_LIMIT)
        #[arg(long, value_name = "N")]
        throttle_limit: Option<usize>,
    },

    /// Show the latest execution of a job
    Describe {
        /// Job name
        #[arg(short, long, default_value = config::JOB_NAME)]
        job: String,

        /// Output format: text, html or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Request a running execution to stop
    Stop {
        /// Job execution id
        execution_id: i64,
    },
}
