//! Batchflow CLI - Main entry point

use batchflow_cli::{Cli, Commands, Config};
use batchflow_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // .env values never override variables already set
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("batchflow")
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .log_file_prefix("batchflow")
            .build()
    };

    // LOG_* variables take precedence over the flags
    let log_config = match log_config.clone().overlay_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: ignoring logging environment: {e:#}");
            log_config
        }
    };

    // The CLI works without logging
    let guard = init_logging(&log_config).ok();

    let result = execute_command(&cli).await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        drop(guard);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli) -> batchflow_cli::Result<()> {
    let config = Config::from_env()?.with_repository(cli.repository.as_deref());

    match &cli.command {
        Commands::Run {
            input,
            output,
            db,
            params,
            fail_on,
            throttle_limit,
        } => {
            let options = batchflow_cli::commands::run::RunOptions {
                input: input.clone(),
                output: output.clone(),
                database: db.clone(),
                params: params.clone(),
                fail_on: *fail_on,
                throttle_limit: *throttle_limit,
            };
            batchflow_cli::commands::run::run(config, options).await
        }

        Commands::Describe { job, format } => {
            batchflow_cli::commands::describe::run(config, job, format).await
        }

        Commands::Stop { execution_id } => {
            batchflow_cli::commands::stop::run(config, *execution_id).await
        }
    }
}
