//! SQLite schema for the job repository

use crate::error::Result;
use rusqlite::Connection;

/// Initialize job repository schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS batch_job_instance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_name TEXT NOT NULL,
            job_key TEXT NOT NULL,
            UNIQUE(job_name, job_key)
        );

        CREATE TABLE IF NOT EXISTS batch_job_execution (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_instance_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            exit_code TEXT NOT NULL,
            exit_description TEXT NOT NULL DEFAULT '',
            create_time TEXT NOT NULL,
            start_time TEXT,
            end_time TEXT,
            last_updated TEXT,
            stop_requested INTEGER NOT NULL DEFAULT 0,

            FOREIGN KEY(job_instance_id) REFERENCES batch_job_instance(id)
        );

        -- One row per launch parameter; value holds the JSON of the typed value
        CREATE TABLE IF NOT EXISTS batch_job_execution_params (
            job_execution_id INTEGER NOT NULL,
            key_name TEXT NOT NULL,
            type_name TEXT NOT NULL,
            value TEXT NOT NULL,

            PRIMARY KEY(job_execution_id, key_name),
            FOREIGN KEY(job_execution_id) REFERENCES batch_job_execution(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS batch_step_execution (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_execution_id INTEGER NOT NULL,
            step_name TEXT NOT NULL,
            status TEXT NOT NULL,
            exit_code TEXT NOT NULL,
            exit_description TEXT NOT NULL DEFAULT '',
            start_time TEXT,
            end_time TEXT,
            last_updated TEXT,
            read_count INTEGER NOT NULL DEFAULT 0,
            write_count INTEGER NOT NULL DEFAULT 0,
            filter_count INTEGER NOT NULL DEFAULT 0,
            read_skip_count INTEGER NOT NULL DEFAULT 0,
            process_skip_count INTEGER NOT NULL DEFAULT 0,
            write_skip_count INTEGER NOT NULL DEFAULT 0,
            commit_count INTEGER NOT NULL DEFAULT 0,
            rollback_count INTEGER NOT NULL DEFAULT 0,

            FOREIGN KEY(job_execution_id) REFERENCES batch_job_execution(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_job_instance_name
            ON batch_job_instance(job_name);
        CREATE INDEX IF NOT EXISTS idx_job_execution_instance
            ON batch_job_execution(job_instance_id);
        CREATE INDEX IF NOT EXISTS idx_step_execution_job
            ON batch_step_execution(job_execution_id, step_name);
        "#,
    )?;

    Ok(())
}
