use super::{check_relaunch, check_step_update, schema, JobRepository};
use crate::domain::{JobExecution, JobInstance, StepCounters, StepExecution};
use crate::error::{BatchError, Result};
use crate::params::{JobParameter, JobParameters};
use crate::status::{BatchStatus, ExitStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const EXECUTION_COLUMNS: &str = "e.id, e.status, e.exit_code, e.exit_description, e.create_time, \
     e.start_time, e.end_time, e.last_updated, i.id, i.job_name, i.job_key";

const STEP_COLUMNS: &str = "id, job_execution_id, step_name, status, exit_code, exit_description, \
     start_time, end_time, last_updated, read_count, write_count, filter_count, read_skip_count, \
     process_skip_count, write_skip_count, commit_count, rollback_count";

/// [`JobRepository`] persisted in a SQLite database
pub struct SqliteJobRepository {
    db: Arc<Mutex<Connection>>,
}

impl SqliteJobRepository {
    /// Opens (or creates) the database at `path` and initializes the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| BatchError::repository(format!("Failed to acquire database lock: {e}")))
    }
}

fn ts(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|v| v.to_rfc3339())
}

fn parse_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    })
    .transpose()
}

fn parse_status(raw: String) -> rusqlite::Result<BatchStatus> {
    raw.parse().map_err(|e: BatchError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn row_to_instance(row: &Row<'_>, offset: usize) -> rusqlite::Result<JobInstance> {
    Ok(JobInstance {
        id: row.get(offset)?,
        job_name: row.get(offset + 1)?,
        job_key: row.get(offset + 2)?,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<JobExecution> {
    let create_time = parse_ts(Some(row.get(4)?))?.unwrap_or_else(Utc::now);
    Ok(JobExecution {
        id: row.get(0)?,
        instance: row_to_instance(row, 8)?,
        parameters: JobParameters::new(),
        status: parse_status(row.get(1)?)?,
        exit_status: ExitStatus {
            exit_code: row.get(2)?,
            exit_description: row.get(3)?,
        },
        create_time,
        start_time: parse_ts(row.get(5)?)?,
        end_time: parse_ts(row.get(6)?)?,
        last_updated: parse_ts(row.get(7)?)?,
        step_executions: Vec::new(),
    })
}

fn row_to_step(row: &Row<'_>) -> rusqlite::Result<StepExecution> {
    let counter = |idx: usize| -> rusqlite::Result<u64> {
        row.get::<_, i64>(idx).map(|v| u64::try_from(v).unwrap_or(0))
    };
    Ok(StepExecution {
        id: row.get(0)?,
        job_execution_id: row.get(1)?,
        step_name: row.get(2)?,
        status: parse_status(row.get(3)?)?,
        exit_status: ExitStatus {
            exit_code: row.get(4)?,
            exit_description: row.get(5)?,
        },
        start_time: parse_ts(row.get(6)?)?,
        end_time: parse_ts(row.get(7)?)?,
        last_updated: parse_ts(row.get(8)?)?,
        counters: StepCounters {
            read_count: counter(9)?,
            write_count: counter(10)?,
            filter_count: counter(11)?,
            read_skip_count: counter(12)?,
            process_skip_count: counter(13)?,
            write_skip_count: counter(14)?,
            commit_count: counter(15)?,
            rollback_count: counter(16)?,
        },
    })
}

fn find_instance(conn: &Connection, job_name: &str, job_key: &str) -> Result<Option<JobInstance>> {
    Ok(conn
        .query_row(
            "SELECT id, job_name, job_key FROM batch_job_instance WHERE job_name = ?1 AND job_key = ?2",
            params![job_name, job_key],
            |row| row_to_instance(row, 0),
        )
        .optional()?)
}

fn insert_instance(conn: &Connection, job_name: &str, job_key: &str) -> Result<JobInstance> {
    conn.execute(
        "INSERT INTO batch_job_instance (job_name, job_key) VALUES (?1, ?2)",
        params![job_name, job_key],
    )?;
    Ok(JobInstance {
        id: conn.last_insert_rowid(),
        job_name: job_name.to_string(),
        job_key: job_key.to_string(),
    })
}

fn insert_execution(
    conn: &Connection,
    instance: &JobInstance,
    parameters: &JobParameters,
) -> Result<JobExecution> {
    let mut execution = JobExecution::new(0, instance.clone(), parameters.clone());
    conn.execute(
        r#"
        INSERT INTO batch_job_execution (
            job_instance_id, status, exit_code, exit_description, create_time, last_updated
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            instance.id,
            execution.status.as_str(),
            execution.exit_status.exit_code,
            execution.exit_status.exit_description,
            execution.create_time.to_rfc3339(),
            ts(execution.last_updated),
        ],
    )?;
    execution.id = conn.last_insert_rowid();

    let mut stmt = conn.prepare_cached(
        "INSERT INTO batch_job_execution_params (job_execution_id, key_name, type_name, value) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (key, value) in parameters.iter() {
        stmt.execute(params![
            execution.id,
            key,
            value.type_name(),
            serde_json::to_string(value)?
        ])?;
    }
    Ok(execution)
}

fn load_parameters(conn: &Connection, execution_id: i64) -> Result<JobParameters> {
    let mut stmt = conn.prepare_cached(
        "SELECT key_name, value FROM batch_job_execution_params WHERE job_execution_id = ?1",
    )?;
    let rows = stmt.query_map([execution_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut builder = JobParameters::builder();
    for row in rows {
        let (key, raw) = row?;
        let value: JobParameter = serde_json::from_str(&raw)?;
        builder = builder.add(key, value);
    }
    Ok(builder.build())
}

fn load_steps(conn: &Connection, execution_id: i64) -> Result<Vec<StepExecution>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {STEP_COLUMNS} FROM batch_step_execution WHERE job_execution_id = ?1 ORDER BY id"
    ))?;
    let steps = stmt
        .query_map([execution_id], row_to_step)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(steps)
}

/// Executions matching `filter` (a WHERE clause over `e`/`i`), fully loaded.
fn load_executions(
    conn: &Connection,
    filter: &str,
    arg: i64,
) -> Result<Vec<JobExecution>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM batch_job_execution e \
         JOIN batch_job_instance i ON i.id = e.job_instance_id \
         WHERE {filter} ORDER BY e.id"
    ))?;
    let executions = stmt
        .query_map([arg], row_to_execution)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    executions
        .into_iter()
        .map(|mut execution| -> Result<JobExecution> {
            execution.parameters = load_parameters(conn, execution.id)?;
            execution.step_executions = load_steps(conn, execution.id)?;
            Ok(execution)
        })
        .collect()
}

fn load_step(conn: &Connection, step_id: i64) -> Result<Option<StepExecution>> {
    Ok(conn
        .query_row(
            &format!("SELECT {STEP_COLUMNS} FROM batch_step_execution WHERE id = ?1"),
            [step_id],
            row_to_step,
        )
        .optional()?)
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn find_instance(&self, job_name: &str, job_key: &str) -> Result<Option<JobInstance>> {
        find_instance(&*self.lock()?, job_name, job_key)
    }

    async fn find_or_create_instance(&self, job_name: &str, job_key: &str) -> Result<JobInstance> {
        let conn = self.lock()?;
        match find_instance(&conn, job_name, job_key)? {
            Some(instance) => Ok(instance),
            None => insert_instance(&conn, job_name, job_key),
        }
    }

    async fn last_instance(&self, job_name: &str) -> Result<Option<JobInstance>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT id, job_name, job_key FROM batch_job_instance \
                 WHERE job_name = ?1 ORDER BY id DESC LIMIT 1",
                [job_name],
                |row| row_to_instance(row, 0),
            )
            .optional()?)
    }

    async fn last_execution(&self, instance_id: i64) -> Result<Option<JobExecution>> {
        let conn = self.lock()?;
        Ok(load_executions(&conn, "i.id = ?1", instance_id)?.pop())
    }

    async fn find_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>> {
        let conn = self.lock()?;
        load_executions(&conn, "i.id = ?1", instance_id)
    }

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let known = tx
            .query_row(
                "SELECT 1 FROM batch_job_instance WHERE id = ?1",
                [instance.id],
                |_| Ok(()),
            )
            .optional()?;
        if known.is_none() {
            return Err(BatchError::repository(format!(
                "unknown job instance {}",
                instance.id
            )));
        }
        let execution = insert_execution(&tx, instance, parameters)?;
        tx.commit()?;
        Ok(execution)
    }

    async fn create_job_execution(
        &self,
        job_name: &str,
        job_key: &str,
        parameters: &JobParameters,
        restartable: bool,
    ) -> Result<JobExecution> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let instance = match find_instance(&tx, job_name, job_key)? {
            Some(instance) => {
                let history = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT id, status FROM batch_job_execution WHERE job_instance_id = ?1 ORDER BY id",
                    )?;
                    let rows = stmt.query_map([instance.id], |row| {
                        Ok((row.get::<_, i64>(0)?, parse_status(row.get(1)?)?))
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                check_relaunch(&instance, &history, restartable)?;
                instance
            },
            None => insert_instance(&tx, job_name, job_key)?,
        };
        let execution = insert_execution(&tx, &instance, parameters)?;
        tx.commit()?;
        Ok(execution)
    }

    async fn update_execution(&self, execution: &JobExecution) -> Result<()> {
        let conn = self.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT status FROM batch_job_execution WHERE id = ?1",
                [execution.id],
                |row| row.get(0),
            )
            .optional()?;
        let stored: BatchStatus = stored
            .ok_or(BatchError::NoSuchExecution(execution.id))?
            .parse()?;
        stored.check_transition(execution.status)?;

        conn.execute(
            r#"
            UPDATE batch_job_execution
            SET status = ?1, exit_code = ?2, exit_description = ?3,
                start_time = ?4, end_time = ?5, last_updated = ?6
            WHERE id = ?7
            "#,
            params![
                execution.status.as_str(),
                execution.exit_status.exit_code,
                execution.exit_status.exit_description,
                ts(execution.start_time),
                ts(execution.end_time),
                ts(execution.last_updated),
                execution.id,
            ],
        )?;
        Ok(())
    }

    async fn get_execution(&self, execution_id: i64) -> Result<Option<JobExecution>> {
        let conn = self.lock()?;
        Ok(load_executions(&conn, "e.id = ?1", execution_id)?.pop())
    }

    async fn add_step_execution(
        &self,
        job_execution_id: i64,
        step_name: &str,
    ) -> Result<StepExecution> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM batch_job_execution WHERE id = ?1",
                [job_execution_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(BatchError::NoSuchExecution(job_execution_id));
        }

        let mut step = StepExecution::new(0, job_execution_id, step_name);
        conn.execute(
            r#"
            INSERT INTO batch_step_execution (
                job_execution_id, step_name, status, exit_code, exit_description, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                job_execution_id,
                step.step_name,
                step.status.as_str(),
                step.exit_status.exit_code,
                step.exit_status.exit_description,
                ts(step.last_updated),
            ],
        )?;
        step.id = conn.last_insert_rowid();
        Ok(step)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> Result<()> {
        let conn = self.lock()?;
        let stored = load_step(&conn, step.id)?.ok_or_else(|| {
            BatchError::repository(format!("unknown step execution {}", step.id))
        })?;
        check_step_update(&stored, step)?;

        let c = step.counters();
        conn.execute(
            r#"
            UPDATE batch_step_execution
            SET status = ?1, exit_code = ?2, exit_description = ?3,
                start_time = ?4, end_time = ?5, last_updated = ?6,
                read_count = ?7, write_count = ?8, filter_count = ?9,
                read_skip_count = ?10, process_skip_count = ?11, write_skip_count = ?12,
                commit_count = ?13, rollback_count = ?14
            WHERE id = ?15
            "#,
            params![
                step.status.as_str(),
                step.exit_status.exit_code,
                step.exit_status.exit_description,
                ts(step.start_time),
                ts(step.end_time),
                ts(step.last_updated),
                count(c.read_count),
                count(c.write_count),
                count(c.filter_count),
                count(c.read_skip_count),
                count(c.process_skip_count),
                count(c.write_skip_count),
                count(c.commit_count),
                count(c.rollback_count),
                step.id,
            ],
        )?;
        Ok(())
    }

    async fn last_step_execution(
        &self,
        instance_id: i64,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let conn = self.lock()?;
        let columns = STEP_COLUMNS
            .split(", ")
            .map(|c| format!("s.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(conn
            .query_row(
                &format!(
                    "SELECT {columns} FROM batch_step_execution s \
                     JOIN batch_job_execution e ON e.id = s.job_execution_id \
                     WHERE e.job_instance_id = ?1 AND s.step_name = ?2 \
                     ORDER BY s.id DESC LIMIT 1"
                ),
                params![instance_id, step_name],
                row_to_step,
            )
            .optional()?)
    }

    async fn request_stop(&self, execution_id: i64) -> Result<()> {
        let conn = self.lock()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM batch_job_execution WHERE id = ?1",
                [execution_id],
                |row| row.get(0),
            )
            .optional()?;
        let status: BatchStatus = status
            .ok_or(BatchError::NoSuchExecution(execution_id))?
            .parse()?;
        if !status.is_running() {
            return Err(BatchError::JobExecutionNotRunning(execution_id));
        }
        conn.execute(
            "UPDATE batch_job_execution SET stop_requested = 1 WHERE id = ?1",
            [execution_id],
        )?;
        Ok(())
    }

    async fn is_stop_requested(&self, execution_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let flag: Option<bool> = conn
            .query_row(
                "SELECT stop_requested FROM batch_job_execution WHERE id = ?1",
                [execution_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    async fn job_names(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT job_name FROM batch_job_instance ORDER BY job_name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}
