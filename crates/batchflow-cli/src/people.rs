//! The `people` records moved around by `importUserJob`.
//!
//! Holds the record type, its SQLite table and statements, the processor that
//! upper-cases first names and the listeners wired into the job.

use crate::error::Result;
use async_trait::async_trait;
use batchflow_core::fault::FaultInjector;
use batchflow_core::item::sqlite::SharedConnection;
use batchflow_core::item::{ItemListener, ItemProcessor};
use batchflow_core::{BatchStatus, JobExecution, JobExecutionListener};
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Recreates the table, so every run starts from an empty `people` table.
pub const SCHEMA: &str = r#"
    DROP TABLE IF EXISTS people;
    CREATE TABLE people (
        person_id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL
    );
"#;

pub const INSERT_PERSON: &str = "INSERT INTO people (first_name, last_name) VALUES (?1, ?2)";

pub const SAVE_PERSON: &str =
    "UPDATE people SET first_name = ?1, last_name = ?2 WHERE person_id = ?3";

pub const FIND_ALL_PEOPLE: &str =
    "SELECT person_id, first_name, last_name FROM people ORDER BY person_id";

/// People whose first name contains the bound letter (case-sensitive).
pub const FIND_PEOPLE_BY_NAME: &str = "SELECT person_id, first_name, last_name FROM people \
     WHERE instr(first_name, ?1) > 0 ORDER BY person_id";

/// One row of `people`. Records read from CSV carry no id yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(skip)]
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
}

impl Person {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            first_name: row.get(1)?,
            last_name: row.get(2)?,
        })
    }

    pub fn insert_params(&self) -> Vec<Value> {
        vec![
            Value::Text(self.first_name.clone()),
            Value::Text(self.last_name.clone()),
        ]
    }

    /// Without an id the update matches no row and fails the batch.
    pub fn update_params(&self) -> Vec<Value> {
        vec![
            Value::Text(self.first_name.clone()),
            Value::Text(self.last_name.clone()),
            self.id.map_or(Value::Null, Value::Integer),
        ]
    }

    pub fn csv_fields(&self) -> Vec<String> {
        vec![self.first_name.clone(), self.last_name.clone()]
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "firstName: {}, lastName: {}", self.first_name, self.last_name)
    }
}

/// Opens (creating if needed) the people database and resets its table.
pub fn open_database(path: &Path) -> Result<SharedConnection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Every stored person in id order.
pub fn find_all(conn: &SharedConnection) -> anyhow::Result<Vec<Person>> {
    let conn = conn
        .lock()
        .map_err(|_| anyhow::anyhow!("people connection lock poisoned"))?;
    let mut stmt = conn.prepare(FIND_ALL_PEOPLE)?;
    let people = stmt
        .query_map([], Person::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(people)
}

/// Upper-cases the first name and keeps the last name as is.
pub struct PersonItemProcessor {
    faults: Arc<dyn FaultInjector>,
}

impl PersonItemProcessor {
    pub fn new(faults: Arc<dyn FaultInjector>) -> Self {
        Self { faults }
    }
}

#[async_trait]
impl ItemProcessor<Person, Person> for PersonItemProcessor {
    async fn process(&self, person: &Person) -> anyhow::Result<Option<Person>> {
        let transformed = Person {
            id: person.id,
            first_name: person.first_name.to_uppercase(),
            last_name: person.last_name.clone(),
        };
        info!("Converting ({person}) into ({transformed})");
        self.faults.check()?;
        Ok(Some(transformed))
    }
}

/// Logs the record behind every item failure so it can be found again.
#[derive(Debug, Default, Clone, Copy)]
pub struct PersonItemListener;

impl ItemListener<Person, Person> for PersonItemListener {
    fn on_read_error(&self, err: &anyhow::Error) {
        error!(error = %format!("{err:#}"), "Failed to read person");
    }

    fn on_process_error(&self, person: &Person, err: &anyhow::Error) {
        error!(person = %person, error = %format!("{err:#}"), "Failed to process person");
    }

    fn on_write_error(&self, people: &[Person], err: &anyhow::Error) {
        for person in people {
            error!(person = %person, error = %format!("{err:#}"), "Failed to write person");
        }
    }
}

/// Lists the stored people once the job has COMPLETED.
pub struct CompletionNotificationListener {
    conn: SharedConnection,
}

impl CompletionNotificationListener {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl JobExecutionListener for CompletionNotificationListener {
    fn after_job(&self, execution: &JobExecution) -> anyhow::Result<()> {
        if execution.status != BatchStatus::Completed {
            return Ok(());
        }
        info!(job_execution_id = execution.id, "Job finished, verifying the results");
        for person in find_all(&self.conn)? {
            info!("Found <{person}> in the database");
        }
        Ok(())
    }
}
