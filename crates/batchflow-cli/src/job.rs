//! Definition of `importUserJob`.
//!
//! 1. `step01_CSV_to_DB` imports the CSV into `people` with several workers
//!    sharing one synchronized reader.
//! 2. `splitFlow02_DB_to_DB` upper-cases first names in two parallel branches,
//!    one for names containing `J` and one for names containing `Z`.
//! 3. `step03_DB_to_CSV` exports every person to the output CSV.

use crate::config::JOB_NAME;
use crate::people::{
    CompletionNotificationListener, Person, PersonItemListener, PersonItemProcessor,
    FIND_ALL_PEOPLE, FIND_PEOPLE_BY_NAME, INSERT_PERSON, SAVE_PERSON,
};
use batchflow_core::fault::FaultInjector;
use batchflow_core::item::sqlite::SharedConnection;
use batchflow_core::item::{CsvItemReader, CsvItemWriter, SqliteItemReader, SqliteItemWriter};
use batchflow_core::{ChunkStep, ChunkStepBuilder, FlowBuilder, Job, JobBuilder, Result, RunIdIncrementer};
use rusqlite::types::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Header line written once at the top of the exported CSV.
pub const OUTPUT_HEADER: &str = "omitted";

/// Files and worker count of one `importUserJob` definition
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Workers of `step01_CSV_to_DB`
    pub throttle_limit: usize,
}

/// Builds `importUserJob` over the people database `conn`.
///
/// `faults` is shared by the processors of both split branches.
pub fn import_user_job(
    settings: &ImportSettings,
    conn: SharedConnection,
    faults: Arc<dyn FaultInjector>,
) -> Result<Job> {
    let import = csv_to_db(settings, Arc::clone(&conn))?;

    let names_with_j = FlowBuilder::new("flow02_DB_to_DB_01")
        .start(db_to_db("step02_DB_to_DB_01", "J", &conn, &faults)?)
        .build()?;
    let names_with_z = FlowBuilder::new("flow02_DB_to_DB_02")
        .start(db_to_db("step02_DB_to_DB_02", "Z", &conn, &faults)?)
        .build()?;

    let export = db_to_csv(settings, Arc::clone(&conn))?;

    JobBuilder::new(JOB_NAME)
        .incrementer(RunIdIncrementer::new())
        .listener(CompletionNotificationListener::new(conn))
        .start(import)
        .split("splitFlow02_DB_to_DB", vec![names_with_j, names_with_z])
        .next(export)
        .build()
}

fn csv_to_db(settings: &ImportSettings, conn: SharedConnection) -> Result<ChunkStep<Person, Person>> {
    ChunkStepBuilder::new("step01_CSV_to_DB", 2)
        .synchronized_reader(
            CsvItemReader::<Person>::new(&settings.input).names(["firstName", "lastName"]),
        )
        .writer(SqliteItemWriter::new(conn, INSERT_PERSON, Person::insert_params))
        .throttle_limit(settings.throttle_limit)
        .build()
}

fn db_to_db(
    name: &str,
    letter: &str,
    conn: &SharedConnection,
    faults: &Arc<dyn FaultInjector>,
) -> Result<ChunkStep<Person, Person>> {
    let reader = SqliteItemReader::new(Arc::clone(conn), FIND_PEOPLE_BY_NAME, Person::from_row)
        .params([Value::Text(letter.to_string())]);

    ChunkStepBuilder::new(name, 3)
        .reader(reader)
        .processor(PersonItemProcessor::new(Arc::clone(faults)))
        .writer(SqliteItemWriter::new(Arc::clone(conn), SAVE_PERSON, Person::update_params))
        .item_listener(PersonItemListener)
        .build()
}

fn db_to_csv(settings: &ImportSettings, conn: SharedConnection) -> Result<ChunkStep<Person, Person>> {
    ChunkStepBuilder::new("step03_DB_to_CSV", 2)
        .reader(SqliteItemReader::new(conn, FIND_ALL_PEOPLE, Person::from_row))
        .writer(CsvItemWriter::new(&settings.output, Person::csv_fields).header_line(OUTPUT_HEADER))
        .build()
}
