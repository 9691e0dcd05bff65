//! importUserJob end to end through the library, on an in-memory repository

use anyhow::Result;
use batchflow_cli::commands::run::launch_parameters;
use batchflow_cli::config::JOB_NAME;
use batchflow_cli::job::{import_user_job, ImportSettings};
use batchflow_cli::people::{self, Person};
use batchflow_core::fault::{FailOnNthCall, FaultInjector, NoFaults};
use batchflow_core::item::sqlite::SharedConnection;
use batchflow_core::{
    BatchStatus, InMemoryJobRepository, JobExecution, JobLauncher, JobParameter, JobRegistry,
    JobRepository, StepExecution, RUN_ID_KEY,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SAMPLE: &str = "Jill,Doe\nJoe,Doe\nJustin,Doe\nJane,Doe\nJohn,Doe\nZoe,Smith\nZack,Miller\n";

const EXPECTED_OUTPUT: &str =
    "omitted\r\nJILL,Doe\r\nJOE,Doe\r\nJUSTIN,Doe\r\nJANE,Doe\r\nJOHN,Doe\r\nZOE,Smith\r\nZACK,Miller\r\n";

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,batchflow_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

struct Fixture {
    dir: TempDir,
    conn: SharedConnection,
    launcher: JobLauncher,
}

impl Fixture {
    fn new(throttle_limit: usize, faults: Arc<dyn FaultInjector>) -> Result<Self> {
        init_tracing();
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join("sample-data.csv"), SAMPLE)?;
        let settings = ImportSettings {
            input: dir.path().join("sample-data.csv"),
            output: dir.path().join("output.txt"),
            throttle_limit,
        };
        let conn = people::open_database(&dir.path().join("people.db"))?;

        let mut registry = JobRegistry::new();
        registry.register(import_user_job(&settings, Arc::clone(&conn), faults)?)?;
        let repository: Arc<dyn JobRepository> = Arc::new(InMemoryJobRepository::new());
        Ok(Self {
            dir,
            conn,
            launcher: JobLauncher::new(registry, repository),
        })
    }

    async fn run(&self) -> Result<JobExecution> {
        Ok(self.launcher.run(JOB_NAME, launch_parameters(&[])?).await?)
    }

    fn output(&self) -> Result<String> {
        Ok(std::fs::read_to_string(self.dir.path().join("output.txt"))?)
    }

    fn output_path(&self) -> &Path {
        self.dir.path()
    }

    fn first_names(&self) -> Result<Vec<String>> {
        Ok(people::find_all(&self.conn)?
            .into_iter()
            .map(|p: Person| p.first_name)
            .collect())
    }
}

fn step<'a>(execution: &'a JobExecution, name: &str) -> &'a StepExecution {
    execution
        .step_execution(name)
        .unwrap_or_else(|| panic!("no step execution named {name}"))
}

fn counts(step: &StepExecution) -> (u64, u64, u64, u64) {
    (
        step.read_count(),
        step.write_count(),
        step.commit_count(),
        step.rollback_count(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_run_exports_in_source_order() -> Result<()> {
    let fixture = Fixture::new(1, Arc::new(NoFaults))?;
    let execution = fixture.run().await?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(counts(step(&execution, "step01_CSV_to_DB")), (7, 7, 4, 0));
    assert_eq!(counts(step(&execution, "step02_DB_to_DB_01")), (5, 5, 2, 0));
    assert_eq!(counts(step(&execution, "step02_DB_to_DB_02")), (2, 2, 1, 0));
    assert_eq!(counts(step(&execution, "step03_DB_to_CSV")), (7, 7, 4, 0));

    assert_eq!(fixture.output()?, EXPECTED_OUTPUT);
    assert_eq!(
        execution.parameters.get("opdate"),
        Some(&JobParameter::String("20200817".into()))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_import_keeps_every_record() -> Result<()> {
    let fixture = Fixture::new(4, Arc::new(NoFaults))?;
    let execution = fixture.run().await?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(counts(step(&execution, "step01_CSV_to_DB")), (7, 7, 4, 0));

    // chunks of the import may commit in any order
    let mut names = fixture.first_names()?;
    names.sort();
    assert_eq!(names, vec!["JANE", "JILL", "JOE", "JOHN", "JUSTIN", "ZACK", "ZOE"]);

    let output = fixture.output()?;
    let mut lines: Vec<&str> = output.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.remove(0), "omitted");
    assert_eq!(lines.len(), 7);
    assert!(lines.contains(&"ZACK,Miller"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_run_gets_a_new_instance() -> Result<()> {
    let fixture = Fixture::new(2, Arc::new(NoFaults))?;
    let first = fixture.run().await?;
    let second = fixture.run().await?;

    assert_eq!(second.status, BatchStatus::Completed);
    assert_ne!(first.instance.id, second.instance.id);
    assert_eq!(first.parameters.get(RUN_ID_KEY), Some(&JobParameter::Long(1)));
    assert_eq!(second.parameters.get(RUN_ID_KEY), Some(&JobParameter::Long(2)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_branch_failure_fails_job_and_restart_finishes_it() -> Result<()> {
    let fixture = Fixture::new(2, Arc::new(FailOnNthCall::new(1)))?;
    let failed = fixture.run().await?;

    assert_eq!(failed.status, BatchStatus::Failed);
    assert!(
        failed
            .exit_status
            .exit_description
            .starts_with("Split 'splitFlow02_DB_to_DB' failed in branch(es) flow02_DB_to_DB_0"),
        "{}",
        failed.exit_status.exit_description
    );
    assert!(failed.step_execution("step03_DB_to_CSV").is_none());

    let branches = [
        step(&failed, "step02_DB_to_DB_01"),
        step(&failed, "step02_DB_to_DB_02"),
    ];
    let failed_branches: Vec<_> = branches
        .iter()
        .filter(|s| s.status == BatchStatus::Failed)
        .collect();
    assert_eq!(failed_branches.len(), 1);
    assert_eq!(counts(failed_branches[0]), (0, 0, 0, 1));

    // the injector only fails its first call, so the rerun goes through
    let restarted = fixture.launcher.restart(failed.id).await?;
    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.instance.id, failed.instance.id);
    assert!(restarted.step_execution("step01_CSV_to_DB").is_none());
    assert!(restarted.step_execution("step03_DB_to_CSV").is_some());

    let mut names = fixture.first_names()?;
    names.sort();
    assert_eq!(names, vec!["JANE", "JILL", "JOE", "JOHN", "JUSTIN", "ZACK", "ZOE"]);
    assert!(fixture.output_path().join("output.txt").exists());
    Ok(())
}
