//! End-to-end tests for the batchflow binary
//!
//! Every test works in its own temp directory with a SQLite repository, so
//! `describe` and `stop` see what an earlier `run` left behind.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SAMPLE: &str = "Jill,Doe\nJoe,Doe\nJustin,Doe\nJane,Doe\nJohn,Doe\nZoe,Smith\nZack,Miller\n";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sample-data.csv"), SAMPLE).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn repository(&self) -> String {
        self.path("repository.db").display().to_string()
    }

    /// `batchflow` with a clean environment pointing at this workspace
    fn batchflow(&self) -> Command {
        let mut cmd = Command::cargo_bin("batchflow").unwrap();
        cmd.current_dir(self.dir.path());
        for key in [
            "BATCH_REPOSITORY",
            "BATCH_CHUNK_SIZE",
            "BATCH_THROTTLE_LIMIT",
            "BATCH_STOP_POLL",
            "BATCHFLOW_INPUT",
            "BATCHFLOW_OUTPUT",
            "BATCHFLOW_DB",
            "LOG_LEVEL",
            "LOG_OUTPUT",
            "LOG_FILTER",
            "RUST_LOG",
        ] {
            cmd.env_remove(key);
        }
        cmd.arg("--repository").arg(self.repository());
        cmd
    }

    fn run(&self, extra: &[&str]) -> Command {
        let mut cmd = self.batchflow();
        cmd.arg("run")
            .arg("--input")
            .arg(self.path("sample-data.csv"))
            .arg("--output")
            .arg(self.path("out/output.txt"))
            .arg("--db")
            .arg(self.path("people.db"))
            .args(extra);
        cmd
    }

    fn output(&self) -> String {
        read(&self.path("out/output.txt"))
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ============================================================================
// Run
// ============================================================================

#[test]
fn test_run_exports_upper_cased_people() {
    let ws = Workspace::new();

    ws.run(&["--throttle-limit", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMPLETED"))
        .stdout(predicate::str::contains("step02_DB_to_DB_02"));

    assert_eq!(
        ws.output(),
        "omitted\r\nJILL,Doe\r\nJOE,Doe\r\nJUSTIN,Doe\r\nJANE,Doe\r\nJOHN,Doe\r\nZOE,Smith\r\nZACK,Miller\r\n"
    );
}

#[test]
fn test_run_twice_uses_incremented_run_id() {
    let ws = Workspace::new();

    ws.run(&[]).assert().success();
    ws.run(&[])
        .assert()
        .success()
        .stdout(predicate::str::contains("run.id=2"));
}

#[test]
fn test_injected_failure_exits_non_zero() {
    let ws = Workspace::new();

    ws.run(&["--fail-on", "1"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("Job 'importUserJob' ended FAILED"))
        .stderr(predicate::str::contains("splitFlow02_DB_to_DB"));

    ws.batchflow()
        .args(["describe", "--format", "html"])
        .assert()
        .success()
        .stdout(predicate::str::contains("jobBatchStatus:FAILED<br>"))
        .stdout(predicate::str::contains("\tstepName:step01_CSV_to_DB<br>"))
        .stdout(predicate::str::contains("stepName:step03_DB_to_CSV").not());
}

#[test]
fn test_malformed_param_is_rejected_before_running() {
    let ws = Workspace::new();

    ws.run(&["--param", "opdate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));

    assert!(!ws.path("out/output.txt").exists());
}

#[test]
fn test_missing_input_fails_the_import_step() {
    let ws = Workspace::new();
    std::fs::remove_file(ws.path("sample-data.csv")).unwrap();

    ws.run(&[])
        .assert()
        .failure()
        .stderr(predicate::str::contains("step01_CSV_to_DB"));
}

// ============================================================================
// Describe
// ============================================================================

#[test]
fn test_describe_without_executions() {
    let ws = Workspace::new();

    ws.batchflow()
        .arg("describe")
        .assert()
        .success()
        .stdout(predicate::str::contains("No executions of job 'importUserJob'"));
}

#[test]
fn test_describe_json_reports_step_counters() {
    let ws = Workspace::new();
    ws.run(&[]).assert().success();

    let output = ws
        .batchflow()
        .args(["describe", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["jobName"], "importUserJob");
    assert_eq!(report["jobBatchStatus"], "COMPLETED");
    assert_eq!(report["jobExitCode"], "COMPLETED");

    let steps = report["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 4);
    let import = steps
        .iter()
        .find(|s| s["stepName"] == "step01_CSV_to_DB")
        .unwrap();
    assert_eq!(import["readCount"], 7);
    assert_eq!(import["writeCount"], 7);
    assert_eq!(import["commitCount"], 4);
    assert_eq!(import["skipCount"], 0);
}

#[test]
fn test_describe_rejects_unknown_format() {
    let ws = Workspace::new();

    ws.batchflow()
        .args(["describe", "--format", "xml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown report format 'xml'"));
}

// ============================================================================
// Stop
// ============================================================================

#[test]
fn test_stop_unknown_execution() {
    let ws = Workspace::new();

    ws.batchflow()
        .args(["stop", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No job execution with id 42"));
}

#[test]
fn test_stop_finished_execution_is_rejected() {
    let ws = Workspace::new();
    ws.run(&[]).assert().success();

    ws.batchflow()
        .args(["stop", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job execution 1 is not running"));
}
