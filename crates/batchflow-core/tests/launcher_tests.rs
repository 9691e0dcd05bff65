//! Launcher, identity and job lifecycle tests

mod common;

use anyhow::{bail, Result};
use async_trait::async_trait;
use batchflow_core::item::{CollectingItemWriter, ItemProcessor, ItemReader, ListItemReader};
use batchflow_core::{
    describe, BatchError, BatchStatus, ChunkStep, ChunkStepBuilder, DefaultJobParametersValidator,
    ErrorKind, FlowBuilder, JobBuilder, JobExecution, JobExecutionListener, JobParameter,
    JobParameters, ReportFormat, RunIdIncrementer, RUN_ID_KEY,
};
use common::{init_tracing, launcher, step};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Reader that starts over from its source every time it is opened, like a
/// file reader
struct ReplayReader {
    source: Vec<i32>,
    pending: Mutex<VecDeque<i32>>,
}

impl ReplayReader {
    fn new(source: Vec<i32>) -> Self {
        Self {
            source,
            pending: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl ItemReader<i32> for ReplayReader {
    async fn open(&self) -> Result<()> {
        *self.pending.lock().unwrap() = self.source.iter().copied().collect();
        Ok(())
    }

    async fn read(&self) -> Result<Option<i32>> {
        Ok(self.pending.lock().unwrap().pop_front())
    }
}

/// Fails every item while `broken` is set
struct SwitchableProcessor {
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl ItemProcessor<i32, i32> for SwitchableProcessor {
    async fn process(&self, item: &i32) -> Result<Option<i32>> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("downstream unavailable");
        }
        Ok(Some(*item))
    }
}

/// Blocks every item until the test hands out permits
struct GatedProcessor {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl ItemProcessor<i32, i32> for GatedProcessor {
    async fn process(&self, item: &i32) -> Result<Option<i32>> {
        let _permit = self.gate.acquire().await?;
        Ok(Some(*item))
    }
}

/// Panics on item 2 while `armed` is set
struct PanickingProcessor {
    armed: Arc<AtomicBool>,
}

#[async_trait]
impl ItemProcessor<i32, i32> for PanickingProcessor {
    async fn process(&self, item: &i32) -> Result<Option<i32>> {
        if *item == 2 && self.armed.load(Ordering::SeqCst) {
            panic!("processor blew up on item {item}");
        }
        Ok(Some(*item))
    }
}

struct SlowProcessor;

#[async_trait]
impl ItemProcessor<i32, i32> for SlowProcessor {
    async fn process(&self, item: &i32) -> Result<Option<i32>> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(Some(*item))
    }
}

#[derive(Clone, Default)]
struct CountingListener {
    before: Arc<AtomicUsize>,
    after: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(BatchStatus, usize)>>>,
}

impl JobExecutionListener for CountingListener {
    fn before_job(&self, _execution: &JobExecution) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_job(&self, execution: &JobExecution) -> Result<()> {
        self.after.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((execution.status, execution.step_executions.len()));
        Ok(())
    }
}

fn copy_step(name: &str, items: Vec<i32>) -> ChunkStep<i32, i32> {
    ChunkStepBuilder::new(name, 2)
        .reader(ReplayReader::new(items))
        .writer(CollectingItemWriter::new())
        .build()
        .unwrap()
}

fn switchable_step(name: &str, broken: &Arc<AtomicBool>) -> ChunkStep<i32, i32> {
    ChunkStepBuilder::new(name, 2)
        .reader(ReplayReader::new((1..=4).collect()))
        .processor(SwitchableProcessor {
            broken: Arc::clone(broken),
        })
        .writer(CollectingItemWriter::new())
        .build()
        .unwrap()
}

fn opdate() -> JobParameters {
    JobParameters::builder().add("opdate", "20200817").build()
}

#[tokio::test]
async fn test_completed_instance_rejects_identical_launch() {
    init_tracing();
    let job = JobBuilder::new("onceJob")
        .start(copy_step("copy", vec![1, 2, 3]))
        .build()
        .unwrap();
    let (launcher, repository) = launcher(vec![job]);

    let first = launcher.run("onceJob", opdate()).await.unwrap();
    assert_eq!(first.status, BatchStatus::Completed);

    let err = launcher.run("onceJob", opdate()).await.unwrap_err();
    assert!(matches!(err, BatchError::JobInstanceAlreadyComplete { .. }));
    assert_eq!(err.kind(), ErrorKind::IdentityConflict);

    let executions = repository.find_executions(first.instance.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    let last = repository.last_instance("onceJob").await.unwrap().unwrap();
    assert_eq!(last.id, first.instance.id);
}

#[tokio::test]
async fn test_incrementer_creates_distinct_instances() {
    init_tracing();
    let job = JobBuilder::new("importUserJob")
        .incrementer(RunIdIncrementer::new())
        .start(copy_step("copy", vec![1, 2, 3]))
        .build()
        .unwrap();
    let (launcher, _) = launcher(vec![job]);

    // caller-supplied run.id is overridden by the incrementer
    let params = opdate().merged(&JobParameters::builder().add(RUN_ID_KEY, "1").build());
    let first = launcher.run("importUserJob", params.clone()).await.unwrap();
    let second = launcher.run("importUserJob", params).await.unwrap();

    assert_eq!(first.status, BatchStatus::Completed);
    assert_eq!(second.status, BatchStatus::Completed);
    assert_ne!(first.instance.id, second.instance.id);
    assert_eq!(first.parameters.get(RUN_ID_KEY), Some(&JobParameter::Long(1)));
    assert_eq!(second.parameters.get(RUN_ID_KEY), Some(&JobParameter::Long(2)));
    assert_eq!(
        second.parameters.get("opdate"),
        Some(&JobParameter::String("20200817".into()))
    );

    // independent counter sets
    assert_eq!(step(&first, "copy").read_count(), 3);
    assert_eq!(step(&second, "copy").read_count(), 3);
    assert_ne!(step(&first, "copy").id, step(&second, "copy").id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_running_execution_blocks_second_launch() {
    init_tracing();
    let gate = Arc::new(Semaphore::new(0));
    let gated = ChunkStepBuilder::new("gated", 2)
        .reader(ListItemReader::new(1..=4))
        .processor(GatedProcessor {
            gate: Arc::clone(&gate),
        })
        .writer(CollectingItemWriter::new())
        .build()
        .unwrap();
    let job = JobBuilder::new("gatedJob").start(gated).build().unwrap();
    let (launcher, _) = launcher(vec![job]);

    let (started, handle) = launcher.start("gatedJob", opdate()).await.unwrap();
    assert_eq!(started.status, BatchStatus::Starting);

    let err = launcher.run("gatedJob", opdate()).await.unwrap_err();
    match err {
        BatchError::JobExecutionAlreadyRunning { execution_id, .. } => {
            assert_eq!(execution_id, started.id)
        },
        other => panic!("unexpected error {other}"),
    }

    gate.add_permits(16);
    let finished = handle.wait().await.unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);
    assert_eq!(step(&finished, "gated").write_count(), 4);
}

#[tokio::test]
async fn test_restart_skips_completed_steps() {
    init_tracing();
    let broken = Arc::new(AtomicBool::new(true));
    let job = JobBuilder::new("restartJob")
        .start(copy_step("extract", vec![1, 2, 3, 4, 5]))
        .next(switchable_step("load", &broken))
        .build()
        .unwrap();
    let (launcher, repository) = launcher(vec![job]);

    let failed = launcher.run("restartJob", opdate()).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(step(&failed, "extract").status, BatchStatus::Completed);
    assert_eq!(step(&failed, "load").status, BatchStatus::Failed);

    broken.store(false, Ordering::SeqCst);
    let restarted = launcher.restart(failed.id).await.unwrap();

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.instance.id, failed.instance.id);
    assert_ne!(restarted.id, failed.id);
    assert!(restarted.step_execution("extract").is_none());
    let load = step(&restarted, "load");
    assert_eq!(load.read_count(), 4);
    assert_eq!(load.write_count(), 4);

    let history = repository.find_executions(failed.instance.id).await.unwrap();
    let statuses: Vec<_> = history.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![BatchStatus::Failed, BatchStatus::Completed]);

    // the instance is now complete
    let err = launcher.run("restartJob", opdate()).await.unwrap_err();
    assert!(err.is_identity_conflict());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_processor_fails_execution_for_any_worker_count() {
    init_tracing();
    for workers in [1, 2] {
        let armed = Arc::new(AtomicBool::new(true));
        let load = ChunkStepBuilder::new("load", 2)
            .reader(ReplayReader::new((1..=4).collect()))
            .processor(PanickingProcessor {
                armed: Arc::clone(&armed),
            })
            .writer(CollectingItemWriter::new())
            .throttle_limit(workers)
            .build()
            .unwrap();
        let job = JobBuilder::new("panicJob").start(load).build().unwrap();
        let (launcher, repository) = launcher(vec![job]);

        let failed = launcher.run("panicJob", opdate()).await.unwrap();
        assert_eq!(failed.status, BatchStatus::Failed, "workers = {workers}");
        assert_eq!(step(&failed, "load").status, BatchStatus::Failed);

        let stored = repository.get_execution(failed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert!(stored.step_executions.iter().all(|s| s.status == BatchStatus::Failed));

        armed.store(false, Ordering::SeqCst);
        let rerun = launcher.run("panicJob", opdate()).await.unwrap();
        assert_eq!(rerun.status, BatchStatus::Completed, "workers = {workers}");
        assert_eq!(rerun.instance.id, failed.instance.id);
    }
}

#[tokio::test]
async fn test_non_restartable_job_rejects_rerun() {
    init_tracing();
    let broken = Arc::new(AtomicBool::new(true));
    let job = JobBuilder::new("oneShot")
        .restartable(false)
        .start(switchable_step("load", &broken))
        .build()
        .unwrap();
    let (launcher, _) = launcher(vec![job]);

    let failed = launcher.run("oneShot", opdate()).await.unwrap();
    assert_eq!(failed.status, BatchStatus::Failed);

    let err = launcher.run("oneShot", opdate()).await.unwrap_err();
    assert!(matches!(err, BatchError::JobRestartNotAllowed { .. }));
}

#[tokio::test]
async fn test_listener_called_once_with_final_state() {
    init_tracing();
    let listener = CountingListener::default();
    let job = JobBuilder::new("listenedJob")
        .listener(listener.clone())
        .start(copy_step("a", vec![1, 2]))
        .next(copy_step("b", vec![3]))
        .build()
        .unwrap();
    let (launcher, _) = launcher(vec![job]);

    let execution = launcher.run("listenedJob", opdate()).await.unwrap();

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(listener.before.load(Ordering::SeqCst), 1);
    assert_eq!(listener.after.load(Ordering::SeqCst), 1);
    assert_eq!(
        *listener.seen.lock().unwrap(),
        vec![(BatchStatus::Completed, 2)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_split_branch_failure_keeps_sibling_counters() {
    init_tracing();
    let broken = Arc::new(AtomicBool::new(true));
    let branch_a = FlowBuilder::new("branchA")
        .start(switchable_step("stepA", &broken))
        .build()
        .unwrap();
    let branch_b = FlowBuilder::new("branchB")
        .start(copy_step("stepB", (1..=7).collect()))
        .build()
        .unwrap();
    let job = JobBuilder::new("splitJob")
        .split("fanOut", vec![branch_a, branch_b])
        .next(copy_step("after", vec![1]))
        .build()
        .unwrap();
    let (launcher, _) = launcher(vec![job]);

    let execution = launcher.run("splitJob", opdate()).await.unwrap();

    assert_eq!(execution.status, BatchStatus::Failed);
    assert_eq!(
        execution.exit_status.exit_description,
        "Split 'fanOut' failed in branch(es) branchA"
    );
    assert_eq!(step(&execution, "stepA").status, BatchStatus::Failed);
    let b = step(&execution, "stepB");
    assert_eq!(b.status, BatchStatus::Completed);
    assert_eq!(b.read_count(), 7);
    assert_eq!(b.write_count(), 7);
    assert_eq!(b.commit_count(), 4);
    assert!(execution.step_execution("after").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_ends_execution_as_stopped() {
    init_tracing();
    let slow = ChunkStepBuilder::new("slow", 1)
        .reader(ListItemReader::new(1..=200))
        .processor(SlowProcessor)
        .writer(CollectingItemWriter::new())
        .build()
        .unwrap();
    let job = JobBuilder::new("slowJob").start(slow).build().unwrap();
    let (launcher, _) = launcher(vec![job]);

    let (started, handle) = launcher.start("slowJob", opdate()).await.unwrap();
    launcher.stop(started.id).await.unwrap();
    let stopped = handle.wait().await.unwrap();

    assert_eq!(stopped.status, BatchStatus::Stopped);
    assert_eq!(stopped.exit_status.exit_code, "STOPPED");
    let slow = step(&stopped, "slow");
    assert_eq!(slow.status, BatchStatus::Stopped);
    assert!(slow.read_count() < 200);

    let err = launcher.stop(started.id).await.unwrap_err();
    assert!(matches!(err, BatchError::JobExecutionNotRunning(id) if id == started.id));
}

#[tokio::test]
async fn test_validator_rejects_before_any_execution() {
    init_tracing();
    let job = JobBuilder::new("validatedJob")
        .validator(DefaultJobParametersValidator::new(["opdate"], Vec::<String>::new()).unwrap())
        .start(copy_step("copy", vec![1]))
        .build()
        .unwrap();
    let (launcher, repository) = launcher(vec![job]);

    let err = launcher
        .run("validatedJob", JobParameters::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(repository.job_names().await.unwrap().is_empty());

    let ok = launcher.run("validatedJob", opdate()).await.unwrap();
    assert_eq!(ok.status, BatchStatus::Completed);
}

#[tokio::test]
async fn test_unknown_job_is_reported() {
    let (launcher, _) = launcher(vec![]);
    let err = launcher.run("ghost", JobParameters::new()).await.unwrap_err();
    assert!(matches!(err, BatchError::NoSuchJob(name) if name == "ghost"));
}

#[tokio::test]
async fn test_describe_reports_latest_execution() {
    init_tracing();
    let job = JobBuilder::new("importUserJob")
        .incrementer(RunIdIncrementer::new())
        .start(copy_step("step01", vec![1, 2, 3]))
        .build()
        .unwrap();
    let (launcher, repository) = launcher(vec![job]);

    let before = describe(repository.as_ref(), "importUserJob", ReportFormat::Json)
        .await
        .unwrap();
    assert_eq!(before, "null");

    launcher.run("importUserJob", opdate()).await.unwrap();
    let second = launcher.run("importUserJob", opdate()).await.unwrap();

    let html = describe(repository.as_ref(), "importUserJob", ReportFormat::Html)
        .await
        .unwrap();
    assert!(html.starts_with("jobName:importUserJob<br>jobStartTime:"));
    assert!(html.contains("jobBatchStatus:COMPLETED<br>jobExitCode:COMPLETED<br><br>"));
    assert!(html.contains("\tstepName:step01<br>"));
    assert!(html.contains("\treadCount:3<br>"));
    assert!(html.contains("\tcommitCount:2<br>"));
    assert!(html.ends_with("\tskipCount:0<br><br>"));

    let json = describe(repository.as_ref(), "importUserJob", ReportFormat::Json)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["jobExecutionId"], second.id);
}
