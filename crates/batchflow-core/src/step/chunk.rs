//! Chunk-oriented step: read up to `chunk_size` items, process them, write
//! the survivors as one batch, commit, repeat.
//!
//! The step runs `throttle_limit` workers as spawned tasks. Each worker owns a
//! chunk end to end: it reads the chunk from the shared reader while holding
//! the step's read gate, then processes and writes it without holding the
//! gate, so every chunk is a contiguous run of up to `chunk_size` items. Chunks may therefore
//! commit out of read order; counters are applied under the step lock, so
//! totals do not depend on interleaving.
//!
//! The first failed chunk stops new chunk dispatch. Chunks already in flight
//! on other workers finish and still commit.

use super::{JobScope, Step, StepExecutionHandle, StepExecutionListener};
use crate::config::BatchConfig;
use crate::domain::StepContribution;
use crate::error::{BatchError, Result};
use crate::item::{
    ItemListener, ItemProcessor, ItemReader, ItemStreamReader, ItemWriter, SynchronizedItemReader,
};
use crate::status::BatchStatus;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::Instrument;

enum Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    Identity(fn(I) -> O),
    Processor(Arc<dyn ItemProcessor<I, O>>),
}

impl<I, O> Clone for Transform<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        match self {
            Transform::Identity(f) => Transform::Identity(*f),
            Transform::Processor(p) => Transform::Processor(Arc::clone(p)),
        }
    }
}

fn identity<T>(item: T) -> T {
    item
}

pub struct ChunkStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    name: Arc<str>,
    chunk_size: usize,
    throttle_limit: usize,
    reader: Arc<dyn ItemReader<I>>,
    transform: Transform<I, O>,
    writer: Arc<dyn ItemWriter<O>>,
    item_listeners: Arc<[Arc<dyn ItemListener<I, O>>]>,
    step_listeners: Vec<Arc<dyn StepExecutionListener>>,
    allow_start_if_complete: bool,
}

impl<I, O> ChunkStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn throttle_limit(&self) -> usize {
        self.throttle_limit
    }
}

/// Dispatch state shared by the workers of one step execution
#[derive(Default)]
struct Dispatch {
    halted: AtomicBool,
    stopped: AtomicBool,
    chunks: AtomicU64,
    first_error: Mutex<Option<BatchError>>,
    /// Held while one worker reads its whole chunk
    read_gate: tokio::sync::Mutex<()>,
}

impl Dispatch {
    fn fail(&self, err: BatchError) {
        self.halted.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.first_error.lock() {
            if slot.is_none() {
                *slot = Some(err);
            } else {
                tracing::debug!(error = %err, "Additional chunk failure after the first");
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.halted.store(true, Ordering::SeqCst);
    }

    fn take_error(&self) -> Option<BatchError> {
        self.first_error.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// One chunk worker; cheap to clone into a spawned task
struct Worker<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    step: Arc<str>,
    chunk_size: usize,
    reader: Arc<dyn ItemReader<I>>,
    transform: Transform<I, O>,
    writer: Arc<dyn ItemWriter<O>>,
    item_listeners: Arc<[Arc<dyn ItemListener<I, O>>]>,
    execution: StepExecutionHandle,
    scope: JobScope,
    dispatch: Arc<Dispatch>,
}

impl<I, O> Clone for Worker<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            step: Arc::clone(&self.step),
            chunk_size: self.chunk_size,
            reader: Arc::clone(&self.reader),
            transform: self.transform.clone(),
            writer: Arc::clone(&self.writer),
            item_listeners: Arc::clone(&self.item_listeners),
            execution: self.execution.clone(),
            scope: self.scope.clone(),
            dispatch: Arc::clone(&self.dispatch),
        }
    }
}

impl<I, O> Worker<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn run(self) {
        loop {
            if self.dispatch.halted.load(Ordering::SeqCst) {
                break;
            }
            match self.scope.is_stop_requested().await {
                Ok(true) => {
                    tracing::info!("Stop requested, no further chunks will be dispatched");
                    self.dispatch.stop();
                    break;
                },
                Ok(false) => {},
                Err(err) => {
                    self.dispatch.fail(err);
                    break;
                },
            }

            let read = {
                let _gate = self.dispatch.read_gate.lock().await;
                self.reader.read_chunk(self.chunk_size).await
            };
            let items = match read {
                Ok(items) => items,
                Err(e) => {
                    for listener in self.item_listeners.iter() {
                        listener.on_read_error(&e);
                    }
                    self.dispatch.fail(BatchError::read(&self.step, e));
                    self.record_rollback().await;
                    break;
                },
            };
            if items.is_empty() {
                break;
            }

            let chunk = self.dispatch.chunks.fetch_add(1, Ordering::SeqCst) + 1;
            match self.process_and_write(items, chunk).await {
                Ok(contribution) => {
                    if let Err(err) = self.execution.commit(&contribution).await {
                        self.dispatch.fail(err);
                        break;
                    }
                },
                Err(err) => {
                    tracing::warn!(chunk, error = %err, "Chunk failed, rolling back");
                    self.dispatch.fail(err);
                    self.record_rollback().await;
                    break;
                },
            }
        }
    }

    async fn record_rollback(&self) {
        if let Err(err) = self.execution.rollback().await {
            tracing::error!(error = %err, "Failed to record rollback");
        }
    }

    async fn process_and_write(&self, items: Vec<I>, chunk: u64) -> Result<StepContribution> {
        let mut contribution = StepContribution {
            read_count: items.len() as u64,
            ..Default::default()
        };

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            match &self.transform {
                Transform::Identity(f) => outputs.push(f(item)),
                Transform::Processor(processor) => match processor.process(&item).await {
                    Ok(Some(output)) => outputs.push(output),
                    Ok(None) => contribution.filter_count += 1,
                    Err(e) => {
                        for listener in self.item_listeners.iter() {
                            listener.on_process_error(&item, &e);
                        }
                        return Err(BatchError::process(&self.step, e));
                    },
                },
            }
        }

        // a fully filtered chunk still commits, without touching the writer
        if !outputs.is_empty() {
            if let Err(e) = self.writer.write(&outputs).await {
                for listener in self.item_listeners.iter() {
                    listener.on_write_error(&outputs, &e);
                }
                return Err(BatchError::write(&self.step, e));
            }
            for listener in self.item_listeners.iter() {
                listener.after_write(&outputs);
            }
        }
        contribution.write_count = outputs.len() as u64;

        tracing::debug!(
            chunk,
            read = contribution.read_count,
            written = contribution.write_count,
            filtered = contribution.filter_count,
            "Chunk committed"
        );
        Ok(contribution)
    }
}

#[async_trait]
impl<I, O> Step for ChunkStep<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn listeners(&self) -> &[Arc<dyn StepExecutionListener>] {
        &self.step_listeners
    }

    async fn execute(&self, scope: &JobScope, execution: &StepExecutionHandle) -> Result<BatchStatus> {
        self.reader
            .open()
            .await
            .map_err(|e| BatchError::read(&self.name, e))?;
        if let Err(e) = self.writer.open().await {
            if let Err(close) = self.reader.close().await {
                tracing::warn!(error = %format!("{close:#}"), "Failed to close reader");
            }
            return Err(BatchError::write(&self.name, e));
        }

        let dispatch = Arc::new(Dispatch::default());
        let worker = Worker {
            step: Arc::clone(&self.name),
            chunk_size: self.chunk_size,
            reader: Arc::clone(&self.reader),
            transform: self.transform.clone(),
            writer: Arc::clone(&self.writer),
            item_listeners: Arc::clone(&self.item_listeners),
            execution: execution.clone(),
            scope: scope.clone(),
            dispatch: Arc::clone(&dispatch),
        };

        // a panicking item port kills its task, never the step bookkeeping
        let mut workers = JoinSet::new();
        for id in 0..self.throttle_limit {
            let span = tracing::debug_span!("chunk_worker", worker = id);
            workers.spawn(worker.clone().run().instrument(span));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                dispatch.fail(BatchError::TaskFailed(format!(
                    "chunk worker of step '{}' died: {e}",
                    self.name
                )));
            }
        }

        let write_closed = self.writer.close().await;
        let read_closed = self.reader.close().await;

        if let Some(err) = dispatch.take_error() {
            return Err(err);
        }
        write_closed.map_err(|e| BatchError::write(&self.name, e))?;
        read_closed.map_err(|e| BatchError::read(&self.name, e))?;

        if dispatch.stopped.load(Ordering::SeqCst) {
            Ok(BatchStatus::Stopped)
        } else {
            Ok(BatchStatus::Completed)
        }
    }
}

/// Builder for [`ChunkStep`].
///
/// Set the processor before the writer and item listeners: both are typed by
/// the processor's output.
pub struct ChunkStepBuilder<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    name: String,
    chunk_size: usize,
    throttle_limit: usize,
    reader: Option<Arc<dyn ItemReader<I>>>,
    transform: Transform<I, O>,
    writer: Option<Arc<dyn ItemWriter<O>>>,
    item_listeners: Vec<Arc<dyn ItemListener<I, O>>>,
    step_listeners: Vec<Arc<dyn StepExecutionListener>>,
    allow_start_if_complete: bool,
    misordered: bool,
}

impl<T> ChunkStepBuilder<T, T>
where
    T: Send + Sync + 'static,
{
    /// Builder for a step named `name` committing every `chunk_size` items.
    /// Without a processor items are written unchanged.
    pub fn new(name: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            name: name.into(),
            chunk_size,
            throttle_limit: 1,
            reader: None,
            transform: Transform::Identity(identity::<T>),
            writer: None,
            item_listeners: Vec::new(),
            step_listeners: Vec::new(),
            allow_start_if_complete: false,
            misordered: false,
        }
    }

    /// Builder using the configured default chunk size and throttle limit.
    pub fn with_config(name: impl Into<String>, config: &BatchConfig) -> Self {
        Self::new(name, config.default_chunk_size).throttle_limit(config.throttle_limit)
    }
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    /// Thread-safe reader shared by all workers.
    pub fn reader<R>(mut self, reader: R) -> Self
    where
        R: ItemReader<I> + 'static,
    {
        self.reader = Some(Arc::new(reader));
        self
    }

    /// Sequential reader, serialized behind a [`SynchronizedItemReader`].
    pub fn synchronized_reader<R>(self, reader: R) -> Self
    where
        R: ItemStreamReader<I> + 'static,
    {
        self.reader(SynchronizedItemReader::new(reader))
    }

    pub fn processor<P, O2>(self, processor: P) -> ChunkStepBuilder<I, O2>
    where
        P: ItemProcessor<I, O2> + 'static,
        O2: Send + Sync + 'static,
    {
        let misordered =
            self.misordered || self.writer.is_some() || !self.item_listeners.is_empty();
        ChunkStepBuilder {
            name: self.name,
            chunk_size: self.chunk_size,
            throttle_limit: self.throttle_limit,
            reader: self.reader,
            transform: Transform::Processor(Arc::new(processor)),
            writer: None,
            item_listeners: Vec::new(),
            step_listeners: self.step_listeners,
            allow_start_if_complete: self.allow_start_if_complete,
            misordered,
        }
    }

    pub fn writer<W>(mut self, writer: W) -> Self
    where
        W: ItemWriter<O> + 'static,
    {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Number of concurrent chunk workers.
    pub fn throttle_limit(mut self, workers: usize) -> Self {
        self.throttle_limit = workers;
        self
    }

    pub fn item_listener<L>(mut self, listener: L) -> Self
    where
        L: ItemListener<I, O> + 'static,
    {
        self.item_listeners.push(Arc::new(listener));
        self
    }

    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: StepExecutionListener + 'static,
    {
        self.step_listeners.push(Arc::new(listener));
        self
    }

    pub fn allow_start_if_complete(mut self, allow: bool) -> Self {
        self.allow_start_if_complete = allow;
        self
    }

    pub fn build(self) -> Result<ChunkStep<I, O>> {
        let invalid = |msg: String| Err(BatchError::InvalidDefinition(msg));
        if self.name.trim().is_empty() {
            return invalid("step name cannot be empty".into());
        }
        if self.chunk_size == 0 {
            return invalid(format!("step '{}': chunk size must be at least 1", self.name));
        }
        if self.throttle_limit == 0 {
            return invalid(format!("step '{}': throttle limit must be at least 1", self.name));
        }
        if self.misordered {
            return invalid(format!(
                "step '{}': processor must be set before the writer and item listeners",
                self.name
            ));
        }
        let Some(reader) = self.reader else {
            return invalid(format!("step '{}' has no reader", self.name));
        };
        let Some(writer) = self.writer else {
            return invalid(format!("step '{}' has no writer", self.name));
        };

        Ok(ChunkStep {
            name: Arc::from(self.name),
            chunk_size: self.chunk_size,
            throttle_limit: self.throttle_limit,
            reader,
            transform: self.transform,
            writer,
            item_listeners: self.item_listeners.into(),
            step_listeners: self.step_listeners,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}
