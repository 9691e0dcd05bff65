//! Item ports consumed by chunk steps.
//!
//! A chunk step reads through an [`ItemReader`], transforms through an
//! [`ItemProcessor`] and flushes through an [`ItemWriter`]. Readers handed to a
//! multi-worker step are called from several tasks at once, so the trait is the
//! thread-safe contract. Sources that can only be consumed sequentially
//! implement [`ItemStreamReader`] instead and are wrapped in a
//! [`SynchronizedItemReader`].

use anyhow::Result;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

pub mod flat_file;
pub mod memory;
pub mod sqlite;

pub use flat_file::{CsvItemReader, CsvItemWriter};
pub use memory::{CollectingItemWriter, ListItemReader, VecStreamReader};
pub use sqlite::{SqliteItemReader, SqliteItemWriter};

/// Thread-safe item source.
///
/// Implementations must tolerate concurrent `read`/`read_chunk` calls; every
/// item is handed out exactly once.
#[async_trait]
pub trait ItemReader<T: Send>: Send + Sync {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Next item, or `None` at end of stream.
    async fn read(&self) -> Result<Option<T>>;

    /// Up to `max` items for one chunk. An empty vector means end of stream.
    /// A chunk step calls this under its read gate, one worker at a time.
    async fn read_chunk(&self, max: usize) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(max);
        while items.len() < max {
            match self.read().await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sequential item source that is not safe to share between workers
#[async_trait]
pub trait ItemStreamReader<T: Send>: Send {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<T>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Serializes access to an [`ItemStreamReader`] so it can back a
/// multi-worker step.
///
/// `read_chunk` keeps the lock for the whole chunk: a worker reads its items
/// contiguously and releases the source before processing them.
pub struct SynchronizedItemReader<R> {
    inner: Mutex<R>,
}

impl<R> SynchronizedItemReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(reader),
        }
    }
}

#[async_trait]
impl<T, R> ItemReader<T> for SynchronizedItemReader<R>
where
    T: Send + 'static,
    R: ItemStreamReader<T> + 'static,
{
    async fn open(&self) -> Result<()> {
        self.inner.lock().await.open().await
    }

    async fn read(&self) -> Result<Option<T>> {
        self.inner.lock().await.read().await
    }

    async fn read_chunk(&self, max: usize) -> Result<Vec<T>> {
        let mut reader = self.inner.lock().await;
        let mut items = Vec::with_capacity(max);
        while items.len() < max {
            match reader.read().await? {
                Some(item) => items.push(item),
                None => break,
            }
        }
        Ok(items)
    }

    async fn close(&self) -> Result<()> {
        self.inner.lock().await.close().await
    }
}

/// Transforms one item. `Ok(None)` filters the item out of the write set.
#[async_trait]
pub trait ItemProcessor<I: Sync, O: Send>: Send + Sync {
    async fn process(&self, item: &I) -> Result<Option<O>>;
}

/// [`ItemProcessor`] backed by a plain function or closure
pub struct FnItemProcessor<F, I, O> {
    f: F,
    _types: PhantomData<fn(&I) -> O>,
}

impl<F, I, O> FnItemProcessor<F, I, O>
where
    F: Fn(&I) -> Result<Option<O>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<F, I, O> ItemProcessor<I, O> for FnItemProcessor<F, I, O>
where
    F: Fn(&I) -> Result<Option<O>> + Send + Sync,
    I: Sync + 'static,
    O: Send + 'static,
{
    async fn process(&self, item: &I) -> Result<Option<O>> {
        (self.f)(item)
    }
}

/// Batch sink. A successful `write` is the commit boundary of a chunk.
///
/// Implementations must accept concurrent `write` calls with disjoint batches.
#[async_trait]
pub trait ItemWriter<T: Sync>: Send + Sync {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn write(&self, items: &[T]) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T, R> ItemReader<T> for Arc<R>
where
    T: Send + 'static,
    R: ItemReader<T> + ?Sized,
{
    async fn open(&self) -> Result<()> {
        (**self).open().await
    }

    async fn read(&self) -> Result<Option<T>> {
        (**self).read().await
    }

    async fn read_chunk(&self, max: usize) -> Result<Vec<T>> {
        (**self).read_chunk(max).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

#[async_trait]
impl<I, O, P> ItemProcessor<I, O> for Arc<P>
where
    I: Sync + 'static,
    O: Send + 'static,
    P: ItemProcessor<I, O> + ?Sized,
{
    async fn process(&self, item: &I) -> Result<Option<O>> {
        (**self).process(item).await
    }
}

#[async_trait]
impl<T, W> ItemWriter<T> for Arc<W>
where
    T: Sync + 'static,
    W: ItemWriter<T> + ?Sized,
{
    async fn open(&self) -> Result<()> {
        (**self).open().await
    }

    async fn write(&self, items: &[T]) -> Result<()> {
        (**self).write(items).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}

/// Error callbacks around the item ports of one step. All hooks default to
/// no-ops.
pub trait ItemListener<I, O>: Send + Sync {
    fn on_read_error(&self, _error: &anyhow::Error) {}

    fn on_process_error(&self, _item: &I, _error: &anyhow::Error) {}

    fn on_write_error(&self, _items: &[O], _error: &anyhow::Error) {}

    fn after_write(&self, _items: &[O]) {}
}
