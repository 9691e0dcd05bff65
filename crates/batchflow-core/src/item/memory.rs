//! In-memory item sources and sinks.

use super::{ItemReader, ItemStreamReader, ItemWriter};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Thread-safe reader over a fixed list
pub struct ListItemReader<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ListItemReader<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    fn take(&self, max: usize) -> Result<Vec<T>> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("list reader lock poisoned"))?;
        let n = max.min(items.len());
        Ok(items.drain(..n).collect())
    }
}

#[async_trait]
impl<T: Send + 'static> ItemReader<T> for ListItemReader<T> {
    async fn read(&self) -> Result<Option<T>> {
        Ok(self.take(1)?.pop())
    }

    async fn read_chunk(&self, max: usize) -> Result<Vec<T>> {
        self.take(max)
    }
}

/// Sequential reader over a list, for exercising [`super::SynchronizedItemReader`]
pub struct VecStreamReader<T> {
    items: VecDeque<T>,
    opened: bool,
}

impl<T> VecStreamReader<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            opened: false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> ItemStreamReader<T> for VecStreamReader<T> {
    async fn open(&mut self) -> Result<()> {
        self.opened = true;
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<T>> {
        if !self.opened {
            return Err(anyhow!("stream reader read before open"));
        }
        Ok(self.items.pop_front())
    }

    async fn close(&mut self) -> Result<()> {
        self.opened = false;
        Ok(())
    }
}

/// Writer that keeps every committed batch, in commit order
pub struct CollectingItemWriter<T> {
    batches: Mutex<Vec<Vec<T>>>,
}

impl<T: Clone> CollectingItemWriter<T> {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<T>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// All written items, flattened in commit order.
    pub fn items(&self) -> Vec<T> {
        self.batches().into_iter().flatten().collect()
    }
}

impl<T: Clone> Default for CollectingItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> ItemWriter<T> for CollectingItemWriter<T> {
    async fn write(&self, items: &[T]) -> Result<()> {
        self.batches
            .lock()
            .map_err(|_| anyhow!("collecting writer lock poisoned"))?
            .push(items.to_vec());
        Ok(())
    }
}
