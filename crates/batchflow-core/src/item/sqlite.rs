//! SQLite-backed item reader and writer.
//!
//! Both share one `rusqlite::Connection` behind a mutex, the same way the job
//! repository does. SQL runs synchronously inside the async methods.

use super::{ItemReader, ItemWriter};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub type SharedConnection = Arc<Mutex<Connection>>;

type RowMapper<T> = Arc<dyn Fn(&Row<'_>) -> rusqlite::Result<T> + Send + Sync>;
type ParamBinder<T> = Arc<dyn Fn(&T) -> Vec<Value> + Send + Sync>;

/// Reads the rows of a query, mapping each row to an item.
///
/// The query runs once on `open` and its mapped result set is held in memory
/// until `close`, then handed out in query order. Writers of the same step may
/// therefore update the queried table without shifting what is still to be
/// read. Memory grows with the result set, so restrict large tables with the
/// query itself. Safe to share between workers.
pub struct SqliteItemReader<T> {
    conn: SharedConnection,
    sql: String,
    params: Vec<Value>,
    mapper: RowMapper<T>,
    rows: Mutex<Option<VecDeque<T>>>,
}

impl<T> SqliteItemReader<T> {
    pub fn new<F>(conn: SharedConnection, sql: impl Into<String>, mapper: F) -> Self
    where
        F: Fn(&Row<'_>) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        Self {
            conn,
            sql: sql.into(),
            params: Vec::new(),
            mapper: Arc::new(mapper),
            rows: Mutex::new(None),
        }
    }

    /// Positional parameters bound to `?` placeholders of the query.
    pub fn params(mut self, params: impl IntoIterator<Item = Value>) -> Self {
        self.params = params.into_iter().collect();
        self
    }

    fn take(&self, max: usize) -> Result<Vec<T>> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow!("sqlite reader lock poisoned"))?;
        let rows = rows
            .as_mut()
            .ok_or_else(|| anyhow!("reader for '{}' is not open", self.sql))?;
        let n = max.min(rows.len());
        Ok(rows.drain(..n).collect())
    }
}

#[async_trait]
impl<T: Send + 'static> ItemReader<T> for SqliteItemReader<T> {
    async fn open(&self) -> Result<()> {
        let items = {
            let conn = self
                .conn
                .lock()
                .map_err(|_| anyhow!("connection lock poisoned"))?;
            let mut stmt = conn
                .prepare(&self.sql)
                .with_context(|| format!("Failed to prepare '{}'", self.sql))?;
            let mapped = stmt.query_map(params_from_iter(self.params.iter()), |row| {
                (self.mapper)(row)
            })?;
            mapped.collect::<rusqlite::Result<VecDeque<T>>>()?
        };
        *self
            .rows
            .lock()
            .map_err(|_| anyhow!("sqlite reader lock poisoned"))? = Some(items);
        Ok(())
    }

    async fn read(&self) -> Result<Option<T>> {
        Ok(self.take(1)?.pop())
    }

    async fn read_chunk(&self, max: usize) -> Result<Vec<T>> {
        self.take(max)
    }

    async fn close(&self) -> Result<()> {
        if let Ok(mut rows) = self.rows.lock() {
            *rows = None;
        }
        Ok(())
    }
}

/// Runs one statement per item, all items of a batch in one transaction.
///
/// With `assert_updates` (the default) a statement touching no row fails the
/// batch, which rolls the whole transaction back.
pub struct SqliteItemWriter<T> {
    conn: SharedConnection,
    sql: String,
    binder: ParamBinder<T>,
    assert_updates: bool,
}

impl<T> SqliteItemWriter<T> {
    pub fn new<F>(conn: SharedConnection, sql: impl Into<String>, binder: F) -> Self
    where
        F: Fn(&T) -> Vec<Value> + Send + Sync + 'static,
    {
        Self {
            conn,
            sql: sql.into(),
            binder: Arc::new(binder),
            assert_updates: true,
        }
    }

    pub fn assert_updates(mut self, assert: bool) -> Self {
        self.assert_updates = assert;
        self
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ItemWriter<T> for SqliteItemWriter<T> {
    async fn write(&self, items: &[T]) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("connection lock poisoned"))?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx
                .prepare_cached(&self.sql)
                .with_context(|| format!("Failed to prepare '{}'", self.sql))?;
            for (i, item) in items.iter().enumerate() {
                let changed = stmt.execute(params_from_iter((self.binder)(item)))?;
                if self.assert_updates && changed == 0 {
                    bail!("item {i} of the batch did not update any row ('{}')", self.sql);
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn connection() -> SharedConnection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, first_name TEXT NOT NULL, last_name TEXT NOT NULL);
             INSERT INTO people (first_name, last_name) VALUES ('Jill', 'Doe'), ('Zoe', 'Smith'), ('Joe', 'Doe');",
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[tokio::test]
    async fn test_reader_binds_params_and_maps_rows() {
        let conn = connection();
        let reader = SqliteItemReader::new(
            conn,
            "SELECT first_name FROM people WHERE last_name = ? ORDER BY id",
            |row| row.get::<_, String>(0),
        )
        .params([Value::Text("Doe".into())]);

        assert!(reader.read().await.is_err(), "reading before open must fail");
        reader.open().await.unwrap();
        assert_eq!(reader.read_chunk(5).await.unwrap(), vec!["Jill", "Joe"]);
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_keeps_snapshot_taken_on_open() {
        let conn = connection();
        let reader = SqliteItemReader::new(
            Arc::clone(&conn),
            "SELECT first_name FROM people ORDER BY id",
            |row| row.get::<_, String>(0),
        );
        reader.open().await.unwrap();
        assert_eq!(reader.read().await.unwrap().as_deref(), Some("Jill"));

        conn.lock()
            .unwrap()
            .execute_batch("DELETE FROM people WHERE first_name = 'Joe'")
            .unwrap();
        assert_eq!(reader.read_chunk(5).await.unwrap(), vec!["Zoe", "Joe"]);

        reader.close().await.unwrap();
        assert!(reader.read().await.is_err(), "reading after close must fail");
    }

    #[tokio::test]
    async fn test_writer_commits_batch_atomically() {
        let conn = connection();
        let writer = SqliteItemWriter::new(
            Arc::clone(&conn),
            "UPDATE people SET first_name = upper(first_name) WHERE id = ?",
            |id: &i64| vec![Value::Integer(*id)],
        );

        writer.write(&[1, 2]).await.unwrap();
        // id 99 does not exist: the whole batch rolls back
        assert!(writer.write(&[3, 99]).await.is_err());

        let names: Vec<String> = {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT first_name FROM people ORDER BY id").unwrap();
            let rows = stmt.query_map([], |row| row.get(0)).unwrap();
            rows.collect::<rusqlite::Result<_>>().unwrap()
        };
        assert_eq!(names, vec!["JILL", "ZOE", "Joe"]);
    }
}
