//! Delimited flat file reader and writer built on the `csv` crate.

use super::{ItemStreamReader, ItemWriter};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Sequential CSV reader deserializing each record into `T`.
///
/// Not thread-safe; wrap it in a [`super::SynchronizedItemReader`] for
/// multi-worker steps.
pub struct CsvItemReader<T> {
    path: PathBuf,
    delimiter: u8,
    has_header_row: bool,
    names: Option<csv::StringRecord>,
    reader: Option<csv::Reader<File>>,
    record: csv::StringRecord,
    _item: PhantomData<fn() -> T>,
}

impl<T> CsvItemReader<T> {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
            has_header_row: true,
            names: None,
            reader: None,
            record: csv::StringRecord::new(),
            _item: PhantomData,
        }
    }

    /// Column names for a file without a header row, in file order.
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names = Some(names.into_iter().collect());
        self.has_header_row = false;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> ItemStreamReader<T> for CsvItemReader<T> {
    async fn open(&mut self) -> Result<()> {
        let reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header_row)
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        self.reader = Some(reader);
        Ok(())
    }

    async fn read(&mut self) -> Result<Option<T>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| anyhow!("reader for {} is not open", self.path.display()))?;

        if !reader.read_record(&mut self.record)? {
            return Ok(None);
        }

        let headers = match &self.names {
            Some(names) => Some(names),
            None => Some(reader.headers()?),
        };
        let line = self.record.position().map_or(0, |p| p.line());
        let item = self
            .record
            .deserialize(headers)
            .with_context(|| format!("Parsing error at line {line} in {}", self.path.display()))?;
        Ok(Some(item))
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

type FieldExtractor<T> = Arc<dyn Fn(&T) -> Vec<String> + Send + Sync>;

/// CSV writer turning each item into one line via a field extractor.
///
/// The file is (re)created on `open`, optionally starting with a fixed header
/// line. Every batch is flushed before `write` returns.
pub struct CsvItemWriter<T> {
    path: PathBuf,
    delimiter: u8,
    terminator: csv::Terminator,
    header: Option<String>,
    extractor: FieldExtractor<T>,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl<T> CsvItemWriter<T> {
    pub fn new<F>(path: impl AsRef<Path>, extractor: F) -> Self
    where
        F: Fn(&T) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            path: path.as_ref().to_path_buf(),
            delimiter: b',',
            terminator: csv::Terminator::CRLF,
            header: None,
            extractor: Arc::new(extractor),
            writer: Mutex::new(None),
        }
    }

    /// Line written once at the top of the file.
    pub fn header_line(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Use `\n` instead of `\r\n` between lines.
    pub fn unix_line_endings(mut self) -> Self {
        self.terminator = csv::Terminator::Any(b'\n');
        self
    }

    fn line_separator(&self) -> &'static [u8] {
        match self.terminator {
            csv::Terminator::CRLF => b"\r\n",
            _ => b"\n",
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> ItemWriter<T> for CsvItemWriter<T> {
    async fn open(&self) -> Result<()> {
        let mut file = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        if let Some(header) = &self.header {
            file.write_all(header.as_bytes())?;
            file.write_all(self.line_separator())?;
        }
        let writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(false)
            .from_writer(file);
        *self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))? = Some(writer);
        Ok(())
    }

    async fn write(&self, items: &[T]) -> Result<()> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| anyhow!("writer for {} is not open", self.path.display()))?;
        for item in items {
            writer.write_record((self.extractor)(item))?;
        }
        writer.flush()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("csv writer lock poisoned"))?
            .take();
        if let Some(mut writer) = writer {
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        #[serde(rename = "firstName")]
        first_name: String,
        #[serde(rename = "lastName")]
        last_name: String,
    }

    #[tokio::test]
    async fn test_reader_with_named_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "Jill,Doe\n Joe , Doe\n").unwrap();

        let mut reader = CsvItemReader::<Row>::new(&path).names(["firstName", "lastName"]);
        reader.open().await.unwrap();
        let first = reader.read().await.unwrap().unwrap();
        let second = reader.read().await.unwrap().unwrap();
        assert_eq!(first.first_name, "Jill");
        assert_eq!(second.first_name, "Joe");
        assert!(reader.read().await.unwrap().is_none());
        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reader_with_header_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "lastName,firstName\nDoe,Jane\n").unwrap();

        let mut reader = CsvItemReader::<Row>::new(&path);
        reader.open().await.unwrap();
        let row = reader.read().await.unwrap().unwrap();
        assert_eq!(row.first_name, "Jane");
        assert_eq!(row.last_name, "Doe");
    }

    #[tokio::test]
    async fn test_reader_reports_line_of_bad_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Jill,Doe\nonly-one-field\n").unwrap();

        let mut reader = CsvItemReader::<Row>::new(&path).names(["firstName", "lastName"]);
        reader.open().await.unwrap();
        assert!(reader.read().await.unwrap().is_some());
        let err = reader.read().await.unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[tokio::test]
    async fn test_reading_unopened_file_fails() {
        let mut reader = CsvItemReader::<Row>::new("/nonexistent/people.csv");
        assert!(reader.read().await.is_err());
        assert!(reader.open().await.is_err());
    }

    #[tokio::test]
    async fn test_writer_header_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let writer = CsvItemWriter::new(&path, |row: &Row| {
            vec![row.first_name.clone(), row.last_name.clone()]
        })
        .header_line("omitted");

        writer.open().await.unwrap();
        writer
            .write(&[Row {
                first_name: "JILL".into(),
                last_name: "Doe".into(),
            }])
            .await
            .unwrap();
        writer
            .write(&[Row {
                first_name: "JOE".into(),
                last_name: "Doe".into(),
            }])
            .await
            .unwrap();
        writer.close().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "omitted\r\nJILL,Doe\r\nJOE,Doe\r\n");
    }

    #[tokio::test]
    async fn test_writer_unix_line_endings_and_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let writer = CsvItemWriter::new(&path, |row: &Row| {
            vec![row.first_name.clone(), row.last_name.clone()]
        })
        .delimiter(b';')
        .unix_line_endings();
        writer.open().await.unwrap();
        writer
            .write(&[Row {
                first_name: "Zoe".into(),
                last_name: "Smith".into(),
            }])
            .await
            .unwrap();
        writer.close().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Zoe;Smith\n");
    }
}
