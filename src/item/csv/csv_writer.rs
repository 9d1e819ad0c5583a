use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};

use csv::{Writer, WriterBuilder};
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

/// Serializes every item of a chunk as one CSV row.
///
/// An explicit header set on the builder is written once, when the writer is
/// opened, so a run without rows still produces it. Otherwise, with headers
/// enabled, the field names of the first item serialized become the header row.
pub struct CsvItemWriter<T: Write> {
    wrapper: Mutex<Writer<T>>,
    header: Mutex<Option<Vec<String>>>,
}

impl<T: Write, R: Serialize> ItemWriter<R> for CsvItemWriter<T> {
    fn write(&self, items: &[R]) -> ItemWriterResult {
        let mut writer = self.wrapper.lock();
        for item in items {
            writer
                .serialize(item)
                .map_err(|error| BatchError::ItemWriter(error.to_string()))?;
        }
        Ok(())
    }

    /// Flushes the internal buffer and the underlying writer.
    fn flush(&self) -> ItemWriterResult {
        self.wrapper
            .lock()
            .flush()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))
    }

    fn open(&self) -> ItemWriterResult {
        let Some(header) = self.header.lock().take() else {
            return Ok(());
        };
        self.wrapper
            .lock()
            .write_record(&header)
            .map_err(|error| BatchError::ItemWriter(error.to_string()))
    }

    fn close(&self) -> ItemWriterResult {
        ItemWriter::<R>::flush(self)
    }
}

impl<T: Write> CsvItemWriter<T> {
    pub fn into_inner(self) -> Result<T, BatchError> {
        self.wrapper
            .into_inner()
            .into_inner()
            .map_err(|error| BatchError::ItemWriter(error.to_string()))
    }
}

pub struct CsvItemWriterBuilder {
    delimiter: u8,
    has_headers: bool,
    header: Option<Vec<String>>,
}

impl Default for CsvItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemWriterBuilder {
    pub fn new() -> CsvItemWriterBuilder {
        CsvItemWriterBuilder {
            delimiter: b',',
            has_headers: false,
            header: None,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> CsvItemWriterBuilder {
        self.delimiter = delimiter;
        self
    }

    pub fn has_headers(mut self, yes: bool) -> CsvItemWriterBuilder {
        self.has_headers = yes;
        self
    }

    /// Header row written on open. It replaces the header derived from the
    /// field names.
    pub fn header(mut self, columns: &[&str]) -> CsvItemWriterBuilder {
        self.header = Some(columns.iter().map(|column| column.to_string()).collect());
        self
    }

    fn builder(&self) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder
            .flexible(false)
            .delimiter(self.delimiter)
            .has_headers(self.has_headers && self.header.is_none());
        builder
    }

    /// Creates the file at `path`, truncating it if it exists.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemWriter<File>, BatchError> {
        let writer = self
            .builder()
            .from_path(path)
            .map_err(|error| BatchError::ItemWriter(error.to_string()))?;

        Ok(CsvItemWriter {
            wrapper: Mutex::new(writer),
            header: Mutex::new(self.header),
        })
    }

    pub fn from_writer<W: io::Write>(self, wtr: W) -> CsvItemWriter<W> {
        CsvItemWriter {
            wrapper: Mutex::new(self.builder().from_writer(wtr)),
            header: Mutex::new(self.header),
        }
    }
}
