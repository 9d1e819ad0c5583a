use std::{fs::File, io::Read, path::Path};

use csv::{ReaderBuilder, StringRecordsIntoIter, Terminator, Trim};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::{
    core::item::{ItemReader, ItemReaderResult},
    error::BatchError,
};

/// Reads rows of a CSV source and deserializes each into an item.
///
/// A row that cannot be parsed or deserialized is reported as an
/// [`BatchError::ItemReader`] error, which a fault-tolerant step may skip;
/// the cursor has already moved past it.
pub struct CsvItemReader<R> {
    records: Mutex<StringRecordsIntoIter<R>>,
}

impl<R: Read, T: DeserializeOwned> ItemReader<T> for CsvItemReader<R> {
    fn read(&self) -> ItemReaderResult<T> {
        let next = self.records.lock().next();
        match next {
            Some(Ok(record)) => record
                .deserialize(None)
                .map(Some)
                .map_err(|error| BatchError::ItemReader(error.to_string())),
            Some(Err(error)) => Err(BatchError::ItemReader(error.to_string())),
            None => Ok(None),
        }
    }
}

/// Builder for [`CsvItemReader`].
///
/// Defaults: comma delimiter, CRLF terminator, no header row, every field trimmed.
pub struct CsvItemReaderBuilder {
    delimiter: u8,
    terminator: Terminator,
    has_headers: bool,
}

impl Default for CsvItemReaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvItemReaderBuilder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            terminator: Terminator::CRLF,
            has_headers: false,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Whether the first row is a header row to skip.
    pub fn has_headers(mut self, yes: bool) -> Self {
        self.has_headers = yes;
        self
    }

    fn builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .trim(Trim::All)
            .delimiter(self.delimiter)
            .terminator(self.terminator)
            .has_headers(self.has_headers);
        builder
    }

    pub fn from_reader<R: Read>(self, rdr: R) -> CsvItemReader<R> {
        CsvItemReader {
            records: Mutex::new(self.builder().from_reader(rdr).into_records()),
        }
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<CsvItemReader<File>, BatchError> {
        let reader = self
            .builder()
            .from_path(path)
            .map_err(|error| BatchError::ItemReader(error.to_string()))?;

        Ok(CsvItemReader {
            records: Mutex::new(reader.into_records()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        level: String,
        total_amount: i64,
    }

    #[test]
    fn rows_should_be_read_in_order() {
        let data = "id,level,total_amount\n1,NORMAL,1000\n2,SILVER,300000\n";
        let reader = CsvItemReaderBuilder::new()
            .has_headers(true)
            .terminator(Terminator::Any(b'\n'))
            .from_reader(data.as_bytes());

        let first: Option<User> = reader.read().unwrap();
        let second: Option<User> = reader.read().unwrap();
        let end: Option<User> = reader.read().unwrap();

        assert_eq!(first.map(|user| user.level), Some("NORMAL".to_string()));
        assert_eq!(second.map(|user| user.total_amount), Some(300_000));
        assert!(end.is_none());
    }

    #[test]
    fn malformed_row_should_be_a_reader_error_and_reading_goes_on() {
        let data = "1,NORMAL,1000\nx,GOLD,oops\n3,VIP,1\n";
        let reader = CsvItemReaderBuilder::new().from_reader(data.as_bytes());

        let first: ItemReaderResult<User> = reader.read();
        let second: ItemReaderResult<User> = reader.read();
        let third: ItemReaderResult<User> = reader.read();

        assert!(first.is_ok());
        assert!(matches!(second, Err(BatchError::ItemReader(_))));
        assert_eq!(third.unwrap().map(|user| user.id), Some(3));
    }

    #[test]
    fn from_path_should_read_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "7;GOLD;500000").unwrap();

        let reader = CsvItemReaderBuilder::new()
            .delimiter(b';')
            .from_path(file.path())
            .unwrap();
        let user: Option<User> = reader.read().unwrap();

        assert_eq!(user.map(|user| user.id), Some(7));
    }

    #[test]
    fn missing_file_should_be_an_error() {
        assert!(CsvItemReaderBuilder::new().from_path("/does/not/exist.csv").is_err());
    }
}
