use std::fmt::Debug;

use log::info;

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

/// Writes every item of a chunk to the `info` log.
#[derive(Default)]
pub struct LoggerWriter {
    prefix: Option<String>,
}

impl LoggerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }
}

impl<T> ItemWriter<T> for LoggerWriter
where
    T: Debug,
{
    fn write(&self, items: &[T]) -> Result<(), BatchError> {
        let prefix = self.prefix.as_deref().unwrap_or("Record");
        items.iter().for_each(|item| info!("{}:{:?}", prefix, item));
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }
}
