/// In-memory item reader.
pub mod list;

#[cfg(feature = "logger")]
/// Item writer that logs every item it receives.
pub mod logger;

#[cfg(feature = "csv")]
/// CSV item reader and writer.
pub mod csv;
