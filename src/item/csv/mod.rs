//! CSV support for reading and writing delimited text.
//!
//! Both adapters are built with a builder, deserialize or serialize rows with
//! serde and keep their cursor behind a mutex so a step can share them across
//! partitions.
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use spring_batch_engine::{
//!     core::item::{ItemReader, ItemWriter},
//!     item::csv::{csv_reader::CsvItemReaderBuilder, csv_writer::CsvItemWriterBuilder},
//! };
//!
//! #[derive(Debug, Deserialize, Serialize, PartialEq)]
//! struct OrderStatistics {
//!     total_amount: i64,
//!     date: String,
//! }
//!
//! let writer = CsvItemWriterBuilder::new()
//!     .has_headers(true)
//!     .from_writer(vec![]);
//! writer.write(&[OrderStatistics { total_amount: 1_000, date: "2020-11-01".to_string() }])?;
//! let data = String::from_utf8(writer.into_inner()?).unwrap();
//! assert_eq!(data, "total_amount,date\n1000,2020-11-01\n");
//!
//! let reader = CsvItemReaderBuilder::new()
//!     .has_headers(true)
//!     .from_reader(data.as_bytes());
//! let first: Option<OrderStatistics> = reader.read()?;
//! assert_eq!(first.map(|row| row.total_amount), Some(1_000));
//! # Ok::<(), spring_batch_engine::BatchError>(())
//! ```

pub mod csv_reader;

pub mod csv_writer;
