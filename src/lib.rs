#![cfg_attr(docsrs, feature(doc_cfg))]
//#![warn(missing_docs)]

/*!
 # Spring Batch Engine

 A chunk-oriented batch execution engine in the spirit of Java Spring Batch.
 Jobs are flows of steps; a chunk step reads items one at a time, transforms
 them, and commits them to a writer in bounded chunks, with skip and retry
 fault tolerance. One logical step can be fanned out into range partitions
 run on a bounded worker pool, and per-item processing can be offloaded to
 that pool asynchronously.

 ## Core Concepts

- **Job:** the whole batch process, a flow of steps, decisions and splits run
  against a set of `JobParameters`.
- **Step:** one phase of a job. A chunk step reads, processes and writes
  items; a tasklet step runs a single task; a partition step runs a worker
  step once per partition.
- **ItemReader:** retrieval of input, one item at a time.
- **ItemProcessor:** business logic applied to one item. Returning `None`
  filters the item out.
- **ItemWriter:** output of a step, one chunk of items at a time.
- **ExecutionContext:** key/value state scoped to a step run or shared by
  every step of a job run.

 ## Features

| **Feature**   | **Description**                                               |
|---------------|---------------------------------------------------------------|
| csv           | Enables CSV `ItemReader` and `ItemWriter`                     |
| logger        | Enables a logger `ItemWriter`, useful for debugging purposes  |
| full          | Enables all available features                                |

 ## Getting Started

```rust
# use spring_batch_engine::{
#     core::{
#         item::{ItemWriter, ItemWriterResult},
#         job::{Job, JobBuilder},
#         parameters::JobParametersBuilder,
#         step::{BatchStatus, StepBuilder},
#     },
#     error::BatchError,
#     item::list::ListItemReader,
# };
# use parking_lot::Mutex;
# use std::sync::Arc;
#[derive(Default)]
struct Collect {
    items: Mutex<Vec<String>>,
}

impl ItemWriter<String> for Collect {
    fn write(&self, items: &[String]) -> ItemWriterResult {
        self.items.lock().extend_from_slice(items);
        Ok(())
    }
}

fn main() -> Result<(), BatchError> {
    let names = vec!["Porsche".to_string(), String::new(), "Peugeot".to_string()];
    let writer = Arc::new(Collect::default());

    let step = StepBuilder::new("upperCaseStep")
        .chunk::<String, String>(2)
        .reader(ListItemReader::new(names))
        .processor(|name: &String| {
            if name.is_empty() {
                return Err(BatchError::item("EmptyName", "name is empty"));
            }
            Ok(Some(name.to_uppercase()))
        })
        .writer(Arc::clone(&writer))
        .skip("EmptyName")
        .skip_limit(2)
        .build()?;

    let job = JobBuilder::new().name("carJob").start(step).build();
    let execution = job.run(JobParametersBuilder::new().add_string("date", "2020-11").build())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(*writer.items.lock(), vec!["PORSCHE", "PEUGEOT"]);
    assert_eq!(execution.step_executions[0].process_skip_count, 1);

    Ok(())
}
```

 ## License
 Licensed under either of

 -   Apache License, Version 2.0
     ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
 -   MIT license
     ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)

 at your option.
 */

/// Core module for batch operations
pub mod core;

/// Error types for batch operations
pub mod error;

#[doc(inline)]
pub use error::*;

/// Set of item readers and writers (for example: csv reader and writer)
pub mod item;
