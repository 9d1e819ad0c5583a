//! Asynchronous item processing.
//!
//! [`AsyncItemProcessor`] hands every item to a [`TaskExecutor`] and returns an
//! [`ItemFuture`] right away, so a chunk fills while its items are still being
//! processed. [`AsyncItemWriter`] is the join point: it resolves the futures of
//! the chunk in order, drops the filtered ones and writes the rest to its
//! delegate. A processing failure surfaces from the writer, where the chunk
//! engine scans the chunk and applies its retry and skip rules to that item,
//! counting a skipped one as a process skip.
//!
//! The two adapters are used together:
//!
//! ```
//! use std::sync::Arc;
//!
//! use spring_batch_engine::{
//!     core::{
//!         async_item::{AsyncItemProcessor, AsyncItemWriter, ItemFuture},
//!         executor::TaskExecutor,
//!         item::{ItemWriter, ItemWriterResult},
//!         step::{Step, StepBuilder, StepExecution},
//!     },
//!     item::list::ListItemReader,
//!     BatchError,
//! };
//!
//! struct Print;
//!
//! impl ItemWriter<u32> for Print {
//!     fn write(&self, items: &[u32]) -> ItemWriterResult {
//!         items.iter().for_each(|item| println!("{}", item));
//!         Ok(())
//!     }
//! }
//!
//! let executor = Arc::new(TaskExecutor::with_pool_size(4)?);
//!
//! let step = StepBuilder::new("squares")
//!     .chunk::<u32, ItemFuture<u32>>(5)
//!     .reader(ListItemReader::new((1..=10).collect()))
//!     .processor(AsyncItemProcessor::new(|n: &u32| Ok(Some(n * n)), executor))
//!     .writer(AsyncItemWriter::new(Print))
//!     .build()?;
//!
//! let mut execution = StepExecution::new(step.get_name());
//! step.execute(&mut execution)?;
//! assert_eq!(execution.write_count, 10);
//! # Ok::<(), BatchError>(())
//! ```

use std::{fmt, sync::Arc};

use log::debug;
use parking_lot::Mutex;

use crate::BatchError;

use super::{
    executor::{TaskExecutor, TaskHandle},
    item::{ItemProcessor, ItemProcessorResult, ItemWriter, ItemWriterResult},
};

enum FutureState<O> {
    Pending(TaskHandle<ItemProcessorResult<O>>),
    Resolved(ItemProcessorResult<O>),
    Resolving,
}

/// Placeholder for the result of an item processed on a [`TaskExecutor`].
///
/// Resolving blocks until the task is done; the result is cached, so a
/// future can be resolved again when its chunk is written item by item.
pub struct ItemFuture<O> {
    state: Mutex<FutureState<O>>,
}

impl<O> fmt::Debug for ItemFuture<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            FutureState::Pending(_) => "pending",
            FutureState::Resolved(_) => "resolved",
            FutureState::Resolving => "resolving",
        };
        f.debug_struct("ItemFuture").field("state", &state).finish()
    }
}

impl<O: Clone + Send + 'static> ItemFuture<O> {
    fn pending(handle: TaskHandle<ItemProcessorResult<O>>) -> Self {
        Self {
            state: Mutex::new(FutureState::Pending(handle)),
        }
    }

    /// Already resolved future.
    pub fn ready(result: ItemProcessorResult<O>) -> Self {
        Self {
            state: Mutex::new(FutureState::Resolved(result)),
        }
    }

    pub fn resolve(&self) -> ItemProcessorResult<O> {
        let mut state = self.state.lock();
        if let FutureState::Pending(_) = &*state {
            if let FutureState::Pending(handle) = std::mem::replace(&mut *state, FutureState::Resolving) {
                let result = handle.join().and_then(|result| result);
                *state = FutureState::Resolved(result);
            }
        }

        match &*state {
            FutureState::Resolved(result) => result.clone(),
            FutureState::Pending(_) | FutureState::Resolving => Err(BatchError::TaskExecutor(
                "item future was not resolved".to_string(),
            )),
        }
    }

    /// Whether the future resolved to a processing error.
    pub fn is_failed(&self) -> bool {
        matches!(&*self.state.lock(), FutureState::Resolved(Err(_)))
    }

    pub fn is_done(&self) -> bool {
        match &*self.state.lock() {
            FutureState::Pending(handle) => handle.is_finished(),
            FutureState::Resolved(_) => true,
            FutureState::Resolving => false,
        }
    }
}

/// Runs a delegate processor on a [`TaskExecutor`], one task per item.
pub struct AsyncItemProcessor<I, O> {
    delegate: Arc<dyn ItemProcessor<I, O> + Send + Sync>,
    executor: Arc<TaskExecutor>,
}

impl<I, O> AsyncItemProcessor<I, O> {
    pub fn new(
        delegate: impl ItemProcessor<I, O> + Send + Sync + 'static,
        executor: Arc<TaskExecutor>,
    ) -> Self {
        Self {
            delegate: Arc::new(delegate),
            executor,
        }
    }
}

impl<I, O> ItemProcessor<I, ItemFuture<O>> for AsyncItemProcessor<I, O>
where
    I: Clone + Send + 'static,
    O: Clone + Send + 'static,
{
    fn process(&self, item: &I) -> ItemProcessorResult<ItemFuture<O>> {
        let delegate = Arc::clone(&self.delegate);
        let item = item.clone();
        let handle = self.executor.submit(move || delegate.process(&item))?;
        Ok(Some(ItemFuture::pending(handle)))
    }
}

/// Resolves [`ItemFuture`]s in chunk order and writes the results to a delegate.
///
/// The first future that resolved to an error fails the whole write and the
/// delegate is not called. Futures resolved to `None` are filtered out.
pub struct AsyncItemWriter<O> {
    delegate: Box<dyn ItemWriter<O> + Send + Sync>,
}

impl<O> AsyncItemWriter<O> {
    pub fn new(delegate: impl ItemWriter<O> + Send + Sync + 'static) -> Self {
        Self {
            delegate: Box::new(delegate),
        }
    }
}

impl<O: Clone + Send + 'static> ItemWriter<ItemFuture<O>> for AsyncItemWriter<O> {
    fn write(&self, items: &[ItemFuture<O>]) -> ItemWriterResult {
        let mut resolved = Vec::with_capacity(items.len());
        for future in items {
            if let Some(item) = future.resolve()? {
                resolved.push(item);
            }
        }

        debug!(
            "Resolved {} futures, {} items to write",
            items.len(),
            resolved.len()
        );

        if resolved.is_empty() {
            return Ok(());
        }
        self.delegate.write(&resolved)
    }

    fn flush(&self) -> ItemWriterResult {
        self.delegate.flush()
    }

    fn open(&self) -> ItemWriterResult {
        self.delegate.open()
    }

    fn close(&self) -> ItemWriterResult {
        self.delegate.close()
    }

    fn delivered(&self, items: &[ItemFuture<O>]) -> usize {
        items
            .iter()
            .filter(|future| matches!(future.resolve(), Ok(Some(_))))
            .count()
    }

    fn failed_in_processing(&self, items: &[ItemFuture<O>]) -> bool {
        items.iter().any(ItemFuture::is_failed)
    }
}
