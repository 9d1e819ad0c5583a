use std::sync::Arc;

use crate::error::BatchError;

/// Result of reading one item: `Ok(None)` signals the end of the data.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

pub type ItemWriterResult = Result<(), BatchError>;

/// Source of items for a chunk-oriented step, read one at a time.
///
/// Implementations keep their cursor behind interior mutability so that a
/// reader can be shared with the worker thread that runs its step.
pub trait ItemReader<I> {
    fn read(&self) -> ItemReaderResult<I>;
}

/// Business logic applied to every item read.
///
/// Returning `Ok(None)` is a filter, not an error: the item counts as read
/// but is never written.
pub trait ItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Sink for the items of a step, invoked once per committed chunk.
pub trait ItemWriter<O> {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }

    /// Number of items of a successfully written chunk that actually reached
    /// the sink. Writers that drop items on their own report fewer.
    fn delivered(&self, items: &[O]) -> usize {
        items.len()
    }

    /// Whether a failed write of `items` came from producing them rather than
    /// from the sink. Writers that resolve deferred processing report `true`.
    fn failed_in_processing(&self, _items: &[O]) -> bool {
        false
    }
}

impl<I, O, F> ItemProcessor<I, O> for F
where
    F: Fn(&I) -> ItemProcessorResult<O>,
{
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        self(item)
    }
}

impl<I, R: ItemReader<I> + ?Sized> ItemReader<I> for Arc<R> {
    fn read(&self) -> ItemReaderResult<I> {
        (**self).read()
    }
}

impl<O, W: ItemWriter<O> + ?Sized> ItemWriter<O> for Arc<W> {
    fn write(&self, items: &[O]) -> ItemWriterResult {
        (**self).write(items)
    }

    fn flush(&self) -> ItemWriterResult {
        (**self).flush()
    }

    fn open(&self) -> ItemWriterResult {
        (**self).open()
    }

    fn close(&self) -> ItemWriterResult {
        (**self).close()
    }

    fn delivered(&self, items: &[O]) -> usize {
        (**self).delivered(items)
    }

    fn failed_in_processing(&self, items: &[O]) -> bool {
        (**self).failed_in_processing(items)
    }
}

/// Processor used when a step has none: every item is passed through.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

/// Chains processors of the same item type.
///
/// Delegates run in registration order; the first one that filters the item
/// (returns `Ok(None)`) or fails stops the chain.
///
/// # Examples
///
/// ```
/// use spring_batch_engine::core::item::{CompositeItemProcessor, ItemProcessor};
///
/// let processor = CompositeItemProcessor::new()
///     .delegate(|item: &String| Ok(Some(item.trim().to_string())))
///     .delegate(|item: &String| {
///         if item.is_empty() {
///             Ok(None)
///         } else {
///             Ok(Some(item.to_uppercase()))
///         }
///     });
///
/// assert_eq!(processor.process(&" rust ".to_string()).unwrap(), Some("RUST".to_string()));
/// assert_eq!(processor.process(&"  ".to_string()).unwrap(), None);
/// ```
pub struct CompositeItemProcessor<T> {
    delegates: Vec<Box<dyn ItemProcessor<T, T> + Send + Sync>>,
}

impl<T> Default for CompositeItemProcessor<T> {
    fn default() -> Self {
        Self {
            delegates: Vec::new(),
        }
    }
}

impl<T> CompositeItemProcessor<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegate(mut self, processor: impl ItemProcessor<T, T> + Send + Sync + 'static) -> Self {
        self.delegates.push(Box::new(processor));
        self
    }
}

impl<T: Clone> ItemProcessor<T, T> for CompositeItemProcessor<T> {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        let mut current = item.clone();
        for delegate in &self.delegates {
            match delegate.process(&current)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

/// Writes the same chunk to every delegate, in registration order.
///
/// The first failing delegate aborts the write; delegates after it do not see
/// the chunk.
pub struct CompositeItemWriter<T> {
    delegates: Vec<Box<dyn ItemWriter<T> + Send + Sync>>,
}

impl<T> Default for CompositeItemWriter<T> {
    fn default() -> Self {
        Self {
            delegates: Vec::new(),
        }
    }
}

impl<T> CompositeItemWriter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegate(mut self, writer: impl ItemWriter<T> + Send + Sync + 'static) -> Self {
        self.delegates.push(Box::new(writer));
        self
    }
}

impl<T> ItemWriter<T> for CompositeItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        for delegate in &self.delegates {
            delegate.write(items)?;
        }
        Ok(())
    }

    fn flush(&self) -> ItemWriterResult {
        for delegate in &self.delegates {
            delegate.flush()?;
        }
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        for delegate in &self.delegates {
            delegate.open()?;
        }
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        for delegate in &self.delegates {
            delegate.close()?;
        }
        Ok(())
    }

    fn delivered(&self, items: &[T]) -> usize {
        self.delegates
            .first()
            .map_or(items.len(), |delegate| delegate.delivered(items))
    }

    fn failed_in_processing(&self, items: &[T]) -> bool {
        self.delegates
            .iter()
            .any(|delegate| delegate.failed_in_processing(items))
    }
}
