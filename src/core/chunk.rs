use std::sync::Arc;

use log::{debug, warn};

use crate::BatchError;

use super::{
    item::{ItemProcessor, ItemReader, ItemWriter, ItemWriterResult},
    listener::StepListener,
    policy::FaultTolerancePolicy,
    retry::{RetryListener, RetryTemplate},
    step::{Step, StepExecution, StepResult},
};

pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Transformed items awaiting one commit, each kept next to the item it was
/// produced from so a failed write can be replayed item by item.
pub struct Chunk<I, O> {
    inputs: Vec<I>,
    outputs: Vec<O>,
}

impl<I, O> Chunk<I, O> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inputs: Vec::with_capacity(capacity),
            outputs: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, input: I, output: O) {
        self.inputs.push(input);
        self.outputs.push(output);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn outputs(&self) -> &[O] {
        &self.outputs
    }
}

/// Read, process and write items in chunks.
///
/// Items are pulled one at a time and processed through the retry template
/// of the step. Non-filtered results accumulate until the chunk holds
/// `chunk_size` items or the reader is exhausted; the writer then receives
/// the whole chunk once and the commit count is incremented.
///
/// Failures are classified by the [`FaultTolerancePolicy`]:
///
/// - a skippable read or process failure drops the item and counts a skip;
/// - a failed chunk write with a retryable or skippable kind is scanned:
///   every item is written alone, one that keeps failing is processed again
///   up to `retry_limit` times, then skipped if its kind allows it;
/// - anything else, or a skip beyond `skip_limit`, fails the step and
///   nothing more is read.
pub struct ChunkOrientedStep<I, O> {
    name: String,
    reader: Box<dyn ItemReader<I> + Send + Sync>,
    processor: Box<dyn ItemProcessor<I, O> + Send + Sync>,
    writer: Box<dyn ItemWriter<O> + Send + Sync>,
    chunk_size: usize,
    chunk_size_parameter: Option<String>,
    policy: FaultTolerancePolicy,
    retry_template: RetryTemplate,
    listeners: Vec<StepListener>,
}

impl<I, O> Step for ChunkOrientedStep<I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult {
        let chunk_size = self.resolve_chunk_size(step_execution)?;

        self.writer.open()?;

        let result = self.process_chunks(step_execution, chunk_size);

        Self::manage_error(self.writer.close());

        result
    }

    fn listeners(&self) -> &[StepListener] {
        &self.listeners
    }
}

impl<I, O> ChunkOrientedStep<I, O> {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk size of this run: the job parameter named by the builder when
    /// present, the configured size otherwise.
    fn resolve_chunk_size(&self, step_execution: &StepExecution) -> Result<usize, BatchError> {
        let Some(parameter) = &self.chunk_size_parameter else {
            return Ok(self.chunk_size);
        };

        if !step_execution.job_parameters().contains_key(parameter) {
            return Ok(self.chunk_size);
        }

        match step_execution.job_parameters().get_long(parameter) {
            Some(size) if size >= 1 => Ok(size as usize),
            _ => Err(BatchError::Configuration(format!(
                "job parameter '{}' is not a valid chunk size",
                parameter
            ))),
        }
    }

    fn process_chunks(&self, step_execution: &mut StepExecution, chunk_size: usize) -> StepResult {
        loop {
            let (chunk, exhausted) = self.fill_chunk(step_execution, chunk_size)?;

            if !chunk.is_empty() {
                self.write_chunk(step_execution, chunk)?;
            }

            if exhausted {
                debug!("Reader exhausted for step {}", self.name);
                return Ok(());
            }
        }
    }

    fn fill_chunk(
        &self,
        step_execution: &mut StepExecution,
        chunk_size: usize,
    ) -> Result<(Chunk<I, O>, bool), BatchError> {
        debug!("Start reading chunk");
        let mut chunk = Chunk::with_capacity(chunk_size);

        while chunk.len() < chunk_size {
            let Some(item) = self.read_item(step_execution)? else {
                debug!("End reading chunk: FINISHED with {} items", chunk.len());
                return Ok((chunk, true));
            };

            if let Some(output) = self.process_item(step_execution, &item)? {
                chunk.push(item, output);
            }
        }

        debug!("End reading chunk: FULL");
        Ok((chunk, false))
    }

    fn read_item(&self, step_execution: &mut StepExecution) -> Result<Option<I>, BatchError> {
        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    step_execution.read_count += 1;
                    return Ok(Some(item));
                }
                Ok(None) => return Ok(None),
                Err(error) => {
                    if !self.policy.can_skip(&error, step_execution.skip_count()) {
                        return Err(error);
                    }
                    warn!("Skipping unreadable item: {}", error);
                    step_execution.read_skip_count += 1;
                }
            }
        }
    }

    /// Processes one item through the retry template. `Ok(None)` means the
    /// item was filtered or skipped.
    fn process_item(&self, step_execution: &mut StepExecution, item: &I) -> Result<Option<O>, BatchError> {
        match self.retry_template.execute(|_| self.processor.process(item)) {
            Ok(Some(output)) => Ok(Some(output)),
            Ok(None) => {
                step_execution.filter_count += 1;
                Ok(None)
            }
            Err(error) => {
                if !self.policy.can_skip(&error, step_execution.skip_count()) {
                    return Err(error);
                }
                warn!("Skipping item after processing error: {}", error);
                step_execution.process_skip_count += 1;
                Ok(None)
            }
        }
    }

    fn write_items(&self, items: &[O]) -> ItemWriterResult {
        self.writer.write(items)?;
        self.writer.flush()
    }

    fn record_written(&self, step_execution: &mut StepExecution, items: &[O]) {
        let delivered = self.writer.delivered(items);
        step_execution.write_count += delivered;
        step_execution.filter_count += items.len().saturating_sub(delivered);
    }

    fn write_chunk(&self, step_execution: &mut StepExecution, chunk: Chunk<I, O>) -> StepResult {
        debug!("Writing chunk of {} items", chunk.len());

        match self.write_items(chunk.outputs()) {
            Ok(()) => {
                self.record_written(step_execution, chunk.outputs());
                step_execution.commit_count += 1;
                debug!("End writing chunk");
                Ok(())
            }
            Err(error) => {
                let recoverable = self.policy.is_retryable(&error)
                    || self.policy.can_skip(&error, step_execution.skip_count());
                if !recoverable {
                    return Err(error);
                }
                warn!(
                    "Chunk write failed ({}), writing its {} items one by one",
                    error,
                    chunk.len()
                );
                self.scan_chunk(step_execution, chunk)
            }
        }
    }

    /// Writes the items of a failed chunk one at a time. Each item goes
    /// through the retry template: a retry processes the item again before
    /// rewriting it, and listeners see every failed attempt.
    fn scan_chunk(&self, step_execution: &mut StepExecution, chunk: Chunk<I, O>) -> StepResult {
        for (input, output) in chunk.inputs.into_iter().zip(chunk.outputs) {
            let mut output = Some(output);
            let mut in_processing = false;

            let result = self.retry_template.execute(|context| {
                in_processing = false;
                if context.retry_count() > 0 {
                    warn!("Retrying write of one item, attempt {}", context.retry_count());
                    match self.processor.process(&input) {
                        Ok(next) => output = next,
                        Err(error) => {
                            in_processing = true;
                            return Err(error);
                        }
                    }
                }

                let Some(item) = &output else {
                    return Ok(false);
                };
                match self.write_items(std::slice::from_ref(item)) {
                    Ok(()) => Ok(true),
                    Err(error) => {
                        in_processing = self.writer.failed_in_processing(std::slice::from_ref(item));
                        Err(error)
                    }
                }
            });

            match result {
                Ok(true) => self.record_written(step_execution, output.as_slice()),
                Ok(false) => step_execution.filter_count += 1,
                Err(error) => {
                    if !self.policy.can_skip(&error, step_execution.skip_count()) {
                        return Err(error);
                    }
                    if in_processing {
                        warn!("Skipping item after processing error: {}", error);
                        step_execution.process_skip_count += 1;
                    } else {
                        warn!("Skipping item after write error: {}", error);
                        step_execution.write_skip_count += 1;
                    }
                }
            }
        }

        step_execution.commit_count += 1;
        Ok(())
    }

    fn manage_error(result: ItemWriterResult) {
        if let Err(error) = result {
            warn!("Non-fatal error: {}", error);
        }
    }
}

/// Builder for [`ChunkOrientedStep`].
///
/// Reader, processor and writer are required; use
/// [`PassThroughProcessor`](super::item::PassThroughProcessor) for steps that
/// write what they read.
pub struct ChunkOrientedStepBuilder<I, O> {
    name: String,
    reader: Option<Box<dyn ItemReader<I> + Send + Sync>>,
    processor: Option<Box<dyn ItemProcessor<I, O> + Send + Sync>>,
    writer: Option<Box<dyn ItemWriter<O> + Send + Sync>>,
    chunk_size: usize,
    chunk_size_parameter: Option<String>,
    policy: FaultTolerancePolicy,
    retry_listeners: Vec<Arc<dyn RetryListener>>,
    listeners: Vec<StepListener>,
}

impl<I, O> ChunkOrientedStepBuilder<I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_size_parameter: None,
            policy: FaultTolerancePolicy::default(),
            retry_listeners: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn reader(mut self, reader: impl ItemReader<I> + Send + Sync + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    pub fn processor(mut self, processor: impl ItemProcessor<I, O> + Send + Sync + 'static) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    pub fn writer(mut self, writer: impl ItemWriter<O> + Send + Sync + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Job parameter overriding the chunk size for a run.
    pub fn chunk_size_parameter(mut self, key: &str) -> Self {
        self.chunk_size_parameter = Some(key.to_string());
        self
    }

    pub fn fault_tolerant(mut self, policy: FaultTolerancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn skip(mut self, kind: &str) -> Self {
        self.policy = self.policy.skip(kind);
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.policy = self.policy.skip_limit(skip_limit);
        self
    }

    pub fn retry(mut self, kind: &str) -> Self {
        self.policy = self.policy.retry(kind);
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.policy = self.policy.retry_limit(retry_limit);
        self
    }

    pub fn retry_listener(mut self, listener: impl RetryListener + 'static) -> Self {
        self.retry_listeners.push(Arc::new(listener));
        self
    }

    pub fn listener(mut self, listener: StepListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step '{}' must be at least 1",
                self.name
            )));
        }

        let missing = |component: &str| {
            BatchError::Configuration(format!("step '{}' has no {}", self.name, component))
        };
        let reader = self.reader.ok_or_else(|| missing("reader"))?;
        let processor = self.processor.ok_or_else(|| missing("processor"))?;
        let writer = self.writer.ok_or_else(|| missing("writer"))?;

        let retry_template = self
            .retry_listeners
            .into_iter()
            .fold(self.policy.retry_template(), RetryTemplate::shared_listener);

        Ok(ChunkOrientedStep {
            name: self.name,
            reader,
            processor,
            writer,
            chunk_size: self.chunk_size,
            chunk_size_parameter: self.chunk_size_parameter,
            policy: self.policy,
            retry_template,
            listeners: self.listeners,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use parking_lot::Mutex;

    use crate::{
        core::{
            item::PassThroughProcessor,
            parameters::JobParametersBuilder,
            step::{BatchStatus, StepBuilder},
        },
        item::list::ListItemReader,
    };

    use super::*;

    #[derive(Default)]
    struct RecordingWriter {
        chunks: Mutex<Vec<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl ItemWriter<String> for RecordingWriter {
        fn write(&self, items: &[String]) -> ItemWriterResult {
            if let Some(poison) = &self.fail_on {
                if items.contains(poison) {
                    return Err(BatchError::item("Constraint", format!("cannot write {}", poison)));
                }
            }
            self.chunks.lock().push(items.to_vec());
            Ok(())
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|item| item.to_string()).collect()
    }

    fn run(step: &ChunkOrientedStep<String, String>) -> (StepResult, StepExecution) {
        let mut execution = StepExecution::new(step.get_name());
        let result = step.execute(&mut execution);
        (result, execution)
    }

    #[test]
    fn final_partial_chunk_should_be_committed() {
        let writer = Arc::new(RecordingWriter::default());
        let step = StepBuilder::new("partial")
            .chunk::<String, String>(2)
            .reader(ListItemReader::new(strings(&["a", "b", "c", "d", "e"])))
            .processor(PassThroughProcessor)
            .writer(Arc::clone(&writer))
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.read_count, 5);
        assert_eq!(execution.write_count, 5);
        assert_eq!(execution.commit_count, 3);
        assert_eq!(
            *writer.chunks.lock(),
            vec![strings(&["a", "b"]), strings(&["c", "d"]), strings(&["e"])]
        );
    }

    #[test]
    fn empty_reader_should_complete_without_commit() {
        let writer = Arc::new(RecordingWriter::default());
        let step = StepBuilder::new("empty")
            .chunk::<String, String>(3)
            .reader(ListItemReader::new(Vec::new()))
            .processor(PassThroughProcessor)
            .writer(Arc::clone(&writer))
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.commit_count, 0);
        assert!(writer.chunks.lock().is_empty());
    }

    #[test]
    fn filtered_items_should_count_as_read_only() {
        let step = StepBuilder::new("filter")
            .chunk::<String, String>(10)
            .reader(ListItemReader::new(strings(&["keep", "", "keep", ""])))
            .processor(|item: &String| Ok((!item.is_empty()).then(|| item.clone())))
            .writer(RecordingWriter::default())
            .build()
            .unwrap();

        let (_, execution) = run(&step);

        assert_eq!(execution.read_count, 4);
        assert_eq!(execution.filter_count, 2);
        assert_eq!(execution.write_count, 2);
        assert_eq!(execution.skip_count(), 0);
    }

    #[test]
    fn exceeding_the_skip_limit_should_stop_reading() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let source = Arc::new(ListItemReader::new(strings(&["", "", "ok", "", "ok", "ok"])));

        struct CountingReader(Arc<ListItemReader<String>>, Arc<AtomicUsize>);
        impl ItemReader<String> for CountingReader {
            fn read(&self) -> crate::core::item::ItemReaderResult<String> {
                self.1.fetch_add(1, Ordering::SeqCst);
                self.0.read()
            }
        }

        let step = StepBuilder::new("limit")
            .chunk::<String, String>(10)
            .reader(CountingReader(source, counter))
            .processor(|item: &String| {
                if item.is_empty() {
                    Err(BatchError::item("NotFoundName", "empty name"))
                } else {
                    Ok(Some(item.clone()))
                }
            })
            .writer(RecordingWriter::default())
            .skip("NotFoundName")
            .skip_limit(2)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert_eq!(execution.status, BatchStatus::Failed);
        assert_eq!(execution.process_skip_count, 2);
        assert_eq!(reads.load(Ordering::SeqCst), 4);
        assert_eq!(execution.write_count, 0);
    }

    #[test]
    fn retryable_processing_error_should_be_written_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let writer = Arc::new(RecordingWriter::default());

        let step = StepBuilder::new("retry")
            .chunk::<String, String>(10)
            .reader(ListItemReader::new(strings(&["flaky"])))
            .processor(move |item: &String| {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(BatchError::item("Transient", "not yet"))
                } else {
                    Ok(Some(item.clone()))
                }
            })
            .writer(Arc::clone(&writer))
            .retry("Transient")
            .retry_limit(3)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(execution.write_count, 1);
        assert_eq!(execution.skip_count(), 0);
        assert_eq!(*writer.chunks.lock(), vec![strings(&["flaky"])]);
    }

    #[test]
    fn skippable_write_error_should_scan_the_chunk() {
        let writer = Arc::new(RecordingWriter {
            fail_on: Some("bad".to_string()),
            ..Default::default()
        });

        let step = StepBuilder::new("scan")
            .chunk::<String, String>(3)
            .reader(ListItemReader::new(strings(&["a", "bad", "c"])))
            .processor(PassThroughProcessor)
            .writer(Arc::clone(&writer))
            .skip("Constraint")
            .skip_limit(1)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_ok());
        assert_eq!(execution.write_count, 2);
        assert_eq!(execution.write_skip_count, 1);
        assert_eq!(execution.commit_count, 1);
        assert_eq!(*writer.chunks.lock(), vec![strings(&["a"]), strings(&["c"])]);
    }

    #[test]
    fn unclassified_write_error_should_fail_the_step() {
        let step = StepBuilder::new("fatal-write")
            .chunk::<String, String>(3)
            .reader(ListItemReader::new(strings(&["bad"])))
            .processor(PassThroughProcessor)
            .writer(RecordingWriter {
                fail_on: Some("bad".to_string()),
                ..Default::default()
            })
            .skip("NotFoundName")
            .skip_limit(5)
            .build()
            .unwrap();

        let (result, execution) = run(&step);

        assert!(result.is_err());
        assert_eq!(execution.write_count, 0);
        assert_eq!(execution.commit_count, 0);
    }

    #[test]
    fn chunk_size_parameter_should_override_the_configured_size() {
        let writer = Arc::new(RecordingWriter::default());
        let step = StepBuilder::new("param")
            .chunk::<String, String>(10)
            .chunk_size_parameter("chunkSize")
            .reader(ListItemReader::new(strings(&["a", "b", "c", "d"])))
            .processor(PassThroughProcessor)
            .writer(Arc::clone(&writer))
            .build()
            .unwrap();

        let parameters = JobParametersBuilder::new().add_string("chunkSize", "3").build();
        let job_context = crate::core::execution_context::ExecutionContext::new().into_shared();
        let mut execution = StepExecution::for_job("param", parameters, job_context);

        step.execute(&mut execution).unwrap();

        assert_eq!(execution.commit_count, 2);
        assert_eq!(writer.chunks.lock()[0].len(), 3);
    }

    #[test]
    fn invalid_chunk_sizes_should_be_configuration_errors() {
        let result = StepBuilder::new("zero")
            .chunk::<String, String>(0)
            .reader(ListItemReader::new(Vec::new()))
            .processor(PassThroughProcessor)
            .writer(RecordingWriter::default())
            .build();
        assert!(matches!(result, Err(BatchError::Configuration(_))));

        let step = StepBuilder::new("bad-param")
            .chunk::<String, String>(1)
            .chunk_size_parameter("chunkSize")
            .reader(ListItemReader::new(Vec::new()))
            .processor(PassThroughProcessor)
            .writer(RecordingWriter::default())
            .build()
            .unwrap();

        let parameters = JobParametersBuilder::new().add_string("chunkSize", "ten").build();
        let job_context = crate::core::execution_context::ExecutionContext::new().into_shared();
        let mut execution = StepExecution::for_job("bad-param", parameters, job_context);

        assert!(step.execute(&mut execution).is_err());
        assert!(execution.exit_status.exit_description.contains("chunk size"));
    }

    #[test]
    fn missing_writer_should_be_reported() {
        let result = StepBuilder::new("incomplete")
            .chunk::<String, String>(1)
            .reader(ListItemReader::new(Vec::new()))
            .processor(PassThroughProcessor)
            .build();

        assert!(matches!(result, Err(BatchError::Configuration(message)) if message.contains("writer")));
    }
}
