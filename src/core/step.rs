use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{error, info};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    chunk::ChunkOrientedStepBuilder,
    execution_context::{ExecutionContext, SharedExecutionContext},
    listener::StepListener,
    parameters::JobParameters,
    partition::{PartitionStepBuilder, Partitioner},
    tasklet::{Tasklet, TaskletStepBuilder},
};

pub type StepResult = Result<(), BatchError>;

/// Lifecycle state of a step or job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchStatus {
    /// Created, not yet running.
    #[default]
    Starting,
    Started,
    Completed,
    Failed,
    /// Ended early on request of the step itself.
    Stopped,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// The worse of two statuses: `Failed` over `Stopped` over anything else.
    pub fn max(self, other: BatchStatus) -> BatchStatus {
        fn rank(status: BatchStatus) -> u8 {
            match status {
                BatchStatus::Failed => 3,
                BatchStatus::Stopped => 2,
                BatchStatus::Starting | BatchStatus::Started => 1,
                BatchStatus::Completed => 0,
            }
        }
        if rank(other) > rank(self) { other } else { self }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Exit code and description reported by a finished execution.
///
/// The code is free text so listeners and deciders can use their own outcomes;
/// the engine produces `COMPLETED`, `FAILED`, `STOPPED` and `NOOP`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: String,
    pub exit_description: String,
}

impl ExitStatus {
    pub fn new(exit_code: &str) -> Self {
        Self {
            exit_code: exit_code.to_string(),
            exit_description: String::new(),
        }
    }

    pub fn executing() -> Self {
        Self::new("EXECUTING")
    }

    pub fn completed() -> Self {
        Self::new("COMPLETED")
    }

    pub fn failed() -> Self {
        Self::new("FAILED")
    }

    pub fn stopped() -> Self {
        Self::new("STOPPED")
    }

    pub fn noop() -> Self {
        Self::new("NOOP")
    }

    pub fn unknown() -> Self {
        Self::new("UNKNOWN")
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    pub fn is_failed(&self) -> bool {
        self.exit_code == "FAILED"
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            f.write_str(&self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}

/// One run of one step, or of one partition of a partitioned step.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    pub name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Items read successfully, including the ones later filtered or skipped
    pub read_count: usize,
    /// Items handed to the writer in committed chunks
    pub write_count: usize,
    /// Items the processor chose not to pass on
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub process_skip_count: usize,
    pub write_skip_count: usize,
    pub commit_count: usize,
    /// Step-scoped scratch space; for a partition it starts as the partition's plan entry
    pub execution_context: ExecutionContext,
    /// Sub-executions of a partitioned step, in plan order
    pub partition_executions: Vec<StepExecution>,
    terminate_only: bool,
    job_parameters: JobParameters,
    job_context: Option<SharedExecutionContext>,
}

impl StepExecution {
    /// Standalone execution, outside of any job.
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            write_skip_count: 0,
            commit_count: 0,
            execution_context: ExecutionContext::new(),
            partition_executions: Vec::new(),
            terminate_only: false,
            job_parameters: JobParameters::new(),
            job_context: None,
        }
    }

    pub fn for_job(name: &str, job_parameters: JobParameters, job_context: SharedExecutionContext) -> Self {
        Self {
            job_parameters,
            job_context: Some(job_context),
            ..Self::new(name)
        }
    }

    /// Execution of one partition: same job parameters and job context,
    /// private copy of the partition context.
    pub fn create_partition(&self, name: &str, context: ExecutionContext) -> Self {
        Self {
            execution_context: context,
            job_parameters: self.job_parameters.clone(),
            job_context: self.job_context.clone(),
            ..Self::new(name)
        }
    }

    pub fn job_parameters(&self) -> &JobParameters {
        &self.job_parameters
    }

    /// Context shared by every step of the owning job, if any.
    pub fn job_context(&self) -> Option<&SharedExecutionContext> {
        self.job_context.as_ref()
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    /// Ends the step as STOPPED once the current work unit returns.
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only
    }

    pub fn mark_failed(&mut self, error: &BatchError) {
        self.status = BatchStatus::Failed;
        self.exit_status = ExitStatus::failed().with_description(error.to_string());
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    pub(crate) fn add_counts(&mut self, other: &StepExecution) {
        self.read_count += other.read_count;
        self.write_count += other.write_count;
        self.filter_count += other.filter_count;
        self.read_skip_count += other.read_skip_count;
        self.process_skip_count += other.process_skip_count;
        self.write_skip_count += other.write_skip_count;
        self.commit_count += other.commit_count;
    }
}

/// A unit of work of a job.
///
/// Implementors supply [`do_execute`](Step::do_execute); the provided
/// [`execute`](Step::execute) wraps it with the status lifecycle and the
/// registered listeners:
///
/// 1. status `Started`, start time, `before_step`
/// 2. `do_execute`; success gives `Completed` (or `Stopped` when the step
///    asked to terminate), an error gives `Failed`
/// 3. `after_step`, whose exit status override wins over the computed one
/// 4. end time
///
/// `execute` returns an error unless the step ended `Completed`.
pub trait Step: Send + Sync {
    fn get_name(&self) -> &str;

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult;

    fn listeners(&self) -> &[StepListener] {
        &[]
    }

    fn execute(&self, step_execution: &mut StepExecution) -> StepResult {
        step_execution.status = BatchStatus::Started;
        step_execution.start_time = Some(Utc::now());

        info!(
            "Start of step: {}, id: {}",
            step_execution.name, step_execution.id
        );

        for listener in self.listeners() {
            listener.fire_before(step_execution);
        }

        match self.do_execute(step_execution) {
            Ok(()) if step_execution.terminate_only => {
                step_execution.status = BatchStatus::Stopped;
                step_execution.exit_status = ExitStatus::stopped();
            }
            Ok(()) => {
                step_execution.status = BatchStatus::Completed;
                step_execution.exit_status = ExitStatus::completed();
            }
            Err(err) => {
                error!("Step {} failed: {}", step_execution.name, err);
                step_execution.mark_failed(&err);
            }
        }

        step_execution.end_time = Some(Utc::now());

        for listener in self.listeners() {
            if let Some(exit_status) = listener.fire_after(step_execution) {
                if exit_status.is_failed() {
                    step_execution.status = BatchStatus::Failed;
                }
                step_execution.exit_status = exit_status;
            }
        }

        info!(
            "End of step: {}, id: {}, status: {}, read: {}, write: {}, skip: {}",
            step_execution.name,
            step_execution.id,
            step_execution.exit_status,
            step_execution.read_count,
            step_execution.write_count,
            step_execution.skip_count()
        );

        if step_execution.status == BatchStatus::Completed {
            Ok(())
        } else {
            Err(BatchError::Step(step_execution.name.clone()))
        }
    }
}

impl<S: Step + ?Sized> Step for Arc<S> {
    fn get_name(&self) -> &str {
        (**self).get_name()
    }

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult {
        (**self).do_execute(step_execution)
    }

    fn listeners(&self) -> &[StepListener] {
        (**self).listeners()
    }

    fn execute(&self, step_execution: &mut StepExecution) -> StepResult {
        (**self).execute(step_execution)
    }
}

/// Builds the real step of an execution on demand.
///
/// Factories see the step execution, so they can read job parameters and the
/// partition context before constructing readers and writers.
pub type StepFactory = dyn Fn(&StepExecution) -> Result<Box<dyn Step>, BatchError> + Send + Sync;

/// Step whose components are built per execution by a [`StepFactory`].
///
/// Only the listeners of the scoped step itself fire; the lifecycle of the
/// inner step is folded into the outer one.
pub struct ScopedStep {
    name: String,
    factory: Arc<StepFactory>,
    listeners: Vec<StepListener>,
}

impl ScopedStep {
    pub fn new<F>(name: &str, factory: F) -> Self
    where
        F: Fn(&StepExecution) -> Result<Box<dyn Step>, BatchError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            factory: Arc::new(factory),
            listeners: Vec::new(),
        }
    }

    pub fn listener(mut self, listener: StepListener) -> Self {
        self.listeners.push(listener);
        self
    }
}

impl Step for ScopedStep {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult {
        let step = (self.factory)(step_execution)?;
        step.do_execute(step_execution)
    }

    fn listeners(&self) -> &[StepListener] {
        &self.listeners
    }
}

/// Entry point of every step builder.
///
/// ```
/// use spring_batch_engine::{
///     core::{
///         item::PassThroughProcessor,
///         step::{Step, StepBuilder, StepExecution},
///     },
///     item::list::ListItemReader,
///     BatchError,
/// };
///
/// struct Discard;
///
/// impl spring_batch_engine::core::item::ItemWriter<i32> for Discard {
///     fn write(&self, _items: &[i32]) -> Result<(), BatchError> {
///         Ok(())
///     }
/// }
///
/// let step = StepBuilder::new("numbers")
///     .chunk::<i32, i32>(2)
///     .reader(ListItemReader::new(vec![1, 2, 3]))
///     .processor(PassThroughProcessor)
///     .writer(Discard)
///     .build()?;
///
/// let mut execution = StepExecution::new(step.get_name());
/// step.execute(&mut execution)?;
///
/// assert_eq!(execution.write_count, 3);
/// assert_eq!(execution.commit_count, 2);
/// # Ok::<(), BatchError>(())
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Builder named with a random identifier.
    pub fn unnamed() -> Self {
        Self { name: build_name() }
    }

    pub fn chunk<I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }

    pub fn tasklet(self, tasklet: impl Tasklet + 'static) -> TaskletStepBuilder {
        TaskletStepBuilder::new(&self.name).tasklet(tasklet)
    }

    /// Manager step running `worker` steps over the plan of `partitioner`.
    pub fn partitioner(self, worker_name: &str, partitioner: impl Partitioner + 'static) -> PartitionStepBuilder {
        PartitionStepBuilder::new(&self.name, worker_name).partitioner(partitioner)
    }

    pub fn scoped<F>(self, factory: F) -> ScopedStep
    where
        F: Fn(&StepExecution) -> Result<Box<dyn Step>, BatchError> + Send + Sync + 'static,
    {
        ScopedStep::new(&self.name, factory)
    }
}
