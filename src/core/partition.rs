use std::sync::Arc;

use log::{debug, info, warn};

use crate::BatchError;

use super::{
    execution_context::ExecutionContext,
    executor::{TaskExecutor, TaskHandle},
    listener::StepListener,
    step::{BatchStatus, Step, StepExecution, StepFactory, StepResult},
};

pub const MIN_ID_KEY: &str = "minId";
pub const MAX_ID_KEY: &str = "maxId";
pub const PARTITION_SEQUENCE_KEY: &str = "partitionSequence";

/// Ordered mapping from partition name to the context of that partition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionPlan {
    partitions: Vec<(String, ExecutionContext)>,
}

impl PartitionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, context: ExecutionContext) {
        self.partitions.push((name.into(), context));
    }

    pub fn get(&self, name: &str) -> Option<&ExecutionContext> {
        self.partitions
            .iter()
            .find(|(partition, _)| partition == name)
            .map(|(_, context)| context)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExecutionContext)> {
        self.partitions
            .iter()
            .map(|(name, context)| (name.as_str(), context))
    }

    /// `(minId, maxId)` of every partition, in plan order.
    pub fn ranges(&self) -> Vec<(i64, i64)> {
        self.partitions
            .iter()
            .filter_map(|(_, context)| Some((context.get_long(MIN_ID_KEY)?, context.get_long(MAX_ID_KEY)?)))
            .collect()
    }
}

impl IntoIterator for PartitionPlan {
    type Item = (String, ExecutionContext);
    type IntoIter = std::vec::IntoIter<(String, ExecutionContext)>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}

/// Splits the work of a step into independent partitions.
pub trait Partitioner: Send + Sync {
    fn partition(&self, grid_size: usize) -> Result<PartitionPlan, BatchError>;
}

impl<F> Partitioner for F
where
    F: Fn(usize) -> Result<PartitionPlan, BatchError> + Send + Sync,
{
    fn partition(&self, grid_size: usize) -> Result<PartitionPlan, BatchError> {
        self(grid_size)
    }
}

/// Splits `[min, max]` into at most `grid_size` contiguous ranges.
///
/// Every range holds `ceil((max - min + 1) / grid_size)` ids except the last
/// one, clipped to `max`. Ranges never overlap, never are empty and cover
/// every id exactly once. Partition `k` is named `partition{k}` and its context
/// carries `minId`, `maxId` and `partitionSequence`.
///
/// ```
/// use spring_batch_engine::core::partition::partition_range;
///
/// let plan = partition_range(1, 40_000, 8)?;
///
/// assert_eq!(plan.len(), 8);
/// assert_eq!(plan.ranges()[0], (1, 5_000));
/// assert_eq!(plan.ranges()[7], (35_001, 40_000));
/// # Ok::<(), spring_batch_engine::BatchError>(())
/// ```
pub fn partition_range(min: i64, max: i64, grid_size: usize) -> Result<PartitionPlan, BatchError> {
    if grid_size == 0 {
        return Err(BatchError::Configuration(
            "grid size must be at least 1".to_string(),
        ));
    }
    if min > max {
        return Err(BatchError::Configuration(format!(
            "invalid key range: min {} is greater than max {}",
            min, max
        )));
    }

    let (min, max) = (i128::from(min), i128::from(max));
    let grid = grid_size as i128;
    let target_size = (max - min + 1 + grid - 1) / grid;

    let mut plan = PartitionPlan::new();
    let mut start = min;
    let mut sequence: i64 = 0;

    while start <= max {
        let end = (start + target_size - 1).min(max);

        let mut context = ExecutionContext::new();
        context.put_long(MIN_ID_KEY, start as i64);
        context.put_long(MAX_ID_KEY, end as i64);
        context.put_long(PARTITION_SEQUENCE_KEY, sequence);
        plan.add(format!("partition{}", sequence), context);

        start += target_size;
        sequence += 1;
    }

    Ok(plan)
}

type BoundsFn = dyn Fn() -> Result<(i64, i64), BatchError> + Send + Sync;

/// [`Partitioner`] over an id range, either fixed or looked up at partition time.
pub struct RangePartitioner {
    bounds: Box<BoundsFn>,
}

impl RangePartitioner {
    pub fn new(min: i64, max: i64) -> Self {
        Self {
            bounds: Box::new(move || Ok((min, max))),
        }
    }

    /// Bounds computed on every call, e.g. from the min and max id of a table.
    pub fn from_fn<F>(bounds: F) -> Self
    where
        F: Fn() -> Result<(i64, i64), BatchError> + Send + Sync + 'static,
    {
        Self {
            bounds: Box::new(bounds),
        }
    }
}

impl Partitioner for RangePartitioner {
    fn partition(&self, grid_size: usize) -> Result<PartitionPlan, BatchError> {
        let (min, max) = (self.bounds)()?;
        partition_range(min, max, grid_size)
    }
}

/// Runs one worker step per partition on a [`TaskExecutor`] and waits for all.
///
/// The grid may be larger than the pool; extra partitions wait in the queue.
pub struct TaskExecutorPartitionHandler {
    executor: Arc<TaskExecutor>,
    step_factory: Arc<StepFactory>,
}

impl TaskExecutorPartitionHandler {
    pub fn new<F>(executor: Arc<TaskExecutor>, step_factory: F) -> Self
    where
        F: Fn(&StepExecution) -> Result<Box<dyn Step>, BatchError> + Send + Sync + 'static,
    {
        Self {
            executor,
            step_factory: Arc::new(step_factory),
        }
    }

    /// Executes every partition of `plan` and returns their executions in plan order.
    ///
    /// A partition that fails, or whose worker step cannot be built, yields a
    /// FAILED execution; siblings still run to completion.
    pub fn handle(
        &self,
        worker_name: &str,
        manager: &StepExecution,
        plan: PartitionPlan,
    ) -> Result<Vec<StepExecution>, BatchError> {
        let mut pending = Vec::with_capacity(plan.len());

        for (partition, context) in plan {
            let name = format!("{}:{}", worker_name, partition);
            let execution = manager.create_partition(&name, context);
            let factory = Arc::clone(&self.step_factory);
            let fallback = execution.clone();

            let submitted = self.executor.submit(move || {
                let mut execution = execution;
                match factory(&execution) {
                    Ok(step) => {
                        let _ = step.execute(&mut execution);
                    }
                    Err(err) => {
                        warn!("Unable to build step for {}: {}", execution.name, err);
                        execution.mark_failed(&err);
                    }
                }
                execution
            });
            if let Err(err) = &submitted {
                warn!("Unable to submit {}: {}", fallback.name, err);
            }

            pending.push((submitted, fallback));
        }

        debug!("Waiting for {} partitions of {}", pending.len(), worker_name);

        Ok(pending.into_iter().map(Self::await_partition).collect())
    }

    /// Terminal execution of one partition: the one its task returned, or the
    /// fallback marked FAILED when the task could not be submitted or panicked.
    fn await_partition(
        (submitted, mut fallback): (Result<TaskHandle<StepExecution>, BatchError>, StepExecution),
    ) -> StepExecution {
        match submitted.and_then(TaskHandle::join) {
            Ok(execution) => execution,
            Err(err) => {
                fallback.mark_failed(&err);
                fallback
            }
        }
    }
}

/// Manager step of a partitioned step.
///
/// Partitions the work, lets the handler run the partitions, then stores
/// the partition executions and the sum of their counts on its own execution.
/// It fails if any partition failed.
pub struct PartitionStep {
    name: String,
    worker_name: String,
    partitioner: Box<dyn Partitioner>,
    handler: TaskExecutorPartitionHandler,
    grid_size: usize,
    grid_size_parameter: Option<String>,
    listeners: Vec<StepListener>,
}

impl PartitionStep {
    fn resolve_grid_size(&self, step_execution: &StepExecution) -> Result<usize, BatchError> {
        let Some(parameter) = &self.grid_size_parameter else {
            return Ok(self.grid_size);
        };
        if !step_execution.job_parameters().contains_key(parameter) {
            return Ok(self.grid_size);
        }
        match step_execution.job_parameters().get_long(parameter) {
            Some(size) if size >= 1 => Ok(size as usize),
            _ => Err(BatchError::Configuration(format!(
                "job parameter '{}' is not a valid grid size",
                parameter
            ))),
        }
    }
}

impl Step for PartitionStep {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult {
        let grid_size = self.resolve_grid_size(step_execution)?;
        let plan = self.partitioner.partition(grid_size)?;

        info!(
            "Step {} split into {} partitions (grid size {})",
            self.name,
            plan.len(),
            grid_size
        );

        let partitions = self.handler.handle(&self.worker_name, step_execution, plan)?;

        let mut failed = Vec::new();
        for partition in &partitions {
            step_execution.add_counts(partition);
            if partition.status != BatchStatus::Completed {
                failed.push(partition.name.clone());
            }
        }
        step_execution.partition_executions = partitions;

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BatchError::Partition(format!(
                "{} of {} partitions failed: {}",
                failed.len(),
                step_execution.partition_executions.len(),
                failed.join(", ")
            )))
        }
    }

    fn listeners(&self) -> &[StepListener] {
        &self.listeners
    }
}

pub struct PartitionStepBuilder {
    name: String,
    worker_name: String,
    partitioner: Option<Box<dyn Partitioner>>,
    handler: Option<TaskExecutorPartitionHandler>,
    grid_size: usize,
    grid_size_parameter: Option<String>,
    listeners: Vec<StepListener>,
}

impl PartitionStepBuilder {
    pub fn new(name: &str, worker_name: &str) -> Self {
        Self {
            name: name.to_string(),
            worker_name: worker_name.to_string(),
            partitioner: None,
            handler: None,
            grid_size: 1,
            grid_size_parameter: None,
            listeners: Vec::new(),
        }
    }

    pub fn partitioner(mut self, partitioner: impl Partitioner + 'static) -> Self {
        self.partitioner = Some(Box::new(partitioner));
        self
    }

    pub fn partition_handler(mut self, handler: TaskExecutorPartitionHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Job parameter overriding the grid size for a run.
    pub fn grid_size_parameter(mut self, key: &str) -> Self {
        self.grid_size_parameter = Some(key.to_string());
        self
    }

    pub fn listener(mut self, listener: StepListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<PartitionStep, BatchError> {
        if self.grid_size == 0 {
            return Err(BatchError::Configuration(format!(
                "grid size of step '{}' must be at least 1",
                self.name
            )));
        }
        let partitioner = self.partitioner.ok_or_else(|| {
            BatchError::Configuration(format!("step '{}' has no partitioner", self.name))
        })?;
        let handler = self.handler.ok_or_else(|| {
            BatchError::Configuration(format!("step '{}' has no partition handler", self.name))
        })?;

        Ok(PartitionStep {
            name: self.name,
            worker_name: self.worker_name,
            partitioner,
            handler,
            grid_size: self.grid_size,
            grid_size_parameter: self.grid_size_parameter,
            listeners: self.listeners,
        })
    }
}
