use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    execution_context::{ExecutionContext, SharedExecutionContext},
    executor::TaskExecutor,
    listener::JobListener,
    parameters::JobParameters,
    step::{BatchStatus, ExitStatus, Step, StepExecution},
};

/// Type alias for job execution results.
pub type JobResult<T> = Result<T, BatchError>;

/// Outcome returned by [`JobParameterDecider`] when its parameter is present.
pub const CONTINUE: &str = "CONTINUE";
/// Outcome returned by [`JobParameterDecider`] when its parameter is absent.
pub const COMPLETED: &str = "COMPLETED";
/// Transition pattern matching any outcome.
pub const ANY: &str = "*";

/// Represents a job that can be executed.
///
/// A job is a flow of steps, decisions and splits run against a set of job
/// parameters. Running it always produces a [`JobExecution`]: a failed step
/// shows up as a `Failed` status on the execution, not as an `Err`.
pub trait Job: Send + Sync {
    fn get_name(&self) -> &str;

    /// Runs the job and returns the execution once it reached a terminal status.
    fn run(&self, parameters: JobParameters) -> JobResult<JobExecution>;
}

/// Identity of a job run: the job name and its identifying parameters.
///
/// Two launches with the same name and identifying parameters belong to the
/// same instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    /// Unique identifier for this job instance
    pub id: Uuid,
    pub job_name: String,
    key: String,
}

impl JobInstance {
    pub fn new(job_name: &str, parameters: &JobParameters) -> Self {
        let identifying: Vec<String> = parameters
            .identifying()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();

        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            key: format!("{}[{}]", job_name, identifying.join(",")),
        }
    }

    /// Stable key derived from the job name and the identifying parameters.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// One run attempt of a [`JobInstance`].
///
/// Holds the status of the run, the executions of every step that ran, in
/// order, and the context shared by all of them.
#[derive(Debug)]
pub struct JobExecution {
    /// Unique identifier for this run
    pub id: Uuid,
    pub job_instance: JobInstance,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub step_executions: Vec<StepExecution>,
    execution_context: SharedExecutionContext,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            start_time: None,
            end_time: None,
            step_executions: Vec::new(),
            execution_context: ExecutionContext::new().into_shared(),
        }
    }

    /// Context shared by every step of the run.
    pub fn execution_context(&self) -> &SharedExecutionContext {
        &self.execution_context
    }

    pub fn step_execution(&self, name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .find(|execution| execution.name == name)
    }

    pub fn last_step_execution(&self) -> Option<&StepExecution> {
        self.step_executions.last()
    }

    /// Sum of the write counts of every step.
    pub fn write_count(&self) -> usize {
        self.step_executions
            .iter()
            .map(|execution| execution.write_count)
            .sum()
    }

    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    /// Branch of this execution for one flow of a split: same identity,
    /// parameters and shared context, no step executions yet.
    fn fork(&self) -> JobExecution {
        JobExecution {
            id: self.id,
            job_instance: self.job_instance.clone(),
            job_parameters: self.job_parameters.clone(),
            status: self.status,
            exit_status: self.exit_status.clone(),
            start_time: self.start_time,
            end_time: None,
            step_executions: Vec::new(),
            execution_context: Arc::clone(&self.execution_context),
        }
    }
}

/// Chooses the next branch of a flow from the state of the job execution.
pub trait JobExecutionDecider: Send + Sync {
    /// Returns the outcome matched against the transitions of the decision.
    fn decide(&self, job_execution: &JobExecution, step_execution: Option<&StepExecution>) -> String;
}

impl<F> JobExecutionDecider for F
where
    F: Fn(&JobExecution, Option<&StepExecution>) -> String + Send + Sync,
{
    fn decide(&self, job_execution: &JobExecution, step_execution: Option<&StepExecution>) -> String {
        self(job_execution, step_execution)
    }
}

/// Decider returning [`CONTINUE`] when a job parameter is present and
/// [`COMPLETED`] otherwise.
pub struct JobParameterDecider {
    key: String,
}

impl JobParameterDecider {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl JobExecutionDecider for JobParameterDecider {
    fn decide(&self, job_execution: &JobExecution, _step_execution: Option<&StepExecution>) -> String {
        if job_execution.job_parameters.contains_key(&self.key) {
            CONTINUE.to_string()
        } else {
            COMPLETED.to_string()
        }
    }
}

/// Where a matched transition leads.
pub enum TransitionTarget {
    /// Run this flow, then carry on after the decision.
    Flow(Arc<Flow>),
    /// End the job, COMPLETED.
    End,
    /// End the job, FAILED.
    Fail,
}

pub struct Transition {
    pattern: String,
    target: TransitionTarget,
}

impl Transition {
    pub fn new(pattern: &str, target: TransitionTarget) -> Self {
        Self {
            pattern: pattern.to_string(),
            target,
        }
    }

    fn matches(&self, outcome: &str) -> bool {
        self.pattern == outcome || self.pattern == ANY
    }
}

pub enum FlowElement {
    Step(Arc<dyn Step>),
    Decision {
        decider: Arc<dyn JobExecutionDecider>,
        transitions: Vec<Transition>,
    },
    /// Flows run concurrently on the executor; the split waits for all of them.
    Split {
        executor: Arc<TaskExecutor>,
        flows: Vec<Arc<Flow>>,
    },
    Flow(Arc<Flow>),
}

/// Ordered elements run one after the other.
pub struct Flow {
    name: String,
    elements: Vec<FlowElement>,
}

impl Flow {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowOutcome {
    /// Every element ran; the enclosing flow goes on.
    Continue,
    /// A decision ended the job successfully.
    End,
    Failed,
    Stopped,
}

impl FlowOutcome {
    fn rank(self) -> u8 {
        match self {
            FlowOutcome::Continue => 0,
            FlowOutcome::End => 1,
            FlowOutcome::Stopped => 2,
            FlowOutcome::Failed => 3,
        }
    }

    fn status(self) -> BatchStatus {
        match self {
            FlowOutcome::Continue | FlowOutcome::End => BatchStatus::Completed,
            FlowOutcome::Failed => BatchStatus::Failed,
            FlowOutcome::Stopped => BatchStatus::Stopped,
        }
    }
}

fn run_flow(flow: &Flow, execution: &mut JobExecution) -> FlowOutcome {
    debug!("Start of flow: {}", flow.name);

    for element in &flow.elements {
        let outcome = match element {
            FlowElement::Step(step) => run_step(step.as_ref(), execution),
            FlowElement::Decision {
                decider,
                transitions,
            } => run_decision(decider.as_ref(), transitions, execution),
            FlowElement::Split { executor, flows } => run_split(executor, flows, execution),
            FlowElement::Flow(inner) => run_flow(inner, execution),
        };

        if outcome != FlowOutcome::Continue {
            debug!("End of flow: {} ({:?})", flow.name, outcome);
            return outcome;
        }
    }

    debug!("End of flow: {}", flow.name);
    FlowOutcome::Continue
}

fn run_step(step: &dyn Step, execution: &mut JobExecution) -> FlowOutcome {
    let mut step_execution = StepExecution::for_job(
        step.get_name(),
        execution.job_parameters.clone(),
        Arc::clone(&execution.execution_context),
    );

    let _ = step.execute(&mut step_execution);

    let outcome = match step_execution.status {
        BatchStatus::Completed => FlowOutcome::Continue,
        BatchStatus::Stopped => FlowOutcome::Stopped,
        _ => FlowOutcome::Failed,
    };
    execution.step_executions.push(step_execution);
    outcome
}

fn run_decision(
    decider: &dyn JobExecutionDecider,
    transitions: &[Transition],
    execution: &mut JobExecution,
) -> FlowOutcome {
    let outcome = decider.decide(&*execution, execution.last_step_execution());
    info!("Decision outcome: {}", outcome);

    let transition = transitions
        .iter()
        .find(|transition| transition.pattern == outcome)
        .or_else(|| transitions.iter().find(|transition| transition.matches(&outcome)));

    match transition.map(|transition| &transition.target) {
        Some(TransitionTarget::Flow(flow)) => run_flow(flow, execution),
        Some(TransitionTarget::Fail) => FlowOutcome::Failed,
        Some(TransitionTarget::End) | None => FlowOutcome::End,
    }
}

fn run_split(executor: &Arc<TaskExecutor>, flows: &[Arc<Flow>], execution: &mut JobExecution) -> FlowOutcome {
    let mut branches = Vec::with_capacity(flows.len());

    for flow in flows {
        let flow = Arc::clone(flow);
        let fork = execution.fork();
        match executor.submit(move || {
            let mut fork = fork;
            let outcome = run_flow(&flow, &mut fork);
            (outcome, fork.step_executions)
        }) {
            Ok(handle) => branches.push(Some(handle)),
            Err(err) => {
                error!("Unable to start flow {}: {}", flow_name(flows, branches.len()), err);
                branches.push(None);
            }
        }
    }

    let mut outcome = FlowOutcome::Continue;
    for (index, branch) in branches.into_iter().enumerate() {
        let branch_outcome = match branch.map(|handle| handle.join()) {
            Some(Ok((branch_outcome, step_executions))) => {
                execution.step_executions.extend(step_executions);
                branch_outcome
            }
            Some(Err(err)) => {
                error!("Flow {} aborted: {}", flow_name(flows, index), err);
                FlowOutcome::Failed
            }
            None => FlowOutcome::Failed,
        };
        if branch_outcome.rank() > outcome.rank() {
            outcome = branch_outcome;
        }
    }

    // An END inside one branch only ends that branch.
    if outcome == FlowOutcome::End {
        FlowOutcome::Continue
    } else {
        outcome
    }
}

fn flow_name(flows: &[Arc<Flow>], index: usize) -> &str {
    flows.get(index).map_or("?", |flow| flow.get_name())
}

/// Job made of one top-level [`Flow`].
pub struct SimpleJob {
    id: Uuid,
    name: String,
    flow: Flow,
    listeners: Vec<JobListener>,
}

impl SimpleJob {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Job for SimpleJob {
    fn get_name(&self) -> &str {
        &self.name
    }

    /// Runs the flow of the job.
    ///
    /// This method:
    /// 1. Marks the execution started and fires `before_job`
    /// 2. Runs every element of the flow until one fails, stops or ends the job
    /// 3. Derives the job status: COMPLETED unless a step failed or stopped
    /// 4. Records the end time and fires `after_job`
    fn run(&self, parameters: JobParameters) -> JobResult<JobExecution> {
        let instance = JobInstance::new(&self.name, &parameters);
        let mut execution = JobExecution::new(instance, parameters);

        execution.status = BatchStatus::Started;
        execution.start_time = Some(Utc::now());

        info!("Start of job: {}, id: {}", self.name, execution.id);

        for listener in &self.listeners {
            listener.fire_before(&execution);
        }

        let outcome = run_flow(&self.flow, &mut execution);

        execution.status = outcome.status();
        execution.exit_status = match execution.status {
            BatchStatus::Completed => ExitStatus::completed(),
            BatchStatus::Stopped => ExitStatus::stopped(),
            _ => {
                let description = execution
                    .step_executions
                    .iter()
                    .filter(|step| step.status == BatchStatus::Failed)
                    .map(|step| format!("{}: {}", step.name, step.exit_status.exit_description))
                    .collect::<Vec<_>>()
                    .join("; ");
                ExitStatus::failed().with_description(description)
            }
        };
        execution.end_time = Some(Utc::now());

        for listener in &self.listeners {
            listener.fire_after(&execution);
        }

        info!(
            "End of job: {}, id: {}, status: {}",
            self.name, execution.id, execution.status
        );

        Ok(execution)
    }
}

/// Receives the elements built by a [`DecisionBuilder`].
pub trait FlowContainer: Sized {
    type Output;

    fn push_element(&mut self, element: FlowElement);

    fn finish(self) -> Self::Output;
}

/// Builder for a [`Flow`], used for the branches of a split or of a decision.
#[derive(Default)]
pub struct FlowBuilder {
    name: String,
    elements: Vec<FlowElement>,
}

impl FlowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn start(self, step: impl Step + 'static) -> Self {
        self.next(step)
    }

    pub fn next(mut self, step: impl Step + 'static) -> Self {
        self.elements.push(FlowElement::Step(Arc::new(step)));
        self
    }

    pub fn flow(mut self, flow: Flow) -> Self {
        self.elements.push(FlowElement::Flow(Arc::new(flow)));
        self
    }

    pub fn split(mut self, executor: Arc<TaskExecutor>, flows: Vec<Flow>) -> Self {
        self.elements.push(FlowElement::Split {
            executor,
            flows: flows.into_iter().map(Arc::new).collect(),
        });
        self
    }

    pub fn decide(self, decider: impl JobExecutionDecider + 'static) -> DecisionBuilder<Self> {
        DecisionBuilder::new(self, decider)
    }

    pub fn build(self) -> Flow {
        Flow {
            name: self.name,
            elements: self.elements,
        }
    }
}

impl FlowContainer for FlowBuilder {
    type Output = Flow;

    fn push_element(&mut self, element: FlowElement) {
        self.elements.push(element);
    }

    fn finish(self) -> Flow {
        self.build()
    }
}

/// Builder for the transitions of a decision.
pub struct DecisionBuilder<P> {
    parent: P,
    decider: Arc<dyn JobExecutionDecider>,
    transitions: Vec<Transition>,
}

impl<P: FlowContainer> DecisionBuilder<P> {
    fn new(parent: P, decider: impl JobExecutionDecider + 'static) -> Self {
        Self {
            parent,
            decider: Arc::new(decider),
            transitions: Vec::new(),
        }
    }

    /// Starts a transition for an exact outcome, or [`ANY`].
    pub fn on(self, pattern: &str) -> TransitionBuilder<P> {
        TransitionBuilder {
            decision: self,
            pattern: pattern.to_string(),
        }
    }

    /// Closes the decision and returns to the enclosing builder.
    pub fn done(mut self) -> P {
        self.parent.push_element(FlowElement::Decision {
            decider: self.decider,
            transitions: self.transitions,
        });
        self.parent
    }

    pub fn build(self) -> P::Output {
        self.done().finish()
    }
}

pub struct TransitionBuilder<P> {
    decision: DecisionBuilder<P>,
    pattern: String,
}

impl<P: FlowContainer> TransitionBuilder<P> {
    fn target(mut self, target: TransitionTarget) -> DecisionBuilder<P> {
        self.decision
            .transitions
            .push(Transition::new(&self.pattern, target));
        self.decision
    }

    pub fn to(self, step: impl Step + 'static) -> DecisionBuilder<P> {
        let flow = FlowBuilder::new(&format!("{}-flow", step.get_name()))
            .start(step)
            .build();
        self.to_flow(flow)
    }

    pub fn to_flow(self, flow: Flow) -> DecisionBuilder<P> {
        self.target(TransitionTarget::Flow(Arc::new(flow)))
    }

    pub fn end(self) -> DecisionBuilder<P> {
        self.target(TransitionTarget::End)
    }

    pub fn fail(self) -> DecisionBuilder<P> {
        self.target(TransitionTarget::Fail)
    }
}

/// Builder for creating a [`SimpleJob`].
///
/// # Example
///
/// ```
/// use spring_batch_engine::core::{
///     job::{Job, JobBuilder, JobParameterDecider, CONTINUE},
///     parameters::JobParametersBuilder,
///     step::{BatchStatus, StepBuilder, StepExecution},
///     tasklet::RepeatStatus,
/// };
///
/// let step = |name: &str| {
///     StepBuilder::new(name)
///         .tasklet(|_: &mut StepExecution| Ok(RepeatStatus::Finished))
///         .build()
///         .unwrap()
/// };
///
/// let job = JobBuilder::new()
///     .name("userJob")
///     .start(step("saveUserStep"))
///     .next(step("userLevelUpStep"))
///     .decide(JobParameterDecider::new("date"))
///     .on(CONTINUE)
///     .to(step("orderStatisticsStep"))
///     .build();
///
/// let execution = job.run(JobParametersBuilder::new().build()).unwrap();
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(execution.step_executions.len(), 2);
/// ```
pub struct JobBuilder {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    elements: Vec<FlowElement>,
    listeners: Vec<JobListener>,
}

impl Default for JobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            elements: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the first step of the job.
    ///
    /// This method is semantically identical to `next()` but provides better readability
    /// when constructing the initial step of a job.
    pub fn start(self, step: impl Step + 'static) -> Self {
        self.next(step)
    }

    /// Adds a step to the job.
    ///
    /// Steps are executed in the order they are added.
    pub fn next(mut self, step: impl Step + 'static) -> Self {
        self.elements.push(FlowElement::Step(Arc::new(step)));
        self
    }

    pub fn flow(mut self, flow: Flow) -> Self {
        self.elements.push(FlowElement::Flow(Arc::new(flow)));
        self
    }

    /// Runs `flows` concurrently on `executor`; the job goes on once all of them ended.
    pub fn split(mut self, executor: Arc<TaskExecutor>, flows: Vec<Flow>) -> Self {
        self.elements.push(FlowElement::Split {
            executor,
            flows: flows.into_iter().map(Arc::new).collect(),
        });
        self
    }

    pub fn decide(self, decider: impl JobExecutionDecider + 'static) -> DecisionBuilder<Self> {
        DecisionBuilder::new(self, decider)
    }

    pub fn listener(mut self, listener: JobListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Builds the job. If no name has been provided, a random name is generated.
    pub fn build(self) -> SimpleJob {
        let name = self.name.unwrap_or_else(build_name);
        SimpleJob {
            id: Uuid::new_v4(),
            flow: Flow {
                name: name.clone(),
                elements: self.elements,
            },
            name,
            listeners: self.listeners,
        }
    }
}

impl FlowContainer for JobBuilder {
    type Output = SimpleJob;

    fn push_element(&mut self, element: FlowElement) {
        self.elements.push(element);
    }

    fn finish(self) -> SimpleJob {
        self.build()
    }
}
