use log::debug;

use crate::BatchError;

use super::{
    listener::StepListener,
    step::{Step, StepExecution, StepResult},
};

/// Whether a tasklet wants to be called again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// The tasklet can continue to execute.
    Continuable,
    /// The tasklet has finished executing.
    Finished,
}

/// Single task run by a [`TaskletStep`] until it reports [`RepeatStatus::Finished`].
///
/// The tasklet sees the step execution, so it can read job parameters, fill
/// the step context or write to the job context directly.
pub trait Tasklet: Send + Sync {
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError>;
}

impl<F> Tasklet for F
where
    F: Fn(&mut StepExecution) -> Result<RepeatStatus, BatchError> + Send + Sync,
{
    fn execute(&self, step_execution: &mut StepExecution) -> Result<RepeatStatus, BatchError> {
        self(step_execution)
    }
}

pub struct TaskletStep {
    name: String,
    tasklet: Box<dyn Tasklet>,
    listeners: Vec<StepListener>,
}

impl Step for TaskletStep {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn do_execute(&self, step_execution: &mut StepExecution) -> StepResult {
        let mut iteration = 0;
        loop {
            iteration += 1;
            let status = self.tasklet.execute(step_execution)?;
            debug!("Tasklet {} iteration {}: {:?}", self.name, iteration, status);

            if status == RepeatStatus::Finished || step_execution.is_terminate_only() {
                return Ok(());
            }
        }
    }

    fn listeners(&self) -> &[StepListener] {
        &self.listeners
    }
}

pub struct TaskletStepBuilder {
    name: String,
    tasklet: Option<Box<dyn Tasklet>>,
    listeners: Vec<StepListener>,
}

impl TaskletStepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasklet: None,
            listeners: Vec::new(),
        }
    }

    pub fn tasklet(mut self, tasklet: impl Tasklet + 'static) -> Self {
        self.tasklet = Some(Box::new(tasklet));
        self
    }

    pub fn listener(mut self, listener: StepListener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<TaskletStep, BatchError> {
        let tasklet = self.tasklet.ok_or_else(|| {
            BatchError::Configuration(format!("step '{}' has no tasklet", self.name))
        })?;

        Ok(TaskletStep {
            name: self.name,
            tasklet,
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

    use crate::core::step::{BatchStatus, StepBuilder};

    use super::*;

    #[test]
    fn continuable_tasklet_should_be_called_until_finished() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let step = StepBuilder::new("repeat")
            .tasklet(move |execution: &mut StepExecution| {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                execution.execution_context.put_long("calls", call as i64);
                if call < 3 {
                    Ok(RepeatStatus::Continuable)
                } else {
                    Ok(RepeatStatus::Finished)
                }
            })
            .build()
            .unwrap();

        let mut execution = StepExecution::new("repeat");
        step.execute(&mut execution).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(execution.execution_context.get_long("calls"), Some(3));
        assert_eq!(execution.status, BatchStatus::Completed);
    }

    #[test]
    fn failing_tasklet_should_fail_the_step() {
        let step = StepBuilder::new("broken")
            .tasklet(|_: &mut StepExecution| -> Result<RepeatStatus, BatchError> {
                Err(BatchError::Step("no data".to_string()))
            })
            .build()
            .unwrap();

        let mut execution = StepExecution::new("broken");

        assert!(step.execute(&mut execution).is_err());
        assert_eq!(execution.status, BatchStatus::Failed);
    }

    #[test]
    fn terminate_only_should_end_a_continuable_loop() {
        let step = StepBuilder::new("stop")
            .tasklet(|execution: &mut StepExecution| {
                execution.set_terminate_only();
                Ok(RepeatStatus::Continuable)
            })
            .build()
            .unwrap();

        let mut execution = StepExecution::new("stop");
        let _ = step.execute(&mut execution);

        assert_eq!(execution.status, BatchStatus::Stopped);
    }

    #[test]
    fn builder_without_tasklet_should_fail() {
        assert!(TaskletStepBuilder::new("empty").build().is_err());
    }
}
