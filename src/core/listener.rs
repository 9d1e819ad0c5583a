use std::sync::Arc;

use log::debug;

use super::{
    job::JobExecution,
    step::{BatchStatus, ExitStatus, StepExecution},
};

type BeforeJob = dyn Fn(&JobExecution) + Send + Sync;
type AfterJob = dyn Fn(&JobExecution) + Send + Sync;
type BeforeStep = dyn Fn(&StepExecution) + Send + Sync;
type AfterStep = dyn Fn(&StepExecution) -> Option<ExitStatus> + Send + Sync;

/// Callbacks fired around a job run.
///
/// `after_job` sees the final status and end time.
#[derive(Clone, Default)]
pub struct JobListener {
    before_job: Option<Arc<BeforeJob>>,
    after_job: Option<Arc<AfterJob>>,
}

impl JobListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_job(mut self, callback: impl Fn(&JobExecution) + Send + Sync + 'static) -> Self {
        self.before_job = Some(Arc::new(callback));
        self
    }

    pub fn after_job(mut self, callback: impl Fn(&JobExecution) + Send + Sync + 'static) -> Self {
        self.after_job = Some(Arc::new(callback));
        self
    }

    pub(crate) fn fire_before(&self, execution: &JobExecution) {
        if let Some(callback) = &self.before_job {
            callback(execution);
        }
    }

    pub(crate) fn fire_after(&self, execution: &JobExecution) {
        if let Some(callback) = &self.after_job {
            callback(execution);
        }
    }
}

/// Callbacks fired around a step run.
///
/// `after_step` may return an [`ExitStatus`] that replaces the one computed by
/// the step; an override with code `FAILED` also marks the step failed.
///
/// ```
/// use spring_batch_engine::core::{listener::StepListener, step::ExitStatus};
///
/// let listener = StepListener::new().after_step(|execution| {
///     (execution.write_count == 0).then(ExitStatus::failed)
/// });
/// # let _ = listener;
/// ```
#[derive(Clone, Default)]
pub struct StepListener {
    before_step: Option<Arc<BeforeStep>>,
    after_step: Option<Arc<AfterStep>>,
}

impl StepListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_step(mut self, callback: impl Fn(&StepExecution) + Send + Sync + 'static) -> Self {
        self.before_step = Some(Arc::new(callback));
        self
    }

    pub fn after_step(
        mut self,
        callback: impl Fn(&StepExecution) -> Option<ExitStatus> + Send + Sync + 'static,
    ) -> Self {
        self.after_step = Some(Arc::new(callback));
        self
    }

    /// Listener copying the given step context keys into the job context once
    /// the step completes, so later steps can read them.
    pub fn promote_keys(keys: &[&str]) -> Self {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        Self::new().after_step(move |execution| {
            if execution.status != BatchStatus::Completed {
                return None;
            }
            if let Some(job_context) = execution.job_context() {
                debug!("Promoting {:?} from step {}", keys, execution.name);
                job_context
                    .write()
                    .merge_keys(&execution.execution_context, &keys);
            }
            None
        })
    }

    pub(crate) fn fire_before(&self, execution: &StepExecution) {
        if let Some(callback) = &self.before_step {
            callback(execution);
        }
    }

    pub(crate) fn fire_after(&self, execution: &StepExecution) -> Option<ExitStatus> {
        self.after_step
            .as_ref()
            .and_then(|callback| callback(execution))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        BatchError,
        core::{execution_context::ExecutionContext, parameters::JobParameters},
    };

    use super::*;

    #[test]
    fn promote_keys_should_copy_only_selected_entries() {
        let job_context = ExecutionContext::new().into_shared();
        let mut execution =
            StepExecution::for_job("step1", JobParameters::new(), Arc::clone(&job_context));
        execution.execution_context.put_string("stepKey", "step1 value");
        execution.execution_context.put_string("scratch", "ignored");

        let listener = StepListener::promote_keys(&["stepKey"]);
        assert!(listener.fire_after(&execution).is_none());

        let job_context = job_context.read();
        assert_eq!(job_context.get_string("stepKey"), Some("step1 value"));
        assert!(!job_context.contains_key("scratch"));
    }

    #[test]
    fn promote_keys_should_ignore_failed_steps() {
        let job_context = ExecutionContext::new().into_shared();
        let mut execution =
            StepExecution::for_job("step1", JobParameters::new(), Arc::clone(&job_context));
        execution.execution_context.put_string("stepKey", "partial value");
        execution.mark_failed(&BatchError::Step("step1".to_string()));

        let listener = StepListener::promote_keys(&["stepKey"]);
        assert!(listener.fire_after(&execution).is_none());

        assert!(!job_context.read().contains_key("stepKey"));
    }

    #[test]
    fn after_step_override_should_be_returned() {
        let listener =
            StepListener::new().after_step(|execution| (execution.write_count == 0).then(ExitStatus::failed));

        let execution = StepExecution::new("empty");
        assert_eq!(listener.fire_after(&execution), Some(ExitStatus::failed()));
    }
}
