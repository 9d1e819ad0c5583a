use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use log::{info, warn};

use crate::BatchError;

use super::{
    execution_context::Value,
    job::{Job, JobExecution, JobInstance, JobResult},
    parameters::JobParameters,
    step::BatchStatus,
};

/// Parameter added by [`RunIdIncrementer`].
pub const RUN_ID_KEY: &str = "run.id";

/// Gives every launch of a job a fresh identifying `run.id`, so the same
/// business parameters can be run again.
#[derive(Debug, Default)]
pub struct RunIdIncrementer {
    last: AtomicI64,
}

impl RunIdIncrementer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, mut parameters: JobParameters) -> JobParameters {
        let previous = parameters
            .get_long(RUN_ID_KEY)
            .unwrap_or_else(|| self.last.load(Ordering::SeqCst));
        let run_id = previous + 1;
        self.last.fetch_max(run_id, Ordering::SeqCst);
        parameters.insert(RUN_ID_KEY, Value::Long(run_id), true);
        parameters
    }
}

struct RegisteredJob {
    job: Arc<dyn Job>,
    incrementer: Option<RunIdIncrementer>,
}

/// Launch surface: runs registered jobs by name and remembers the status of
/// every job instance it launched.
///
/// An instance whose last run COMPLETED cannot be launched again, and an
/// instance cannot be launched while it is running.
#[derive(Default)]
pub struct JobLauncher {
    jobs: HashMap<String, RegisteredJob>,
    instances: DashMap<String, BatchStatus>,
}

impl JobLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: impl Job + 'static) -> &mut Self {
        self.insert(Arc::new(job), None)
    }

    /// Registers a job whose launches each get a new `run.id` parameter.
    pub fn register_with_incrementer(&mut self, job: impl Job + 'static) -> &mut Self {
        self.insert(Arc::new(job), Some(RunIdIncrementer::new()))
    }

    fn insert(&mut self, job: Arc<dyn Job>, incrementer: Option<RunIdIncrementer>) -> &mut Self {
        self.jobs.insert(
            job.get_name().to_string(),
            RegisteredJob { job, incrementer },
        );
        self
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Last known status of the instance `parameters` identify for `job_name`.
    pub fn instance_status(&self, job_name: &str, parameters: &JobParameters) -> Option<BatchStatus> {
        let key = JobInstance::new(job_name, parameters).key().to_string();
        self.instances.get(&key).map(|status| *status)
    }

    pub fn run(&self, job_name: &str, parameters: JobParameters) -> JobResult<JobExecution> {
        let registered = self
            .jobs
            .get(job_name)
            .ok_or_else(|| BatchError::Configuration(format!("no job named '{}'", job_name)))?;

        let parameters = match &registered.incrementer {
            Some(incrementer) => incrementer.next(parameters),
            None => parameters,
        };

        let key = JobInstance::new(job_name, &parameters).key().to_string();
        match self.instances.entry(key.clone()) {
            Entry::Occupied(mut entry) => match entry.get().to_owned() {
                BatchStatus::Completed => {
                    warn!("Job instance {} is already complete", key);
                    return Err(BatchError::JobInstanceAlreadyComplete(key));
                }
                BatchStatus::Starting | BatchStatus::Started => {
                    return Err(BatchError::Job(format!("job instance {} is already running", key)));
                }
                BatchStatus::Failed | BatchStatus::Stopped => {
                    info!("Restarting job instance {}", key);
                    entry.insert(BatchStatus::Started);
                }
            },
            Entry::Vacant(entry) => {
                entry.insert(BatchStatus::Started);
            }
        }

        let result = registered.job.run(parameters);

        let status = match &result {
            Ok(execution) => execution.status,
            Err(_) => BatchStatus::Failed,
        };
        self.instances.insert(key, status);

        result
    }
}
