use std::{
    any::Any,
    cell::Cell,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::BatchError;

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Sizing of a [`TaskExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskExecutorConfig {
    /// Workers started up front and kept for the life of the pool.
    pub core_pool_size: usize,
    /// Upper bound on workers; extra ones are started while every worker is busy.
    pub max_pool_size: usize,
    /// How long an extra worker waits for a task before retiring.
    pub keep_alive_ms: u64,
    pub thread_name_prefix: String,
}

impl Default for TaskExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 10,
            max_pool_size: 20,
            keep_alive_ms: 60_000,
            thread_name_prefix: "batch-thread-".to_string(),
        }
    }
}

trait Runnable: Send + Sync {
    fn run(&self);
}

struct TaskSlot<T> {
    job: Mutex<Option<Box<dyn FnOnce() -> T + Send>>>,
    result: Mutex<Option<thread::Result<T>>>,
    done: Condvar,
}

impl<T: Send> Runnable for TaskSlot<T> {
    fn run(&self) {
        let job = self.job.lock().take();
        if let Some(job) = job {
            let outcome = catch_unwind(AssertUnwindSafe(job));
            *self.result.lock() = Some(outcome);
            self.done.notify_all();
        }
    }
}

/// Pending result of a task submitted to a [`TaskExecutor`].
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T: Send> TaskHandle<T> {
    /// Blocks until the task has run and returns its value.
    ///
    /// A panic inside the task is reported as [`BatchError::TaskExecutor`].
    /// When called from a pool worker on a task nobody has picked up yet, the
    /// task runs on the calling thread, so nested submissions never starve
    /// the pool.
    pub fn join(self) -> Result<T, BatchError> {
        if IN_WORKER.with(Cell::get) {
            self.slot.run();
        }

        let mut result = self.slot.result.lock();
        while result.is_none() {
            self.slot.done.wait(&mut result);
        }

        match result.take() {
            Some(Ok(value)) => Ok(value),
            Some(Err(panic)) => Err(BatchError::TaskExecutor(panic_message(panic.as_ref()))),
            None => Err(BatchError::TaskExecutor("task result lost".to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.slot.result.lock().is_some()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}

struct PoolState {
    config: TaskExecutorConfig,
    live: AtomicUsize,
    busy: AtomicUsize,
    sequence: AtomicUsize,
}

/// Bounded pool of named worker threads.
///
/// Tasks are queued in submission order. The pool starts `core_pool_size`
/// workers and grows up to `max_pool_size` while tasks are waiting and every
/// worker is busy. Dropping the executor lets the workers drain the queue and
/// exit.
pub struct TaskExecutor {
    state: Arc<PoolState>,
    sender: Sender<Arc<dyn Runnable>>,
    receiver: Receiver<Arc<dyn Runnable>>,
}

impl TaskExecutor {
    pub fn new(config: TaskExecutorConfig) -> Result<Self, BatchError> {
        if config.core_pool_size == 0 || config.max_pool_size < config.core_pool_size {
            return Err(BatchError::Configuration(format!(
                "invalid pool size: core {} / max {}",
                config.core_pool_size, config.max_pool_size
            )));
        }

        let (sender, receiver) = unbounded();
        let executor = Self {
            state: Arc::new(PoolState {
                config,
                live: AtomicUsize::new(0),
                busy: AtomicUsize::new(0),
                sequence: AtomicUsize::new(0),
            }),
            sender,
            receiver,
        };

        for _ in 0..executor.state.config.core_pool_size {
            executor.spawn_worker(true)?;
        }

        debug!(
            "Task executor started with {} workers",
            executor.state.config.core_pool_size
        );

        Ok(executor)
    }

    /// Fixed-size pool with default naming.
    pub fn with_pool_size(pool_size: usize) -> Result<Self, BatchError> {
        Self::new(TaskExecutorConfig {
            core_pool_size: pool_size,
            max_pool_size: pool_size,
            ..TaskExecutorConfig::default()
        })
    }

    pub fn config(&self) -> &TaskExecutorConfig {
        &self.state.config
    }

    /// Workers currently alive.
    pub fn pool_size(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.state.busy.load(Ordering::SeqCst)
    }

    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>, BatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(TaskSlot {
            job: Mutex::new(Some(Box::new(task) as Box<dyn FnOnce() -> T + Send>)),
            result: Mutex::new(None),
            done: Condvar::new(),
        });

        self.sender
            .send(slot.clone() as Arc<dyn Runnable>)
            .map_err(|_| BatchError::TaskExecutor("task executor is shut down".to_string()))?;

        self.grow_if_saturated();

        Ok(TaskHandle { slot })
    }

    fn grow_if_saturated(&self) {
        let live = self.state.live.load(Ordering::SeqCst);
        let busy = self.state.busy.load(Ordering::SeqCst);

        if live < self.state.config.max_pool_size && busy + self.receiver.len() > live {
            if let Err(err) = self.spawn_worker(false) {
                warn!("Unable to grow task executor: {}", err);
            }
        }
    }

    fn spawn_worker(&self, core: bool) -> Result<(), BatchError> {
        let index = self.state.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let name = format!("{}{}", self.state.config.thread_name_prefix, index);
        let state = Arc::clone(&self.state);
        let receiver = self.receiver.clone();

        state.live.fetch_add(1, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(state, receiver, core));

        if let Err(err) = spawned {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
            return Err(BatchError::TaskExecutor(err.to_string()));
        }
        Ok(())
    }
}

fn worker_loop(state: Arc<PoolState>, receiver: Receiver<Arc<dyn Runnable>>, core: bool) {
    IN_WORKER.with(|flag| flag.set(true));
    let keep_alive = Duration::from_millis(state.config.keep_alive_ms);

    loop {
        let task = if core {
            match receiver.recv() {
                Ok(task) => task,
                Err(_) => break,
            }
        } else {
            match receiver.recv_timeout(keep_alive) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        state.busy.fetch_add(1, Ordering::SeqCst);
        task.run();
        state.busy.fetch_sub(1, Ordering::SeqCst);
    }

    state.live.fetch_sub(1, Ordering::SeqCst);
}
