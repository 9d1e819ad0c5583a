//! # Item-level retry
//!
//! A [`RetryTemplate`] re-runs one unit of work while it fails with a retryable
//! error kind. Each item goes through the states:
//!
//! - `ATTEMPT(n)`: the callback runs; success ends the cycle.
//! - retryable failure with `n < retry_limit`: `ATTEMPT(n + 1)`.
//! - retryable failure with `n == retry_limit`: `RECOVER`. The recovery
//!   callback substitutes a value, or the error is handed back to the caller
//!   (the chunk engine then skips or escalates it).
//! - non-retryable failure: `FAILED`, the error is returned as is.
//!
//! `retry_limit` counts re-attempts: an item runs at most `retry_limit + 1` times.
//!
//! Registered [`RetryListener`]s are told when the cycle opens, after each
//! failed attempt and when it closes. A listener returning `false` from `open`
//! or `on_error` vetoes any further attempt.
//!
//! ```
//! use spring_batch_engine::{core::retry::RetryTemplate, BatchError};
//!
//! let template = RetryTemplate::new(2).retry_on("Timeout");
//!
//! let mut calls = 0;
//! let result = template.execute(|_context| {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(BatchError::item("Timeout", "try again"))
//!     } else {
//!         Ok(calls)
//!     }
//! });
//!
//! assert_eq!(result, Ok(3));
//! ```

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    core::item::{ItemProcessor, ItemProcessorResult},
    BatchError,
};

/// State of one retry cycle, visible to callbacks and listeners.
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    retry_count: usize,
    last_error: Option<BatchError>,
}

impl RetryContext {
    /// Number of re-attempts made so far (`n` in `ATTEMPT(n)`).
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&BatchError> {
        self.last_error.as_ref()
    }
}

/// Callbacks fired on the attempt boundaries of a retry cycle.
pub trait RetryListener: Send + Sync {
    /// Called before the first attempt. Returning `false` allows no retry.
    fn open(&self, _context: &RetryContext) -> bool {
        true
    }

    /// Called after every failed attempt. Returning `false` stops retrying.
    fn on_error(&self, _context: &RetryContext, _error: &BatchError) -> bool {
        true
    }

    /// Called once the cycle is resolved, with the error it ended on if any.
    fn close(&self, _context: &RetryContext, _error: Option<&BatchError>) {}
}

#[derive(Clone, Default)]
pub struct RetryTemplate {
    retry_limit: usize,
    retryable: Vec<String>,
    listeners: Vec<Arc<dyn RetryListener>>,
}

type Recovery<'r, T> = Box<dyn FnOnce(&RetryContext) -> Result<T, BatchError> + 'r>;

impl RetryTemplate {
    pub fn new(retry_limit: usize) -> Self {
        Self {
            retry_limit,
            retryable: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Marks an error kind (see [`BatchError::kind`]) as retryable.
    pub fn retry_on(mut self, kind: &str) -> Self {
        self.retryable.push(kind.to_string());
        self
    }

    pub fn retry_on_kinds(mut self, kinds: &[String]) -> Self {
        self.retryable.extend(kinds.iter().cloned());
        self
    }

    pub fn listener(mut self, listener: impl RetryListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn shared_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn retry_limit(&self) -> usize {
        self.retry_limit
    }

    pub fn is_retryable(&self, error: &BatchError) -> bool {
        !error.is_fatal() && self.retryable.iter().any(|kind| kind == error.kind())
    }

    /// Runs `callback` until it succeeds or retries are exhausted.
    pub fn execute<T, F>(&self, callback: F) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
    {
        self.run(callback, None)
    }

    /// Like [`execute`](Self::execute), applying `recovery` once retries are exhausted.
    pub fn execute_with_recovery<T, F, R>(&self, callback: F, recovery: R) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        self.run(callback, Some(Box::new(recovery)))
    }

    fn run<T, F>(&self, mut callback: F, recovery: Option<Recovery<'_, T>>) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
    {
        let mut context = RetryContext::default();

        let mut can_retry = true;
        for listener in &self.listeners {
            can_retry &= listener.open(&context);
        }

        let error = loop {
            match callback(&context) {
                Ok(value) => {
                    self.close(&context, None);
                    return Ok(value);
                }
                Err(error) => {
                    context.last_error = Some(error.clone());
                    for listener in &self.listeners {
                        can_retry &= listener.on_error(&context, &error);
                    }

                    if !self.is_retryable(&error) {
                        self.close(&context, Some(&error));
                        return Err(error);
                    }

                    if can_retry && context.retry_count < self.retry_limit {
                        context.retry_count += 1;
                        debug!("Retrying after '{}', attempt {}", error, context.retry_count);
                        continue;
                    }

                    break error;
                }
            }
        };

        match recovery {
            Some(recover) => {
                warn!("Retries exhausted on '{}', recovering", error);
                let result = recover(&context);
                self.close(&context, result.as_ref().err());
                result
            }
            None => {
                self.close(&context, Some(&error));
                Err(error)
            }
        }
    }

    fn close(&self, context: &RetryContext, error: Option<&BatchError>) {
        for listener in &self.listeners {
            listener.close(context, error);
        }
    }
}

type RecoveryFn<I, O> = dyn Fn(&I, &RetryContext) -> ItemProcessorResult<O> + Send + Sync;

/// Runs a delegate processor inside a [`RetryTemplate`], with an optional
/// fallback applied once retries are exhausted.
///
/// ```
/// use spring_batch_engine::{
///     core::{item::ItemProcessor, retry::{RetryItemProcessor, RetryTemplate}},
///     BatchError,
/// };
///
/// let processor = RetryItemProcessor::new(
///     |name: &String| {
///         if name.is_empty() {
///             Err(BatchError::item("NotFoundName", "empty name"))
///         } else {
///             Ok(Some(name.clone()))
///         }
///     },
///     RetryTemplate::new(2).retry_on("NotFoundName"),
/// )
/// .recover(|_name: &String, _context| Ok(Some("UNKNOWN".to_string())));
///
/// assert_eq!(processor.process(&String::new()).unwrap(), Some("UNKNOWN".to_string()));
/// ```
pub struct RetryItemProcessor<I, O> {
    delegate: Box<dyn ItemProcessor<I, O> + Send + Sync>,
    template: RetryTemplate,
    recovery: Option<Box<RecoveryFn<I, O>>>,
}

impl<I, O> RetryItemProcessor<I, O> {
    pub fn new(delegate: impl ItemProcessor<I, O> + Send + Sync + 'static, template: RetryTemplate) -> Self {
        Self {
            delegate: Box::new(delegate),
            template,
            recovery: None,
        }
    }

    pub fn recover<R>(mut self, recovery: R) -> Self
    where
        R: Fn(&I, &RetryContext) -> ItemProcessorResult<O> + Send + Sync + 'static,
    {
        self.recovery = Some(Box::new(recovery));
        self
    }
}

impl<I, O> ItemProcessor<I, O> for RetryItemProcessor<I, O> {
    fn process(&self, item: &I) -> ItemProcessorResult<O> {
        match &self.recovery {
            Some(recovery) => self.template.execute_with_recovery(
                |_| self.delegate.process(item),
                |context| recovery(item, context),
            ),
            None => self.template.execute(|_| self.delegate.process(item)),
        }
    }
}
