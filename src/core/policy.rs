use serde::{Deserialize, Serialize};

use crate::BatchError;

use super::retry::RetryTemplate;

/// Skip and retry rules of a chunk-oriented step.
///
/// Error kinds are matched against [`BatchError::kind`]. When `skippable` is
/// empty every non-fatal kind may be skipped, so `skip_limit` alone bounds the
/// number of tolerated failures. Retries only apply to the kinds listed in
/// `retryable`. [`BatchError::Fatal`] is never skipped nor retried.
///
/// The policy deserializes from JSON, missing fields taking their default:
///
/// ```
/// use spring_batch_engine::core::policy::FaultTolerancePolicy;
///
/// let policy: FaultTolerancePolicy = serde_json::from_str(
///     r#"{ "skip_limit": 3, "skippable": ["NotFoundName"], "retryable": ["NotFoundName"], "retry_limit": 3 }"#,
/// ).unwrap();
///
/// assert_eq!(policy, FaultTolerancePolicy::new().skip("NotFoundName").skip_limit(3).retry("NotFoundName").retry_limit(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultTolerancePolicy {
    pub skip_limit: usize,
    pub skippable: Vec<String>,
    pub retry_limit: usize,
    pub retryable: Vec<String>,
}

impl FaultTolerancePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, kind: &str) -> Self {
        self.skippable.push(kind.to_string());
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn retry(mut self, kind: &str) -> Self {
        self.retryable.push(kind.to_string());
        self
    }

    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn is_skippable(&self, error: &BatchError) -> bool {
        !error.is_fatal()
            && (self.skippable.is_empty() || self.skippable.iter().any(|kind| kind == error.kind()))
    }

    pub fn is_retryable(&self, error: &BatchError) -> bool {
        !error.is_fatal() && self.retryable.iter().any(|kind| kind == error.kind())
    }

    /// Whether one more skip fits under the limit.
    pub fn can_skip(&self, error: &BatchError, skip_count: usize) -> bool {
        self.is_skippable(error) && skip_count < self.skip_limit
    }

    pub fn retry_template(&self) -> RetryTemplate {
        RetryTemplate::new(self.retry_limit).retry_on_kinds(&self.retryable)
    }
}
