use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::execution_context::Value;

/// One named job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    pub value: Value,
    /// Identifying parameters take part in the identity of the job instance.
    pub identifying: bool,
}

/// Named values handed to a job at launch time.
///
/// Tuning parameters (`chunkSize`, `gridSize`) and domain parameters (a target
/// month, an output path) travel the same way; steps read them from their
/// [`StepExecution`](super::step::StepExecution).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key).map(|parameter| &parameter.value)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns a long parameter; string parameters holding a number are accepted too.
    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Long(value)) => Some(*value),
            Some(Value::String(value)) => value.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Value::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<NaiveDate> {
        match self.get(key) {
            Some(Value::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.parameters.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobParameter)> {
        self.parameters
            .iter()
            .map(|(key, parameter)| (key.as_str(), parameter))
    }

    /// Identifying parameters only, in key order.
    pub fn identifying(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(key, parameter)| (key, &parameter.value))
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: Value, identifying: bool) {
        self.parameters
            .insert(key.into(), JobParameter { value, identifying });
    }
}

/// Builder for [`JobParameters`].
///
/// ```
/// use spring_batch_engine::core::parameters::JobParametersBuilder;
///
/// let parameters = JobParametersBuilder::new()
///     .add_string("date", "2020-11")
///     .add_long("chunkSize", 1000)
///     .build();
///
/// assert_eq!(parameters.get_string("date"), Some("2020-11"));
/// assert_eq!(parameters.get_long("chunkSize"), Some(1000));
/// ```
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: JobParameters,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_string(self, key: &str, value: &str) -> Self {
        self.add_parameter(key, Value::String(value.to_string()), true)
    }

    pub fn add_long(self, key: &str, value: i64) -> Self {
        self.add_parameter(key, Value::Long(value), true)
    }

    pub fn add_double(self, key: &str, value: f64) -> Self {
        self.add_parameter(key, Value::Double(value), true)
    }

    pub fn add_date(self, key: &str, value: NaiveDate) -> Self {
        self.add_parameter(key, Value::Date(value), true)
    }

    pub fn add_parameter(mut self, key: &str, value: Value, identifying: bool) -> Self {
        self.parameters.insert(key, value, identifying);
        self
    }

    pub fn build(self) -> JobParameters {
        self.parameters
    }
}
