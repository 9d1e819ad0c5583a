use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A scalar value stored in an [`ExecutionContext`] or passed as a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(value) => write!(f, "{}", value),
            Value::Long(value) => write!(f, "{}", value),
            Value::Double(value) => write!(f, "{}", value),
            Value::Date(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Key/value scratch space scoped to a job or to a step run.
///
/// Step contexts are owned by their [`StepExecution`](super::step::StepExecution)
/// and are cloned for every partition, so two partitions never share one. The
/// job context is shared between steps through a [`SharedExecutionContext`].
///
/// # Examples
///
/// ```
/// use spring_batch_engine::core::execution_context::ExecutionContext;
///
/// let mut context = ExecutionContext::new();
/// context.put_long("minId", 1);
/// context.put_string("stepKey", "step execution context");
///
/// assert_eq!(context.get_long("minId"), Some(1));
/// assert_eq!(context.get_string_or("jobKey", "emptyJobKey"), "emptyJobKey");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

/// Job-scoped context shared by every step of one job execution.
pub type SharedExecutionContext = Arc<RwLock<ExecutionContext>>;

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), Value::String(value.into()));
    }

    pub fn put_long(&mut self, key: impl Into<String>, value: i64) {
        self.entries.insert(key.into(), Value::Long(value));
    }

    pub fn put_double(&mut self, key: impl Into<String>, value: f64) {
        self.entries.insert(key.into(), Value::Double(value));
    }

    pub fn put_date(&mut self, key: impl Into<String>, value: NaiveDate) {
        self.entries.insert(key.into(), Value::Date(value));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns the value as a string slice, only if it was stored as a string.
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(Value::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or(default).to_string()
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(Value::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_long_or(&self, key: &str, default: i64) -> i64 {
        self.get_long(key).unwrap_or(default)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(Value::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, key: &str) -> Option<NaiveDate> {
        match self.entries.get(key) {
            Some(Value::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Copies every entry of `other` into this context. Entries of `other` win.
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }

    /// Copies only the listed keys of `other`; missing keys are ignored.
    pub fn merge_keys(&mut self, other: &ExecutionContext, keys: &[String]) {
        for key in keys {
            if let Some(value) = other.entries.get(key) {
                self.entries.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn into_shared(self) -> SharedExecutionContext {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ExecutionContext, Value};

    #[test]
    fn typed_getters_should_only_match_their_type() {
        let mut context = ExecutionContext::new();
        context.put_long("minId", 1);
        context.put_string("name", "partition0");
        context.put_date("date", NaiveDate::from_ymd_opt(2020, 11, 1).unwrap());

        assert_eq!(context.get_long("minId"), Some(1));
        assert_eq!(context.get_string("minId"), None);
        assert_eq!(context.get_string("name"), Some("partition0"));
        assert_eq!(
            context.get_date("date"),
            NaiveDate::from_ymd_opt(2020, 11, 1)
        );
        assert_eq!(context.get_long_or("maxId", 42), 42);
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn merge_should_let_other_entries_win() {
        let mut parent = ExecutionContext::new();
        parent.put_long("count", 1);
        parent.put_string("kept", "yes");

        let mut child = ExecutionContext::new();
        child.put_long("count", 2);
        child.put_string("added", "new");

        parent.merge(&child);

        assert_eq!(parent.get_long("count"), Some(2));
        assert_eq!(parent.get_string("kept"), Some("yes"));
        assert_eq!(parent.get_string("added"), Some("new"));
    }

    #[test]
    fn merge_keys_should_copy_selected_entries_only() {
        let mut target = ExecutionContext::new();
        let mut source = ExecutionContext::new();
        source.put_string("promoted", "a");
        source.put_string("private", "b");

        target.merge_keys(&source, &["promoted".to_string(), "missing".to_string()]);

        assert_eq!(target.get_string("promoted"), Some("a"));
        assert!(!target.contains_key("private"));
        assert!(!target.contains_key("missing"));
    }

    #[test]
    fn clones_should_be_isolated() {
        let mut original = ExecutionContext::new();
        original.put_long("minId", 1);

        let mut copy = original.clone();
        copy.put_long("minId", 5001);

        assert_eq!(original.get_long("minId"), Some(1));
        assert_eq!(copy.get_long("minId"), Some(5001));
    }

    #[test]
    fn context_should_serialize_to_json() {
        let mut context = ExecutionContext::new();
        context.put("maxId", Value::Long(40000));

        let json = serde_json::to_string(&context).unwrap();
        let back: ExecutionContext = serde_json::from_str(&json).unwrap();

        assert_eq!(back, context);
    }
}
