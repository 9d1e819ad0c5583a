use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    /// Item failure tagged with a kind that fault-tolerance policies match on.
    #[error("{kind}: {message}")]
    Item { kind: String, message: String },

    /// Never retried and never skipped.
    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Step failed: {0}")]
    Step(String),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("Partition error: {0}")]
    Partition(String),

    #[error("Task executor error: {0}")]
    TaskExecutor(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Job instance already complete: {0}")]
    JobInstanceAlreadyComplete(String),
}

impl BatchError {
    /// Builds an [`BatchError::Item`] error of the given kind.
    pub fn item(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BatchError::Item {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Name used by skip and retry policies to classify this error.
    pub fn kind(&self) -> &str {
        match self {
            BatchError::ItemWriter(_) => "ItemWriter",
            BatchError::ItemReader(_) => "ItemReader",
            BatchError::ItemProcessor(_) => "ItemProcessor",
            BatchError::Item { kind, .. } => kind,
            BatchError::Fatal(_) => "Fatal",
            BatchError::Step(_) => "Step",
            BatchError::Job(_) => "Job",
            BatchError::Partition(_) => "Partition",
            BatchError::TaskExecutor(_) => "TaskExecutor",
            BatchError::Configuration(_) => "Configuration",
            BatchError::JobInstanceAlreadyComplete(_) => "JobInstanceAlreadyComplete",
        }
    }

    /// Message carried by the error, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            BatchError::Item { message, .. } => message,
            BatchError::ItemWriter(message)
            | BatchError::ItemReader(message)
            | BatchError::ItemProcessor(message)
            | BatchError::Fatal(message)
            | BatchError::Step(message)
            | BatchError::Job(message)
            | BatchError::Partition(message)
            | BatchError::TaskExecutor(message)
            | BatchError::Configuration(message)
            | BatchError::JobInstanceAlreadyComplete(message) => message,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, BatchError::Fatal(_))
    }
}
