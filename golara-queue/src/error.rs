//! Error types for queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backing store failure that is not a Redis protocol error
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// No queue registered under the requested name
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// No queue has been added to the manager yet
    #[error("No default queue configured")]
    NoDefaultQueue,

    /// No handler registered for job name
    #[error("No handler registered for job: {0}")]
    NoHandler(String),

    /// Job handler returned an error
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Job handler panicked
    #[error("Job '{job}' panicked: {message}")]
    Panicked {
        /// Name of the job whose handler panicked
        job: String,
        /// Panic message, when it was a string
        message: String,
    },

    /// Worker already started
    #[error("Worker already running")]
    WorkerAlreadyRunning,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Create an execution failure from any displayable error.
    pub fn execution(err: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed(err.to_string())
    }

    /// Whether the backing store could not be reached or refused the command.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Store(_))
    }

    /// Whether the error comes from how the queue system was wired up.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownQueue(_)
                | Self::NoDefaultQueue
                | Self::NoHandler(_)
                | Self::WorkerAlreadyRunning
                | Self::Config(_)
        )
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}
