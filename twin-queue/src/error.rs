use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur during queue operations
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Invalid cron pattern {pattern:?}: {message}")]
    InvalidCron { pattern: String, message: String },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Internal queue error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn invalid_cron(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCron {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
