//! Queue errors.

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobState;

/// Queue error types.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No queue with this name.
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    /// A queue with this name already exists.
    #[error("Queue already exists: {0}")]
    DuplicateQueue(String),

    /// The queue is disabled and accepts no new jobs.
    #[error("Queue is disabled: {0}")]
    QueueDisabled(String),

    /// The queue already holds `capacity` pending or running jobs.
    #[error("Queue is full: {name} (capacity {capacity})")]
    QueueFull { name: String, capacity: u32 },

    /// The job is not in the state the operation requires.
    #[error("Cannot {operation} job {job_id} in state {state}")]
    InvalidState {
        job_id: Uuid,
        state: JobState,
        operation: &'static str,
    },

    /// No handler registered for the task class.
    #[error("No handler registered for task class '{0}'")]
    HandlerNotFound(String),

    /// The handler returned an error or panicked.
    #[error("Handler execution failed: {0}")]
    HandlerExecution(String),

    #[error("Invalid name: '{0}'")]
    InvalidName(String),

    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("Invalid concurrency: {0} (must be at least 1)")]
    InvalidConcurrency(u32),

    #[error("Invalid cron expression '{expression}': {message}")]
    InvalidCronExpression { expression: String, message: String },

    #[error("Cron task not found: {0}")]
    CronTaskNotFound(String),

    #[error("Cron task already exists: {0}")]
    DuplicateCronTask(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// The queue still has pending or running jobs.
    #[error("Queue {name} still has {active} active jobs")]
    QueueBusy { name: String, active: u64 },

    #[error("Handler already registered: {0}")]
    HandlerAlreadyRegistered(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The engine is shutting down.
    #[error("Engine is shutting down")]
    Shutdown,

    #[error("Engine already started")]
    AlreadyStarted,
}

impl QueueError {
    /// Whether the caller can reasonably retry the same submission later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, QueueError::QueueFull { .. } | QueueError::QueueDisabled(_))
    }
}

impl From<tokio_rusqlite::Error> for QueueError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::Store(format!("serialization failed: {}", e))
    }
}
