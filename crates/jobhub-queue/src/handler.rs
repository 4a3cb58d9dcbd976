//! Task handlers and the handler registry.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{Job, TriggerType};

/// Error returned by a handler. Recorded on the job; never propagated.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(format!("invalid params: {}", e))
    }
}

/// Handler output on success, captured into the execution log.
pub type HandlerResult = Result<Option<String>, HandlerError>;

/// What a handler sees of the job it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub task_class: String,
    pub queue_name: String,
    pub params: Value,
    pub trigger: TriggerType,
    pub origin_task_id: Option<Uuid>,
    pub attempt: u32,
}

impl JobContext {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            task_class: job.task_class.clone(),
            queue_name: job.queue_name.clone(),
            params: job.params.clone(),
            trigger: job.trigger,
            origin_task_id: job.origin_task_id,
            attempt: 1,
        }
    }

    /// Deserialize params into a typed struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

/// Executes jobs of one task class.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult;
}

/// Adapts an async closure into a handler.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        (self.f)(ctx.clone()).await
    }
}

/// Process-wide mapping from task-class name to handler.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler.
    ///
    /// Returns an error if the task class already has one.
    pub fn register(
        &self,
        task_class: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), QueueError> {
        let task_class = task_class.into();
        match self.handlers.entry(task_class) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(QueueError::HandlerAlreadyRegistered(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&self, task_class: impl Into<String>, f: F) -> Result<(), QueueError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(task_class, Arc::new(FnHandler::new(f)))
    }

    pub fn get(&self, task_class: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(task_class).map(|h| h.clone())
    }

    pub fn contains(&self, task_class: &str) -> bool {
        self.handlers.contains_key(task_class)
    }

    /// Registered task classes, sorted.
    pub fn task_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
