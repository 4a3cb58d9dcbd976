//! # jobhub Queue
//!
//! Cron-triggered background job engine.
//!
//! ## Features
//!
//! - Named queues with capacity backpressure and per-queue concurrency
//! - Priority-then-FIFO dispatch with exactly-once claiming
//! - Cron trigger with bounded evaluation slots
//! - Durable state (SQLite) with restart recovery
//! - Execution logs and job statistics

pub mod clock;
pub mod cron_task;
pub mod dispatcher;
pub mod engine;
mod engine_admin;
pub mod error;
pub mod handler;
pub mod job;
pub mod job_queue;
pub mod log;
pub mod query;
pub mod queue;
pub mod registry;
pub mod store;
pub mod trigger;
pub mod worker;

pub use cron_task::{CronTask, CronTaskUpdate, NewCronTask};
pub use dispatcher::{Dispatcher, ReconcileReport};
pub use engine::{Engine, EngineConfig, StartReport};
pub use error::QueueError;
pub use handler::{FnHandler, HandlerError, HandlerRegistry, HandlerResult, JobContext, JobHandler};
pub use job::{Job, JobState, PendingJob, SubmitRequest, TriggerType};
pub use job_queue::{JobQueue, NewQueue, QueueCapacity, QueueUpdate};
pub use log::{Outcome, ScriptTaskLog};
pub use query::{JobQuery, JobStats, Page, StateCounts};
pub use queue::QueueLane;
pub use registry::QueueRegistry;
pub use store::{InsertOutcome, MemoryStateStore, SqliteStateStore, StateStore};
pub use trigger::{CronTrigger, TickReport};
pub use worker::{PoolStats, ShutdownReport, Worker, WorkerPool};
