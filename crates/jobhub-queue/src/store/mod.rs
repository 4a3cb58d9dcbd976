//! Durable state: queues, cron tasks, jobs, pending snapshots and logs.
//!
//! Every method that changes job state is conditional and atomic, so callers
//! racing on the same job see exactly one winner.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStateStore;
pub use sqlite::SqliteStateStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cron_task::CronTask;
use crate::error::QueueError;
use crate::job::{Job, JobState, PendingJob};
use crate::job_queue::JobQueue;
use crate::log::ScriptTaskLog;
use crate::query::{JobQuery, JobStats, Page};

/// Result of a capacity-checked job insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Job and pending snapshot were written.
    Inserted(PendingJob),
    QueueNotFound,
    QueueDisabled,
    /// The queue already holds `capacity` active jobs.
    Full { capacity: u32 },
}

/// Persistence boundary for the engine.
#[async_trait]
pub trait StateStore: Send + Sync {
    // Queues

    /// Fails with `DuplicateQueue` if the name is taken.
    async fn insert_queue(&self, queue: &JobQueue) -> Result<(), QueueError>;

    /// Write label, capacity and concurrency plus the audit stamp. The
    /// stored `enabled` flag is never touched.
    ///
    /// Fails with `QueueNotFound` if no queue has this name.
    async fn update_queue(&self, queue: &JobQueue) -> Result<(), QueueError>;

    /// Write only the `enabled` flag and the audit stamp.
    ///
    /// Fails with `QueueNotFound` if no queue has this name.
    async fn set_queue_enabled(
        &self,
        name: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
        updated_by: &str,
    ) -> Result<(), QueueError>;

    async fn get_queue(&self, name: &str) -> Result<Option<JobQueue>, QueueError>;

    async fn list_queues(&self) -> Result<Vec<JobQueue>, QueueError>;

    /// Fails with `QueueBusy` while the queue has PENDING or RUNNING jobs.
    async fn delete_queue(&self, name: &str) -> Result<(), QueueError>;

    // Cron tasks

    /// Fails with `DuplicateCronTask` if the name is taken.
    async fn insert_cron_task(&self, task: &CronTask) -> Result<(), QueueError>;

    async fn update_cron_task(&self, task: &CronTask) -> Result<(), QueueError>;

    async fn get_cron_task(&self, id: Uuid) -> Result<Option<CronTask>, QueueError>;

    async fn find_cron_task(&self, name: &str) -> Result<Option<CronTask>, QueueError>;

    async fn list_cron_tasks(&self) -> Result<Vec<CronTask>, QueueError>;

    async fn delete_cron_task(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Enabled tasks whose next fire time is at or before `now`.
    async fn due_cron_tasks(&self, now: DateTime<Utc>) -> Result<Vec<CronTask>, QueueError>;

    /// Stamp a fire and store the recomputed next fire time, but only if
    /// the task's `updated_at` still equals `read_at`. Returns false when
    /// the task was changed or deleted since it was read.
    async fn record_fire(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<bool, QueueError>;

    // Jobs

    /// Insert a PENDING job and its pending snapshot if the queue exists, is
    /// enabled and has room.
    async fn insert_job(&self, job: &Job) -> Result<InsertOutcome, QueueError>;

    /// PENDING -> RUNNING. Returns the claimed job only to the single winner.
    async fn claim_job(&self, id: Uuid, started_at: DateTime<Utc>)
    -> Result<Option<Job>, QueueError>;

    /// RUNNING -> SUCCESS/FAILED. Returns false if the job was not RUNNING.
    async fn finish_job(
        &self,
        id: Uuid,
        state: JobState,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<bool, QueueError>;

    /// Remove a job that is still PENDING, together with its snapshot.
    async fn cancel_job(&self, id: Uuid) -> Result<bool, QueueError>;

    /// Remove a terminal job. Logs are kept.
    async fn delete_job(&self, id: Uuid) -> Result<bool, QueueError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError>;

    async fn query_jobs(&self, query: &JobQuery) -> Result<Page<Job>, QueueError>;

    /// PENDING + RUNNING jobs in a queue.
    async fn active_count(&self, queue_name: &str) -> Result<u64, QueueError>;

    /// All pending snapshots in insertion order.
    async fn pending_jobs(&self) -> Result<Vec<PendingJob>, QueueError>;

    /// Mark every RUNNING job FAILED. Returns the updated jobs.
    async fn fail_running_jobs(
        &self,
        finished_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError>;

    // Logs and statistics

    async fn append_log(&self, log: &ScriptTaskLog) -> Result<(), QueueError>;

    async fn logs_for_job(&self, job_id: Uuid) -> Result<Vec<ScriptTaskLog>, QueueError>;

    /// Counts by state and queue, plus jobs created at or after `since`.
    async fn job_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError>;
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
