//! Administrative operations on queues, cron tasks and jobs.

use tracing::info;
use uuid::Uuid;

use crate::clock;
use crate::cron_task::{CronTask, CronTaskUpdate, NewCronTask};
use crate::engine::Engine;
use crate::error::QueueError;
use crate::job::{Job, SubmitRequest, TriggerType};
use crate::job_queue::{JobQueue, NewQueue, QueueUpdate};
use crate::log::ScriptTaskLog;
use crate::query::{JobQuery, JobStats, Page};
use crate::worker::PoolStats;

impl Engine {
    // Queues

    /// Create a queue, starting its workers if the engine is running.
    pub async fn create_queue(&self, new: NewQueue, principal: &str) -> Result<JobQueue, QueueError> {
        let queue = self.registry.create_queue(new, principal).await?;
        if self.workers_active() {
            self.pool.start_queue(&queue.name, queue.concurrency);
        }
        Ok(queue)
    }

    /// Update label, capacity or concurrency. A concurrency change restarts
    /// the queue's workers once their current jobs finish.
    pub async fn update_queue(
        &self,
        name: &str,
        update: &QueueUpdate,
        principal: &str,
    ) -> Result<JobQueue, QueueError> {
        let (queue, concurrency_changed) = self.registry.update_queue(name, update, principal).await?;
        if concurrency_changed && self.workers_active() {
            self.pool.resize_queue(&queue.name, queue.concurrency);
        }
        Ok(queue)
    }

    /// Enable or disable submissions. Queued jobs keep draining either way.
    pub async fn set_queue_enabled(
        &self,
        name: &str,
        enabled: bool,
        principal: &str,
    ) -> Result<JobQueue, QueueError> {
        self.registry.set_state(name, enabled, principal).await
    }

    /// Delete an idle queue and stop its workers.
    pub async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.registry.delete_queue(name).await?;
        self.pool.stop_queue(name);
        self.dispatcher.drop_lane(name);
        Ok(())
    }

    pub async fn get_queue(&self, name: &str) -> Result<JobQueue, QueueError> {
        self.registry.require(name).await
    }

    pub async fn list_queues(&self) -> Result<Vec<JobQueue>, QueueError> {
        self.registry.list().await
    }

    /// PENDING + RUNNING jobs in the queue.
    pub async fn queue_size(&self, name: &str) -> Result<u64, QueueError> {
        self.registry.current_size(name).await
    }

    // Cron tasks

    pub async fn create_cron_task(
        &self,
        new: NewCronTask,
        principal: &str,
    ) -> Result<CronTask, QueueError> {
        self.registry.require(&new.queue_name).await?;
        let task = CronTask::new(new, principal)?;
        self.store.insert_cron_task(&task).await?;
        info!(
            cron_task = %task.name,
            expression = %task.cron_expression,
            queue = %task.queue_name,
            next_fire_at = ?task.next_fire_at,
            "Created cron task"
        );
        Ok(task)
    }

    /// Apply a partial update; the next fire time is recomputed from now.
    pub async fn update_cron_task(
        &self,
        name: &str,
        update: CronTaskUpdate,
        principal: &str,
    ) -> Result<CronTask, QueueError> {
        if let Some(queue_name) = &update.queue_name {
            self.registry.require(queue_name).await?;
        }
        let mut task = self.require_cron_task(name).await?;
        task.apply(update, principal)?;
        self.store.update_cron_task(&task).await?;
        info!(cron_task = %name, next_fire_at = ?task.next_fire_at, "Updated cron task");
        Ok(task)
    }

    pub async fn set_cron_enabled(
        &self,
        name: &str,
        enabled: bool,
        principal: &str,
    ) -> Result<CronTask, QueueError> {
        let mut task = self.require_cron_task(name).await?;
        task.set_enabled(enabled, principal)?;
        self.store.update_cron_task(&task).await?;
        info!(cron_task = %name, enabled, "Changed cron task state");
        Ok(task)
    }

    /// Delete a cron task. Jobs it already produced are kept.
    pub async fn delete_cron_task(&self, name: &str) -> Result<(), QueueError> {
        let task = self.require_cron_task(name).await?;
        if !self.store.delete_cron_task(task.id).await? {
            return Err(QueueError::CronTaskNotFound(name.to_string()));
        }
        self.trigger.forget(task.id);
        info!(cron_task = %name, "Deleted cron task");
        Ok(())
    }

    pub async fn get_cron_task(&self, name: &str) -> Result<CronTask, QueueError> {
        self.require_cron_task(name).await
    }

    pub async fn list_cron_tasks(&self) -> Result<Vec<CronTask>, QueueError> {
        self.store.list_cron_tasks().await
    }

    /// Submit the task's job right away as a MANUAL job. The schedule is
    /// left untouched.
    pub async fn trigger_now(&self, name: &str, principal: &str) -> Result<Job, QueueError> {
        let task = self.require_cron_task(name).await?;
        let request = SubmitRequest::from_cron(&task).with_trigger(TriggerType::Manual);
        self.submit(request, principal).await
    }

    async fn require_cron_task(&self, name: &str) -> Result<CronTask, QueueError> {
        self.store
            .find_cron_task(name)
            .await?
            .ok_or_else(|| QueueError::CronTaskNotFound(name.to_string()))
    }

    // Jobs

    pub async fn submit(&self, request: SubmitRequest, principal: &str) -> Result<Job, QueueError> {
        if self.is_shutting_down() {
            return Err(QueueError::Shutdown);
        }
        self.dispatcher.submit(request, principal).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.dispatcher.cancel(job_id).await
    }

    pub async fn resubmit_job(&self, job_id: Uuid, principal: &str) -> Result<Job, QueueError> {
        if self.is_shutting_down() {
            return Err(QueueError::Shutdown);
        }
        self.dispatcher.resubmit(job_id, principal).await
    }

    pub async fn delete_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.dispatcher.delete_job(job_id).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))
    }

    pub async fn query_jobs(&self, query: &JobQuery) -> Result<Page<Job>, QueueError> {
        self.store.query_jobs(query).await
    }

    /// Execution logs, oldest first. Logs outlive deleted jobs.
    pub async fn job_logs(&self, job_id: Uuid) -> Result<Vec<ScriptTaskLog>, QueueError> {
        self.store.logs_for_job(job_id).await
    }

    // Statistics

    /// Job counts, with "today" starting at local midnight.
    pub async fn stats(&self) -> Result<JobStats, QueueError> {
        self.store.job_stats(clock::local_midnight()).await
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
