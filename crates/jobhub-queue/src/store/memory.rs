//! In-memory state store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{InsertOutcome, StateStore};
use crate::cron_task::CronTask;
use crate::error::QueueError;
use crate::job::{Job, JobState, PendingJob};
use crate::job_queue::JobQueue;
use crate::log::ScriptTaskLog;
use crate::query::{JobQuery, JobStats, Page, StateCounts};

#[derive(Default)]
struct State {
    queues: BTreeMap<String, JobQueue>,
    cron_tasks: HashMap<Uuid, CronTask>,
    jobs: HashMap<Uuid, Job>,
    pending: HashMap<Uuid, PendingJob>,
    logs: Vec<ScriptTaskLog>,
    next_seq: i64,
}

impl State {
    fn active_count(&self, queue_name: &str) -> u64 {
        self.jobs
            .values()
            .filter(|j| j.queue_name == queue_name && j.state.is_active())
            .count() as u64
    }
}

/// State store backed by a single lock. Nothing survives the process.
pub struct MemoryStateStore {
    state: RwLock<State>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert_queue(&self, queue: &JobQueue) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if state.queues.contains_key(&queue.name) {
            return Err(QueueError::DuplicateQueue(queue.name.clone()));
        }
        state.queues.insert(queue.name.clone(), queue.clone());
        Ok(())
    }

    async fn update_queue(&self, queue: &JobQueue) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        match state.queues.get_mut(&queue.name) {
            Some(existing) => {
                existing.label = queue.label.clone();
                existing.capacity = queue.capacity;
                existing.concurrency = queue.concurrency;
                existing.updated_at = queue.updated_at;
                existing.updated_by = queue.updated_by.clone();
                Ok(())
            }
            None => Err(QueueError::QueueNotFound(queue.name.clone())),
        }
    }

    async fn set_queue_enabled(
        &self,
        name: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
        updated_by: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        let queue = state
            .queues
            .get_mut(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))?;
        queue.enabled = enabled;
        queue.updated_at = updated_at;
        queue.updated_by = updated_by.to_string();
        Ok(())
    }

    async fn get_queue(&self, name: &str) -> Result<Option<JobQueue>, QueueError> {
        Ok(self.state.read().await.queues.get(name).cloned())
    }

    async fn list_queues(&self) -> Result<Vec<JobQueue>, QueueError> {
        Ok(self.state.read().await.queues.values().cloned().collect())
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if !state.queues.contains_key(name) {
            return Err(QueueError::QueueNotFound(name.to_string()));
        }
        let active = state.active_count(name);
        if active > 0 {
            return Err(QueueError::QueueBusy {
                name: name.to_string(),
                active,
            });
        }
        state.queues.remove(name);
        Ok(())
    }

    async fn insert_cron_task(&self, task: &CronTask) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if state.cron_tasks.values().any(|t| t.name == task.name) {
            return Err(QueueError::DuplicateCronTask(task.name.clone()));
        }
        state.cron_tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_cron_task(&self, task: &CronTask) -> Result<(), QueueError> {
        let mut state = self.state.write().await;
        if state
            .cron_tasks
            .values()
            .any(|t| t.name == task.name && t.id != task.id)
        {
            return Err(QueueError::DuplicateCronTask(task.name.clone()));
        }
        match state.cron_tasks.get_mut(&task.id) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(QueueError::CronTaskNotFound(task.id.to_string())),
        }
    }

    async fn get_cron_task(&self, id: Uuid) -> Result<Option<CronTask>, QueueError> {
        Ok(self.state.read().await.cron_tasks.get(&id).cloned())
    }

    async fn find_cron_task(&self, name: &str) -> Result<Option<CronTask>, QueueError> {
        let state = self.state.read().await;
        Ok(state.cron_tasks.values().find(|t| t.name == name).cloned())
    }

    async fn list_cron_tasks(&self) -> Result<Vec<CronTask>, QueueError> {
        let state = self.state.read().await;
        let mut tasks: Vec<CronTask> = state.cron_tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    async fn delete_cron_task(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self.state.write().await.cron_tasks.remove(&id).is_some())
    }

    async fn due_cron_tasks(&self, now: DateTime<Utc>) -> Result<Vec<CronTask>, QueueError> {
        let state = self.state.read().await;
        let mut due: Vec<CronTask> = state
            .cron_tasks
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_fire_at);
        Ok(due)
    }

    async fn record_fire(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        match state.cron_tasks.get_mut(&id) {
            Some(task) if task.updated_at == read_at => {
                task.last_fired_at = Some(fired_at);
                task.next_fire_at = next_fire_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_job(&self, job: &Job) -> Result<InsertOutcome, QueueError> {
        let mut state = self.state.write().await;
        let Some(queue) = state.queues.get(&job.queue_name) else {
            return Ok(InsertOutcome::QueueNotFound);
        };
        if !queue.enabled {
            return Ok(InsertOutcome::QueueDisabled);
        }
        let capacity = queue.capacity;
        if !capacity.admits(state.active_count(&job.queue_name)) {
            return Ok(InsertOutcome::Full {
                capacity: capacity.limit().unwrap_or(u32::MAX),
            });
        }

        state.next_seq += 1;
        let pending = PendingJob {
            job_id: job.id,
            queue_name: job.queue_name.clone(),
            priority: job.priority,
            seq: state.next_seq,
            created_at: job.created_at,
        };
        state.jobs.insert(job.id, job.clone());
        state.pending.insert(job.id, pending.clone());
        Ok(InsertOutcome::Inserted(pending))
    }

    async fn claim_job(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        let mut state = self.state.write().await;
        let claimed = match state.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Pending => {
                job.state = JobState::Running;
                job.started_at = Some(started_at);
                Some(job.clone())
            }
            _ => None,
        };
        if claimed.is_some() {
            state.pending.remove(&id);
        }
        Ok(claimed)
    }

    async fn finish_job(
        &self,
        id: Uuid,
        new_state: JobState,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&id) {
            Some(job) if job.state == JobState::Running => {
                job.state = new_state;
                job.finished_at = Some(finished_at);
                job.error = error;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        if state.jobs.get(&id).map(|j| j.state) != Some(JobState::Pending) {
            return Ok(false);
        }
        state.jobs.remove(&id);
        state.pending.remove(&id);
        Ok(true)
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut state = self.state.write().await;
        if !state.jobs.get(&id).is_some_and(|j| j.state.is_terminal()) {
            return Ok(false);
        }
        state.jobs.remove(&id);
        Ok(true)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn query_jobs(&self, query: &JobQuery) -> Result<Page<Job>, QueueError> {
        let state = self.state.read().await;
        let mut matched: Vec<&Job> = state.jobs.values().filter(|j| query.matches(j)).collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.page_size() as usize)
            .cloned()
            .collect();
        Ok(Page {
            items,
            total,
            page: query.page(),
            page_size: query.page_size(),
        })
    }

    async fn active_count(&self, queue_name: &str) -> Result<u64, QueueError> {
        Ok(self.state.read().await.active_count(queue_name))
    }

    async fn pending_jobs(&self) -> Result<Vec<PendingJob>, QueueError> {
        let state = self.state.read().await;
        let mut pending: Vec<PendingJob> = state.pending.values().cloned().collect();
        pending.sort_by_key(|p| p.seq);
        Ok(pending)
    }

    async fn fail_running_jobs(
        &self,
        finished_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError> {
        let mut state = self.state.write().await;
        let mut failed = Vec::new();
        for job in state.jobs.values_mut() {
            if job.state == JobState::Running {
                job.state = JobState::Failed;
                job.finished_at = Some(finished_at);
                job.error = Some(reason.to_string());
                failed.push(job.clone());
            }
        }
        Ok(failed)
    }

    async fn append_log(&self, log: &ScriptTaskLog) -> Result<(), QueueError> {
        self.state.write().await.logs.push(log.clone());
        Ok(())
    }

    async fn logs_for_job(&self, job_id: Uuid) -> Result<Vec<ScriptTaskLog>, QueueError> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn job_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError> {
        let state = self.state.read().await;
        let mut stats = JobStats::default();
        for job in state.jobs.values() {
            stats.counts.add(job.state, 1);
            stats
                .by_queue
                .entry(job.queue_name.clone())
                .or_insert_with(StateCounts::default)
                .add(job.state, 1);
            if job.created_at >= since {
                stats.created_since += 1;
            }
        }
        stats.total = stats.counts.total();
        Ok(stats)
    }
}
