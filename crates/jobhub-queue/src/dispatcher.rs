//! Job dispatcher: backpressure-aware submission and per-queue lanes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock;
use crate::error::QueueError;
use crate::job::{Job, JobState, PendingJob, SubmitRequest};
use crate::queue::QueueLane;
use crate::store::{InsertOutcome, StateStore};

/// Result of syncing lanes with the store's pending snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
}

/// Gates job submission and keeps in-memory lanes in step with the store.
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    lanes: DashMap<String, Arc<QueueLane>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            lanes: DashMap::new(),
        }
    }

    /// The lane for a queue, created on first use.
    pub fn lane(&self, queue_name: &str) -> Arc<QueueLane> {
        if let Some(lane) = self.lanes.get(queue_name) {
            return lane.clone();
        }
        self.lanes
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(QueueLane::new(queue_name)))
            .clone()
    }

    /// Forget a deleted queue's lane.
    pub fn drop_lane(&self, queue_name: &str) {
        self.lanes.remove(queue_name);
    }

    /// Names of the queues that currently have a lane.
    pub fn lane_names(&self) -> Vec<String> {
        self.lanes.iter().map(|e| e.key().clone()).collect()
    }

    pub fn has_lane(&self, queue_name: &str) -> bool {
        self.lanes.contains_key(queue_name)
    }

    /// Persist a PENDING job and make it visible to the queue's workers.
    ///
    /// Fails with `QueueNotFound`, `QueueDisabled` or `QueueFull`.
    pub async fn submit(&self, request: SubmitRequest, principal: &str) -> Result<Job, QueueError> {
        let job = Job::new(request, principal);

        match self.store.insert_job(&job).await? {
            InsertOutcome::Inserted(pending) => {
                self.lane(&job.queue_name).push(pending);
                info!(
                    job_id = %job.id,
                    queue = %job.queue_name,
                    task_class = %job.task_class,
                    priority = job.priority,
                    trigger = %job.trigger,
                    "Job submitted"
                );
                Ok(job)
            }
            InsertOutcome::QueueNotFound => Err(QueueError::QueueNotFound(job.queue_name)),
            InsertOutcome::QueueDisabled => {
                debug!(queue = %job.queue_name, "Submission rejected: queue disabled");
                Err(QueueError::QueueDisabled(job.queue_name))
            }
            InsertOutcome::Full { capacity } => {
                debug!(queue = %job.queue_name, capacity, "Submission rejected: queue full");
                Err(QueueError::QueueFull {
                    name: job.queue_name,
                    capacity,
                })
            }
        }
    }

    /// Cancel a PENDING job. The job row and its snapshot are removed.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, QueueError> {
        let job = self.require_job(job_id).await?;
        if job.state != JobState::Pending {
            return Err(invalid_state(&job, "cancel"));
        }

        if !self.store.cancel_job(job_id).await? {
            // Claimed between the read and the delete.
            let current = self.require_job(job_id).await?;
            return Err(invalid_state(&current, "cancel"));
        }

        self.lane(&job.queue_name).remove(&job_id);
        info!(job_id = %job_id, queue = %job.queue_name, "Job cancelled");
        Ok(job)
    }

    /// Submit a new MANUAL job copying a finished one.
    pub async fn resubmit(&self, job_id: Uuid, principal: &str) -> Result<Job, QueueError> {
        let original = self.require_job(job_id).await?;
        if !original.state.is_terminal() {
            return Err(invalid_state(&original, "resubmit"));
        }
        let job = self.submit(SubmitRequest::retry_of(&original), principal).await?;
        info!(job_id = %job.id, retry_of = %job_id, "Job resubmitted");
        Ok(job)
    }

    /// Delete a job: PENDING jobs are cancelled, RUNNING jobs are refused,
    /// terminal jobs are removed. Execution logs are kept.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        let job = self.require_job(job_id).await?;
        match job.state {
            JobState::Pending => self.cancel(job_id).await,
            JobState::Running => Err(invalid_state(&job, "delete")),
            JobState::Success | JobState::Failed => {
                if !self.store.delete_job(job_id).await? {
                    return Err(QueueError::JobNotFound(job_id));
                }
                info!(job_id = %job_id, "Job deleted");
                Ok(job)
            }
        }
    }

    /// Claim a job for execution. `None` if someone else got it first or
    /// it was cancelled.
    pub async fn claim(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        self.store.claim_job(job_id, clock::now()).await
    }

    /// Rebuild lanes from the store's pending snapshots. Safe to repeat.
    pub async fn rehydrate(&self) -> Result<usize, QueueError> {
        let report = self.reconcile().await?;
        info!(restored = report.added, "Rehydrated pending jobs");
        Ok(report.added)
    }

    /// Sync lanes with the store.
    ///
    /// Adds snapshots missing from memory and drops entries whose snapshot is
    /// gone. Only entries already queued before the snapshot read are judged;
    /// anything pushed after it is left for the next pass.
    pub async fn reconcile(&self) -> Result<ReconcileReport, QueueError> {
        let lanes: Vec<Arc<QueueLane>> = self.lanes.iter().map(|e| e.value().clone()).collect();
        let marks: Vec<(Arc<QueueLane>, i64)> = lanes
            .into_iter()
            .filter_map(|lane| lane.max_seq().map(|seq| (lane, seq)))
            .collect();

        let pending = self.store.pending_jobs().await?;
        let mut by_queue: HashMap<String, Vec<PendingJob>> = HashMap::new();
        for p in pending {
            by_queue.entry(p.queue_name.clone()).or_default().push(p);
        }

        let mut report = ReconcileReport::default();
        for (queue_name, jobs) in &by_queue {
            let lane = self.lane(queue_name);
            for p in jobs {
                if lane.push(p.clone()) {
                    report.added += 1;
                }
            }
        }

        for (lane, mark) in marks {
            let live: HashSet<Uuid> = by_queue
                .get(lane.name())
                .map(|jobs| jobs.iter().map(|p| p.job_id).collect())
                .unwrap_or_default();
            report.removed += lane.retain(|p| p.seq > mark || live.contains(&p.job_id));
        }

        if report.added > 0 || report.removed > 0 {
            debug!(added = report.added, removed = report.removed, "Reconciled lanes");
        }
        Ok(report)
    }

    /// Total entries across all lanes.
    pub fn queued(&self) -> usize {
        self.lanes.iter().map(|e| e.value().len()).sum()
    }

    async fn require_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))
    }
}

fn invalid_state(job: &Job, operation: &'static str) -> QueueError {
    warn!(job_id = %job.id, state = %job.state, operation, "Invalid job state");
    QueueError::InvalidState {
        job_id: job.id,
        state: job.state,
        operation,
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
