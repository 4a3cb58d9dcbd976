//! Worker pool for job execution.
//!
//! Each queue gets its own set of long-lived workers, sized by the queue's
//! concurrency. A worker pops the next entry from its lane, claims the job
//! through the store and runs the matching handler.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::clock;
use crate::dispatcher::Dispatcher;
use crate::error::QueueError;
use crate::handler::{HandlerRegistry, JobContext};
use crate::job::{Job, JobState};
use crate::job_queue::JobQueue;
use crate::log::{Outcome, ScriptTaskLog};
use crate::queue::QueueLane;
use crate::store::StateStore;

/// Error recorded on jobs still running when the shutdown grace period ends.
pub const SHUTDOWN_REASON: &str = "interrupted by shutdown";

/// Pause before retrying after the store refused a claim.
const CLAIM_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A single worker bound to one queue.
pub struct Worker {
    id: u32,
    queue_name: String,
    busy: AtomicBool,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
}

impl Worker {
    pub fn new(id: u32, queue_name: impl Into<String>) -> Self {
        Self {
            id,
            queue_name: queue_name.into(),
            busy: AtomicBool::new(false),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Whether the worker is executing a job right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::SeqCst)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::SeqCst)
    }

    /// Run a claimed job to a terminal state.
    async fn execute(&self, job: Job, shared: &Shared) {
        self.busy.store(true, Ordering::SeqCst);
        shared.in_flight.insert(job.id, job.clone());
        debug!(worker = self.id, job_id = %job.id, "Executing job");

        let ctx = JobContext::from_job(&job);
        let result = match shared.handlers.get(&job.task_class) {
            None => Err(QueueError::HandlerNotFound(job.task_class.clone()).to_string()),
            Some(handler) => match AssertUnwindSafe(handler.handle(&ctx)).catch_unwind().await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(QueueError::HandlerExecution(e.message).to_string()),
                Err(panic) => Err(QueueError::HandlerExecution(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ))
                .to_string()),
            },
        };

        let finished_at = clock::now();
        let (outcome, output, error_text) = match result {
            Ok(output) => (Outcome::Success, output, None),
            Err(message) => (Outcome::Failed, None, Some(message)),
        };

        match shared
            .store
            .finish_job(job.id, outcome.job_state(), finished_at, error_text.clone())
            .await
        {
            Ok(true) => {
                let log = ScriptTaskLog::for_job(&job, finished_at, outcome, output, error_text.clone());
                if let Err(e) = shared.store.append_log(&log).await {
                    error!(job_id = %job.id, "Failed to write execution log: {}", e);
                }
                match outcome {
                    Outcome::Success => {
                        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
                        shared.completed.fetch_add(1, Ordering::SeqCst);
                        info!(job_id = %job.id, queue = %job.queue_name, "Job succeeded");
                    }
                    Outcome::Failed => {
                        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
                        shared.failed.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            job_id = %job.id,
                            queue = %job.queue_name,
                            error = error_text.as_deref().unwrap_or_default(),
                            "Job failed"
                        );
                    }
                }
            }
            Ok(false) => {
                // Already finalised, e.g. by a shutdown that gave up waiting.
                debug!(job_id = %job.id, "Job was finished elsewhere");
            }
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job result: {}", e);
            }
        }

        shared.in_flight.remove(&job.id);
        self.busy.store(false, Ordering::SeqCst);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// State shared by every worker in the pool.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn StateStore>,
    handlers: Arc<HandlerRegistry>,
    in_flight: DashMap<Uuid, Job>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Workers serving one queue.
struct QueueWorkers {
    token: CancellationToken,
    tracker: TaskTracker,
    concurrency: u32,
    workers: Vec<Arc<Worker>>,
}

/// Per-queue worker counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueWorkerStats {
    pub queue_name: String,
    pub concurrency: u32,
    pub busy: u32,
    pub completed: u64,
    pub failed: u64,
}

/// Pool-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub queues: Vec<QueueWorkerStats>,
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

/// What happened to in-flight work at shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All workers finished within the grace period.
    pub drained: bool,
    /// Jobs marked FAILED because they were still running at the deadline.
    pub interrupted: Vec<Uuid>,
}

/// Worker pool for concurrent job execution.
pub struct WorkerPool {
    shared: Arc<Shared>,
    queues: DashMap<String, QueueWorkers>,
    tracker: TaskTracker,
    token: CancellationToken,
    next_worker_id: AtomicU32,
}

impl WorkerPool {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn StateStore>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                dispatcher,
                store,
                handlers,
                in_flight: DashMap::new(),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            queues: DashMap::new(),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            next_worker_id: AtomicU32::new(1),
        }
    }

    /// Start workers for a queue. A no-op if they already run at this
    /// concurrency; otherwise the old set is replaced.
    pub fn start_queue(&self, queue_name: &str, concurrency: u32) {
        if self.token.is_cancelled() {
            return;
        }
        let concurrency = concurrency.max(1);
        let current = self.queue_concurrency(queue_name);
        let previous = match current {
            Some(current) if current == concurrency => return,
            Some(_) => self.stop_queue(queue_name),
            None => None,
        };
        self.launch(queue_name, concurrency, previous);
    }

    /// Replace a queue's workers with a set of the new size.
    ///
    /// The new workers only start once the old ones have finished their
    /// current jobs, so the queue never runs more than either limit.
    pub fn resize_queue(&self, queue_name: &str, concurrency: u32) {
        info!(queue = %queue_name, concurrency, "Resizing queue workers");
        self.start_queue(queue_name, concurrency);
    }

    /// Stop a queue's workers. Jobs already executing run to completion.
    /// Returns a tracker that completes once they have.
    pub fn stop_queue(&self, queue_name: &str) -> Option<TaskTracker> {
        let (_, workers) = self.queues.remove(queue_name)?;
        workers.token.cancel();
        workers.tracker.close();
        debug!(queue = %queue_name, "Stopped queue workers");
        Some(workers.tracker)
    }

    /// Make the running worker sets match the given queues.
    pub fn sync_queues(&self, queues: &[JobQueue]) {
        for queue in queues {
            self.start_queue(&queue.name, queue.concurrency);
        }
        let stale: Vec<String> = self
            .queues
            .iter()
            .map(|e| e.key().clone())
            .filter(|name| !queues.iter().any(|q| &q.name == name))
            .collect();
        for name in stale {
            self.stop_queue(&name);
        }
    }

    /// Concurrency of the running worker set, if any.
    pub fn queue_concurrency(&self, queue_name: &str) -> Option<u32> {
        self.queues.get(queue_name).map(|q| q.concurrency)
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Jobs currently executing.
    pub fn in_flight(&self) -> Vec<Job> {
        self.shared.in_flight.iter().map(|e| e.value().clone()).collect()
    }

    pub fn stats(&self) -> PoolStats {
        let mut queues: Vec<QueueWorkerStats> = self
            .queues
            .iter()
            .map(|entry| {
                let workers = &entry.value().workers;
                QueueWorkerStats {
                    queue_name: entry.key().clone(),
                    concurrency: entry.value().concurrency,
                    busy: workers.iter().filter(|w| w.is_busy()).count() as u32,
                    completed: workers.iter().map(|w| w.jobs_completed()).sum(),
                    failed: workers.iter().map(|w| w.jobs_failed()).sum(),
                }
            })
            .collect();
        queues.sort_by(|a, b| a.queue_name.cmp(&b.queue_name));

        PoolStats {
            queues,
            in_flight: self.shared.in_flight.len(),
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: self.shared.failed.load(Ordering::SeqCst),
        }
    }

    /// Stop taking new jobs and wait up to `timeout` for running ones.
    ///
    /// Jobs still running at the deadline are marked FAILED with
    /// [`SHUTDOWN_REASON`].
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!("Worker pool shutting down");
        self.token.cancel();
        self.tracker.close();
        let names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop_queue(&name);
        }

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok() {
            info!("Worker pool drained");
            return ShutdownReport {
                drained: true,
                interrupted: Vec::new(),
            };
        }

        let finished_at = clock::now();
        let mut interrupted = Vec::new();
        for job in self.in_flight() {
            match self
                .shared
                .store
                .finish_job(job.id, JobState::Failed, finished_at, Some(SHUTDOWN_REASON.to_string()))
                .await
            {
                Ok(true) => {
                    let log = ScriptTaskLog::for_job(
                        &job,
                        finished_at,
                        Outcome::Failed,
                        None,
                        Some(SHUTDOWN_REASON.to_string()),
                    );
                    if let Err(e) = self.shared.store.append_log(&log).await {
                        error!(job_id = %job.id, "Failed to write execution log: {}", e);
                    }
                    warn!(job_id = %job.id, "Job interrupted by shutdown");
                    interrupted.push(job.id);
                }
                Ok(false) => {}
                Err(e) => error!(job_id = %job.id, "Failed to mark job interrupted: {}", e),
            }
        }

        ShutdownReport {
            drained: false,
            interrupted,
        }
    }

    fn launch(&self, queue_name: &str, concurrency: u32, previous: Option<TaskTracker>) {
        let token = self.token.child_token();
        let tracker = TaskTracker::new();
        let workers: Vec<Arc<Worker>> = (0..concurrency)
            .map(|_| {
                let id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
                Arc::new(Worker::new(id, queue_name))
            })
            .collect();

        let lane = self.shared.dispatcher.lane(queue_name);
        let starter = {
            let shared = self.shared.clone();
            let pool_tracker = self.tracker.clone();
            let token = token.clone();
            let tracker = tracker.clone();
            let workers = workers.clone();
            async move {
                if let Some(previous) = previous {
                    previous.wait().await;
                }
                for worker in workers {
                    if token.is_cancelled() {
                        break;
                    }
                    let span = info_span!("worker", id = worker.id, queue = %worker.queue_name);
                    let run = run_worker(worker, lane.clone(), shared.clone(), token.clone());
                    pool_tracker.spawn(tracker.track_future(run.instrument(span)));
                }
                tracker.close();
            }
        };
        self.tracker.spawn(starter);

        info!(queue = %queue_name, concurrency, "Started queue workers");
        self.queues.insert(
            queue_name.to_string(),
            QueueWorkers {
                token,
                tracker,
                concurrency,
                workers,
            },
        );
    }
}

async fn run_worker(
    worker: Arc<Worker>,
    lane: Arc<QueueLane>,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    debug!("Worker started");
    loop {
        let pending = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            pending = lane.pop_wait() => pending,
        };

        let job = match shared.dispatcher.claim(pending.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                // Cancelled or claimed elsewhere since it was queued.
                debug!(job_id = %pending.job_id, "Skipping stale lane entry");
                continue;
            }
            Err(e) => {
                error!(job_id = %pending.job_id, "Failed to claim job: {}", e);
                lane.push(pending);
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(CLAIM_RETRY_DELAY) => continue,
                }
            }
        };

        worker.execute(job, &shared).await;
    }
    debug!("Worker stopped");
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
