//! Cron trigger: turns due cron tasks into CRON jobs.
//!
//! Each tick reads the due tasks from the store and fires them on a bounded
//! set of evaluation slots. A task is fired by at most one evaluation at a
//! time, and its next fire time is always computed from the tick instant, so
//! fires missed during downtime are dropped instead of replayed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock;
use crate::cron_task::next_fire_after;
use crate::dispatcher::Dispatcher;
use crate::error::QueueError;
use crate::job::SubmitRequest;
use crate::store::StateStore;

/// Principal stamped on jobs the trigger submits.
pub const CRON_PRINCIPAL: &str = "cron";

/// Reads of a task that is being edited before a tick gives up on it.
const MAX_FIRE_ATTEMPTS: usize = 3;

/// Counts from one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tasks the store reported as due.
    pub due: usize,
    /// Fires that produced a job.
    pub fired: usize,
    /// Fires whose submission was rejected.
    pub skipped: usize,
    /// Tasks still being evaluated by an earlier tick.
    pub busy: usize,
    /// Evaluations that failed on a store error.
    pub errors: usize,
}

enum FireOutcome {
    Fired,
    Skipped,
    NotDue,
}

/// Periodic evaluator of cron tasks.
pub struct CronTrigger {
    store: Arc<dyn StateStore>,
    dispatcher: Arc<Dispatcher>,
    slots: Arc<Semaphore>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl CronTrigger {
    pub fn new(
        store: Arc<dyn StateStore>,
        dispatcher: Arc<Dispatcher>,
        evaluation_slots: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            slots: Arc::new(Semaphore::new(evaluation_slots.max(1))),
            locks: DashMap::new(),
        }
    }

    /// Evaluate every task due at `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, QueueError> {
        let due = self.store.due_cron_tasks(now).await?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        let mut fires = JoinSet::new();
        for task in due {
            let lock = self
                .locks
                .entry(task.id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            let Ok(guard) = lock.try_lock_owned() else {
                debug!(cron_task = %task.name, "Cron task still being evaluated");
                report.busy += 1;
                continue;
            };

            let store = self.store.clone();
            let dispatcher = self.dispatcher.clone();
            let slots = self.slots.clone();
            fires.spawn(async move {
                let _guard = guard;
                let _permit = slots.acquire_owned().await.map_err(|_| QueueError::Shutdown)?;
                fire(store, dispatcher, task.id, now).await
            });
        }

        while let Some(joined) = fires.join_next().await {
            match joined {
                Ok(Ok(FireOutcome::Fired)) => report.fired += 1,
                Ok(Ok(FireOutcome::Skipped)) => report.skipped += 1,
                Ok(Ok(FireOutcome::NotDue)) => {}
                Ok(Err(e)) => {
                    error!("Cron evaluation failed: {}", e);
                    report.errors += 1;
                }
                Err(e) => {
                    error!("Cron evaluation task panicked: {}", e);
                    report.errors += 1;
                }
            }
        }

        if report.due > 0 {
            debug!(
                due = report.due,
                fired = report.fired,
                skipped = report.skipped,
                busy = report.busy,
                "Cron tick complete"
            );
        }
        Ok(report)
    }

    /// Move stale next fire times to the first occurrence after `now`
    /// without firing. Returns how many tasks were realigned.
    pub async fn realign(&self, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let mut realigned = 0;
        for mut task in self.store.due_cron_tasks(now).await? {
            if let Err(e) = task.reschedule(now) {
                error!(cron_task = %task.name, "Cannot reschedule cron task: {}", e);
                task.next_fire_at = None;
            }
            self.store.update_cron_task(&task).await?;
            realigned += 1;
        }
        if realigned > 0 {
            info!(realigned, "Dropped missed cron fires");
        }
        Ok(realigned)
    }

    /// Release bookkeeping for a deleted task.
    pub fn forget(&self, task_id: Uuid) {
        self.locks.remove(&task_id);
    }

    /// Tick every `interval` until cancelled.
    ///
    /// Ticks run on their own tasks, so a slow tick never delays the next.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "Cron trigger started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let ticks = TaskTracker::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let trigger = self.clone();
            ticks.spawn(async move {
                if let Err(e) = trigger.tick(clock::now()).await {
                    error!("Cron tick failed: {}", e);
                }
            });
        }

        ticks.close();
        ticks.wait().await;
        info!("Cron trigger stopped");
    }
}

/// Fire one task if it is still due.
///
/// The next fire time is persisted before submitting, so a failed or
/// rejected submission never causes a replay. The write only lands if the
/// task is unchanged since it was read; after a concurrent edit the task
/// is read again and judged on its new schedule.
async fn fire(
    store: Arc<dyn StateStore>,
    dispatcher: Arc<Dispatcher>,
    task_id: Uuid,
    now: DateTime<Utc>,
) -> Result<FireOutcome, QueueError> {
    let mut attempt = 0;
    let (task, next) = loop {
        // Re-read under the task lock; an earlier tick may have fired it.
        let Some(task) = store.get_cron_task(task_id).await? else {
            return Ok(FireOutcome::NotDue);
        };
        if !task.is_due(now) {
            return Ok(FireOutcome::NotDue);
        }

        let next = match next_fire_after(&task.cron_expression, now) {
            Ok(next) => next,
            Err(e) => {
                error!(cron_task = %task.name, "Cannot compute next fire: {}", e);
                None
            }
        };
        if store.record_fire(task.id, task.updated_at, now, next).await? {
            break (task, next);
        }

        attempt += 1;
        if attempt >= MAX_FIRE_ATTEMPTS {
            warn!(cron_task = %task.name, "Cron task keeps changing, skipping this tick");
            return Ok(FireOutcome::NotDue);
        }
        debug!(cron_task = %task.name, "Cron task changed during evaluation, re-reading");
    };

    match dispatcher
        .submit(SubmitRequest::from_cron(&task), CRON_PRINCIPAL)
        .await
    {
        Ok(job) => {
            info!(
                cron_task = %task.name,
                job_id = %job.id,
                queue = %task.queue_name,
                next_fire_at = ?next,
                "Cron task fired"
            );
            Ok(FireOutcome::Fired)
        }
        Err(e) => {
            warn!(
                cron_task = %task.name,
                queue = %task.queue_name,
                next_fire_at = ?next,
                "Skipped cron fire: {}",
                e
            );
            Ok(FireOutcome::Skipped)
        }
    }
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
