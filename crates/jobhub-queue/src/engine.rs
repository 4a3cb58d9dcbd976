//! Engine: wires the store, registry, dispatcher, worker pool and cron
//! trigger together and owns their lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jobhub_config::{Config, QueueBootstrap};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::dispatcher::{Dispatcher, ReconcileReport};
use crate::error::QueueError;
use crate::handler::HandlerRegistry;
use crate::job_queue::{NewQueue, QueueCapacity};
use crate::log::{Outcome, ScriptTaskLog};
use crate::registry::QueueRegistry;
use crate::store::{MemoryStateStore, SqliteStateStore, StateStore};
use crate::trigger::CronTrigger;
use crate::worker::{ShutdownReport, WorkerPool};

/// Error recorded on jobs found RUNNING when the engine starts.
pub const RESTART_REASON: &str = "interrupted: process restarted";

/// Runtime knobs, usually taken from the config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scheduler_enabled: bool,
    pub tick_interval: Duration,
    pub evaluation_slots: usize,
    pub fire_missed_on_startup: bool,
    pub default_concurrency: u32,
    pub shutdown_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            scheduler_enabled: config.scheduler.enabled,
            tick_interval: config.scheduler.tick_interval(),
            evaluation_slots: config.scheduler.evaluation_slots,
            fire_missed_on_startup: config.scheduler.fire_missed_on_startup,
            default_concurrency: config.workers.default_concurrency,
            shutdown_timeout: config.workers.shutdown_timeout(),
            reconcile_interval: config.workers.reconcile_interval(),
        }
    }
}

/// What `start` recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartReport {
    /// RUNNING jobs from a previous process, now FAILED.
    pub interrupted: usize,
    /// PENDING jobs put back on their lanes.
    pub rehydrated: usize,
    /// Cron tasks whose missed fires were dropped.
    pub realigned: usize,
    /// Queues that got workers.
    pub queues: usize,
}

/// The job engine.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn StateStore>,
    pub(crate) registry: QueueRegistry,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) trigger: Arc<CronTrigger>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    background: TaskTracker,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Engine {
    pub fn new(
        store: Arc<dyn StateStore>,
        handlers: Arc<HandlerRegistry>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store.clone()));
        let pool = Arc::new(WorkerPool::new(
            dispatcher.clone(),
            store.clone(),
            handlers.clone(),
        ));
        let trigger = Arc::new(CronTrigger::new(
            store.clone(),
            dispatcher.clone(),
            config.evaluation_slots,
        ));
        Self {
            registry: QueueRegistry::new(store.clone(), config.default_concurrency),
            config,
            store,
            dispatcher,
            pool,
            trigger,
            handlers,
            background: TaskTracker::new(),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Open the configured store and build an engine over it.
    pub async fn open(config: &Config, handlers: Arc<HandlerRegistry>) -> Result<Self, QueueError> {
        let store: Arc<dyn StateStore> = if config.store.in_memory {
            info!("Using in-memory state store");
            Arc::new(MemoryStateStore::new())
        } else {
            let path = config.store.resolved_path();
            info!(path = %path.display(), "Opening state store");
            Arc::new(SqliteStateStore::open(&path).await?)
        };
        Ok(Self::new(store, handlers, EngineConfig::from(config)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Workers run only between `start` and `shutdown`.
    pub(crate) fn workers_active(&self) -> bool {
        self.is_started() && !self.is_shutting_down()
    }

    /// Create configured queues that do not exist yet. Existing rows win.
    pub async fn bootstrap_queues(
        &self,
        queues: &[QueueBootstrap],
        principal: &str,
    ) -> Result<usize, QueueError> {
        let mut created = 0;
        for bootstrap in queues {
            if self.registry.get(&bootstrap.name).await?.is_some() {
                debug!(queue = %bootstrap.name, "Queue exists, keeping stored settings");
                continue;
            }
            let new = new_queue_from(bootstrap)?;
            match self.registry.create_queue(new, principal).await {
                Ok(_) => created += 1,
                // Another process got there first.
                Err(QueueError::DuplicateQueue(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Recover persisted state and start workers and background loops.
    ///
    /// Order matters: orphaned RUNNING jobs are failed before anything can
    /// claim, and lanes are rebuilt before workers start popping.
    pub async fn start(&self) -> Result<StartReport, QueueError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }
        let mut report = StartReport::default();

        let now = clock::now();
        let interrupted = self.store.fail_running_jobs(now, RESTART_REASON).await?;
        for job in &interrupted {
            let log = ScriptTaskLog::for_job(job, now, Outcome::Failed, None, Some(RESTART_REASON.to_string()));
            self.store.append_log(&log).await?;
            warn!(job_id = %job.id, queue = %job.queue_name, "Failed job left running by previous process");
        }
        report.interrupted = interrupted.len();

        report.rehydrated = self.dispatcher.rehydrate().await?;

        if self.config.scheduler_enabled && !self.config.fire_missed_on_startup {
            report.realigned = self.trigger.realign(clock::now()).await?;
        }

        let queues = self.registry.list().await?;
        self.pool.sync_queues(&queues);
        report.queues = queues.len();

        if self.config.scheduler_enabled {
            let trigger = self.trigger.clone();
            let cancel = self.cancel.child_token();
            let interval = self.config.tick_interval;
            self.background.spawn(trigger.run(interval, cancel));
        } else {
            info!("Cron trigger disabled");
        }

        self.background.spawn(reconcile_loop(
            self.store.clone(),
            self.dispatcher.clone(),
            self.pool.clone(),
            self.config.reconcile_interval,
            self.cancel.child_token(),
        ));

        info!(
            interrupted = report.interrupted,
            rehydrated = report.rehydrated,
            realigned = report.realigned,
            queues = report.queues,
            "Engine started"
        );
        Ok(report)
    }

    /// Sync lanes and worker sets with the store once.
    pub async fn reconcile(&self) -> Result<ReconcileReport, QueueError> {
        reconcile_once(&self.store, &self.dispatcher, &self.pool).await
    }

    /// Stop the trigger, drain workers and wait for background loops.
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Engine shutting down");
        self.cancel.cancel();
        self.background.close();
        self.background.wait().await;

        let report = self.pool.shutdown(self.config.shutdown_timeout).await;
        if report.drained {
            info!("All running jobs finished");
        } else {
            warn!(interrupted = report.interrupted.len(), "Shutdown interrupted running jobs");
        }
        report
    }
}

/// Translate a config-file queue into creation parameters.
pub fn new_queue_from(bootstrap: &QueueBootstrap) -> Result<NewQueue, QueueError> {
    let capacity = match (bootstrap.unbounded, bootstrap.capacity) {
        (true, None) => QueueCapacity::Unbounded,
        (false, Some(limit)) => QueueCapacity::bounded(limit)?,
        (true, Some(_)) => {
            return Err(QueueError::InvalidCapacity(format!(
                "queue '{}' sets both capacity and unbounded",
                bootstrap.name
            )));
        }
        (false, None) => {
            return Err(QueueError::InvalidCapacity(format!(
                "queue '{}' needs a capacity or unbounded = true",
                bootstrap.name
            )));
        }
    };

    let mut new = NewQueue::new(bootstrap.name.clone(), capacity).with_enabled(bootstrap.enabled);
    if let Some(label) = &bootstrap.label {
        new = new.with_label(label.clone());
    }
    if let Some(concurrency) = bootstrap.concurrency {
        new = new.with_concurrency(concurrency);
    }
    Ok(new)
}

async fn reconcile_once(
    store: &Arc<dyn StateStore>,
    dispatcher: &Dispatcher,
    pool: &WorkerPool,
) -> Result<ReconcileReport, QueueError> {
    let report = dispatcher.reconcile().await?;
    let queues = store.list_queues().await?;
    pool.sync_queues(&queues);

    // Queues deleted elsewhere leave their lanes behind.
    for name in dispatcher.lane_names() {
        if queues.iter().any(|q| q.name == name) {
            continue;
        }
        if store.get_queue(&name).await?.is_none() {
            dispatcher.drop_lane(&name);
            debug!(queue = %name, "Dropped lane of deleted queue");
        }
    }
    Ok(report)
}

async fn reconcile_loop(
    store: Arc<dyn StateStore>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<WorkerPool>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately and start() has just reconciled.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match reconcile_once(&store, &dispatcher, &pool).await {
            Ok(report) if report.added > 0 || report.removed > 0 => {
                info!(added = report.added, removed = report.removed, "Reconciled pending jobs");
            }
            Ok(_) => {}
            Err(e) => error!("Reconcile failed: {}", e),
        }
    }
    debug!("Reconcile loop stopped");
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
