//! Queue registry: the authority on which queues exist and accept work.

use std::sync::Arc;

use tracing::info;

use crate::clock;
use crate::error::QueueError;
use crate::job_queue::{JobQueue, NewQueue, QueueUpdate};
use crate::store::StateStore;

/// Owns named queues and their capacity and enable state.
///
/// Nothing is cached: every answer comes from the store, so sizes stay
/// correct after a crash or a change made by another process.
pub struct QueueRegistry {
    store: Arc<dyn StateStore>,
    default_concurrency: u32,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn StateStore>, default_concurrency: u32) -> Self {
        Self {
            store,
            default_concurrency: default_concurrency.max(1),
        }
    }

    /// Create a queue. Fails with `DuplicateQueue` if the name exists.
    pub async fn create_queue(&self, new: NewQueue, principal: &str) -> Result<JobQueue, QueueError> {
        let concurrency = new.concurrency.unwrap_or(self.default_concurrency);
        let mut queue = JobQueue::new(new.name, new.capacity, concurrency, principal)?
            .with_enabled(new.enabled);
        if let Some(label) = new.label {
            queue = queue.with_label(label);
        }

        self.store.insert_queue(&queue).await?;
        info!(
            queue = %queue.name,
            capacity = %queue.capacity,
            concurrency = queue.concurrency,
            "Created queue"
        );
        Ok(queue)
    }

    /// Apply a partial update. Returns the queue and whether concurrency changed.
    pub async fn update_queue(
        &self,
        name: &str,
        update: &QueueUpdate,
        principal: &str,
    ) -> Result<(JobQueue, bool), QueueError> {
        let mut queue = self.require(name).await?;
        let concurrency_changed = queue.apply(update, principal)?;
        self.store.update_queue(&queue).await?;
        info!(queue = %name, "Updated queue");
        // Re-read: the enable flag may have changed underneath us.
        Ok((self.require(name).await?, concurrency_changed))
    }

    /// Enable or disable a queue. Idempotent; never touches existing jobs.
    pub async fn set_state(
        &self,
        name: &str,
        enabled: bool,
        principal: &str,
    ) -> Result<JobQueue, QueueError> {
        let queue = self.require(name).await?;
        if queue.enabled == enabled {
            return Ok(queue);
        }
        self.store
            .set_queue_enabled(name, enabled, clock::now(), principal)
            .await?;
        info!(queue = %name, enabled, "Changed queue state");
        self.require(name).await
    }

    /// PENDING + RUNNING jobs, always read from the store.
    pub async fn current_size(&self, name: &str) -> Result<u64, QueueError> {
        self.require(name).await?;
        self.store.active_count(name).await
    }

    /// Delete a queue that has no PENDING or RUNNING jobs.
    pub async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        self.store.delete_queue(name).await?;
        info!(queue = %name, "Deleted queue");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<JobQueue>, QueueError> {
        self.store.get_queue(name).await
    }

    pub async fn require(&self, name: &str) -> Result<JobQueue, QueueError> {
        self.store
            .get_queue(name)
            .await?
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<JobQueue>, QueueError> {
        self.store.list_queues().await
    }

    pub fn default_concurrency(&self) -> u32 {
        self.default_concurrency
    }
}
