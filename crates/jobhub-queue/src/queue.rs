//! In-memory priority lane for one named queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::job::PendingJob;

/// Wrapper for priority queue ordering.
#[derive(Debug, Clone)]
struct PriorityEntry(PendingJob);

impl PartialEq for PriorityEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.job_id == other.0.job_id
    }
}

impl Eq for PriorityEntry {}

impl PartialOrd for PriorityEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier creation, then earlier insertion
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.created_at.cmp(&self.0.created_at))
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<PriorityEntry>,
    members: HashSet<Uuid>,
}

/// Priority-then-FIFO lane of pending jobs.
///
/// A cache of the store's pending snapshots for one queue. Popping an entry
/// does not claim the job; workers still claim through the store, so a stale
/// entry is harmless.
pub struct QueueLane {
    name: String,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl QueueLane {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an entry. Returns false if the job is already queued.
    pub fn push(&self, pending: PendingJob) -> bool {
        {
            let mut inner = self.inner.lock();
            if !inner.members.insert(pending.job_id) {
                return false;
            }
            inner.heap.push(PriorityEntry(pending));
        }
        self.notify.notify_one();
        true
    }

    /// Remove and return the highest-priority entry.
    pub fn pop(&self) -> Option<PendingJob> {
        let mut inner = self.inner.lock();
        let entry = inner.heap.pop()?;
        inner.members.remove(&entry.0.job_id);
        Some(entry.0)
    }

    /// Wait until an entry is available and pop it.
    ///
    /// Cancel-safe: an entry is only removed in the same poll that returns it.
    pub async fn pop_wait(&self) -> PendingJob {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(pending) = self.pop() {
                return pending;
            }
            notified.await;
        }
    }

    /// Drop an entry, e.g. after cancellation.
    pub fn remove(&self, job_id: &Uuid) -> bool {
        let mut inner = self.inner.lock();
        if !inner.members.remove(job_id) {
            return false;
        }
        inner.heap.retain(|e| e.0.job_id != *job_id);
        true
    }

    /// Keep only entries for which `keep` returns true. Returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&PendingJob) -> bool) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.heap.len();
        let mut dropped = Vec::new();
        inner.heap.retain(|e| {
            let kept = keep(&e.0);
            if !kept {
                dropped.push(e.0.job_id);
            }
            kept
        });
        for id in &dropped {
            inner.members.remove(id);
        }
        before - inner.heap.len()
    }

    /// Highest sequence number currently queued.
    pub fn max_seq(&self) -> Option<i64> {
        self.inner.lock().heap.iter().map(|e| e.0.seq).max()
    }

    pub fn contains(&self, job_id: &Uuid) -> bool {
        self.inner.lock().members.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued job ids in dequeue order.
    pub fn snapshot(&self) -> Vec<Uuid> {
        let inner = self.inner.lock();
        inner
            .heap
            .clone()
            .into_sorted_vec()
            .into_iter()
            .rev()
            .map(|e| e.0.job_id)
            .collect()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
