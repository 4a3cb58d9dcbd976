//! Named queue definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::error::QueueError;

/// Maximum number of PENDING + RUNNING jobs a queue may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    Bounded(u32),
    Unbounded,
}

impl QueueCapacity {
    /// A bounded capacity. Zero is rejected; use `Unbounded` for no limit.
    pub fn bounded(limit: u32) -> Result<Self, QueueError> {
        if limit == 0 {
            return Err(QueueError::InvalidCapacity(
                "capacity must be at least 1; use an unbounded queue for no limit".to_string(),
            ));
        }
        Ok(QueueCapacity::Bounded(limit))
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            QueueCapacity::Bounded(n) => Some(*n),
            QueueCapacity::Unbounded => None,
        }
    }

    /// Whether one more job fits given `active` PENDING + RUNNING jobs.
    pub fn admits(&self, active: u64) -> bool {
        match self {
            QueueCapacity::Bounded(n) => active < u64::from(*n),
            QueueCapacity::Unbounded => true,
        }
    }
}

impl fmt::Display for QueueCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueCapacity::Bounded(n) => write!(f, "{}", n),
            QueueCapacity::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// A named queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobQueue {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub capacity: QueueCapacity,
    /// Number of workers executing jobs from this queue.
    pub concurrency: u32,
    /// Disabled queues reject submissions but keep draining.
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl JobQueue {
    /// Create an enabled queue stamped with `principal`.
    pub fn new(
        name: impl Into<String>,
        capacity: QueueCapacity,
        concurrency: u32,
        principal: &str,
    ) -> Result<Self, QueueError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QueueError::InvalidName(name));
        }
        validate_capacity(capacity)?;
        validate_concurrency(concurrency)?;

        let now = clock::now();
        Ok(Self {
            id: Uuid::new_v4(),
            label: name.clone(),
            name,
            capacity,
            concurrency,
            enabled: true,
            created_at: now,
            created_by: principal.to_string(),
            updated_at: now,
            updated_by: principal.to_string(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Stamp an update.
    pub fn touch(&mut self, principal: &str) {
        self.updated_at = clock::now();
        self.updated_by = principal.to_string();
    }

    /// Apply a partial update. Returns true if concurrency changed.
    pub fn apply(&mut self, update: &QueueUpdate, principal: &str) -> Result<bool, QueueError> {
        if let Some(capacity) = update.capacity {
            validate_capacity(capacity)?;
        }
        if let Some(concurrency) = update.concurrency {
            validate_concurrency(concurrency)?;
        }

        if let Some(label) = &update.label {
            self.label = label.clone();
        }
        if let Some(capacity) = update.capacity {
            self.capacity = capacity;
        }
        let mut concurrency_changed = false;
        if let Some(concurrency) = update.concurrency {
            concurrency_changed = concurrency != self.concurrency;
            self.concurrency = concurrency;
        }
        self.touch(principal);
        Ok(concurrency_changed)
    }
}

fn validate_capacity(capacity: QueueCapacity) -> Result<(), QueueError> {
    match capacity {
        QueueCapacity::Bounded(n) => QueueCapacity::bounded(n).map(|_| ()),
        QueueCapacity::Unbounded => Ok(()),
    }
}

fn validate_concurrency(concurrency: u32) -> Result<(), QueueError> {
    if concurrency == 0 {
        return Err(QueueError::InvalidConcurrency(concurrency));
    }
    Ok(())
}

/// Parameters for creating a queue.
#[derive(Debug, Clone)]
pub struct NewQueue {
    pub name: String,
    pub label: Option<String>,
    pub capacity: QueueCapacity,
    /// Falls back to the engine's default concurrency.
    pub concurrency: Option<u32>,
    pub enabled: bool,
}

impl NewQueue {
    pub fn new(name: impl Into<String>, capacity: QueueCapacity) -> Self {
        Self {
            name: name.into(),
            label: None,
            capacity,
            concurrency: None,
            enabled: true,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial queue update. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct QueueUpdate {
    pub label: Option<String>,
    pub capacity: Option<QueueCapacity>,
    pub concurrency: Option<u32>,
}
