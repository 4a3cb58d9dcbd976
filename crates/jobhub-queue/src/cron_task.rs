//! Cron task definitions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock;
use crate::error::QueueError;

/// Parse a cron expression.
///
/// Accepts the `cron` crate's 6/7-field syntax (seconds first). Classic 5-field
/// expressions get a `0` seconds field prepended.
pub fn parse_schedule(expression: &str) -> Result<Schedule, QueueError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCronExpression {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// First fire time strictly after `after`, if the schedule has one.
pub fn next_fire_after(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, QueueError> {
    let schedule = parse_schedule(expression)?;
    Ok(schedule.after(&after).next())
}

/// A cron-scheduled job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronTask {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub cron_expression: String,
    pub enabled: bool,
    pub queue_name: String,
    pub task_class: String,
    pub params: Value,
    pub priority: i32,
    /// `None` when disabled or when the schedule has no future occurrence.
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl CronTask {
    /// Validate and build a task, computing its first fire time.
    pub fn new(new: NewCronTask, principal: &str) -> Result<Self, QueueError> {
        if new.name.trim().is_empty() {
            return Err(QueueError::InvalidName(new.name));
        }
        parse_schedule(&new.cron_expression)?;

        let now = clock::now();
        let mut task = Self {
            id: Uuid::new_v4(),
            label: new.label.unwrap_or_else(|| new.name.clone()),
            name: new.name,
            cron_expression: new.cron_expression,
            enabled: new.enabled,
            queue_name: new.queue_name,
            task_class: new.task_class,
            params: new.params,
            priority: new.priority,
            next_fire_at: None,
            last_fired_at: None,
            created_at: now,
            created_by: principal.to_string(),
            updated_at: now,
            updated_by: principal.to_string(),
        };
        task.reschedule(now)?;
        Ok(task)
    }

    /// Recompute `next_fire_at` relative to `now`.
    pub fn reschedule(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.next_fire_at = if self.enabled {
            next_fire_after(&self.cron_expression, now)?
        } else {
            None
        };
        Ok(())
    }

    /// Enabled and the next fire time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_at.is_some_and(|next| next <= now)
    }

    /// Stamp an admin change. `updated_at` always moves forward, since the
    /// trigger uses it to detect edits made after its read.
    pub fn touch(&mut self, principal: &str) {
        let floor = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = clock::now().max(floor);
        self.updated_by = principal.to_string();
    }

    /// Apply a partial update and recompute the next fire time.
    pub fn apply(&mut self, update: CronTaskUpdate, principal: &str) -> Result<(), QueueError> {
        if let Some(expression) = &update.cron_expression {
            parse_schedule(expression)?;
        }

        if let Some(label) = update.label {
            self.label = label;
        }
        if let Some(expression) = update.cron_expression {
            self.cron_expression = expression;
        }
        if let Some(queue_name) = update.queue_name {
            self.queue_name = queue_name;
        }
        if let Some(task_class) = update.task_class {
            self.task_class = task_class;
        }
        if let Some(params) = update.params {
            self.params = params;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        self.touch(principal);
        self.reschedule(clock::now())
    }

    /// Enable or disable. Enabling schedules from now, so missed fires are dropped.
    pub fn set_enabled(&mut self, enabled: bool, principal: &str) -> Result<(), QueueError> {
        self.enabled = enabled;
        self.touch(principal);
        self.reschedule(clock::now())
    }
}

/// Parameters for creating a cron task.
#[derive(Debug, Clone)]
pub struct NewCronTask {
    pub name: String,
    pub label: Option<String>,
    pub cron_expression: String,
    pub queue_name: String,
    pub task_class: String,
    pub params: Value,
    pub priority: i32,
    pub enabled: bool,
}

impl NewCronTask {
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        queue_name: impl Into<String>,
        task_class: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: None,
            cron_expression: cron_expression.into(),
            queue_name: queue_name.into(),
            task_class: task_class.into(),
            params: Value::Null,
            priority: 0,
            enabled: true,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Partial cron task update.
#[derive(Debug, Clone, Default)]
pub struct CronTaskUpdate {
    pub label: Option<String>,
    pub cron_expression: Option<String>,
    pub queue_name: Option<String>,
    pub task_class: Option<String>,
    pub params: Option<Value>,
    pub priority: Option<i32>,
}

#[cfg(test)]
#[path = "cron_task_tests.rs"]
mod tests;
