//! Job definition and lifecycle state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::clock;
use crate::cron_task::CronTask;

/// Job lifecycle state.
///
/// Transitions only move forward: `Pending -> Running -> {Success, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Success,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Success,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Success => "SUCCESS",
            JobState::Failed => "FAILED",
        }
    }

    /// SUCCESS and FAILED never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed)
    }

    /// PENDING and RUNNING jobs count against queue capacity.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobState::Pending),
            "RUNNING" => Ok(JobState::Running),
            "SUCCESS" => Ok(JobState::Success),
            "FAILED" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// What caused a job to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    Cron,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "CRON",
            TriggerType::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRON" => Ok(TriggerType::Cron),
            "MANUAL" => Ok(TriggerType::Manual),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

/// A request to run a task class on a queue.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub queue_name: String,
    pub task_class: String,
    pub params: Value,
    pub priority: i32,
    pub trigger: TriggerType,
    pub origin_task_id: Option<Uuid>,
    pub retry_of: Option<Uuid>,
}

impl SubmitRequest {
    /// A manual submission with empty params and priority 0.
    pub fn manual(queue_name: impl Into<String>, task_class: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            task_class: task_class.into(),
            params: Value::Null,
            priority: 0,
            trigger: TriggerType::Manual,
            origin_task_id: None,
            retry_of: None,
        }
    }

    /// The submission a cron task produces when it fires.
    pub fn from_cron(task: &CronTask) -> Self {
        Self {
            queue_name: task.queue_name.clone(),
            task_class: task.task_class.clone(),
            params: task.params.clone(),
            priority: task.priority,
            trigger: TriggerType::Cron,
            origin_task_id: Some(task.id),
            retry_of: None,
        }
    }

    /// A fresh manual copy of a finished job.
    pub fn retry_of(job: &Job) -> Self {
        Self {
            queue_name: job.queue_name.clone(),
            task_class: job.task_class.clone(),
            params: job.params.clone(),
            priority: job.priority,
            trigger: TriggerType::Manual,
            origin_task_id: job.origin_task_id,
            retry_of: Some(job.id),
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

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_origin(mut self, task_id: Uuid) -> Self {
        self.origin_task_id = Some(task_id);
        self
    }
}

/// A single unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Name resolved to a handler at run time.
    pub task_class: String,
    pub params: Value,
    pub queue_name: String,
    /// Higher values dequeue first.
    pub priority: i32,
    pub state: JobState,
    pub trigger: TriggerType,
    /// Cron task that produced this job.
    pub origin_task_id: Option<Uuid>,
    /// Job this one was resubmitted from.
    pub retry_of: Option<Uuid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    /// Create a PENDING job stamped with the submitting principal.
    pub fn new(request: SubmitRequest, principal: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_class: request.task_class,
            params: request.params,
            queue_name: request.queue_name,
            priority: request.priority,
            state: JobState::Pending,
            trigger: request.trigger,
            origin_task_id: request.origin_task_id,
            retry_of: request.retry_of,
            created_by: principal.to_string(),
            created_at: clock::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Wall time spent running, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Durable snapshot of a job waiting to be claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub job_id: Uuid,
    pub queue_name: String,
    pub priority: i32,
    /// Store-assigned insertion sequence; breaks ties between equal timestamps.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
