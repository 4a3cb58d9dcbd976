//! Execution log records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{Job, JobState};

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failed => "FAILED",
        }
    }

    /// The terminal job state this outcome produces.
    pub fn job_state(&self) -> JobState {
        match self {
            Outcome::Success => JobState::Success,
            Outcome::Failed => JobState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Outcome::Success),
            "FAILED" => Ok(Outcome::Failed),
            other => Err(format!("unknown outcome: {}", other)),
        }
    }
}

/// Append-only record of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptTaskLog {
    pub id: Uuid,
    pub job_id: Uuid,
    /// Always 1 while jobs are single-attempt; resubmissions are new jobs.
    pub attempt: u32,
    pub task_class: String,
    pub queue_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ScriptTaskLog {
    /// Build the log entry for a job that has just finished.
    pub fn for_job(
        job: &Job,
        finished_at: DateTime<Utc>,
        outcome: Outcome,
        output: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            attempt: 1,
            task_class: job.task_class.clone(),
            queue_name: job.queue_name.clone(),
            started_at: job.started_at.unwrap_or(finished_at),
            finished_at,
            outcome,
            output,
            error,
        }
    }
}
