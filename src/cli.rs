//! CLI definitions for jobhub.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use jobhub_queue::{JobState, TriggerType};

/// jobhub CLI.
#[derive(Parser)]
#[command(name = "jobhub")]
#[command(about = "Cron-triggered background job queues")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/jobhub.toml", global = true)]
    pub config: PathBuf,

    /// Principal recorded on rows this command creates or updates
    #[arg(long, env = "JOBHUB_PRINCIPAL", default_value = "admin", global = true)]
    pub principal: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the scheduler and workers in the foreground (default)
    Run,

    /// Queue management commands
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Cron task management commands
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },

    /// Job management commands
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Show job counts by state and queue
    Stats,
}

#[derive(Subcommand)]
pub(crate) enum QueueAction {
    /// List all queues
    List,

    /// Create a queue
    Create {
        /// Queue name
        name: String,

        /// Maximum PENDING + RUNNING jobs
        #[arg(long, conflicts_with = "unbounded", required_unless_present = "unbounded")]
        capacity: Option<u32>,

        /// No capacity limit
        #[arg(long)]
        unbounded: bool,

        /// Display label
        #[arg(long)]
        label: Option<String>,

        /// Number of workers
        #[arg(long)]
        concurrency: Option<u32>,

        /// Create the queue disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Update label, capacity or concurrency
    Update {
        /// Queue name
        name: String,

        #[arg(long)]
        label: Option<String>,

        #[arg(long, conflicts_with = "unbounded")]
        capacity: Option<u32>,

        #[arg(long)]
        unbounded: bool,

        #[arg(long)]
        concurrency: Option<u32>,
    },

    /// Accept new submissions
    Enable { name: String },

    /// Reject new submissions; queued jobs still run
    Disable { name: String },

    /// Delete an idle queue
    Delete { name: String },

    /// Show PENDING + RUNNING count
    Size { name: String },
}

#[derive(Subcommand)]
pub(crate) enum CronAction {
    /// List all cron tasks
    List,

    /// Create a cron task
    Create {
        /// Task name
        name: String,

        /// Cron expression (5, 6 or 7 fields)
        #[arg(long)]
        schedule: String,

        /// Target queue
        #[arg(long)]
        queue: String,

        /// Task class to run
        #[arg(long)]
        task_class: String,

        /// JSON parameters passed to each job
        #[arg(long)]
        params: Option<String>,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        #[arg(long)]
        label: Option<String>,

        /// Create the task disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Change a cron task; the next fire is recomputed from now
    Update {
        /// Task name
        name: String,

        #[arg(long)]
        schedule: Option<String>,

        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        task_class: Option<String>,

        /// JSON parameters passed to each job
        #[arg(long)]
        params: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        priority: Option<i32>,

        #[arg(long)]
        label: Option<String>,
    },

    /// Delete a cron task
    Delete { name: String },

    /// Enable a cron task; the next fire is computed from now
    Enable { name: String },

    /// Disable a cron task
    Disable { name: String },

    /// Submit the task's job right now
    Trigger { name: String },
}

#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Submit a job
    Submit {
        /// Task class to run
        task_class: String,

        /// Target queue
        #[arg(long, default_value = "default")]
        queue: String,

        /// JSON parameters
        #[arg(long)]
        params: Option<String>,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,
    },

    /// Cancel a PENDING job
    Cancel { id: Uuid },

    /// Resubmit a finished job
    Retry { id: Uuid },

    /// Delete a job (PENDING jobs are cancelled)
    Delete { id: Uuid },

    /// Show one job
    Show { id: Uuid },

    /// List jobs, newest first
    List {
        #[arg(long)]
        state: Option<JobState>,

        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        task_class: Option<String>,

        #[arg(long)]
        trigger: Option<TriggerType>,

        /// Match task class, queue, params or error text
        #[arg(long)]
        keyword: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    /// Show execution logs for a job
    Logs { id: Uuid },
}
