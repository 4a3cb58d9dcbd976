//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::ConfigLoader;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Queues created at startup when missing.
    #[serde(default)]
    pub queues: Vec<QueueBootstrap>,
}

/// Base directory for jobhub state (`~/.jobhub`).
pub fn jobhub_home() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".jobhub"))
        .unwrap_or_else(|| PathBuf::from(".jobhub"))
}

/// State store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Keep all state in memory (nothing survives a restart).
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
        }
    }
}

impl StoreConfig {
    /// Database path with `~` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.path))
    }
}

fn default_store_path() -> String {
    jobhub_home().join("jobhub.db").to_string_lossy().into_owned()
}

/// Cron trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interval between due-task evaluations.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Maximum number of cron tasks evaluated concurrently.
    #[serde(default = "default_evaluation_slots")]
    pub evaluation_slots: usize,

    /// Fire tasks whose next-fire time passed while the process was down.
    #[serde(default)]
    pub fire_missed_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_ms: default_tick_interval_ms(),
            evaluation_slots: default_evaluation_slots(),
            fire_missed_on_startup: false,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_evaluation_slots() -> usize {
    10
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Workers per queue when the queue does not set its own concurrency.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: u32,

    /// How long in-flight jobs may keep running after shutdown is requested.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// How often in-memory queues are reconciled with persisted pending jobs.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

fn default_concurrency() -> u32 {
    2
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_reconcile_interval() -> u64 {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files.
    #[serde(default = "default_log_dir")]
    pub directory: String,

    /// Write log files in addition to the console.
    #[serde(default = "default_true")]
    pub file: bool,

    /// Emit JSON on the console instead of human-readable text.
    #[serde(default)]
    pub json: bool,

    /// Number of daily log files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            file: true,
            json: false,
            max_files: default_max_files(),
        }
    }
}

impl LoggingConfig {
    pub fn resolved_directory(&self) -> PathBuf {
        PathBuf::from(ConfigLoader::expand_path(&self.directory))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> String {
    jobhub_home().join("logs").to_string_lossy().into_owned()
}

fn default_max_files() -> usize {
    30
}

/// A queue declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueBootstrap {
    pub name: String,

    #[serde(default)]
    pub label: Option<String>,

    /// Maximum PENDING + RUNNING jobs. Required unless `unbounded` is set.
    #[serde(default)]
    pub capacity: Option<u32>,

    #[serde(default)]
    pub unbounded: bool,

    /// Workers for this queue; falls back to `workers.default_concurrency`.
    #[serde(default)]
    pub concurrency: Option<u32>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl QueueBootstrap {
    pub fn new(name: impl Into<String>, capacity: u32) -> Self {
        Self {
            name: name.into(),
            label: None,
            capacity: Some(capacity),
            unbounded: false,
            concurrency: None,
            enabled: true,
        }
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
