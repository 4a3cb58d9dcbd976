//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- Named queues; NULL capacity means unbounded
CREATE TABLE IF NOT EXISTS job_queue (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    capacity INTEGER,
    concurrency INTEGER NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL
);

-- Cron-scheduled job definitions
CREATE TABLE IF NOT EXISTS cron_task (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    label TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    queue_name TEXT NOT NULL,
    task_class TEXT NOT NULL,
    params TEXT NOT NULL DEFAULT 'null',
    priority INTEGER NOT NULL DEFAULT 0,
    next_fire_at TEXT,
    last_fired_at TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    updated_by TEXT NOT NULL
);

-- Jobs in every state
CREATE TABLE IF NOT EXISTS job (
    id TEXT PRIMARY KEY,
    task_class TEXT NOT NULL,
    params TEXT NOT NULL DEFAULT 'null',
    queue_name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    origin_task_id TEXT,
    retry_of TEXT,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    error TEXT
);

-- Snapshot of unclaimed jobs, used to rebuild in-memory queues
CREATE TABLE IF NOT EXISTS pending_job (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL UNIQUE,
    queue_name TEXT NOT NULL,
    priority INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Append-only execution log
CREATE TABLE IF NOT EXISTS script_task_log (
    id TEXT PRIMARY KEY,
    job_id TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 1,
    task_class TEXT NOT NULL,
    queue_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    outcome TEXT NOT NULL,
    output TEXT,
    error TEXT
);

-- Indexes for efficient queries
CREATE INDEX IF NOT EXISTS idx_cron_task_due ON cron_task(enabled, next_fire_at);
CREATE INDEX IF NOT EXISTS idx_job_queue_state ON job(queue_name, state);
CREATE INDEX IF NOT EXISTS idx_job_state ON job(state);
CREATE INDEX IF NOT EXISTS idx_job_created ON job(created_at);
CREATE INDEX IF NOT EXISTS idx_pending_job_queue ON pending_job(queue_name);
CREATE INDEX IF NOT EXISTS idx_script_task_log_job ON script_task_log(job_id);
"#;
