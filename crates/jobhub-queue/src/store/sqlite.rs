//! SQLite state store.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use super::schema::init_schema;
use super::{InsertOutcome, StateStore};
use crate::clock;
use crate::cron_task::CronTask;
use crate::error::QueueError;
use crate::job::{Job, JobState, PendingJob};
use crate::job_queue::{JobQueue, QueueCapacity};
use crate::log::ScriptTaskLog;
use crate::query::{JobQuery, JobStats, Page, StateCounts};

const QUEUE_COLUMNS: &str = "id, name, label, capacity, concurrency, enabled, \
     created_at, created_by, updated_at, updated_by";

const CRON_COLUMNS: &str = "id, name, label, cron_expression, enabled, queue_name, task_class, \
     params, priority, next_fire_at, last_fired_at, created_at, created_by, updated_at, updated_by";

const JOB_COLUMNS: &str = "id, task_class, params, queue_name, priority, state, trigger_type, \
     origin_task_id, retry_of, created_by, created_at, started_at, finished_at, error";

const LOG_COLUMNS: &str = "id, job_id, attempt, task_class, queue_name, started_at, finished_at, \
     outcome, output, error";

/// Durable state store on SQLite.
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        conn.call(|conn| init_schema(conn)).await?;
        Ok(Self { conn })
    }

    /// Open (or create) a file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                QueueError::Store(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        debug!("Opening state store at {:?}", path);
        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            init_schema(conn)
        })
        .await?;

        Ok(Self { conn })
    }
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn get_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    clock::from_text(&s).map_err(|e| conversion_error(idx, e))
}

fn get_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| clock::from_text(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn get_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: String| conversion_error(idx, e))
}

fn opt_text(dt: Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(clock::to_text)
}

fn queue_from_row(row: &Row<'_>) -> rusqlite::Result<JobQueue> {
    let capacity: Option<i64> = row.get(3)?;
    let concurrency: i64 = row.get(4)?;
    Ok(JobQueue {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        label: row.get(2)?,
        capacity: match capacity {
            Some(n) => QueueCapacity::Bounded(n as u32),
            None => QueueCapacity::Unbounded,
        },
        concurrency: concurrency as u32,
        enabled: row.get(5)?,
        created_at: get_time(row, 6)?,
        created_by: row.get(7)?,
        updated_at: get_time(row, 8)?,
        updated_by: row.get(9)?,
    })
}

fn cron_from_row(row: &Row<'_>) -> rusqlite::Result<CronTask> {
    Ok(CronTask {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        label: row.get(2)?,
        cron_expression: row.get(3)?,
        enabled: row.get(4)?,
        queue_name: row.get(5)?,
        task_class: row.get(6)?,
        params: get_json(row, 7)?,
        priority: row.get(8)?,
        next_fire_at: get_opt_time(row, 9)?,
        last_fired_at: get_opt_time(row, 10)?,
        created_at: get_time(row, 11)?,
        created_by: row.get(12)?,
        updated_at: get_time(row, 13)?,
        updated_by: row.get(14)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: get_uuid(row, 0)?,
        task_class: row.get(1)?,
        params: get_json(row, 2)?,
        queue_name: row.get(3)?,
        priority: row.get(4)?,
        state: get_parsed(row, 5)?,
        trigger: get_parsed(row, 6)?,
        origin_task_id: get_opt_uuid(row, 7)?,
        retry_of: get_opt_uuid(row, 8)?,
        created_by: row.get(9)?,
        created_at: get_time(row, 10)?,
        started_at: get_opt_time(row, 11)?,
        finished_at: get_opt_time(row, 12)?,
        error: row.get(13)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ScriptTaskLog> {
    let attempt: i64 = row.get(2)?;
    Ok(ScriptTaskLog {
        id: get_uuid(row, 0)?,
        job_id: get_uuid(row, 1)?,
        attempt: attempt as u32,
        task_class: row.get(3)?,
        queue_name: row.get(4)?,
        started_at: get_time(row, 5)?,
        finished_at: get_time(row, 6)?,
        outcome: get_parsed(row, 7)?,
        output: row.get(8)?,
        error: row.get(9)?,
    })
}

fn pending_from_row(row: &Row<'_>) -> rusqlite::Result<PendingJob> {
    Ok(PendingJob {
        seq: row.get(0)?,
        job_id: get_uuid(row, 1)?,
        queue_name: row.get(2)?,
        priority: row.get(3)?,
        created_at: get_time(row, 4)?,
    })
}

fn select_job(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {} FROM job WHERE id = ?1", JOB_COLUMNS),
        [id],
        job_from_row,
    )
    .optional()
}

fn count_active(conn: &rusqlite::Connection, queue_name: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM job WHERE queue_name = ?1 AND state IN ('PENDING', 'RUNNING')",
        [queue_name],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}

/// `%keyword%` with LIKE wildcards escaped.
fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

enum DeleteQueue {
    Deleted,
    NotFound,
    Busy(u64),
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn insert_queue(&self, queue: &JobQueue) -> Result<(), QueueError> {
        let queue = queue.clone();
        let name = queue.name.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: Option<i64> = tx
                    .query_row("SELECT 1 FROM job_queue WHERE name = ?1", [&queue.name], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if exists.is_some() {
                    return Ok(false);
                }
                tx.execute(
                    &format!(
                        "INSERT INTO job_queue ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        QUEUE_COLUMNS
                    ),
                    params![
                        queue.id.to_string(),
                        queue.name,
                        queue.label,
                        queue.capacity.limit(),
                        queue.concurrency,
                        queue.enabled,
                        clock::to_text(&queue.created_at),
                        queue.created_by,
                        clock::to_text(&queue.updated_at),
                        queue.updated_by,
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(QueueError::DuplicateQueue(name))
        }
    }

    async fn update_queue(&self, queue: &JobQueue) -> Result<(), QueueError> {
        let queue = queue.clone();
        let name = queue.name.clone();
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE job_queue SET label = ?2, capacity = ?3, concurrency = ?4,
                     updated_at = ?5, updated_by = ?6 WHERE name = ?1",
                    params![
                        queue.name,
                        queue.label,
                        queue.capacity.limit(),
                        queue.concurrency,
                        clock::to_text(&queue.updated_at),
                        queue.updated_by,
                    ],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(QueueError::QueueNotFound(name));
        }
        Ok(())
    }

    async fn set_queue_enabled(
        &self,
        name: &str,
        enabled: bool,
        updated_at: DateTime<Utc>,
        updated_by: &str,
    ) -> Result<(), QueueError> {
        let name = name.to_string();
        let updated_by = updated_by.to_string();
        let key = name.clone();
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE job_queue SET enabled = ?2, updated_at = ?3, updated_by = ?4
                     WHERE name = ?1",
                    params![key, enabled, clock::to_text(&updated_at), updated_by],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(QueueError::QueueNotFound(name));
        }
        Ok(())
    }

    async fn get_queue(&self, name: &str) -> Result<Option<JobQueue>, QueueError> {
        let name = name.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM job_queue WHERE name = ?1", QUEUE_COLUMNS),
                        [&name],
                        queue_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    async fn list_queues(&self) -> Result<Vec<JobQueue>, QueueError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM job_queue ORDER BY name",
                    QUEUE_COLUMNS
                ))?;
                let queues = stmt
                    .query_map([], queue_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(queues)
            })
            .await?)
    }

    async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        let owned = name.to_string();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: Option<i64> = tx
                    .query_row("SELECT 1 FROM job_queue WHERE name = ?1", [&owned], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if exists.is_none() {
                    return Ok(DeleteQueue::NotFound);
                }
                let active = count_active(&tx, &owned)?;
                if active > 0 {
                    return Ok(DeleteQueue::Busy(active));
                }
                tx.execute("DELETE FROM job_queue WHERE name = ?1", [&owned])?;
                tx.commit()?;
                Ok(DeleteQueue::Deleted)
            })
            .await?;

        match outcome {
            DeleteQueue::Deleted => Ok(()),
            DeleteQueue::NotFound => Err(QueueError::QueueNotFound(name.to_string())),
            DeleteQueue::Busy(active) => Err(QueueError::QueueBusy {
                name: name.to_string(),
                active,
            }),
        }
    }

    async fn insert_cron_task(&self, task: &CronTask) -> Result<(), QueueError> {
        let task = task.clone();
        let name = task.name.clone();
        let params_text = serde_json::to_string(&task.params)?;
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: Option<i64> = tx
                    .query_row("SELECT 1 FROM cron_task WHERE name = ?1", [&task.name], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if exists.is_some() {
                    return Ok(false);
                }
                tx.execute(
                    &format!(
                        "INSERT INTO cron_task ({}) VALUES
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                        CRON_COLUMNS
                    ),
                    params![
                        task.id.to_string(),
                        task.name,
                        task.label,
                        task.cron_expression,
                        task.enabled,
                        task.queue_name,
                        task.task_class,
                        params_text,
                        task.priority,
                        opt_text(task.next_fire_at),
                        opt_text(task.last_fired_at),
                        clock::to_text(&task.created_at),
                        task.created_by,
                        clock::to_text(&task.updated_at),
                        task.updated_by,
                    ],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(QueueError::DuplicateCronTask(name))
        }
    }

    async fn update_cron_task(&self, task: &CronTask) -> Result<(), QueueError> {
        let task = task.clone();
        let id = task.id;
        let name = task.name.clone();
        let params_text = serde_json::to_string(&task.params)?;
        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let clash: Option<i64> = tx
                    .query_row(
                        "SELECT 1 FROM cron_task WHERE name = ?1 AND id <> ?2",
                        params![task.name, task.id.to_string()],
                        |r| r.get(0),
                    )
                    .optional()?;
                if clash.is_some() {
                    return Ok(None);
                }
                let n = tx.execute(
                    "UPDATE cron_task SET name = ?2, label = ?3, cron_expression = ?4, enabled = ?5,
                     queue_name = ?6, task_class = ?7, params = ?8, priority = ?9,
                     next_fire_at = ?10, last_fired_at = ?11, updated_at = ?12, updated_by = ?13
                     WHERE id = ?1",
                    params![
                        task.id.to_string(),
                        task.name,
                        task.label,
                        task.cron_expression,
                        task.enabled,
                        task.queue_name,
                        task.task_class,
                        params_text,
                        task.priority,
                        opt_text(task.next_fire_at),
                        opt_text(task.last_fired_at),
                        clock::to_text(&task.updated_at),
                        task.updated_by,
                    ],
                )?;
                tx.commit()?;
                Ok(Some(n))
            })
            .await?;

        match updated {
            None => Err(QueueError::DuplicateCronTask(name)),
            Some(0) => Err(QueueError::CronTaskNotFound(id.to_string())),
            Some(_) => Ok(()),
        }
    }

    async fn get_cron_task(&self, id: Uuid) -> Result<Option<CronTask>, QueueError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM cron_task WHERE id = ?1", CRON_COLUMNS),
                        [id.to_string()],
                        cron_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    async fn find_cron_task(&self, name: &str) -> Result<Option<CronTask>, QueueError> {
        let name = name.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM cron_task WHERE name = ?1", CRON_COLUMNS),
                        [&name],
                        cron_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    async fn list_cron_tasks(&self) -> Result<Vec<CronTask>, QueueError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM cron_task ORDER BY name",
                    CRON_COLUMNS
                ))?;
                let tasks = stmt
                    .query_map([], cron_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tasks)
            })
            .await?)
    }

    async fn delete_cron_task(&self, id: Uuid) -> Result<bool, QueueError> {
        let n = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM cron_task WHERE id = ?1", [id.to_string()])?))
            .await?;
        Ok(n > 0)
    }

    async fn due_cron_tasks(&self, now: DateTime<Utc>) -> Result<Vec<CronTask>, QueueError> {
        let now = clock::to_text(&now);
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM cron_task
                     WHERE enabled = 1 AND next_fire_at IS NOT NULL AND next_fire_at <= ?1
                     ORDER BY next_fire_at",
                    CRON_COLUMNS
                ))?;
                let tasks = stmt
                    .query_map([&now], cron_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tasks)
            })
            .await?)
    }

    async fn record_fire(
        &self,
        id: Uuid,
        read_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<bool, QueueError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE cron_task SET last_fired_at = ?3, next_fire_at = ?4
                     WHERE id = ?1 AND updated_at = ?2",
                    params![
                        id.to_string(),
                        clock::to_text(&read_at),
                        clock::to_text(&fired_at),
                        opt_text(next_fire_at)
                    ],
                )?)
            })
            .await?;
        Ok(n == 1)
    }

    async fn insert_job(&self, job: &Job) -> Result<InsertOutcome, QueueError> {
        let job = job.clone();
        let params_text = serde_json::to_string(&job.params)?;
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let queue: Option<(Option<i64>, bool)> = tx
                    .query_row(
                        "SELECT capacity, enabled FROM job_queue WHERE name = ?1",
                        [&job.queue_name],
                        |r| Ok((r.get(0)?, r.get(1)?)),
                    )
                    .optional()?;
                let Some((capacity, enabled)) = queue else {
                    return Ok(InsertOutcome::QueueNotFound);
                };
                if !enabled {
                    return Ok(InsertOutcome::QueueDisabled);
                }
                if let Some(capacity) = capacity {
                    if count_active(&tx, &job.queue_name)? >= capacity as u64 {
                        return Ok(InsertOutcome::Full {
                            capacity: capacity as u32,
                        });
                    }
                }

                let id = job.id.to_string();
                let created_at = clock::to_text(&job.created_at);
                tx.execute(
                    &format!(
                        "INSERT INTO job ({}) VALUES
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        JOB_COLUMNS
                    ),
                    params![
                        id,
                        job.task_class,
                        params_text,
                        job.queue_name,
                        job.priority,
                        job.state.as_str(),
                        job.trigger.as_str(),
                        job.origin_task_id.map(|u| u.to_string()),
                        job.retry_of.map(|u| u.to_string()),
                        job.created_by,
                        created_at,
                        opt_text(job.started_at),
                        opt_text(job.finished_at),
                        job.error,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO pending_job (job_id, queue_name, priority, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, job.queue_name, job.priority, created_at],
                )?;
                let seq = tx.last_insert_rowid();
                tx.commit()?;

                Ok(InsertOutcome::Inserted(PendingJob {
                    job_id: job.id,
                    queue_name: job.queue_name,
                    priority: job.priority,
                    seq,
                    created_at: job.created_at,
                }))
            })
            .await?)
    }

    async fn claim_job(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<Option<Job>, QueueError> {
        Ok(self
            .conn
            .call(move |conn| {
                let id = id.to_string();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let n = tx.execute(
                    "UPDATE job SET state = 'RUNNING', started_at = ?2
                     WHERE id = ?1 AND state = 'PENDING'",
                    params![id, clock::to_text(&started_at)],
                )?;
                if n == 0 {
                    return Ok(None);
                }
                tx.execute("DELETE FROM pending_job WHERE job_id = ?1", [&id])?;
                let job = select_job(&tx, &id)?;
                tx.commit()?;
                Ok(job)
            })
            .await?)
    }

    async fn finish_job(
        &self,
        id: Uuid,
        state: JobState,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<bool, QueueError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE job SET state = ?2, finished_at = ?3, error = ?4
                     WHERE id = ?1 AND state = 'RUNNING'",
                    params![
                        id.to_string(),
                        state.as_str(),
                        clock::to_text(&finished_at),
                        error
                    ],
                )?)
            })
            .await?;
        Ok(n == 1)
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool, QueueError> {
        Ok(self
            .conn
            .call(move |conn| {
                let id = id.to_string();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let n = tx.execute("DELETE FROM job WHERE id = ?1 AND state = 'PENDING'", [&id])?;
                if n == 0 {
                    return Ok(false);
                }
                tx.execute("DELETE FROM pending_job WHERE job_id = ?1", [&id])?;
                tx.commit()?;
                Ok(true)
            })
            .await?)
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, QueueError> {
        let n = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM job WHERE id = ?1 AND state IN ('SUCCESS', 'FAILED')",
                    [id.to_string()],
                )?)
            })
            .await?;
        Ok(n == 1)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self
            .conn
            .call(move |conn| Ok(select_job(conn, &id.to_string())?))
            .await?)
    }

    async fn query_jobs(&self, query: &JobQuery) -> Result<Page<Job>, QueueError> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(state) = query.state {
            clauses.push("state = ?");
            values.push(SqlValue::Text(state.as_str().to_string()));
        }
        if let Some(trigger) = query.trigger {
            clauses.push("trigger_type = ?");
            values.push(SqlValue::Text(trigger.as_str().to_string()));
        }
        if let Some(task_class) = &query.task_class {
            clauses.push("task_class = ?");
            values.push(SqlValue::Text(task_class.clone()));
        }
        if let Some(queue_name) = &query.queue_name {
            clauses.push("queue_name = ?");
            values.push(SqlValue::Text(queue_name.clone()));
        }
        if let Some(after) = query.created_after {
            clauses.push("created_at >= ?");
            values.push(SqlValue::Text(clock::to_text(&after)));
        }
        if let Some(before) = query.created_before {
            clauses.push("created_at < ?");
            values.push(SqlValue::Text(clock::to_text(&before)));
        }
        if let Some(keyword) = query.keyword() {
            clauses.push(
                "(task_class LIKE ? ESCAPE '\\' OR queue_name LIKE ? ESCAPE '\\' \
                 OR params LIKE ? ESCAPE '\\' OR IFNULL(error, '') LIKE ? ESCAPE '\\')",
            );
            let pattern = like_pattern(&keyword);
            for _ in 0..4 {
                values.push(SqlValue::Text(pattern.clone()));
            }
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let page = query.page();
        let page_size = query.page_size();
        let offset = query.offset();

        let (items, total) = self
            .conn
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM job{}", where_sql),
                    params_from_iter(values.iter()),
                    |r| r.get(0),
                )?;

                let mut paged = values;
                paged.push(SqlValue::Integer(i64::from(page_size)));
                paged.push(SqlValue::Integer(offset as i64));
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM job{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
                    JOB_COLUMNS, where_sql
                ))?;
                let items = stmt
                    .query_map(params_from_iter(paged.iter()), job_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((items, total as u64))
            })
            .await?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    async fn active_count(&self, queue_name: &str) -> Result<u64, QueueError> {
        let queue_name = queue_name.to_string();
        Ok(self
            .conn
            .call(move |conn| Ok(count_active(conn, &queue_name)?))
            .await?)
    }

    async fn pending_jobs(&self) -> Result<Vec<PendingJob>, QueueError> {
        Ok(self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT seq, job_id, queue_name, priority, created_at
                     FROM pending_job ORDER BY seq",
                )?;
                let pending = stmt
                    .query_map([], pending_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(pending)
            })
            .await?)
    }

    async fn fail_running_jobs(
        &self,
        finished_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<Job>, QueueError> {
        let reason = reason.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let running = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {} FROM job WHERE state = 'RUNNING'",
                        JOB_COLUMNS
                    ))?;
                    stmt.query_map([], job_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?
                };
                tx.execute(
                    "UPDATE job SET state = 'FAILED', finished_at = ?1, error = ?2
                     WHERE state = 'RUNNING'",
                    params![clock::to_text(&finished_at), reason],
                )?;
                tx.commit()?;

                Ok(running
                    .into_iter()
                    .map(|mut job| {
                        job.state = JobState::Failed;
                        job.finished_at = Some(finished_at);
                        job.error = Some(reason.clone());
                        job
                    })
                    .collect())
            })
            .await?)
    }

    async fn append_log(&self, log: &ScriptTaskLog) -> Result<(), QueueError> {
        let log = log.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO script_task_log ({}) VALUES
                         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        LOG_COLUMNS
                    ),
                    params![
                        log.id.to_string(),
                        log.job_id.to_string(),
                        log.attempt,
                        log.task_class,
                        log.queue_name,
                        clock::to_text(&log.started_at),
                        clock::to_text(&log.finished_at),
                        log.outcome.as_str(),
                        log.output,
                        log.error,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn logs_for_job(&self, job_id: Uuid) -> Result<Vec<ScriptTaskLog>, QueueError> {
        Ok(self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM script_task_log WHERE job_id = ?1 ORDER BY finished_at, attempt",
                    LOG_COLUMNS
                ))?;
                let logs = stmt
                    .query_map([job_id.to_string()], log_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(logs)
            })
            .await?)
    }

    async fn job_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError> {
        let since = clock::to_text(&since);
        Ok(self
            .conn
            .call(move |conn| {
                let mut stats = JobStats::default();
                let mut stmt = conn.prepare(
                    "SELECT queue_name, state, COUNT(*) FROM job GROUP BY queue_name, state",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let queue: String = row.get(0)?;
                        let state: JobState = get_parsed(row, 1)?;
                        let n: i64 = row.get(2)?;
                        Ok((queue, state, n as u64))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                for (queue, state, n) in rows {
                    stats.counts.add(state, n);
                    stats
                        .by_queue
                        .entry(queue)
                        .or_insert_with(StateCounts::default)
                        .add(state, n);
                }
                stats.total = stats.counts.total();

                let created: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM job WHERE created_at >= ?1",
                    [&since],
                    |r| r.get(0),
                )?;
                stats.created_since = created as u64;
                Ok(stats)
            })
            .await?)
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
