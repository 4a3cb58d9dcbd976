//! Admin subcommand handlers: queues, cron tasks, jobs and stats.
//!
//! These operate on the configured store directly. A running server picks
//! the changes up through its reconcile loop and per-tick store reads.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use jobhub_queue::{
    CronTask, CronTaskUpdate, Engine, Job, JobQuery, JobQueue, NewCronTask, NewQueue,
    QueueCapacity, QueueUpdate, SubmitRequest,
};

use crate::cli::{CronAction, JobAction, QueueAction};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Handle queue subcommands.
pub(crate) async fn handle_queue_command(
    engine: &Engine,
    action: QueueAction,
    principal: &str,
    json: bool,
) -> CmdResult {
    match action {
        QueueAction::List => {
            let queues = engine.list_queues().await?;
            if json {
                return print_json(&queues);
            }
            println!(
                "{:<20} {:<24} {:>10} {:>11} {:>8} {:<8}",
                "NAME", "LABEL", "CAPACITY", "CONCURRENCY", "SIZE", "STATE"
            );
            for queue in &queues {
                let size = engine.queue_size(&queue.name).await?;
                println!(
                    "{:<20} {:<24} {:>10} {:>11} {:>8} {:<8}",
                    queue.name,
                    queue.label,
                    queue.capacity.to_string(),
                    queue.concurrency,
                    size,
                    enabled_text(queue.enabled)
                );
            }
            Ok(())
        }
        QueueAction::Create {
            name,
            capacity,
            unbounded,
            label,
            concurrency,
            disabled,
        } => {
            let capacity = capacity_from(capacity, unbounded)?
                .ok_or("either --capacity or --unbounded is required")?;
            let mut new = NewQueue::new(name, capacity).with_enabled(!disabled);
            if let Some(label) = label {
                new = new.with_label(label);
            }
            if let Some(concurrency) = concurrency {
                new = new.with_concurrency(concurrency);
            }
            let queue = engine.create_queue(new, principal).await?;
            print_queue(&queue, json)
        }
        QueueAction::Update {
            name,
            label,
            capacity,
            unbounded,
            concurrency,
        } => {
            let update = QueueUpdate {
                label,
                capacity: capacity_from(capacity, unbounded)?,
                concurrency,
            };
            let queue = engine.update_queue(&name, &update, principal).await?;
            print_queue(&queue, json)
        }
        QueueAction::Enable { name } => {
            let queue = engine.set_queue_enabled(&name, true, principal).await?;
            print_queue(&queue, json)
        }
        QueueAction::Disable { name } => {
            let queue = engine.set_queue_enabled(&name, false, principal).await?;
            print_queue(&queue, json)
        }
        QueueAction::Delete { name } => {
            engine.delete_queue(&name).await?;
            println!("Deleted queue {}", name);
            Ok(())
        }
        QueueAction::Size { name } => {
            let size = engine.queue_size(&name).await?;
            if json {
                return print_json(&serde_json::json!({ "queue": name, "size": size }));
            }
            println!("{}", size);
            Ok(())
        }
    }
}

/// Handle cron subcommands.
pub(crate) async fn handle_cron_command(
    engine: &Engine,
    action: CronAction,
    principal: &str,
    json: bool,
) -> CmdResult {
    match action {
        CronAction::List => {
            let tasks = engine.list_cron_tasks().await?;
            if json {
                return print_json(&tasks);
            }
            println!(
                "{:<20} {:<20} {:<12} {:<16} {:<8} {:<20}",
                "NAME", "SCHEDULE", "QUEUE", "TASK CLASS", "STATE", "NEXT FIRE"
            );
            for task in &tasks {
                println!(
                    "{:<20} {:<20} {:<12} {:<16} {:<8} {:<20}",
                    task.name,
                    task.cron_expression,
                    task.queue_name,
                    task.task_class,
                    enabled_text(task.enabled),
                    time_text(task.next_fire_at)
                );
            }
            Ok(())
        }
        CronAction::Create {
            name,
            schedule,
            queue,
            task_class,
            params,
            priority,
            label,
            disabled,
        } => {
            let mut new = NewCronTask::new(name, schedule, queue, task_class)
                .with_params(parse_params(params.as_deref())?)
                .with_priority(priority)
                .with_enabled(!disabled);
            if let Some(label) = label {
                new = new.with_label(label);
            }
            let task = engine.create_cron_task(new, principal).await?;
            print_cron_task(&task, json)
        }
        CronAction::Update {
            name,
            schedule,
            queue,
            task_class,
            params,
            priority,
            label,
        } => {
            let params = match params {
                Some(raw) => Some(parse_params(Some(&raw))?),
                None => None,
            };
            let update = CronTaskUpdate {
                label,
                cron_expression: schedule,
                queue_name: queue,
                task_class,
                params,
                priority,
            };
            let task = engine.update_cron_task(&name, update, principal).await?;
            print_cron_task(&task, json)
        }
        CronAction::Delete { name } => {
            engine.delete_cron_task(&name).await?;
            println!("Deleted cron task {}", name);
            Ok(())
        }
        CronAction::Enable { name } => {
            let task = engine.set_cron_enabled(&name, true, principal).await?;
            print_cron_task(&task, json)
        }
        CronAction::Disable { name } => {
            let task = engine.set_cron_enabled(&name, false, principal).await?;
            print_cron_task(&task, json)
        }
        CronAction::Trigger { name } => {
            let job = engine.trigger_now(&name, principal).await?;
            print_job(&job, json)
        }
    }
}

/// Handle job subcommands.
pub(crate) async fn handle_job_command(
    engine: &Engine,
    action: JobAction,
    principal: &str,
    json: bool,
) -> CmdResult {
    match action {
        JobAction::Submit {
            task_class,
            queue,
            params,
            priority,
        } => {
            let request = SubmitRequest::manual(queue, task_class)
                .with_params(parse_params(params.as_deref())?)
                .with_priority(priority);
            let job = engine.submit(request, principal).await?;
            print_job(&job, json)
        }
        JobAction::Cancel { id } => {
            engine.cancel_job(id).await?;
            println!("Cancelled job {}", id);
            Ok(())
        }
        JobAction::Retry { id } => {
            let job = engine.resubmit_job(id, principal).await?;
            print_job(&job, json)
        }
        JobAction::Delete { id } => {
            engine.delete_job(id).await?;
            println!("Deleted job {}", id);
            Ok(())
        }
        JobAction::Show { id } => {
            let job = engine.get_job(id).await?;
            print_job(&job, json)
        }
        JobAction::List {
            state,
            queue,
            task_class,
            trigger,
            keyword,
            page,
            page_size,
        } => {
            let query = JobQuery {
                state,
                queue_name: queue,
                task_class,
                trigger,
                keyword,
                page,
                page_size,
                ..Default::default()
            };
            let result = engine.query_jobs(&query).await?;
            if json {
                return print_json(&result);
            }
            println!(
                "{:<36} {:<12} {:<16} {:<8} {:<7} {:>4} {:<20}",
                "ID", "QUEUE", "TASK CLASS", "STATE", "TRIGGER", "PRI", "CREATED"
            );
            for job in &result.items {
                println!(
                    "{:<36} {:<12} {:<16} {:<8} {:<7} {:>4} {:<20}",
                    job.id,
                    job.queue_name,
                    job.task_class,
                    job.state.as_str(),
                    job.trigger.as_str(),
                    job.priority,
                    time_text(Some(job.created_at))
                );
            }
            println!(
                "page {}/{} ({} jobs)",
                result.page,
                result.total_pages().max(1),
                result.total
            );
            Ok(())
        }
        JobAction::Logs { id } => {
            let logs = engine.job_logs(id).await?;
            if json {
                return print_json(&logs);
            }
            if logs.is_empty() {
                println!("No execution logs for job {}", id);
            }
            for log in &logs {
                println!(
                    "[{}] attempt {} {} ({} -> {})",
                    log.outcome.as_str(),
                    log.attempt,
                    log.task_class,
                    time_text(Some(log.started_at)),
                    time_text(Some(log.finished_at))
                );
                if let Some(output) = &log.output {
                    println!("  output: {}", output);
                }
                if let Some(error) = &log.error {
                    println!("  error: {}", error);
                }
            }
            Ok(())
        }
    }
}

/// Print job statistics.
pub(crate) async fn handle_stats_command(engine: &Engine, json: bool) -> CmdResult {
    let stats = engine.stats().await?;
    if json {
        return print_json(&stats);
    }
    println!("total:   {}", stats.total);
    println!("today:   {}", stats.created_since);
    println!("pending: {}", stats.counts.pending);
    println!("running: {}", stats.counts.running);
    println!("success: {}", stats.counts.success);
    println!("failed:  {}", stats.counts.failed);
    for (queue, counts) in &stats.by_queue {
        println!(
            "  {:<20} pending {:>5}  running {:>5}  success {:>6}  failed {:>6}",
            queue, counts.pending, counts.running, counts.success, counts.failed
        );
    }
    Ok(())
}

fn capacity_from(
    capacity: Option<u32>,
    unbounded: bool,
) -> Result<Option<QueueCapacity>, Box<dyn std::error::Error>> {
    match (capacity, unbounded) {
        (Some(_), true) => Err("--capacity and --unbounded are mutually exclusive".into()),
        (Some(limit), false) => Ok(Some(QueueCapacity::bounded(limit)?)),
        (None, true) => Ok(Some(QueueCapacity::Unbounded)),
        (None, false) => Ok(None),
    }
}

fn parse_params(raw: Option<&str>) -> Result<Value, Box<dyn std::error::Error>> {
    match raw {
        Some(text) => Ok(serde_json::from_str(text)
            .map_err(|e| format!("--params must be valid JSON: {}", e))?),
        None => Ok(Value::Null),
    }
}

fn enabled_text(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}

fn time_text(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_queue(queue: &JobQueue, json: bool) -> CmdResult {
    if json {
        return print_json(queue);
    }
    println!(
        "{} ({}): capacity {}, concurrency {}, {}",
        queue.name,
        queue.label,
        queue.capacity,
        queue.concurrency,
        enabled_text(queue.enabled)
    );
    Ok(())
}

fn print_cron_task(task: &CronTask, json: bool) -> CmdResult {
    if json {
        return print_json(task);
    }
    println!(
        "{} [{}] -> {}/{}: {}, next fire {}",
        task.name,
        task.cron_expression,
        task.queue_name,
        task.task_class,
        enabled_text(task.enabled),
        time_text(task.next_fire_at)
    );
    Ok(())
}

fn print_job(job: &Job, json: bool) -> CmdResult {
    if json {
        return print_json(job);
    }
    println!("id:         {}", job.id);
    println!("queue:      {}", job.queue_name);
    println!("task class: {}", job.task_class);
    println!("state:      {}", job.state);
    println!("trigger:    {}", job.trigger);
    println!("priority:   {}", job.priority);
    println!("params:     {}", job.params);
    println!("created:    {} by {}", time_text(Some(job.created_at)), job.created_by);
    println!("started:    {}", time_text(job.started_at));
    println!("finished:   {}", time_text(job.finished_at));
    if let Some(origin) = job.origin_task_id {
        println!("cron task:  {}", origin);
    }
    if let Some(retry_of) = job.retry_of {
        println!("retry of:   {}", retry_of);
    }
    if let Some(error) = &job.error {
        println!("error:      {}", error);
    }
    Ok(())
}
