use super::*;
use crate::cron_task::{CronTask, NewCronTask};
use crate::job::{JobState, TriggerType};
use crate::job_queue::{JobQueue, QueueCapacity};
use crate::query::JobQuery;
use crate::store::MemoryStateStore;

struct Harness {
    store: Arc<dyn StateStore>,
    trigger: Arc<CronTrigger>,
}

async fn harness(capacity: QueueCapacity) -> Harness {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    store
        .insert_queue(&JobQueue::new("q", capacity, 1, "admin").unwrap())
        .await
        .unwrap();
    let dispatcher = Arc::new(Dispatcher::new(store.clone()));
    let trigger = Arc::new(CronTrigger::new(store.clone(), dispatcher, 4));
    Harness { store, trigger }
}

/// Insert an every-second task whose next fire is a minute in the past.
async fn overdue_task(store: &Arc<dyn StateStore>, name: &str, now: DateTime<Utc>) -> CronTask {
    let mut task = CronTask::new(
        NewCronTask::new(name, "* * * * * *", "q", "echo")
            .with_params(serde_json::json!({"from": name}))
            .with_priority(4),
        "admin",
    )
    .unwrap();
    task.next_fire_at = Some(now - chrono::Duration::seconds(60));
    store.insert_cron_task(&task).await.unwrap();
    task
}

async fn jobs(store: &Arc<dyn StateStore>) -> Vec<crate::job::Job> {
    store.query_jobs(&JobQuery::default()).await.unwrap().items
}

#[tokio::test]
async fn test_due_task_fires_cron_job() {
    let h = harness(QueueCapacity::Unbounded).await;
    let now = clock::now();
    let task = overdue_task(&h.store, "nightly", now).await;

    let report = h.trigger.tick(now).await.unwrap();
    assert_eq!(report.due, 1);
    assert_eq!(report.fired, 1);

    let jobs = jobs(&h.store).await;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.trigger, TriggerType::Cron);
    assert_eq!(job.origin_task_id, Some(task.id));
    assert_eq!(job.created_by, CRON_PRINCIPAL);
    assert_eq!(job.priority, 4);
    assert_eq!(job.params, serde_json::json!({"from": "nightly"}));
    assert_eq!(job.state, JobState::Pending);

    let stored = h.store.get_cron_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.last_fired_at, Some(now));
    assert!(stored.next_fire_at.unwrap() > now);
}

#[tokio::test]
async fn test_not_due_task_is_ignored() {
    let h = harness(QueueCapacity::Unbounded).await;
    let task = CronTask::new(NewCronTask::new("later", "0 0 0 1 1 *", "q", "echo"), "admin")
        .unwrap();
    h.store.insert_cron_task(&task).await.unwrap();

    let report = h.trigger.tick(clock::now()).await.unwrap();
    assert_eq!(report, TickReport::default());
    assert!(jobs(&h.store).await.is_empty());
}

#[tokio::test]
async fn test_disabled_queue_skips_and_advances() {
    let h = harness(QueueCapacity::Unbounded).await;
    let now = clock::now();
    let task = overdue_task(&h.store, "t", now).await;

    h.store.set_queue_enabled("q", false, now, "admin").await.unwrap();

    let report = h.trigger.tick(now).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.fired, 0);
    assert!(jobs(&h.store).await.is_empty());

    // The missed fire is dropped, not retried on the next tick.
    let stored = h.store.get_cron_task(task.id).await.unwrap().unwrap();
    assert!(stored.next_fire_at.unwrap() > now);
    assert_eq!(h.trigger.tick(now).await.unwrap().due, 0);
}

#[tokio::test]
async fn test_full_queue_skips() {
    let h = harness(QueueCapacity::Bounded(1)).await;
    let now = clock::now();
    overdue_task(&h.store, "a", now).await;
    overdue_task(&h.store, "b", now).await;

    let report = h.trigger.tick(now).await.unwrap();
    assert_eq!(report.due, 2);
    assert_eq!(report.fired, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(jobs(&h.store).await.len(), 1);
}

#[tokio::test]
async fn test_disabled_task_never_fires() {
    let h = harness(QueueCapacity::Unbounded).await;
    let task = CronTask::new(
        NewCronTask::new("off", "* * * * * *", "q", "echo").with_enabled(false),
        "admin",
    )
    .unwrap();
    assert!(task.next_fire_at.is_none());
    h.store.insert_cron_task(&task).await.unwrap();

    let later = clock::now() + chrono::Duration::seconds(5);
    assert_eq!(h.trigger.tick(later).await.unwrap().due, 0);
}

#[tokio::test]
async fn test_concurrent_ticks_fire_once() {
    let h = harness(QueueCapacity::Unbounded).await;
    let now = clock::now();
    overdue_task(&h.store, "once", now).await;

    let (a, b) = tokio::join!(h.trigger.tick(now), h.trigger.tick(now));
    let fired = a.unwrap().fired + b.unwrap().fired;
    assert_eq!(fired, 1);
    assert_eq!(jobs(&h.store).await.len(), 1);
}

#[tokio::test]
async fn test_realign_drops_missed_fires() {
    let h = harness(QueueCapacity::Unbounded).await;
    let now = clock::now();
    let task = overdue_task(&h.store, "stale", now).await;

    assert_eq!(h.trigger.realign(now).await.unwrap(), 1);
    let stored = h.store.get_cron_task(task.id).await.unwrap().unwrap();
    assert!(stored.next_fire_at.unwrap() > now);
    assert!(stored.last_fired_at.is_none());

    assert_eq!(h.trigger.tick(now).await.unwrap().fired, 0);
    assert!(jobs(&h.store).await.is_empty());
}

#[tokio::test]
async fn test_run_stops_on_cancel() {
    let h = harness(QueueCapacity::Unbounded).await;
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(h.trigger.clone().run(Duration::from_millis(20), cancel.clone()));

    let now = clock::now();
    overdue_task(&h.store, "loop", now).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while jobs(&h.store).await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "trigger never fired");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
}
