//! Behaviour shared by every `StateStore` implementation.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;

use super::*;
use crate::clock;
use crate::cron_task::NewCronTask;
use crate::job::{SubmitRequest, TriggerType};
use crate::job_queue::QueueCapacity;
use crate::log::Outcome;

async fn stores() -> Vec<(&'static str, Arc<dyn StateStore>)> {
    vec![
        ("memory", Arc::new(MemoryStateStore::new()) as Arc<dyn StateStore>),
        (
            "sqlite",
            Arc::new(SqliteStateStore::in_memory().await.unwrap()) as Arc<dyn StateStore>,
        ),
    ]
}

fn queue(name: &str, capacity: QueueCapacity) -> JobQueue {
    JobQueue::new(name, capacity, 2, "admin").unwrap()
}

fn job(queue: &str, priority: i32) -> Job {
    Job::new(
        SubmitRequest::manual(queue, "echo")
            .with_priority(priority)
            .with_params(json!({"n": priority})),
        "admin",
    )
}

async fn insert(store: &dyn StateStore, job: &Job) -> PendingJob {
    match store.insert_job(job).await.unwrap() {
        InsertOutcome::Inserted(pending) => pending,
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_queue_crud() {
    for (kind, store) in stores().await {
        let mut q = queue("default", QueueCapacity::Bounded(5));
        store.insert_queue(&q).await.unwrap();

        let dup = store.insert_queue(&queue("default", QueueCapacity::Unbounded)).await;
        assert!(matches!(dup, Err(QueueError::DuplicateQueue(_))), "{}", kind);

        q.label = "Default queue".into();
        q.capacity = QueueCapacity::Unbounded;
        q.touch("bob");
        store.update_queue(&q).await.unwrap();
        let loaded = store.get_queue("default").await.unwrap().unwrap();
        assert_eq!(loaded, q, "{}", kind);

        let missing = store.update_queue(&queue("nope", QueueCapacity::Unbounded)).await;
        assert!(matches!(missing, Err(QueueError::QueueNotFound(_))), "{}", kind);

        store.insert_queue(&queue("alpha", QueueCapacity::Unbounded)).await.unwrap();
        let names: Vec<String> = store
            .list_queues()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.name)
            .collect();
        assert_eq!(names, vec!["alpha", "default"], "{}", kind);

        store.delete_queue("alpha").await.unwrap();
        assert!(store.get_queue("alpha").await.unwrap().is_none(), "{}", kind);
        assert!(matches!(
            store.delete_queue("alpha").await,
            Err(QueueError::QueueNotFound(_))
        ));
    }
}

#[tokio::test]
async fn test_enabled_flag_written_separately() {
    for (kind, store) in stores().await {
        let q = queue("default", QueueCapacity::Bounded(5));
        store.insert_queue(&q).await.unwrap();

        // A full-row update built from a stale read must not re-enable.
        let mut stale = store.get_queue("default").await.unwrap().unwrap();
        store
            .set_queue_enabled("default", false, clock::now(), "alice")
            .await
            .unwrap();
        stale.label = "Renamed".into();
        stale.touch("bob");
        store.update_queue(&stale).await.unwrap();

        let loaded = store.get_queue("default").await.unwrap().unwrap();
        assert!(!loaded.enabled, "{}", kind);
        assert_eq!(loaded.label, "Renamed", "{}", kind);
        assert_eq!(loaded.updated_by, "bob", "{}", kind);
        assert!(matches!(
            store.insert_job(&job("default", 0)).await.unwrap(),
            InsertOutcome::QueueDisabled
        ));

        let missing = store.set_queue_enabled("nope", true, clock::now(), "alice").await;
        assert!(matches!(missing, Err(QueueError::QueueNotFound(_))), "{}", kind);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_update_and_disable_keeps_disable() {
    for (kind, store) in stores().await {
        for i in 0..50 {
            let name = format!("q{}", i);
            store
                .insert_queue(&queue(&name, QueueCapacity::Bounded(5)))
                .await
                .unwrap();

            let relabel = {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    let mut q = store.get_queue(&name).await.unwrap().unwrap();
                    q.label = "L".into();
                    q.touch("bob");
                    store.update_queue(&q).await.unwrap();
                })
            };
            let disable = {
                let store = store.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    store
                        .set_queue_enabled(&name, false, clock::now(), "alice")
                        .await
                        .unwrap();
                })
            };
            relabel.await.unwrap();
            disable.await.unwrap();

            let loaded = store.get_queue(&name).await.unwrap().unwrap();
            assert!(!loaded.enabled, "{} {}", kind, name);
            assert_eq!(loaded.label, "L", "{} {}", kind, name);
        }
    }
}

#[tokio::test]
async fn test_record_fire_skips_changed_task() {
    for (kind, store) in stores().await {
        let task = CronTask::new(
            NewCronTask::new("nightly", "0 0 3 * * *", "default", "echo"),
            "admin",
        )
        .unwrap();
        store.insert_cron_task(&task).await.unwrap();
        let read = store.get_cron_task(task.id).await.unwrap().unwrap();

        // An admin edit lands between the trigger's read and its write.
        let mut edited = read.clone();
        edited
            .apply(
                crate::cron_task::CronTaskUpdate {
                    cron_expression: Some("0 0 4 * * *".into()),
                    ..Default::default()
                },
                "bob",
            )
            .unwrap();
        store.update_cron_task(&edited).await.unwrap();

        let stale_next = read.next_fire_at.map(|t| t + Duration::days(1));
        let recorded = store
            .record_fire(read.id, read.updated_at, clock::now(), stale_next)
            .await
            .unwrap();
        assert!(!recorded, "{}", kind);

        let loaded = store.get_cron_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.next_fire_at, edited.next_fire_at, "{}", kind);
        assert_eq!(loaded.last_fired_at, None, "{}", kind);

        store.delete_cron_task(task.id).await.unwrap();
        assert!(
            !store
                .record_fire(task.id, edited.updated_at, clock::now(), None)
                .await
                .unwrap()
        );
    }
}

#[tokio::test]
async fn test_delete_busy_queue_rejected() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let j = job("q", 0);
        insert(store.as_ref(), &j).await;

        let result = store.delete_queue("q").await;
        assert!(
            matches!(result, Err(QueueError::QueueBusy { active: 1, .. })),
            "{}",
            kind
        );

        store.claim_job(j.id, clock::now()).await.unwrap().unwrap();
        store
            .finish_job(j.id, JobState::Success, clock::now(), None)
            .await
            .unwrap();
        store.delete_queue("q").await.unwrap();
    }
}

#[tokio::test]
async fn test_insert_job_checks_queue() {
    for (kind, store) in stores().await {
        let outcome = store.insert_job(&job("missing", 0)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::QueueNotFound, "{}", kind);

        let disabled = queue("off", QueueCapacity::Unbounded).with_enabled(false);
        store.insert_queue(&disabled).await.unwrap();
        let outcome = store.insert_job(&job("off", 0)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::QueueDisabled, "{}", kind);
    }
}

#[tokio::test]
async fn test_capacity_counts_pending_and_running() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Bounded(2))).await.unwrap();
        let a = job("q", 0);
        let b = job("q", 0);
        insert(store.as_ref(), &a).await;
        insert(store.as_ref(), &b).await;

        let outcome = store.insert_job(&job("q", 0)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Full { capacity: 2 }, "{}", kind);

        store.claim_job(a.id, clock::now()).await.unwrap().unwrap();
        assert_eq!(store.active_count("q").await.unwrap(), 2, "{}", kind);
        let outcome = store.insert_job(&job("q", 0)).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Full { capacity: 2 }, "{}", kind);

        store
            .finish_job(a.id, JobState::Success, clock::now(), None)
            .await
            .unwrap();
        assert_eq!(store.active_count("q").await.unwrap(), 1, "{}", kind);
        insert(store.as_ref(), &job("q", 0)).await;
    }
}

#[tokio::test]
async fn test_concurrent_inserts_respect_capacity() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Bounded(5))).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_job(&job("q", 0)).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), InsertOutcome::Inserted(_)) {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 5, "{}", kind);
        assert_eq!(store.active_count("q").await.unwrap(), 5, "{}", kind);
    }
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let j = job("q", 0);
        insert(store.as_ref(), &j).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let id = j.id;
            handles.push(tokio::spawn(async move {
                store.claim_job(id, clock::now()).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if let Some(claimed) = handle.await.unwrap() {
                assert_eq!(claimed.state, JobState::Running);
                assert!(claimed.started_at.is_some());
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "{}", kind);
        assert!(store.pending_jobs().await.unwrap().is_empty(), "{}", kind);
    }
}

#[tokio::test]
async fn test_finish_is_monotonic() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let j = job("q", 0);
        insert(store.as_ref(), &j).await;

        let not_running = store
            .finish_job(j.id, JobState::Success, clock::now(), None)
            .await
            .unwrap();
        assert!(!not_running, "{}", kind);

        store.claim_job(j.id, clock::now()).await.unwrap();
        assert!(
            store
                .finish_job(j.id, JobState::Failed, clock::now(), Some("boom".into()))
                .await
                .unwrap()
        );
        assert!(
            !store
                .finish_job(j.id, JobState::Success, clock::now(), None)
                .await
                .unwrap(),
            "{}",
            kind
        );
        assert!(store.claim_job(j.id, clock::now()).await.unwrap().is_none());

        let stored = store.get_job(j.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed, "{}", kind);
        assert_eq!(stored.error.as_deref(), Some("boom"));
    }
}

#[tokio::test]
async fn test_cancel_and_delete() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let pending = job("q", 0);
        let done = job("q", 0);
        insert(store.as_ref(), &pending).await;
        insert(store.as_ref(), &done).await;

        assert!(!store.delete_job(pending.id).await.unwrap(), "{}", kind);
        assert!(store.cancel_job(pending.id).await.unwrap(), "{}", kind);
        assert!(store.get_job(pending.id).await.unwrap().is_none());
        assert!(!store.cancel_job(pending.id).await.unwrap());

        store.claim_job(done.id, clock::now()).await.unwrap();
        assert!(!store.cancel_job(done.id).await.unwrap(), "{}", kind);
        assert!(!store.delete_job(done.id).await.unwrap(), "{}", kind);
        store
            .finish_job(done.id, JobState::Success, clock::now(), None)
            .await
            .unwrap();

        let finished = store.get_job(done.id).await.unwrap().unwrap();
        let log = ScriptTaskLog::for_job(&finished, clock::now(), Outcome::Success, None, None);
        store.append_log(&log).await.unwrap();

        assert!(store.delete_job(done.id).await.unwrap(), "{}", kind);
        assert!(store.get_job(done.id).await.unwrap().is_none());
        assert_eq!(store.logs_for_job(done.id).await.unwrap().len(), 1, "{}", kind);
        assert!(store.pending_jobs().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_pending_jobs_in_insertion_order() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("a", QueueCapacity::Unbounded)).await.unwrap();
        store.insert_queue(&queue("b", QueueCapacity::Unbounded)).await.unwrap();
        let first = insert(store.as_ref(), &job("a", 1)).await;
        let second = insert(store.as_ref(), &job("b", 9)).await;
        let third = insert(store.as_ref(), &job("a", 5)).await;
        assert!(first.seq < second.seq && second.seq < third.seq, "{}", kind);

        let pending = store.pending_jobs().await.unwrap();
        assert_eq!(pending, vec![first, second, third], "{}", kind);
    }
}

#[tokio::test]
async fn test_fail_running_jobs() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let running = job("q", 0);
        let waiting = job("q", 0);
        insert(store.as_ref(), &running).await;
        insert(store.as_ref(), &waiting).await;
        store.claim_job(running.id, clock::now()).await.unwrap();

        let failed = store
            .fail_running_jobs(clock::now(), "interrupted")
            .await
            .unwrap();
        assert_eq!(failed.len(), 1, "{}", kind);
        assert_eq!(failed[0].id, running.id);
        assert_eq!(failed[0].state, JobState::Failed);

        let stored = store.get_job(running.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("interrupted"), "{}", kind);
        let untouched = store.get_job(waiting.id).await.unwrap().unwrap();
        assert_eq!(untouched.state, JobState::Pending, "{}", kind);
    }
}

#[tokio::test]
async fn test_cron_task_persistence() {
    for (kind, store) in stores().await {
        let task = CronTask::new(
            NewCronTask::new("nightly", "0 0 2 * * *", "q", "echo")
                .with_params(json!({"k": "v"}))
                .with_priority(3),
            "admin",
        )
        .unwrap();
        store.insert_cron_task(&task).await.unwrap();

        let dup = CronTask::new(NewCronTask::new("nightly", "* * * * * *", "q", "x"), "admin")
            .unwrap();
        assert!(matches!(
            store.insert_cron_task(&dup).await,
            Err(QueueError::DuplicateCronTask(_))
        ));

        let loaded = store.get_cron_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task, "{}", kind);
        let by_name = store.find_cron_task("nightly").await.unwrap().unwrap();
        assert_eq!(by_name.id, task.id);

        let now = clock::now();
        assert!(store.due_cron_tasks(now).await.unwrap().is_empty(), "{}", kind);
        let due_at = task.next_fire_at.unwrap();
        assert_eq!(store.due_cron_tasks(due_at).await.unwrap().len(), 1, "{}", kind);

        let next = due_at + Duration::days(1);
        assert!(
            store
                .record_fire(task.id, task.updated_at, due_at, Some(next))
                .await
                .unwrap(),
            "{}",
            kind
        );
        let fired = store.get_cron_task(task.id).await.unwrap().unwrap();
        assert_eq!(fired.last_fired_at, Some(due_at), "{}", kind);
        assert_eq!(fired.next_fire_at, Some(next));
        assert!(store.due_cron_tasks(due_at).await.unwrap().is_empty());

        let mut disabled = fired.clone();
        disabled.set_enabled(false, "bob").unwrap();
        store.update_cron_task(&disabled).await.unwrap();
        assert!(store.due_cron_tasks(next).await.unwrap().is_empty(), "{}", kind);

        assert!(store.delete_cron_task(task.id).await.unwrap());
        assert!(!store.delete_cron_task(task.id).await.unwrap());
        assert!(store.list_cron_tasks().await.unwrap().is_empty(), "{}", kind);
    }
}

#[tokio::test]
async fn test_query_jobs_filters_and_pages() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("a", QueueCapacity::Unbounded)).await.unwrap();
        store.insert_queue(&queue("b", QueueCapacity::Unbounded)).await.unwrap();

        let mut ids = Vec::new();
        for i in 0..5 {
            let j = job("a", i);
            insert(store.as_ref(), &j).await;
            ids.push(j.id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let cron_job = Job::new(
            SubmitRequest::manual("b", "report")
                .with_trigger(TriggerType::Cron)
                .with_params(json!({"title": "Quarterly_Summary"})),
            "cron",
        );
        insert(store.as_ref(), &cron_job).await;

        let all = store.query_jobs(&JobQuery::default()).await.unwrap();
        assert_eq!(all.total, 6, "{}", kind);
        assert_eq!(all.items[0].id, cron_job.id, "{}: newest first", kind);

        let page = store
            .query_jobs(&JobQuery {
                queue_name: Some("a".into()),
                page: 2,
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5, "{}", kind);
        let page_ids: Vec<Uuid> = page.items.iter().map(|j| j.id).collect();
        assert_eq!(page_ids, vec![ids[2], ids[1]], "{}", kind);

        let by_trigger = store
            .query_jobs(&JobQuery {
                trigger: Some(TriggerType::Cron),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_trigger.total, 1, "{}", kind);

        let by_keyword = store
            .query_jobs(&JobQuery {
                keyword: Some("quarterly_summary".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_keyword.total, 1, "{}", kind);

        let wildcard = store
            .query_jobs(&JobQuery {
                keyword: Some("%".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(wildcard.total, 0, "{}", kind);

        let by_class = store
            .query_jobs(&JobQuery {
                task_class: Some("echo".into()),
                state: Some(JobState::Pending),
                created_after: Some(cron_job.created_at - Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_class.total, 5, "{}", kind);
    }
}

#[tokio::test]
async fn test_job_stats() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("a", QueueCapacity::Unbounded)).await.unwrap();
        store.insert_queue(&queue("b", QueueCapacity::Unbounded)).await.unwrap();
        let ok = job("a", 0);
        let bad = job("a", 0);
        insert(store.as_ref(), &ok).await;
        insert(store.as_ref(), &bad).await;
        insert(store.as_ref(), &job("b", 0)).await;

        store.claim_job(ok.id, clock::now()).await.unwrap();
        store
            .finish_job(ok.id, JobState::Success, clock::now(), None)
            .await
            .unwrap();
        store.claim_job(bad.id, clock::now()).await.unwrap();
        store
            .finish_job(bad.id, JobState::Failed, clock::now(), Some("x".into()))
            .await
            .unwrap();

        let stats = store
            .job_stats(clock::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(stats.total, 3, "{}", kind);
        assert_eq!(stats.counts.success, 1);
        assert_eq!(stats.counts.failed, 1);
        assert_eq!(stats.counts.pending, 1);
        assert_eq!(stats.created_since, 3, "{}", kind);
        assert_eq!(stats.by_queue["a"].total(), 2, "{}", kind);
        assert_eq!(stats.by_queue["b"].pending, 1, "{}", kind);

        let future = store
            .job_stats(clock::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(future.created_since, 0, "{}", kind);
    }
}

#[tokio::test]
async fn test_logs_round_trip() {
    for (kind, store) in stores().await {
        store.insert_queue(&queue("q", QueueCapacity::Unbounded)).await.unwrap();
        let j = job("q", 0);
        insert(store.as_ref(), &j).await;
        let running = store.claim_job(j.id, clock::now()).await.unwrap().unwrap();

        let log = ScriptTaskLog::for_job(
            &running,
            clock::now(),
            Outcome::Success,
            Some("hello".into()),
            None,
        );
        store.append_log(&log).await.unwrap();

        let logs = store.logs_for_job(j.id).await.unwrap();
        assert_eq!(logs, vec![log], "{}", kind);
        assert!(store.logs_for_job(Uuid::new_v4()).await.unwrap().is_empty());
    }
}
