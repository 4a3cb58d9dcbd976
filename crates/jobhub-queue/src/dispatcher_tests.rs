use super::*;
use crate::job_queue::{JobQueue, QueueCapacity};
use crate::store::MemoryStateStore;

async fn setup(capacity: QueueCapacity) -> (Arc<dyn StateStore>, Dispatcher) {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    store
        .insert_queue(&JobQueue::new("q", capacity, 1, "admin").unwrap())
        .await
        .unwrap();
    (store.clone(), Dispatcher::new(store))
}

#[tokio::test]
async fn test_submit_enqueues_and_persists() {
    let (store, dispatcher) = setup(QueueCapacity::Unbounded).await;
    let job = dispatcher
        .submit(SubmitRequest::manual("q", "echo").with_priority(3), "alice")
        .await
        .unwrap();

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.created_by, "alice");
    assert!(dispatcher.lane("q").contains(&job.id));
    assert_eq!(store.get_job(job.id).await.unwrap().unwrap(), job);
}

#[tokio::test]
async fn test_submit_rejections() {
    let (store, dispatcher) = setup(QueueCapacity::Bounded(1)).await;

    let missing = dispatcher.submit(SubmitRequest::manual("nope", "echo"), "a").await;
    assert!(matches!(missing, Err(QueueError::QueueNotFound(_))));

    dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    let full = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await;
    assert!(matches!(full, Err(QueueError::QueueFull { capacity: 1, .. })));
    assert!(full.unwrap_err().is_backpressure());

    store
        .set_queue_enabled("q", false, clock::now(), "admin")
        .await
        .unwrap();
    let disabled = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await;
    assert!(matches!(disabled, Err(QueueError::QueueDisabled(_))));

    assert_eq!(dispatcher.lane("q").len(), 1);
}

#[tokio::test]
async fn test_cancel_pending_only() {
    let (store, dispatcher) = setup(QueueCapacity::Bounded(2)).await;
    let job = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();

    dispatcher.cancel(job.id).await.unwrap();
    assert!(store.get_job(job.id).await.unwrap().is_none());
    assert!(!dispatcher.lane("q").contains(&job.id));
    assert_eq!(store.active_count("q").await.unwrap(), 0);

    assert!(matches!(
        dispatcher.cancel(job.id).await,
        Err(QueueError::JobNotFound(_))
    ));

    let running = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    dispatcher.claim(running.id).await.unwrap().unwrap();
    assert!(matches!(
        dispatcher.cancel(running.id).await,
        Err(QueueError::InvalidState { state: JobState::Running, .. })
    ));
}

#[tokio::test]
async fn test_claim_once() {
    let (_, dispatcher) = setup(QueueCapacity::Unbounded).await;
    let job = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();

    let claimed = dispatcher.claim(job.id).await.unwrap().unwrap();
    assert_eq!(claimed.state, JobState::Running);
    assert!(claimed.started_at.is_some());
    assert!(dispatcher.claim(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resubmit_terminal_job() {
    let (store, dispatcher) = setup(QueueCapacity::Unbounded).await;
    let job = dispatcher
        .submit(
            SubmitRequest::manual("q", "echo")
                .with_params(serde_json::json!({"n": 1}))
                .with_priority(7),
            "a",
        )
        .await
        .unwrap();

    assert!(matches!(
        dispatcher.resubmit(job.id, "b").await,
        Err(QueueError::InvalidState { .. })
    ));

    dispatcher.claim(job.id).await.unwrap().unwrap();
    store
        .finish_job(job.id, JobState::Failed, clock::now(), Some("boom".into()))
        .await
        .unwrap();

    let retry = dispatcher.resubmit(job.id, "b").await.unwrap();
    assert_ne!(retry.id, job.id);
    assert_eq!(retry.retry_of, Some(job.id));
    assert_eq!(retry.params, job.params);
    assert_eq!(retry.priority, 7);
    assert_eq!(retry.created_by, "b");
    assert_eq!(retry.state, JobState::Pending);
}

#[tokio::test]
async fn test_delete_job_by_state() {
    let (store, dispatcher) = setup(QueueCapacity::Unbounded).await;

    let pending = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    dispatcher.delete_job(pending.id).await.unwrap();
    assert!(store.get_job(pending.id).await.unwrap().is_none());
    assert!(dispatcher.lane("q").is_empty());

    let running = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    dispatcher.claim(running.id).await.unwrap().unwrap();
    assert!(matches!(
        dispatcher.delete_job(running.id).await,
        Err(QueueError::InvalidState { operation: "delete", .. })
    ));

    store
        .finish_job(running.id, JobState::Success, clock::now(), None)
        .await
        .unwrap();
    dispatcher.delete_job(running.id).await.unwrap();
    assert!(store.get_job(running.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rehydrate_is_idempotent() {
    let (store, first) = setup(QueueCapacity::Unbounded).await;
    let a = first.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    let b = first
        .submit(SubmitRequest::manual("q", "echo").with_priority(5), "a")
        .await
        .unwrap();

    // A fresh dispatcher over the same store stands in for a restart.
    let restarted = Dispatcher::new(store.clone());
    assert_eq!(restarted.rehydrate().await.unwrap(), 2);
    assert_eq!(restarted.rehydrate().await.unwrap(), 0);
    assert_eq!(restarted.lane("q").snapshot(), vec![b.id, a.id]);
}

#[tokio::test]
async fn test_reconcile_drops_stale_entries() {
    let (store, dispatcher) = setup(QueueCapacity::Unbounded).await;
    let a = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    let b = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();

    // Claimed behind the dispatcher's back: the snapshot is gone.
    store.claim_job(a.id, clock::now()).await.unwrap().unwrap();

    let report = dispatcher.reconcile().await.unwrap();
    assert_eq!(report, ReconcileReport { added: 0, removed: 1 });
    assert_eq!(dispatcher.lane("q").snapshot(), vec![b.id]);
    assert_eq!(dispatcher.queued(), 1);
}

#[tokio::test]
async fn test_reconcile_prunes_when_store_has_no_pending_jobs() {
    let (store, dispatcher) = setup(QueueCapacity::Unbounded).await;
    let job = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();

    // Cancelled through the store directly, leaving no pending rows at all.
    assert!(store.cancel_job(job.id).await.unwrap());
    assert!(store.pending_jobs().await.unwrap().is_empty());

    let report = dispatcher.reconcile().await.unwrap();
    assert_eq!(report, ReconcileReport { added: 0, removed: 1 });
    assert_eq!(dispatcher.queued(), 0);
    assert!(!dispatcher.lane("q").contains(&job.id));

    let again = dispatcher.submit(SubmitRequest::manual("q", "echo"), "a").await.unwrap();
    assert_eq!(dispatcher.reconcile().await.unwrap(), ReconcileReport::default());
    assert_eq!(dispatcher.lane("q").snapshot(), vec![again.id]);
}
