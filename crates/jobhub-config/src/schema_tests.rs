use super::*;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.tick_interval_ms, 1000);
    assert_eq!(config.scheduler.evaluation_slots, 10);
    assert!(!config.scheduler.fire_missed_on_startup);
    assert_eq!(config.workers.default_concurrency, 2);
    assert_eq!(config.workers.shutdown_timeout_secs, 30);
    assert!(config.queues.is_empty());
}

#[test]
fn test_default_store_path_under_home() {
    let store = StoreConfig::default();
    assert!(store.path.ends_with("jobhub.db"));
    assert!(!store.in_memory);
}

#[test]
fn test_durations() {
    let scheduler = SchedulerConfig {
        tick_interval_ms: 2500,
        ..Default::default()
    };
    assert_eq!(scheduler.tick_interval(), Duration::from_millis(2500));

    let workers = WorkerConfig::default();
    assert_eq!(workers.shutdown_timeout(), Duration::from_secs(30));
    assert_eq!(workers.reconcile_interval(), Duration::from_secs(5));
}

#[test]
fn test_queue_bootstrap_deserialize() {
    let queue: QueueBootstrap = toml::from_str(
        r#"
            name = "reports"
            capacity = 50
            concurrency = 4
        "#,
    )
    .unwrap();
    assert_eq!(queue.name, "reports");
    assert_eq!(queue.capacity, Some(50));
    assert_eq!(queue.concurrency, Some(4));
    assert!(queue.enabled);
    assert!(!queue.unbounded);
    assert!(queue.label.is_none());
}

#[test]
fn test_queue_bootstrap_new() {
    let queue = QueueBootstrap::new("default", 100);
    assert_eq!(queue.capacity, Some(100));
    assert!(queue.enabled);
}

#[test]
fn test_resolved_path_expands_tilde() {
    let store = StoreConfig {
        path: "~/data/jobs.db".to_string(),
        in_memory: false,
    };
    let resolved = store.resolved_path();
    assert!(!resolved.to_string_lossy().starts_with('~'));
    assert!(resolved.ends_with("data/jobs.db"));
}
