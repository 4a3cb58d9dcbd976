use super::*;
use crate::schema::QueueBootstrap;

#[test]
fn test_validate_default_config() {
    let config = Config::default();
    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
}

#[test]
fn test_validate_tick_interval_too_small() {
    let mut config = Config::default();
    config.scheduler.tick_interval_ms = 200;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result
        .errors
        .iter()
        .any(|e| e.path == "scheduler.tick_interval_ms"));
}

#[test]
fn test_validate_zero_evaluation_slots() {
    let mut config = Config::default();
    config.scheduler.evaluation_slots = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result
        .errors
        .iter()
        .any(|e| e.path == "scheduler.evaluation_slots"));
}

#[test]
fn test_validate_zero_concurrency() {
    let mut config = Config::default();
    config.workers.default_concurrency = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
}

#[test]
fn test_validate_high_concurrency_warning() {
    let mut config = Config::default();
    config.workers.default_concurrency = 1000;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(!result.warnings.is_empty());
}

#[test]
fn test_validate_zero_capacity_rejected() {
    let mut config = Config::default();
    config.queues.push(QueueBootstrap::new("default", 0));

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "queues[0].capacity"));
}

#[test]
fn test_validate_capacity_and_unbounded_conflict() {
    let mut config = Config::default();
    let mut queue = QueueBootstrap::new("default", 10);
    queue.unbounded = true;
    config.queues.push(queue);

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
}

#[test]
fn test_validate_missing_capacity() {
    let mut config = Config::default();
    let mut queue = QueueBootstrap::new("default", 10);
    queue.capacity = None;
    config.queues.push(queue);

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors[0].message.contains("required"));
}

#[test]
fn test_validate_unbounded_queue() {
    let mut config = Config::default();
    let mut queue = QueueBootstrap::new("bulk", 10);
    queue.capacity = None;
    queue.unbounded = true;
    config.queues.push(queue);

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
}

#[test]
fn test_validate_duplicate_queue_names() {
    let mut config = Config::default();
    config.queues.push(QueueBootstrap::new("default", 10));
    config.queues.push(QueueBootstrap::new("default", 20));

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "queues[1].name"));
}

#[test]
fn test_into_result_reports_first_error() {
    let mut config = Config::default();
    config.workers.default_concurrency = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    let err = result.into_result().unwrap_err();
    assert!(err.to_string().contains("workers.default_concurrency"));
}

#[test]
fn test_in_memory_store_warns() {
    let mut config = Config::default();
    config.store.in_memory = true;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "store.in_memory"));
}
