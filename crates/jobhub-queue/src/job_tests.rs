use super::*;
use serde_json::json;

#[test]
fn test_job_state_strings() {
    for state in JobState::ALL {
        assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
    }
    assert_eq!("failed".parse::<JobState>().unwrap(), JobState::Failed);
    assert!("CANCELLED".parse::<JobState>().is_err());
}

#[test]
fn test_job_state_terminal() {
    assert!(!JobState::Pending.is_terminal());
    assert!(!JobState::Running.is_terminal());
    assert!(JobState::Success.is_terminal());
    assert!(JobState::Failed.is_terminal());
    assert!(JobState::Running.is_active());
}

#[test]
fn test_trigger_type_strings() {
    assert_eq!("cron".parse::<TriggerType>().unwrap(), TriggerType::Cron);
    assert_eq!(TriggerType::Manual.to_string(), "MANUAL");
    assert!("timer".parse::<TriggerType>().is_err());
}

#[test]
fn test_job_state_serde() {
    let value = serde_json::to_value(JobState::Success).unwrap();
    assert_eq!(value, json!("SUCCESS"));
}

#[test]
fn test_new_job_is_pending() {
    let request = SubmitRequest::manual("default", "echo")
        .with_params(json!({"msg": "hi"}))
        .with_priority(5);
    let job = Job::new(request, "alice");

    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.trigger, TriggerType::Manual);
    assert_eq!(job.priority, 5);
    assert_eq!(job.created_by, "alice");
    assert_eq!(job.params["msg"], "hi");
    assert!(job.started_at.is_none());
    assert!(job.duration().is_none());
}

#[test]
fn test_retry_request_references_original() {
    let mut original = Job::new(SubmitRequest::manual("default", "echo"), "alice");
    original.state = JobState::Failed;

    let request = SubmitRequest::retry_of(&original);
    assert_eq!(request.retry_of, Some(original.id));
    assert_eq!(request.trigger, TriggerType::Manual);
    assert_eq!(request.queue_name, "default");

    let retry = Job::new(request, "bob");
    assert_ne!(retry.id, original.id);
    assert_eq!(retry.state, JobState::Pending);
}
