//! Job queries and aggregate statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::{Job, JobState, TriggerType};

/// Filters and paging for job listings. Results are newest first.
#[derive(Debug, Clone)]
pub struct JobQuery {
    pub state: Option<JobState>,
    pub task_class: Option<String>,
    pub queue_name: Option<String>,
    pub trigger: Option<TriggerType>,
    /// Inclusive lower bound on creation time.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time.
    pub created_before: Option<DateTime<Utc>>,
    /// Case-insensitive match against task class, queue, params and error text.
    pub keyword: Option<String>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            state: None,
            task_class: None,
            queue_name: None,
            trigger: None,
            created_after: None,
            created_before: None,
            keyword: None,
            page: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

impl JobQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 500;

    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    /// Non-empty keyword, lowercased.
    pub fn keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }

    /// Whether `job` passes every filter.
    pub fn matches(&self, job: &Job) -> bool {
        if self.state.is_some_and(|s| s != job.state) {
            return false;
        }
        if self.trigger.is_some_and(|t| t != job.trigger) {
            return false;
        }
        if self.task_class.as_deref().is_some_and(|c| c != job.task_class) {
            return false;
        }
        if self.queue_name.as_deref().is_some_and(|q| q != job.queue_name) {
            return false;
        }
        if self.created_after.is_some_and(|t| job.created_at < t) {
            return false;
        }
        if self.created_before.is_some_and(|t| job.created_at >= t) {
            return false;
        }
        if let Some(keyword) = self.keyword() {
            let haystack = [
                job.task_class.to_lowercase(),
                job.queue_name.to_lowercase(),
                job.params.to_string().to_lowercase(),
                job.error.as_deref().unwrap_or_default().to_lowercase(),
            ];
            if !haystack.iter().any(|h| h.contains(&keyword)) {
                return false;
            }
        }
        true
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }
}

/// Per-state job counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: u64,
    pub running: u64,
    pub success: u64,
    pub failed: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: JobState, n: u64) {
        match state {
            JobState::Pending => self.pending += n,
            JobState::Running => self.running += n,
            JobState::Success => self.success += n,
            JobState::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.success + self.failed
    }

    /// PENDING + RUNNING, the count bounded by queue capacity.
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }
}

/// Dashboard statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobStats {
    pub counts: StateCounts,
    pub total: u64,
    /// Jobs created at or after the `since` instant passed to the store.
    pub created_since: u64,
    pub by_queue: BTreeMap<String, StateCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::SubmitRequest;
    use serde_json::json;

    fn job(queue: &str, class: &str) -> Job {
        Job::new(
            SubmitRequest::manual(queue, class).with_params(json!({"report": "Weekly"})),
            "admin",
        )
    }

    #[test]
    fn test_paging_bounds() {
        let query = JobQuery {
            page: 0,
            page_size: 10_000,
            ..Default::default()
        };
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), JobQuery::MAX_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = JobQuery {
            page: 3,
            page_size: 20,
            ..Default::default()
        };
        assert_eq!(query.offset(), 40);
    }

    #[test]
    fn test_matches_filters() {
        let j = job("default", "echo");
        assert!(JobQuery::default().matches(&j));

        let by_queue = JobQuery {
            queue_name: Some("other".into()),
            ..Default::default()
        };
        assert!(!by_queue.matches(&j));

        let by_state = JobQuery {
            state: Some(JobState::Failed),
            ..Default::default()
        };
        assert!(!by_state.matches(&j));

        let by_time = JobQuery {
            created_before: Some(j.created_at),
            ..Default::default()
        };
        assert!(!by_time.matches(&j));
    }

    #[test]
    fn test_keyword_searches_params() {
        let j = job("default", "echo");
        let query = JobQuery {
            keyword: Some("weekly".into()),
            ..Default::default()
        };
        assert!(query.matches(&j));

        let blank = JobQuery {
            keyword: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.keyword().is_none());
    }

    #[test]
    fn test_total_pages() {
        let page: Page<u32> = Page {
            items: vec![],
            total: 41,
            page: 1,
            page_size: 20,
        };
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn test_state_counts() {
        let mut counts = StateCounts::default();
        counts.add(JobState::Pending, 2);
        counts.add(JobState::Running, 1);
        counts.add(JobState::Failed, 4);
        assert_eq!(counts.active(), 3);
        assert_eq!(counts.total(), 7);
    }
}
