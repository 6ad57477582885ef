use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::macros::str_enum;

str_enum! {
    /// Scope of work for one job.
    pub enum JobKind {
        Document => "document",
        Page => "page",
        Cell => "cell",
    }
}

str_enum! {
    /// Queue tier. Declared low to high so `Ord` ranks urgent highest.
    pub enum JobPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

str_enum! {
    pub enum JobStatus {
        Queued => "queued",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerJob {
    pub id: String,
    pub document_id: String,
    pub kind: JobKind,
    /// Page for page jobs; page of the field for cell jobs.
    pub page: Option<u32>,
    /// Field key for cell jobs.
    pub field_key: Option<String>,
    pub priority: JobPriority,
    pub status: JobStatus,
    /// Pipeline runs started for this job, including requeues.
    pub attempts: u32,
    pub worker_id: Option<usize>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl WorkerJob {
    fn new(
        document_id: &str,
        kind: JobKind,
        page: Option<u32>,
        field_key: Option<String>,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            kind,
            page,
            field_key,
            priority,
            status: JobStatus::Queued,
            attempts: 0,
            worker_id: None,
            error_code: None,
            error: None,
            result: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn document(document_id: &str, priority: JobPriority, now: DateTime<Utc>) -> Self {
        Self::new(document_id, JobKind::Document, None, None, priority, now)
    }

    pub fn page(document_id: &str, page: u32, priority: JobPriority, now: DateTime<Utc>) -> Self {
        Self::new(document_id, JobKind::Page, Some(page), None, priority, now)
    }

    pub fn cell(
        document_id: &str,
        page: u32,
        field_key: &str,
        priority: JobPriority,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            document_id,
            JobKind::Cell,
            Some(page),
            Some(field_key.to_string()),
            priority,
            now,
        )
    }
}

/// Sent on the pool's result channel when a job run ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: String,
    pub document_id: String,
    pub kind: JobKind,
    pub worker_id: usize,
    pub status: JobStatus,
    /// The job went back on the queue instead of finishing.
    pub requeued: bool,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_constructors() {
        let now = Utc::now();
        let job = WorkerJob::page("doc", 2, JobPriority::High, now);
        assert_eq!(job.kind, JobKind::Page);
        assert_eq!(job.page, Some(2));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);

        let cell = WorkerJob::cell("doc", 1, "tally.a", JobPriority::Normal, now);
        assert_eq!(cell.field_key.as_deref(), Some("tally.a"));
    }
}
