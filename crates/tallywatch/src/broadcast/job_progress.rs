//! Job progress broadcaster for real-time stage streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::clock::{system_clock, SharedClock};

/// Pipeline stage a job has reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Extracting,
    CrossValidating,
    Validating,
    Triaging,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Extracting => write!(f, "Extracting fields"),
            JobPhase::CrossValidating => write!(f, "Cross-validating header code"),
            JobPhase::Validating => write!(f, "Validating"),
            JobPhase::Triaging => write!(f, "Triaging findings"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub document_id: String,
    pub phase: JobPhase,
    pub status: ProgressStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set for page jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Document status after completion, e.g. `accepted`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(
        job_id: &str,
        document_id: &str,
        phase: JobPhase,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let status = match phase {
            JobPhase::Completed => ProgressStatus::Completed,
            JobPhase::Failed => ProgressStatus::Failed,
            _ => ProgressStatus::Running,
        };

        Self {
            job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp,
            page: None,
            outcome: None,
            error_code: None,
            error: None,
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
    clock: SharedClock,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
            clock,
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job run without emitting anything.
    pub fn track(&self, job_id: &str, document_id: &str, page: Option<u32>) -> JobProgressTracker {
        JobProgressTracker {
            job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            page,
            sender: Arc::clone(&self.sender),
            clock: Arc::clone(&self.clock),
        }
    }

    /// Creates a tracker and announces the job as queued.
    pub fn start_job(&self, job_id: &str, document_id: &str, page: Option<u32>) -> JobProgressTracker {
        let tracker = self.track(job_id, document_id, page);
        tracker.update_phase(JobPhase::Queued, "Job queued for processing");
        tracker
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256, system_clock())
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    document_id: String,
    page: Option<u32>,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
    clock: SharedClock,
}

impl JobProgressTracker {
    fn event(&self, phase: JobPhase, message: &str) -> JobProgressEvent {
        let mut event = JobProgressEvent::new(
            &self.job_id,
            &self.document_id,
            phase,
            message,
            self.clock.now(),
        );
        event.page = self.page;
        event
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let _ = self.sender.send(self.event(phase, message));
    }

    /// Marks the job as completed; `outcome` is the resulting document status.
    pub fn completed(&self, outcome: Option<&str>) {
        let mut event = self.event(JobPhase::Completed, "Processing completed");
        event.outcome = outcome.map(str::to_string);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, code: &str, error: &str) {
        let mut event = self.event(JobPhase::Failed, "Processing failed");
        event.error_code = Some(code.to_string());
        event.error = Some(error.to_string());
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn broadcaster() -> (JobProgressBroadcaster, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (JobProgressBroadcaster::new(10, clock.clone()), clock)
    }

    #[test]
    fn test_broadcaster_send_receive() {
        let (broadcaster, clock) = broadcaster();
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(
            "job-1",
            "doc-1",
            JobPhase::Validating,
            "Testing",
            clock.now(),
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.document_id, "doc-1");
        assert_eq!(received.phase, JobPhase::Validating);
        assert_eq!(received.status, ProgressStatus::Running);
        assert_eq!(received.timestamp, clock.now());
    }

    #[test]
    fn test_start_job_emits_queued() {
        let (broadcaster, _) = broadcaster();
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start_job("job-1", "doc-1", Some(2));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Queued);
        assert_eq!(received.page, Some(2));

        tracker.update_phase(JobPhase::Extracting, "Reading page 2");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Extracting);
        assert_eq!(received.message, "Reading page 2");
    }

    #[test]
    fn test_track_is_silent() {
        let (broadcaster, _) = broadcaster();
        let mut rx = broadcaster.subscribe();
        let _tracker = broadcaster.track("job-1", "doc-1", None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_completion_and_failure() {
        let (broadcaster, _) = broadcaster();
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.track("job-2", "doc-2", None);
        tracker.completed(Some("accepted"));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, ProgressStatus::Completed);
        assert_eq!(received.outcome.as_deref(), Some("accepted"));

        tracker.failed("E_PROVIDER_TIMEOUT", "provider timed out");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.phase, JobPhase::Failed);
        assert_eq!(received.status, ProgressStatus::Failed);
        assert_eq!(received.error_code.as_deref(), Some("E_PROVIDER_TIMEOUT"));
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobPhase::CrossValidating).unwrap(),
            "\"cross_validating\""
        );
    }
}
