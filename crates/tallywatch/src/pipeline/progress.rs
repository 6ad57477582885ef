use std::sync::Mutex;

use crate::broadcast::job_progress::{JobPhase, JobProgressTracker};

/// Events emitted by the pipeline while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase { phase: JobPhase, message: String },
    Completed { outcome: Option<String> },
    Failed { code: String, error: String },
}

impl ProgressEvent {
    pub fn phase(phase: JobPhase, message: impl Into<String>) -> Self {
        ProgressEvent::Phase {
            phase,
            message: message.into(),
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the job progress broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: JobProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => self.tracker.update_phase(phase, &message),
            ProgressEvent::Completed { outcome } => self.tracker.completed(outcome.as_deref()),
            ProgressEvent::Failed { code, error } => self.tracker.failed(&code, &error),
        }
    }
}

/// Records every event; lets tests assert on stage order.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn phases(&self) -> Vec<JobPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Phase { phase, .. } => Some(phase),
                ProgressEvent::Completed { .. } => Some(JobPhase::Completed),
                ProgressEvent::Failed { .. } => Some(JobPhase::Failed),
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broadcast::{JobProgressBroadcaster, ProgressStatus};
    use crate::clock::ManualClock;

    #[test]
    fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(8, Arc::new(ManualClock::default()));
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new(broadcaster.track("job-1", "doc-1", None));

        progress.report(ProgressEvent::phase(JobPhase::Extracting, "Reading"));
        progress.report(ProgressEvent::Failed {
            code: "E_PROVIDER_TIMEOUT".into(),
            error: "slow".into(),
        });

        assert_eq!(rx.try_recv().unwrap().phase, JobPhase::Extracting);
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.status, ProgressStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("slow"));
    }

    #[test]
    fn test_recording_progress_lists_phases() {
        let progress = RecordingProgress::default();
        progress.report(ProgressEvent::phase(JobPhase::Extracting, ""));
        progress.report(ProgressEvent::Completed { outcome: None });
        assert_eq!(
            progress.phases(),
            vec![JobPhase::Extracting, JobPhase::Completed]
        );
    }
}
