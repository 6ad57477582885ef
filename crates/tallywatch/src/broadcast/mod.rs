//! Broadcasters for real-time event streaming.
//!
//! Subscribers (a dashboard, a notifier, a test) attach through `subscribe`;
//! senders never block and never fail when nobody listens.

pub mod alerts;
pub mod job_progress;

pub use alerts::AlertBroadcaster;
pub use job_progress::{
    JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker, ProgressStatus,
};
