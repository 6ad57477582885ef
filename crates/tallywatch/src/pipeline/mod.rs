//! Document processing pipeline.
//!
//! Stages per document: extract, cross-validate, validate, triage. Every
//! stage runs inside a tracing span and reports a progress phase.

pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod submission;
pub mod triage;

pub use context::PipelineContext;
pub use error::PipelineError;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter, RecordingProgress};
pub use runner::Pipeline;
pub use submission::{DocumentSubmission, SubmissionReceipt};
pub use triage::TriagePlan;
