//! Extraction, cross-validation and incident tracking for scanned vote-tally
//! forms.

pub mod agent;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod context;
pub mod crossval;
pub mod db;
pub mod document;
pub mod error;
pub mod extract;
pub mod incident;
pub mod intake;
pub mod macros;
pub mod payload;
pub mod pipeline;
pub mod provider;
pub mod review;
pub mod telemetry;
pub mod validation;
pub mod worker;

pub use agent::{Agent, AgentHandle, Alert, AlertSink, CollectingSink};
pub use broadcast::{AlertBroadcaster, JobProgressBroadcaster};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{load_config, load_config_from_str, Config};
pub use context::AppContext;
pub use db::Database;
pub use document::{Document, DocumentFormat, DocumentStatus};
pub use error::{ConfigError, IncidentError, IntakeError, Result, ReviewError, TallyError, WorkerError};
pub use incident::{Incident, IncidentStore};
pub use payload::{ExtractionPayload, PayloadV1, PayloadV2};
pub use pipeline::{DocumentSubmission, Pipeline, PipelineError, SubmissionReceipt};
pub use provider::{FixtureProvider, OcrProvider, ProviderError};
pub use review::ReviewQueue;
pub use worker::{JobQueue, WorkerPool};
