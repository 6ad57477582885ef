use std::path::PathBuf;
use thiserror::Error;

use crate::incident::IncidentStatus;
use crate::review::ReviewStatus;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Review error: {0}")]
    Review(#[from] ReviewError),

    #[error("Incident error: {0}")]
    Incident(#[from] IncidentError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output serialization failed: {0}")]
    Output(#[from] serde_json::Error),
}

impl TallyError {
    /// Stable machine-readable code surfaced to operators next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            TallyError::Config(_) => "E_CONFIG",
            TallyError::Intake(e) => e.code(),
            TallyError::Provider(e) => e.code(),
            TallyError::Pipeline(e) => e.code(),
            TallyError::Worker(_) => "E_WORKER",
            TallyError::Review(e) => e.code(),
            TallyError::Incident(e) => e.code(),
            TallyError::Database(_) => "E_PERSISTENCE",
            TallyError::Io { .. } => "E_IO",
            TallyError::Output(_) => "E_OUTPUT",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid agent rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Invalid environment override {name}={value}: {reason}")]
    InvalidOverride {
        name: String,
        value: String,
        reason: String,
    },
}

/// Rejections raised while inspecting a submitted document. None of these are
/// retried: the same bytes will fail the same way.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Document is empty")]
    Empty,

    #[error("Document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed PDF: {0}")]
    MalformedPdf(String),

    #[error("Malformed image: {0}")]
    MalformedImage(String),

    #[error("Document has {pages} pages, limit is {limit}")]
    TooManyPages { pages: u32, limit: u32 },

    #[error("Format {0} is not accepted by this deployment")]
    FormatNotAllowed(crate::document::DocumentFormat),

    #[error("Document declares {declared} pages but {detected} were found")]
    PageCountMismatch { declared: u32, detected: u32 },
}

impl IntakeError {
    pub fn code(&self) -> &'static str {
        match self {
            IntakeError::Empty => "E_EMPTY_DOCUMENT",
            IntakeError::TooLarge { .. } | IntakeError::TooManyPages { .. } => {
                "E_OVERSIZED_INPUT"
            }
            IntakeError::UnsupportedFormat(_) | IntakeError::FormatNotAllowed(_) => {
                "E_UNSUPPORTED_FORMAT"
            }
            IntakeError::MalformedPdf(_) | IntakeError::MalformedImage(_) => "E_MALFORMED_INPUT",
            IntakeError::PageCountMismatch { .. } => "E_PAGE_COUNT_MISMATCH",
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),
}

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("Review item not found: {0}")]
    NotFound(String),

    #[error("Review item {id} is claimed by {holder}")]
    ClaimedByOther { id: String, holder: String },

    #[error("Review item {id} was claimed without a reviewer; claim it by name first")]
    Unassigned { id: String },

    #[error("Review item {id} is {status}, expected {expected}")]
    InvalidState {
        id: String,
        status: ReviewStatus,
        expected: &'static str,
    },

    #[error("Field {field_id} does not belong to document {document_id}")]
    ForeignField {
        field_id: String,
        document_id: String,
    },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

impl ReviewError {
    pub fn code(&self) -> &'static str {
        match self {
            ReviewError::NotFound(_) => "E_REVIEW_NOT_FOUND",
            ReviewError::ClaimedByOther { .. } => "E_REVIEW_CLAIM_CONFLICT",
            ReviewError::Unassigned { .. } => "E_REVIEW_UNASSIGNED",
            ReviewError::InvalidState { .. } => "E_REVIEW_STATE",
            ReviewError::ForeignField { .. } => "E_REVIEW_FIELD",
            ReviewError::Database(_) => "E_PERSISTENCE",
        }
    }
}

#[derive(Error, Debug)]
pub enum IncidentError {
    #[error("Incident not found: {0}")]
    NotFound(String),

    #[error("Incident {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("Incident {id} is {status} and can no longer change")]
    Closed { id: String, status: IncidentStatus },

    #[error("An open incident with the same type, table and description exists: {existing_id}")]
    DuplicateOpen { existing_id: String },

    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),
}

impl IncidentError {
    pub fn code(&self) -> &'static str {
        match self {
            IncidentError::NotFound(_) => "E_INCIDENT_NOT_FOUND",
            IncidentError::InvalidTransition { .. } => "E_INCIDENT_TRANSITION",
            IncidentError::Closed { .. } => "E_INCIDENT_CLOSED",
            IncidentError::DuplicateOpen { .. } => "E_INCIDENT_DUPLICATE",
            IncidentError::Database(_) => "E_PERSISTENCE",
        }
    }
}

pub type Result<T> = std::result::Result<T, TallyError>;
