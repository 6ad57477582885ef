use std::time::Duration;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{IncidentError, IntakeError, ReviewError};
use crate::provider::{ProviderError, RetryPolicy};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Intake rejected document: {0}")]
    Intake(#[from] IntakeError),

    #[error("OCR failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Persistence failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Review queue failed: {0}")]
    Review(#[from] ReviewError),

    #[error("Incident store failed: {0}")]
    Incident(#[from] IncidentError),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Content for document {0} is missing")]
    ContentMissing(String),

    #[error("Field {key} on page {page} of document {document_id} not found")]
    FieldNotFound {
        document_id: String,
        page: u32,
        key: String,
    },

    #[error("Invalid job {job_id}: {reason}")]
    InvalidJob { job_id: String, reason: String },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Intake(e) => e.code(),
            PipelineError::Provider(e) => e.code(),
            PipelineError::Database(_) => "E_PERSISTENCE",
            PipelineError::Review(e) => e.code(),
            PipelineError::Incident(e) => e.code(),
            PipelineError::DocumentNotFound(_) => "E_DOCUMENT_NOT_FOUND",
            PipelineError::ContentMissing(_) => "E_CONTENT_MISSING",
            PipelineError::FieldNotFound { .. } => "E_FIELD_NOT_FOUND",
            PipelineError::InvalidJob { .. } => "E_INVALID_JOB",
        }
    }

    /// Whether re-running the job later may succeed: provider trouble and
    /// database contention. Bad input fails the same way every time.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Provider(e) => {
                e.is_transient() || matches!(e, ProviderError::CircuitOpen { .. })
            }
            _ => self.database_error().is_some_and(DatabaseError::is_transient),
        }
    }

    fn database_error(&self) -> Option<&DatabaseError> {
        match self {
            PipelineError::Database(e)
            | PipelineError::Review(ReviewError::Database(e))
            | PipelineError::Incident(IncidentError::Database(e)) => Some(e),
            _ => None,
        }
    }

    /// How long a requeued job waits before it can be claimed again.
    pub fn retry_delay(&self, policy: &RetryPolicy, attempt: u32) -> Duration {
        match self {
            PipelineError::Provider(ProviderError::CircuitOpen { retry_in }) => *retry_in,
            PipelineError::Provider(e) => policy.delay_for(e, attempt),
            _ => policy.backoff(attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_trouble_is_retryable() {
        assert!(PipelineError::Provider(ProviderError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(PipelineError::Provider(ProviderError::CircuitOpen {
            retry_in: Duration::from_secs(3)
        })
        .is_retryable());
        assert!(!PipelineError::Provider(ProviderError::MalformedInput("x".into())).is_retryable());
        assert!(!PipelineError::DocumentNotFound("d".into()).is_retryable());
        assert!(!PipelineError::Intake(IntakeError::Empty).is_retryable());
    }

    fn busy() -> DatabaseError {
        DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".into()),
        ))
    }

    #[test]
    fn test_database_contention_is_retryable() {
        assert!(PipelineError::Database(busy()).is_retryable());
        assert!(PipelineError::Database(DatabaseError::LockPoisoned).is_retryable());
        assert!(PipelineError::Review(ReviewError::Database(busy())).is_retryable());
        assert!(PipelineError::Incident(IncidentError::Database(busy())).is_retryable());
        assert!(!PipelineError::Database(DatabaseError::InvalidValue {
            column: "status",
            value: "bogus".into()
        })
        .is_retryable());
        assert!(!PipelineError::Review(ReviewError::NotFound("r".into())).is_retryable());
    }

    #[test]
    fn test_database_contention_backs_off() {
        let policy = RetryPolicy::default();
        let err = PipelineError::Database(busy());
        assert_eq!(err.retry_delay(&policy, 0), policy.backoff(0));
        assert_eq!(err.retry_delay(&policy, 2), policy.backoff(2));
    }

    #[test]
    fn test_circuit_open_delay_uses_cooldown() {
        let err = PipelineError::Provider(ProviderError::CircuitOpen {
            retry_in: Duration::from_secs(7),
        });
        assert_eq!(
            err.retry_delay(&RetryPolicy::default(), 0),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_codes_pass_through() {
        assert_eq!(
            PipelineError::Intake(IntakeError::Empty).code(),
            "E_EMPTY_DOCUMENT"
        );
        assert_eq!(
            PipelineError::Provider(ProviderError::Timeout(Duration::ZERO)).code(),
            "E_PROVIDER_TIMEOUT"
        );
    }
}
