use std::time::Duration;
use thiserror::Error;

/// Failures at the OCR boundary, split into retryable and terminal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("OCR call timed out after {0:?}")]
    Timeout(Duration),

    #[error("OCR provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("OCR provider server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Could not reach OCR provider: {0}")]
    Connection(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Payload of {size} bytes exceeds provider limit")]
    PayloadTooLarge { size: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("OCR provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("OCR circuit is open, retry in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    #[error("OCR provider returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the same request may succeed if tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Server { .. }
                | ProviderError::Connection(_)
        )
    }

    /// Maps an HTTP-style status onto the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            408 => ProviderError::Timeout(Duration::ZERO),
            413 => ProviderError::PayloadTooLarge { size: 0 },
            415 => ProviderError::UnsupportedFormat(message),
            429 => ProviderError::RateLimited { retry_after: None },
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Rejected { status, message },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Timeout(_) => "E_PROVIDER_TIMEOUT",
            ProviderError::RateLimited { .. } => "E_PROVIDER_RATE_LIMITED",
            ProviderError::Server { .. } => "E_PROVIDER_SERVER",
            ProviderError::Connection(_) => "E_PROVIDER_CONNECTION",
            ProviderError::MalformedInput(_) => "E_MALFORMED_INPUT",
            ProviderError::PayloadTooLarge { .. } => "E_OVERSIZED_INPUT",
            ProviderError::UnsupportedFormat(_) => "E_UNSUPPORTED_FORMAT",
            ProviderError::Rejected { .. } => "E_PROVIDER_REJECTED",
            ProviderError::CircuitOpen { .. } => "E_CIRCUIT_OPEN",
            ProviderError::InvalidResponse(_) => "E_PROVIDER_RESPONSE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ProviderError::from_status(503, "down").is_transient());
        assert!(ProviderError::from_status(429, "slow down").is_transient());
        assert!(ProviderError::Connection("reset".into()).is_transient());

        assert!(!ProviderError::from_status(400, "bad").is_transient());
        assert!(!ProviderError::MalformedInput("truncated".into()).is_transient());
        assert!(!ProviderError::from_status(413, "big").is_transient());
        assert!(!ProviderError::CircuitOpen {
            retry_in: Duration::from_secs(5)
        }
        .is_transient());
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ProviderError::Timeout(Duration::ZERO).code(),
            "E_PROVIDER_TIMEOUT"
        );
        assert_eq!(
            ProviderError::from_status(415, "tiff").code(),
            "E_UNSUPPORTED_FORMAT"
        );
    }
}
