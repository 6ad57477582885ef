//! Provider calls with a caller-enforced timeout, retries and the breaker.

use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;

use super::{CircuitBreaker, OcrProvider, OcrRequest, ProviderError, ProviderOutput, RetryPolicy};

#[derive(Clone)]
pub struct ProviderGuard {
    provider: Arc<dyn OcrProvider>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl ProviderGuard {
    pub fn new(
        provider: Arc<dyn OcrProvider>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            breaker,
            retry,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Calls the provider, retrying transient failures with backoff.
    ///
    /// A circuit-open rejection is returned immediately; the caller decides
    /// whether to requeue.
    pub fn call(&self, request: &OcrRequest) -> Result<ProviderOutput, ProviderError> {
        let mut attempt = 1;
        loop {
            self.breaker.acquire()?;

            let result = call_with_timeout(self.provider.clone(), request.clone());
            self.breaker.record(&result);

            match result {
                Ok(output) => return Ok(output),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    let delay = self.retry.delay_for(&e, attempt - 1);
                    log::warn!(
                        "OCR call for document {} failed ({}), retry {} in {:?}",
                        request.document_id,
                        e,
                        attempt,
                        delay
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Runs one provider call on a helper thread and waits at most
/// `request.timeout` for it. A call that overruns keeps its thread until the
/// provider returns; its result is discarded.
pub fn call_with_timeout(
    provider: Arc<dyn OcrProvider>,
    request: OcrRequest,
) -> Result<ProviderOutput, ProviderError> {
    let timeout = request.timeout;
    let (tx, rx) = crossbeam_channel::bounded(1);
    let thread_name = format!("ocr-call-{}", request.document_id);

    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            let result = provider.extract(&request);
            let _ = tx.send(result);
        })
        .map_err(|e| ProviderError::Connection(format!("failed to start OCR call: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(ProviderError::Connection(
            "OCR call ended without a result".to_string(),
        )),
    }
}
