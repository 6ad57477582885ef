//! Scripted provider for tests and dry runs.
//!
//! Outputs are registered per content hash. Queued failures are returned,
//! in order, before any output.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{OcrProvider, OcrRequest, ProviderError, ProviderOutput, RawCell};

#[derive(Default)]
struct Script {
    outputs: HashMap<String, ProviderOutput>,
    default_output: Option<ProviderOutput>,
    failures: VecDeque<ProviderError>,
    delay: Option<Duration>,
}

#[derive(Default)]
pub struct FixtureProvider {
    script: Mutex<Script>,
    calls: AtomicUsize,
}

impl FixtureProvider {
    pub const NAME: &'static str = "fixture";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a single-page output from `(key, text, confidence)` triples.
    pub fn output(cells: &[(&str, &str, f64)], code: Option<&str>) -> ProviderOutput {
        ProviderOutput {
            provider: Self::NAME.to_string(),
            provider_confidence: 1.0,
            cells: cells
                .iter()
                .map(|(key, text, confidence)| RawCell {
                    key: key.to_string(),
                    page: 1,
                    text: text.to_string(),
                    confidence: *confidence,
                    alternatives: Vec::new(),
                })
                .collect(),
            code: code.map(str::to_string),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_output(&self, content_hash: &str, output: ProviderOutput) {
        self.script()
            .outputs
            .insert(content_hash.to_string(), output);
    }

    pub fn set_output_for_content(&self, content: &[u8], output: ProviderOutput) {
        self.set_output(&crate::intake::content_hash(content), output);
    }

    pub fn set_default_output(&self, output: ProviderOutput) {
        self.script().default_output = Some(output);
    }

    pub fn fail_next(&self, error: ProviderError) {
        self.script().failures.push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrProvider for FixtureProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn extract(&self, request: &OcrRequest) -> Result<ProviderOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (delay, scripted) = {
            let mut script = self.script();
            let scripted = match script.failures.pop_front() {
                Some(err) => Err(err),
                None => script
                    .outputs
                    .get(&request.content_hash)
                    .or(script.default_output.as_ref())
                    .cloned()
                    .ok_or_else(|| {
                        ProviderError::InvalidResponse(format!(
                            "no fixture for content {}",
                            request.content_hash
                        ))
                    }),
            };
            (script.delay, scripted)
        };

        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut output = scripted?;
        output.cells.retain(|c| request.wants_page(c.page));
        if !request.wants_page(1) {
            output.code = None;
        }
        Ok(output)
    }
}
