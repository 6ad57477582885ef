//! The OCR boundary.
//!
//! The vision-OCR capability is external. Everything the pipeline knows
//! about it goes through [`OcrProvider`], wrapped by [`ProviderGuard`] which
//! adds the call timeout, retries and the circuit breaker.

pub mod breaker;
pub mod error;
pub mod fixture;
pub mod guard;
pub mod retry;
#[cfg(feature = "tesseract")]
pub mod tesseract;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use breaker::{BreakerState, CircuitBreaker};
pub use error::ProviderError;
pub use fixture::FixtureProvider;
pub use guard::ProviderGuard;
pub use retry::RetryPolicy;

use crate::document::DocumentFormat;
use crate::extract::field::{
    Alternative, DECLARED_TOTAL_KEY, ELIGIBLE_VOTERS_KEY, HEADER_PREFIX, SIGNATURES_KEY,
    SIGNED_VOTERS_KEY, TALLY_PREFIX,
};
use crate::extract::field::HeaderComponent;

pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, request: &OcrRequest) -> Result<ProviderOutput, ProviderError>;
}

/// A field the provider is asked to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    /// Page the field is printed on, when fixed by the form layout.
    #[serde(default)]
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormSchema {
    pub fields: Vec<FieldSpec>,
}

impl FormSchema {
    /// Header, totals and signatures plus one tally cell per party key.
    pub fn tally_sheet<S: AsRef<str>>(parties: &[S]) -> Self {
        let mut fields: Vec<FieldSpec> = HeaderComponent::ALL
            .iter()
            .map(|c| FieldSpec {
                key: format!("{}{}", HEADER_PREFIX, c),
                label: c.as_str().to_string(),
                page: Some(1),
            })
            .collect();

        fields.extend(parties.iter().map(|p| FieldSpec {
            key: format!("{}{}", TALLY_PREFIX, p.as_ref()),
            label: p.as_ref().to_string(),
            page: None,
        }));

        for (key, label) in [
            (DECLARED_TOTAL_KEY, "total votes in urn"),
            (SIGNED_VOTERS_KEY, "voters signed in"),
            (ELIGIBLE_VOTERS_KEY, "eligible voters"),
            (SIGNATURES_KEY, "signatures"),
        ] {
            fields.push(FieldSpec {
                key: key.to_string(),
                label: label.to_string(),
                page: None,
            });
        }

        Self { fields }
    }

    pub fn key_for_label(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        self.fields
            .iter()
            .find(|f| f.label.eq_ignore_ascii_case(label) || f.key.eq_ignore_ascii_case(label))
            .map(|f| f.key.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document_id: String,
    pub content_hash: String,
    pub format: DocumentFormat,
    pub content: Arc<[u8]>,
    /// Pages to read; empty means all.
    pub pages: Vec<u32>,
    pub schema: Arc<FormSchema>,
    pub timeout: Duration,
}

impl OcrRequest {
    pub fn wants_page(&self, page: u32) -> bool {
        self.pages.is_empty() || self.pages.contains(&page)
    }
}

/// A raw reading of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCell {
    pub key: String,
    #[serde(default = "first_page")]
    pub page: u32,
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOutput {
    pub provider: String,
    /// Overall confidence the provider reports for the document.
    pub provider_confidence: f64,
    #[serde(default)]
    pub cells: Vec<RawCell>,
    /// Text of the machine-readable table code, when the provider found one.
    #[serde(default)]
    pub code: Option<String>,
}

impl ProviderOutput {
    pub fn pages(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.cells.iter().map(|c| c.page).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_sheet_schema() {
        let schema = FormSchema::tally_sheet(&["party_a", "party_b"]);
        let keys: Vec<&str> = schema.fields.iter().map(|f| f.key.as_str()).collect();
        assert!(keys.contains(&"header.department"));
        assert!(keys.contains(&"header.table"));
        assert!(keys.contains(&"tally.party_a"));
        assert!(keys.contains(&"total.urn"));
        assert_eq!(schema.key_for_label("Party_B"), Some("tally.party_b"));
        assert_eq!(schema.key_for_label("unknown"), None);
    }

    #[test]
    fn test_output_deserialises_with_defaults() {
        let output: ProviderOutput = serde_json::from_str(
            r#"{"provider":"fixture","providerConfidence":0.9,
                "cells":[{"key":"tally.a","text":"12","confidence":0.95}]}"#,
        )
        .unwrap();
        assert_eq!(output.cells[0].page, 1);
        assert!(output.code.is_none());
        assert_eq!(output.pages(), vec![1]);
    }
}
