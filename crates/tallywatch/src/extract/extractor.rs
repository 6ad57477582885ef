use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::field::ExtractedField;
use super::normalize::Normalizer;
use crate::document::Document;
use crate::provider::{ProviderOutput, RawCell};

/// Default confidence below which a field is routed to review.
pub const DEFAULT_REVIEW_THRESHOLD: f64 = 0.85;

/// Turns provider cells into typed fields.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    normalizer: Normalizer,
    review_threshold: f64,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(Normalizer::default(), DEFAULT_REVIEW_THRESHOLD)
    }
}

impl FieldExtractor {
    pub fn new(normalizer: Normalizer, review_threshold: f64) -> Self {
        Self {
            normalizer,
            review_threshold,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// One field per `(page, key)`. When the provider reports the same cell
    /// twice the more confident reading is kept.
    pub fn extract_fields(
        &self,
        document: &Document,
        output: &ProviderOutput,
        now: DateTime<Utc>,
    ) -> Vec<ExtractedField> {
        let provider_confidence = output.provider_confidence.clamp(0.0, 1.0);
        let mut best: BTreeMap<(u32, &str), &RawCell> = BTreeMap::new();

        for cell in &output.cells {
            let slot = best.entry((cell.page, cell.key.as_str())).or_insert(cell);
            if cell.confidence > slot.confidence {
                *slot = cell;
            }
        }

        best.into_values()
            .map(|cell| self.field_from_cell(document, cell, provider_confidence, now))
            .collect()
    }

    fn field_from_cell(
        &self,
        document: &Document,
        cell: &RawCell,
        provider_confidence: f64,
        now: DateTime<Utc>,
    ) -> ExtractedField {
        let normalized = self.normalizer.normalize(&cell.text);
        let confidence =
            cell.confidence.clamp(0.0, 1.0) * provider_confidence * normalized.confidence;
        let needs_review = normalized.needs_review || confidence < self.review_threshold;

        ExtractedField {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            key: cell.key.clone(),
            page: cell.page,
            raw_text: cell.text.clone(),
            value: normalized.value,
            mark: normalized.mark,
            state: normalized.state,
            confidence,
            needs_review,
            alternatives: cell.alternatives.clone(),
            created_at: now,
        }
    }
}
