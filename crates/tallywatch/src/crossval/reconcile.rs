use serde::{Deserialize, Serialize};

use super::decode::{strip_leading_zeros, DecodedCode, ParseStatus, TableComponents};
use crate::extract::field::{ExtractedField, FieldRole, HeaderComponent};
use crate::macros::str_enum;

str_enum! {
    pub enum MatchStatus {
        Exact => "exact",
        Partial => "partial",
        Mismatch => "mismatch",
        Unavailable => "unavailable",
    }
}

/// Table identifier as read by OCR from the printed header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrHeader {
    pub components: TableComponents,
    /// Mean confidence of the header fields that were read.
    pub confidence: f64,
}

impl OcrHeader {
    /// Builds the header from `header.*` fields. Fields without a numeric
    /// value (marked, empty, unreadable) leave their component absent.
    pub fn from_fields(fields: &[ExtractedField]) -> Self {
        let mut components = TableComponents::default();
        let mut confidences = Vec::new();

        for field in fields {
            if let FieldRole::Header(component) = field.role() {
                confidences.push(field.confidence);
                components.set(component, field.value.map(|v| v.to_string()));
            }
        }

        let confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        Self {
            components,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub component: HeaderComponent,
    pub code_value: String,
    pub ocr_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossValidationResult {
    pub decoded: DecodedCode,
    pub header: OcrHeader,
    pub match_status: MatchStatus,
    /// Trusted table id. Absent on mismatch: neither source wins by default.
    pub canonical_table_id: Option<String>,
    pub confidence: f64,
    pub discrepancies: Vec<Discrepancy>,
}

impl CrossValidationResult {
    pub fn parse_status(&self) -> ParseStatus {
        self.decoded.parse_status
    }

    /// Best available table reference for grouping incidents. Falls back to
    /// the OCR header, then the code, then a per-document placeholder.
    pub fn table_ref(&self, document_id: &str) -> String {
        self.canonical_table_id
            .clone()
            .or_else(|| self.header.components.canonical_id())
            .or_else(|| self.decoded.components.canonical_id())
            .unwrap_or_else(|| format!("unidentified:{}", document_id))
    }
}

pub fn cross_validate(decoded: DecodedCode, header: OcrHeader) -> CrossValidationResult {
    if !decoded.is_usable() {
        return CrossValidationResult {
            canonical_table_id: header.components.canonical_id(),
            confidence: header.confidence / 2.0,
            match_status: MatchStatus::Unavailable,
            discrepancies: Vec::new(),
            decoded,
            header,
        };
    }

    let mut discrepancies = Vec::new();
    let mut confirmed = 0usize;
    let mut merged = TableComponents::default();

    for component in HeaderComponent::ALL.iter().copied() {
        let from_code = decoded.components.get(component);
        let from_ocr = header.components.get(component);
        match (from_code, from_ocr) {
            (Some(code), Some(ocr)) => {
                if strip_leading_zeros(code) == strip_leading_zeros(ocr) {
                    confirmed += 1;
                } else {
                    discrepancies.push(Discrepancy {
                        component,
                        code_value: code.to_string(),
                        ocr_value: ocr.to_string(),
                    });
                }
                merged.set(component, Some(code.to_string()));
            }
            (Some(v), None) | (None, Some(v)) => merged.set(component, Some(v.to_string())),
            (None, None) => {}
        }
    }

    if !discrepancies.is_empty() {
        return CrossValidationResult {
            decoded,
            header,
            match_status: MatchStatus::Mismatch,
            canonical_table_id: None,
            confidence: 0.0,
            discrepancies,
        };
    }

    let confirmed_fraction = confirmed as f64 / 5.0;
    let (match_status, confidence) = if confirmed == 5 {
        (MatchStatus::Exact, 1.0)
    } else {
        (
            MatchStatus::Partial,
            (decoded.confidence + confirmed_fraction) / 2.0,
        )
    };

    CrossValidationResult {
        canonical_table_id: merged.canonical_id(),
        decoded,
        header,
        match_status,
        confidence,
        discrepancies,
    }
}
