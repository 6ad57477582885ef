//! Extracted fields and field-key roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::marks::Mark;
use super::normalize::CellState;
use crate::macros::str_enum;

pub const TALLY_PREFIX: &str = "tally.";
pub const HEADER_PREFIX: &str = "header.";
pub const DECLARED_TOTAL_KEY: &str = "total.urn";
pub const SIGNED_VOTERS_KEY: &str = "total.e11";
pub const ELIGIBLE_VOTERS_KEY: &str = "census.eligible";
pub const SIGNATURES_KEY: &str = "signatures.count";

str_enum! {
    /// One part of the table identifier printed in the form header.
    pub enum HeaderComponent {
        Department => "department",
        Municipality => "municipality",
        Zone => "zone",
        Station => "station",
        Table => "table",
    }
}

/// What a field key means to the validation rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRole {
    /// A per-party or per-candidate count; carries the component name.
    Tally(String),
    DeclaredTotal,
    SignedVoters,
    EligibleVoters,
    Header(HeaderComponent),
    Signatures,
    Other,
}

impl FieldRole {
    pub fn from_key(key: &str) -> Self {
        if let Some(name) = key.strip_prefix(TALLY_PREFIX) {
            if !name.is_empty() {
                return FieldRole::Tally(name.to_string());
            }
            return FieldRole::Other;
        }
        if let Some(part) = key.strip_prefix(HEADER_PREFIX) {
            return part
                .parse::<HeaderComponent>()
                .map(FieldRole::Header)
                .unwrap_or(FieldRole::Other);
        }
        match key {
            DECLARED_TOTAL_KEY => FieldRole::DeclaredTotal,
            SIGNED_VOTERS_KEY => FieldRole::SignedVoters,
            ELIGIBLE_VOTERS_KEY => FieldRole::EligibleVoters,
            SIGNATURES_KEY => FieldRole::Signatures,
            _ => FieldRole::Other,
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(
            self,
            FieldRole::Tally(_) | FieldRole::DeclaredTotal | FieldRole::SignedVoters
        )
    }
}

/// A lower-ranked reading the provider offered for the same cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub text: String,
    pub confidence: f64,
}

/// One typed cell read from one page of one document.
///
/// Never edited after insertion: reviewer and re-read values are stored as
/// `FieldCorrection` records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedField {
    pub id: String,
    pub document_id: String,
    pub key: String,
    pub page: u32,
    pub raw_text: String,
    pub value: Option<i64>,
    pub mark: Option<Mark>,
    pub state: CellState,
    pub confidence: f64,
    pub needs_review: bool,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    pub created_at: DateTime<Utc>,
}

impl ExtractedField {
    pub fn role(&self) -> FieldRole {
        FieldRole::from_key(&self.key)
    }
}

str_enum! {
    pub enum CorrectionSource {
        Reviewer => "reviewer",
        Reocr => "reocr",
    }
}

/// An appended correction to an extracted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCorrection {
    pub id: String,
    pub field_id: String,
    pub document_id: String,
    pub review_item_id: Option<String>,
    pub value: Option<i64>,
    pub mark: Option<String>,
    pub source: CorrectionSource,
    pub actor: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
