//! Submitted tally forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::macros::str_enum;

str_enum! {
    /// Where a document is in its processing lifecycle.
    pub enum DocumentStatus {
        Queued => "queued",
        Processing => "processing",
        Extracted => "extracted",
        Validated => "validated",
        IncidentRaised => "incident_raised",
        Accepted => "accepted",
        Failed => "failed",
    }
}

impl DocumentStatus {
    /// Processing has finished, one way or another. A validated document
    /// still has its findings to route.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DocumentStatus::IncidentRaised | DocumentStatus::Accepted | DocumentStatus::Failed
        )
    }

    pub fn can_advance_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Queued, Processing) | (Queued, Failed) => true,
            (Processing, Extracted) | (Processing, Failed) | (Processing, Queued) => true,
            (Extracted, Validated) | (Extracted, Failed) => true,
            (Validated, IncidentRaised) | (Validated, Accepted) => true,
            (IncidentRaised, Accepted) => true,
            _ => false,
        }
    }
}

str_enum! {
    pub enum DocumentFormat {
        Pdf => "pdf",
        Png => "png",
        Jpeg => "jpeg",
        Tiff => "tiff",
        Gif => "gif",
        Bmp => "bmp",
        Webp => "webp",
    }
}

impl DocumentFormat {
    pub fn is_image(&self) -> bool {
        !matches!(self, DocumentFormat::Pdf)
    }
}

str_enum! {
    /// What kind of electoral form a document is.
    pub enum Classification {
        TallySheet => "tally_sheet",
        ScrutinyRecord => "scrutiny_record",
        Other => "other",
    }
}

impl Default for Classification {
    fn default() -> Self {
        Classification::TallySheet
    }
}

/// A document as persisted. Content bytes live in a separate table and are
/// loaded only by the worker that processes the document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub source_ref: String,
    pub content_hash: String,
    pub page_count: u32,
    pub classification: Classification,
    pub format: DocumentFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Eligible-voter ceiling for the table, when known at submission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligible_voters: Option<i64>,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
