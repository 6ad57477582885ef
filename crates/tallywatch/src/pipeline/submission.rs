use serde::{Deserialize, Serialize};

use crate::document::Classification;
use crate::worker::job::JobPriority;

/// A document handed to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct DocumentSubmission {
    /// Where the document came from (upload path, message id); free text.
    pub source_ref: String,
    pub content: Vec<u8>,
    pub mime_type: Option<String>,
    pub classification: Classification,
    pub eligible_voters: Option<i64>,
    /// Checked against the content when given.
    pub declared_pages: Option<u32>,
    pub priority: JobPriority,
    /// Overrides `workers.split_pages` for this document.
    pub split_pages: Option<bool>,
}

impl DocumentSubmission {
    pub fn new(source_ref: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            source_ref: source_ref.into(),
            content,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_eligible_voters(mut self, eligible: i64) -> Self {
        self.eligible_voters = Some(eligible);
        self
    }

    pub fn split_pages(mut self, split: bool) -> Self {
        self.split_pages = Some(split);
        self
    }
}

/// Returned by `Pipeline::submit`. `job_id` is the first job, for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub document_id: String,
    pub job_id: String,
    pub job_ids: Vec<String>,
    /// The content hash was already known; nothing new was queued.
    pub duplicate: bool,
}
