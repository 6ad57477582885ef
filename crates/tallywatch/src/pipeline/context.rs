use serde_json::{json, Value};

use crate::crossval::CrossValidationResult;
use crate::document::DocumentStatus;
use crate::validation::ValidationFinding;
use crate::worker::job::WorkerJob;

/// State accumulated while one job runs. Becomes the job's stored result.
pub struct PipelineContext {
    // Input, as reloaded after the claim
    pub job: WorkerJob,

    /// The document was already settled; nothing was done.
    pub skipped: bool,

    // Extraction
    pub pages_read: Vec<u32>,
    pub fields_stored: usize,

    // Finalisation, set only by the run that validated the document
    pub cross: Option<CrossValidationResult>,
    pub findings: Vec<ValidationFinding>,
    pub incident_ids: Vec<String>,
    pub review_item_id: Option<String>,

    // Cell re-read
    pub correction_id: Option<String>,

    /// Document status when the run ended.
    pub document_status: Option<DocumentStatus>,
}

impl PipelineContext {
    pub fn new(job: WorkerJob) -> Self {
        Self {
            job,
            skipped: false,
            pages_read: Vec::new(),
            fields_stored: 0,
            cross: None,
            findings: Vec::new(),
            incident_ids: Vec::new(),
            review_item_id: None,
            correction_id: None,
            document_status: None,
        }
    }

    pub fn summary(&self) -> Value {
        let failed: Vec<&str> = self
            .findings
            .iter()
            .filter(|f| f.failed())
            .map(|f| f.rule_id.as_str())
            .collect();

        json!({
            "skipped": self.skipped,
            "pagesRead": self.pages_read,
            "fieldsStored": self.fields_stored,
            "matchStatus": self.cross.as_ref().map(|c| c.match_status),
            "canonicalTableId": self.cross.as_ref().and_then(|c| c.canonical_table_id.clone()),
            "failedRules": failed,
            "incidentIds": self.incident_ids,
            "reviewItemId": self.review_item_id,
            "correctionId": self.correction_id,
            "documentStatus": self.document_status,
        })
    }
}
