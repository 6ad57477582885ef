use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::macros::str_enum;
use crate::validation::{RuleId, Severity};

str_enum! {
    pub enum IncidentType {
        ArithmeticMismatch => "ARITHMETIC_MISMATCH",
        HeaderCodeMismatch => "HEADER_CODE_MISMATCH",
        OcrLowConfidence => "OCR_LOW_CONFIDENCE",
        E11VsUrna => "E11_VS_URNA",
        ImpossibleValue => "IMPOSSIBLE_VALUE",
        SignatureMissing => "SIGNATURE_MISSING",
        PublicationDelay => "PUBLICATION_DELAY",
        AnomalyCluster => "ANOMALY_CLUSTER",
        KpiDegradation => "KPI_DEGRADATION",
        Other => "OTHER",
    }
}

impl IncidentType {
    /// The incident a failed rule escalates into, if any.
    pub fn from_rule(rule: RuleId) -> Option<Self> {
        match rule {
            RuleId::ArithmeticMismatch => Some(IncidentType::ArithmeticMismatch),
            RuleId::HeaderCodeMismatch => Some(IncidentType::HeaderCodeMismatch),
            RuleId::LowOcrConfidence => Some(IncidentType::OcrLowConfidence),
            RuleId::E11UrnMismatch => Some(IncidentType::E11VsUrna),
            RuleId::ImpossibleValue => Some(IncidentType::ImpossibleValue),
            RuleId::MissingSignatures => Some(IncidentType::SignatureMissing),
            RuleId::ArithmeticIndeterminate | RuleId::CodeUnavailable | RuleId::MarkDetected => {
                None
            }
        }
    }

    /// Fixed description per type. Keeping it constant makes the dedup
    /// signature collapse to (type, table).
    pub fn description(&self) -> &'static str {
        match self {
            IncidentType::ArithmeticMismatch => "Declared total does not match the sum of tallies",
            IncidentType::HeaderCodeMismatch => "Printed table code disagrees with the form header",
            IncidentType::OcrLowConfidence => "Extraction confidence below the acceptance threshold",
            IncidentType::E11VsUrna => "Signed voters (E-11) do not match ballots in the urn",
            IncidentType::ImpossibleValue => "Count exceeds the eligible voters for the table",
            IncidentType::SignatureMissing => "Form lacks the required jury signatures",
            IncidentType::PublicationDelay => "Form has not been processed within the expected window",
            IncidentType::AnomalyCluster => "Cluster of validation failures in one area",
            IncidentType::KpiDegradation => "Processing indicator outside its acceptable range",
            IncidentType::Other => "Other irregularity",
        }
    }
}

str_enum! {
    pub enum IncidentStatus {
        Open => "open",
        Assigned => "assigned",
        Investigating => "investigating",
        Resolved => "resolved",
        FalsePositive => "false_positive",
        Escalated => "escalated",
    }
}

impl IncidentStatus {
    /// Resolved and false-positive incidents never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Resolved | IncidentStatus::FalsePositive)
    }

    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Escalated) => *self != Escalated,
            (Open, Assigned) | (Open, FalsePositive) => true,
            (Assigned, Assigned) | (Assigned, Investigating) | (Assigned, FalsePositive) => true,
            (Investigating, Assigned) | (Investigating, Resolved) | (Investigating, FalsePositive) => {
                true
            }
            (Escalated, Assigned)
            | (Escalated, Investigating)
            | (Escalated, Resolved)
            | (Escalated, FalsePositive) => true,
            _ => false,
        }
    }
}

str_enum! {
    pub enum IncidentSource {
        Validation => "validation",
        Agent => "agent",
        Manual => "manual",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub table_id: String,
    pub description: String,
    pub evidence: Value,
    pub status: IncidentStatus,
    pub source: IncidentSource,
    pub document_id: Option<String>,
    pub assignee: Option<String>,
    pub resolution: Option<String>,
    pub escalated: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Fixed at creation.
    pub sla_deadline: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Minutes until the deadline; negative once breached.
    pub fn remaining_sla_minutes(&self, now: DateTime<Utc>) -> f64 {
        (self.sla_deadline - now).num_milliseconds() as f64 / 60_000.0
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.sla_deadline
    }
}

/// Input to `IncidentStore::create`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub table_id: String,
    pub description: String,
    pub evidence: Value,
    pub source: IncidentSource,
    pub document_id: Option<String>,
}

impl NewIncident {
    /// An incident with the type's standard description.
    pub fn standard(
        incident_type: IncidentType,
        severity: Severity,
        table_id: impl Into<String>,
        evidence: Value,
        source: IncidentSource,
    ) -> Self {
        Self {
            incident_type,
            severity,
            table_id: table_id.into(),
            description: incident_type.description().to_string(),
            evidence,
            source,
            document_id: None,
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub incident_type: Option<IncidentType>,
    pub severity: Option<Severity>,
    pub table_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.per_page)
    }
}

/// A page of incidents plus aggregates over the whole filtered set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentPage {
    pub items: Vec<Incident>,
    pub total: u64,
    pub open: u64,
    /// Open critical incidents.
    pub critical: u64,
    /// Open high-severity incidents.
    pub high: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Result of `IncidentStore::create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub incident: Incident,
    /// False when an open incident with the same signature was returned.
    pub created: bool,
}
