//! Resolution deadlines by incident type and severity.

use chrono::{DateTime, Duration, Utc};

use super::IncidentType;
use crate::validation::Severity;

/// Base minutes for critical and high incidents.
pub fn base_minutes(incident_type: IncidentType) -> i64 {
    match incident_type {
        IncidentType::ArithmeticMismatch | IncidentType::HeaderCodeMismatch => 10,
        IncidentType::OcrLowConfidence
        | IncidentType::E11VsUrna
        | IncidentType::ImpossibleValue
        | IncidentType::AnomalyCluster => 15,
        IncidentType::SignatureMissing => 20,
        IncidentType::PublicationDelay | IncidentType::KpiDegradation | IncidentType::Other => 30,
    }
}

/// Medium doubles the base, low triples it.
pub fn sla_minutes(incident_type: IncidentType, severity: Severity) -> i64 {
    let base = base_minutes(incident_type);
    match severity {
        Severity::Critical | Severity::High => base,
        Severity::Medium => base * 2,
        Severity::Low => base * 3,
    }
}

pub fn deadline(
    incident_type: IncidentType,
    severity: Severity,
    created_at: DateTime<Utc>,
) -> DateTime<Utc> {
    created_at + Duration::minutes(sla_minutes(incident_type, severity))
}
