//! Deciding what a validated document turns into.
//!
//! Pure: the runner persists whatever plan comes out of here.

use std::collections::{BTreeMap, HashMap};

use serde_json::json;

use crate::crossval::CrossValidationResult;
use crate::document::Document;
use crate::extract::{CellState, ExtractedField};
use crate::incident::{IncidentSource, IncidentType, NewIncident};
use crate::review::{NewReviewItem, ReviewPriority, ReviewReason, SubItem};
use crate::validation::{RuleId, Severity, ValidationFinding};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TriagePlan {
    pub incidents: Vec<NewIncident>,
    pub review: Option<NewReviewItem>,
}

/// Failed findings at or above `min_severity` whose rule maps to an incident
/// type become incidents, one per type carrying the worst severity seen.
/// Any failed finding, and any field flagged for review, puts the document
/// in front of a reviewer.
pub fn plan(
    document: &Document,
    fields: &[ExtractedField],
    findings: &[ValidationFinding],
    cross: &CrossValidationResult,
    min_severity: Severity,
) -> TriagePlan {
    let failed: Vec<&ValidationFinding> = findings.iter().filter(|f| f.failed()).collect();
    let table_id = cross.table_ref(&document.id);

    TriagePlan {
        incidents: plan_incidents(document, &failed, cross, &table_id, min_severity),
        review: plan_review(document, fields, &failed),
    }
}

fn plan_incidents(
    document: &Document,
    failed: &[&ValidationFinding],
    cross: &CrossValidationResult,
    table_id: &str,
    min_severity: Severity,
) -> Vec<NewIncident> {
    let mut by_type: BTreeMap<IncidentType, Vec<&ValidationFinding>> = BTreeMap::new();
    for finding in failed {
        if finding.severity < min_severity {
            continue;
        }
        if let Some(incident_type) = IncidentType::from_rule(finding.rule_id) {
            by_type.entry(incident_type).or_default().push(finding);
        }
    }

    by_type
        .into_iter()
        .filter_map(|(incident_type, group)| {
            let severity = group.iter().map(|f| f.severity).max()?;
            let evidence = json!({
                "documentId": document.id,
                "sourceRef": document.source_ref,
                "matchStatus": cross.match_status,
                "findings": group
                    .iter()
                    .map(|f| json!({
                        "findingId": f.id,
                        "rule": f.rule_id,
                        "message": f.message,
                        "fields": f.field_keys,
                        "details": f.details,
                    }))
                    .collect::<Vec<_>>(),
            });
            Some(
                NewIncident::standard(
                    incident_type,
                    severity,
                    table_id,
                    evidence,
                    IncidentSource::Validation,
                )
                .with_document(&document.id),
            )
        })
        .collect()
}

fn plan_review(
    document: &Document,
    fields: &[ExtractedField],
    failed: &[&ValidationFinding],
) -> Option<NewReviewItem> {
    let mut rules_by_key: HashMap<&str, Vec<RuleId>> = HashMap::new();
    for finding in failed {
        for key in &finding.field_keys {
            rules_by_key.entry(key.as_str()).or_default().push(finding.rule_id);
        }
    }

    let sub_items: Vec<SubItem> = fields
        .iter()
        .filter(|f| f.needs_review || rules_by_key.contains_key(f.key.as_str()))
        .map(|f| SubItem {
            field_id: f.id.clone(),
            field_key: f.key.clone(),
            page: f.page,
            raw_text: f.raw_text.clone(),
            value: f.value,
            mark: f.mark.as_ref().map(|m| m.symbol.clone()),
            confidence: f.confidence,
            alternatives: f.alternatives.clone(),
            rules: rules_by_key.get(f.key.as_str()).cloned().unwrap_or_default(),
        })
        .collect();

    if failed.is_empty() && sub_items.is_empty() {
        return None;
    }

    // The worst failure decides tier and reason; ties go to the earlier rule.
    let worst = failed.iter().copied().max_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.rule_id.cmp(&a.rule_id))
    });
    let (priority, reason) = match worst {
        Some(finding) => (
            ReviewPriority::from_severity(finding.severity),
            ReviewReason::from_rule(finding.rule_id),
        ),
        None if fields.iter().any(|f| f.state == CellState::Unreadable) => {
            (ReviewPriority::Normal, ReviewReason::Unreadable)
        }
        None => (ReviewPriority::Normal, ReviewReason::LowConfidence),
    };

    Some(NewReviewItem {
        document_id: document.id.clone(),
        priority,
        reason,
        sub_items,
    })
}
