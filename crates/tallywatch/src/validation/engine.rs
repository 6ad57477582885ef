//! Rule evaluation over the fields of one document.
//!
//! `ValidationEngine::validate` never fails. Missing inputs make a rule
//! either skip or report an indeterminate finding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::finding::{RuleId, Severity, ValidationFinding};
use crate::crossval::{CrossValidationResult, MatchStatus};
use crate::document::Document;
use crate::extract::{CellState, ExtractedField, FieldRole};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Largest accepted |declared − sum|.
    #[serde(default)]
    pub arithmetic_tolerance: i64,
    #[serde(default = "default_low_confidence")]
    pub low_confidence_threshold: f64,
    /// Below this a low-confidence finding is high severity.
    #[serde(default = "default_critical_confidence")]
    pub critical_confidence_threshold: f64,
    #[serde(default = "default_aggregate_confidence")]
    pub aggregate_confidence_threshold: f64,
    #[serde(default = "default_min_signatures")]
    pub min_signatures: i64,
    #[serde(default)]
    pub disabled_rules: Vec<RuleId>,
    #[serde(default)]
    pub severity_overrides: BTreeMap<RuleId, Severity>,
}

fn default_low_confidence() -> f64 {
    0.85
}

fn default_critical_confidence() -> f64 {
    0.5
}

fn default_aggregate_confidence() -> f64 {
    0.8
}

fn default_min_signatures() -> i64 {
    3
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            arithmetic_tolerance: 0,
            low_confidence_threshold: default_low_confidence(),
            critical_confidence_threshold: default_critical_confidence(),
            aggregate_confidence_threshold: default_aggregate_confidence(),
            min_signatures: default_min_signatures(),
            disabled_rules: Vec::new(),
            severity_overrides: BTreeMap::new(),
        }
    }
}

/// Collects findings for one document, applying disabled rules and
/// severity overrides.
struct Findings<'a> {
    rules: &'a ValidationRules,
    document_id: &'a str,
    table_id: Option<String>,
    now: DateTime<Utc>,
    out: Vec<ValidationFinding>,
}

impl Findings<'_> {
    fn enabled(&self, rule: RuleId) -> bool {
        !self.rules.disabled_rules.contains(&rule)
    }

    fn push(
        &mut self,
        rule: RuleId,
        passed: bool,
        severity: Severity,
        message: String,
        details: serde_json::Value,
        field_keys: Vec<String>,
    ) {
        if !self.enabled(rule) {
            return;
        }
        let severity = if passed {
            severity
        } else {
            self.rules
                .severity_overrides
                .get(&rule)
                .copied()
                .unwrap_or(severity)
        };
        self.out.push(ValidationFinding {
            id: Uuid::new_v4().to_string(),
            document_id: self.document_id.to_string(),
            table_id: self.table_id.clone(),
            rule_id: rule,
            passed,
            severity,
            message,
            details,
            field_keys,
            created_at: self.now,
        });
    }

    fn fail(
        &mut self,
        rule: RuleId,
        severity: Severity,
        message: String,
        details: serde_json::Value,
        field_keys: Vec<String>,
    ) {
        self.push(rule, false, severity, message, details, field_keys);
    }

    fn pass(&mut self, rule: RuleId, message: &str, details: serde_json::Value) {
        self.push(
            rule,
            true,
            rule.default_severity(),
            message.to_string(),
            details,
            Vec::new(),
        );
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    rules: ValidationRules,
}

impl ValidationEngine {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn validate(
        &self,
        document: &Document,
        fields: &[ExtractedField],
        cross: &CrossValidationResult,
        now: DateTime<Utc>,
    ) -> Vec<ValidationFinding> {
        let mut findings = Findings {
            rules: &self.rules,
            document_id: &document.id,
            table_id: cross
                .canonical_table_id
                .clone()
                .or_else(|| cross.header.components.canonical_id()),
            now,
            out: Vec::new(),
        };

        self.check_arithmetic(fields, &mut findings);
        self.check_source(cross, &mut findings);
        self.check_confidence(fields, &mut findings);
        self.check_ceiling(document, fields, &mut findings);
        self.check_e11(fields, &mut findings);
        self.check_signatures(fields, &mut findings);
        self.check_marks(fields, &mut findings);

        findings.out
    }

    fn check_arithmetic(&self, fields: &[ExtractedField], findings: &mut Findings<'_>) {
        let declared = fields
            .iter()
            .find(|f| f.role() == FieldRole::DeclaredTotal);
        let tallies: Vec<&ExtractedField> = fields
            .iter()
            .filter(|f| matches!(f.role(), FieldRole::Tally(_)))
            .collect();

        if declared.is_none() && tallies.is_empty() {
            return;
        }

        let unreadable: Vec<String> = tallies
            .iter()
            .filter(|f| f.state == CellState::Unreadable)
            .map(|f| f.key.clone())
            .collect();
        let declared_value = declared.and_then(|f| f.value);

        let Some(declared_value) = declared_value.filter(|_| unreadable.is_empty()) else {
            let mut keys = unreadable.clone();
            if let Some(d) = declared.filter(|d| d.value.is_none()) {
                keys.push(d.key.clone());
            }
            let reason = if declared.is_none() {
                "declared total missing"
            } else if declared_value.is_none() {
                "declared total unreadable"
            } else {
                "tally unreadable"
            };
            findings.fail(
                RuleId::ArithmeticIndeterminate,
                RuleId::ArithmeticIndeterminate.default_severity(),
                format!("Cannot reconcile totals: {}", reason),
                json!({
                    "reason": reason,
                    "declared": declared_value,
                    "unreadableFields": unreadable,
                }),
                keys,
            );
            return;
        };

        let mut sum = 0i64;
        let mut excluded_marks = Vec::new();
        let mut empty_fields = Vec::new();
        for field in &tallies {
            match field.state {
                CellState::Numeric => sum += field.value.unwrap_or(0),
                CellState::Marked => excluded_marks.push(json!({
                    "key": field.key,
                    "mark": field.mark.as_ref().map(|m| m.symbol.as_str()),
                    "meaning": field.mark.as_ref().map(|m| m.meaning.as_str()),
                })),
                CellState::Empty => empty_fields.push(field.key.clone()),
                CellState::Unreadable => {}
            }
        }

        let delta = declared_value - sum;
        let tolerance = self.rules.arithmetic_tolerance;
        let details = json!({
            "declared": declared_value,
            "sum": sum,
            "delta": delta,
            "tolerance": tolerance,
            "excludedMarks": excluded_marks,
            "emptyFields": empty_fields,
        });

        if delta.abs() > tolerance {
            let mut keys: Vec<String> = tallies.iter().map(|f| f.key.clone()).collect();
            if let Some(d) = declared {
                keys.insert(0, d.key.clone());
            }
            findings.fail(
                RuleId::ArithmeticMismatch,
                RuleId::ArithmeticMismatch.default_severity(),
                format!(
                    "Declared total {} differs from sum of tallies {} by {}",
                    declared_value, sum, delta
                ),
                details,
                keys,
            );
        } else {
            findings.pass(
                RuleId::ArithmeticMismatch,
                "Declared total matches sum of tallies",
                details,
            );
        }
    }

    fn check_source(&self, cross: &CrossValidationResult, findings: &mut Findings<'_>) {
        match cross.match_status {
            MatchStatus::Exact | MatchStatus::Partial => findings.pass(
                RuleId::HeaderCodeMismatch,
                "Table code agrees with header",
                json!({
                    "matchStatus": cross.match_status,
                    "canonicalTableId": cross.canonical_table_id,
                }),
            ),
            MatchStatus::Mismatch => {
                let keys = cross
                    .discrepancies
                    .iter()
                    .map(|d| format!("header.{}", d.component))
                    .collect();
                findings.fail(
                    RuleId::HeaderCodeMismatch,
                    RuleId::HeaderCodeMismatch.default_severity(),
                    "Table code disagrees with header".to_string(),
                    json!({
                        "findingType": RuleId::HeaderCodeMismatch.finding_type(),
                        "discrepancies": cross.discrepancies,
                        "code": cross.decoded.components.canonical_id(),
                        "header": cross.header.components.canonical_id(),
                    }),
                    keys,
                );
            }
            MatchStatus::Unavailable => findings.fail(
                RuleId::CodeUnavailable,
                RuleId::CodeUnavailable.default_severity(),
                "Table code missing or undecodable".to_string(),
                json!({
                    "parseStatus": cross.decoded.parse_status,
                    "raw": cross.decoded.raw,
                    "confidence": cross.confidence,
                }),
                Vec::new(),
            ),
        }
    }

    fn confidence_severity(&self, confidence: f64) -> Severity {
        if confidence < self.rules.critical_confidence_threshold {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    fn check_confidence(&self, fields: &[ExtractedField], findings: &mut Findings<'_>) {
        // Marked cells carry zero confidence by construction; they are
        // reported by the mark rule instead.
        let rated: Vec<&ExtractedField> = fields
            .iter()
            .filter(|f| f.state != CellState::Marked)
            .collect();
        if rated.is_empty() {
            return;
        }

        let threshold = self.rules.low_confidence_threshold;
        let mut failures = 0;
        for field in &rated {
            if field.confidence < threshold {
                failures += 1;
                findings.fail(
                    RuleId::LowOcrConfidence,
                    self.confidence_severity(field.confidence),
                    format!(
                        "Field {} read with confidence {:.2}",
                        field.key, field.confidence
                    ),
                    json!({
                        "scope": "field",
                        "confidence": field.confidence,
                        "threshold": threshold,
                    }),
                    vec![field.key.clone()],
                );
            }
        }

        let mean = rated.iter().map(|f| f.confidence).sum::<f64>() / rated.len() as f64;
        let aggregate_threshold = self.rules.aggregate_confidence_threshold;
        if mean < aggregate_threshold {
            failures += 1;
            findings.fail(
                RuleId::LowOcrConfidence,
                self.confidence_severity(mean),
                format!("Mean field confidence {:.2} below threshold", mean),
                json!({
                    "scope": "document",
                    "meanConfidence": mean,
                    "threshold": aggregate_threshold,
                    "fieldCount": rated.len(),
                }),
                Vec::new(),
            );
        }

        if failures == 0 {
            findings.pass(
                RuleId::LowOcrConfidence,
                "All fields read with sufficient confidence",
                json!({ "meanConfidence": mean, "fieldCount": rated.len() }),
            );
        }
    }

    fn check_ceiling(
        &self,
        document: &Document,
        fields: &[ExtractedField],
        findings: &mut Findings<'_>,
    ) {
        let ceiling = fields
            .iter()
            .find(|f| f.role() == FieldRole::EligibleVoters)
            .and_then(|f| f.value)
            .or(document.eligible_voters);
        let Some(ceiling) = ceiling else {
            return;
        };

        let mut exceeded = 0;
        for field in fields.iter().filter(|f| f.role().is_count()) {
            if let Some(value) = field.value.filter(|v| *v > ceiling) {
                exceeded += 1;
                findings.fail(
                    RuleId::ImpossibleValue,
                    RuleId::ImpossibleValue.default_severity(),
                    format!(
                        "Field {} value {} exceeds eligible voters {}",
                        field.key, value, ceiling
                    ),
                    json!({ "value": value, "ceiling": ceiling }),
                    vec![field.key.clone()],
                );
            }
        }

        if exceeded == 0 {
            findings.pass(
                RuleId::ImpossibleValue,
                "All counts within eligible voters",
                json!({ "ceiling": ceiling }),
            );
        }
    }

    fn check_e11(&self, fields: &[ExtractedField], findings: &mut Findings<'_>) {
        let find = |role: FieldRole| fields.iter().find(|f| f.role() == role);
        let (Some(e11), Some(urn)) = (find(FieldRole::SignedVoters), find(FieldRole::DeclaredTotal))
        else {
            return;
        };
        let (Some(signed), Some(in_urn)) = (e11.value, urn.value) else {
            return;
        };

        let details = json!({ "e11": signed, "urn": in_urn, "delta": in_urn - signed });
        if signed != in_urn {
            findings.fail(
                RuleId::E11UrnMismatch,
                RuleId::E11UrnMismatch.default_severity(),
                format!(
                    "Voters signed in ({}) differ from votes in urn ({})",
                    signed, in_urn
                ),
                details,
                vec![e11.key.clone(), urn.key.clone()],
            );
        } else {
            findings.pass(
                RuleId::E11UrnMismatch,
                "Voters signed in match votes in urn",
                details,
            );
        }
    }

    fn check_signatures(&self, fields: &[ExtractedField], findings: &mut Findings<'_>) {
        let Some(field) = fields.iter().find(|f| f.role() == FieldRole::Signatures) else {
            return;
        };
        let minimum = self.rules.min_signatures;

        match field.value {
            Some(count) if count >= minimum => findings.pass(
                RuleId::MissingSignatures,
                "Required signatures present",
                json!({ "count": count, "minimum": minimum }),
            ),
            count => findings.fail(
                RuleId::MissingSignatures,
                RuleId::MissingSignatures.default_severity(),
                match count {
                    Some(n) => format!("{} of {} required signatures", n, minimum),
                    None => "Signature count unreadable".to_string(),
                },
                json!({ "count": count, "minimum": minimum }),
                vec![field.key.clone()],
            ),
        }
    }

    fn check_marks(&self, fields: &[ExtractedField], findings: &mut Findings<'_>) {
        for field in fields {
            let Some(mark) = &field.mark else {
                continue;
            };
            findings.fail(
                RuleId::MarkDetected,
                RuleId::MarkDetected.default_severity(),
                format!("Field {} carries mark {} ({})", field.key, mark.symbol, mark.meaning),
                json!({
                    "mark": mark.symbol,
                    "meaning": mark.meaning,
                    "rawText": field.raw_text,
                }),
                vec![field.key.clone()],
            );
        }
    }
}
