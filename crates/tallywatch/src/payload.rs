//! Versioned extraction payloads.
//!
//! Version 1 is the flat shape older consumers exchange: a table code, a
//! party to votes map, the declared total and a rule to pass/fail map.
//! Version 2 carries the decoded header, ordered tallies with their marks and
//! confidence, and one outcome per finding. Conversions are explicit in both
//! directions; `upgrade` followed by `project_v1` returns the original.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crossval::{decode, CrossValidationResult, TableComponents};
use crate::extract::{ExtractedField, FieldRole};
use crate::validation::{RuleId, Severity, ValidationFinding};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum ExtractionPayload {
    #[serde(rename = "1")]
    V1(PayloadV1),
    #[serde(rename = "2")]
    V2(PayloadV2),
}

impl ExtractionPayload {
    pub fn version(&self) -> u8 {
        match self {
            ExtractionPayload::V1(_) => 1,
            ExtractionPayload::V2(_) => 2,
        }
    }

    /// The payload in the current shape.
    pub fn into_current(self) -> PayloadV2 {
        match self {
            ExtractionPayload::V1(v1) => upgrade(v1),
            ExtractionPayload::V2(v2) => v2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadV1 {
    pub table_code: String,
    pub votes: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_total: Option<i64>,
    pub validations: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableHeader {
    /// Table identifier exactly as exchanged.
    pub id: String,
    pub components: TableComponents,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TallyEntry {
    pub name: String,
    pub value: Option<i64>,
    /// Mark symbol written instead of digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Kept as text so rules unknown to this build survive a round trip.
    pub rule: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadV2 {
    pub header: TableHeader,
    pub tallies: Vec<TallyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_total: Option<i64>,
    pub outcomes: Vec<ValidationOutcome>,
}

impl PayloadV2 {
    /// The payload for one processed document.
    pub fn from_document(
        document_id: &str,
        fields: &[ExtractedField],
        cross: Option<&CrossValidationResult>,
        findings: &[ValidationFinding],
    ) -> Self {
        let header = match cross {
            Some(cross) => {
                let id = cross.table_ref(document_id);
                let components = if cross.header.components.canonical_id().as_deref() == Some(id.as_str()) {
                    cross.header.components.clone()
                } else {
                    cross.decoded.components.clone()
                };
                TableHeader { id, components }
            }
            None => TableHeader {
                id: format!("unidentified:{}", document_id),
                components: TableComponents::default(),
            },
        };

        let mut tallies = Vec::new();
        let mut declared_total = None;
        for field in fields {
            match field.role() {
                FieldRole::Tally(name) => tallies.push(TallyEntry {
                    name,
                    value: field.value,
                    mark: field.mark.as_ref().map(|m| m.symbol.clone()),
                    confidence: field.confidence,
                }),
                FieldRole::DeclaredTotal => declared_total = declared_total.or(field.value),
                _ => {}
            }
        }

        let outcomes = findings
            .iter()
            .map(|f| ValidationOutcome {
                rule: f.rule_id.to_string(),
                passed: f.passed,
                severity: Some(f.severity),
            })
            .collect();

        Self {
            header,
            tallies,
            declared_total,
            outcomes,
        }
    }
}

/// Legacy shape into the current one. Components are decoded from the code;
/// the code itself is kept verbatim.
pub fn upgrade(v1: PayloadV1) -> PayloadV2 {
    let components = decode(Some(&v1.table_code)).components;
    let tallies = v1
        .votes
        .into_iter()
        .map(|(name, votes)| TallyEntry {
            name,
            value: Some(votes),
            mark: None,
            confidence: 1.0,
        })
        .collect();
    let outcomes = v1
        .validations
        .into_iter()
        .map(|(rule, passed)| {
            let severity = rule.parse::<RuleId>().ok().map(|r| r.default_severity());
            ValidationOutcome {
                rule,
                passed,
                severity,
            }
        })
        .collect();

    PayloadV2 {
        header: TableHeader {
            id: v1.table_code,
            components,
        },
        tallies,
        declared_total: v1.declared_total,
        outcomes,
    }
}

/// Current shape into the legacy one. Tallies without a numeric value have
/// no legacy form and are left out; a rule with several outcomes passes only
/// when all of them passed.
pub fn project_v1(v2: &PayloadV2) -> PayloadV1 {
    let votes = v2
        .tallies
        .iter()
        .filter_map(|t| t.value.map(|v| (t.name.clone(), v)))
        .collect();

    let mut validations: BTreeMap<String, bool> = BTreeMap::new();
    for outcome in &v2.outcomes {
        validations
            .entry(outcome.rule.clone())
            .and_modify(|passed| *passed &= outcome.passed)
            .or_insert(outcome.passed);
    }

    PayloadV1 {
        table_code: v2.header.id.clone(),
        votes,
        declared_total: v2.declared_total,
        validations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crossval::{cross_validate, OcrHeader};
    use crate::document::{Classification, Document, DocumentFormat, DocumentStatus};
    use crate::extract::FieldExtractor;
    use crate::provider::FixtureProvider;
    use serde_json::json;

    fn legacy() -> PayloadV1 {
        PayloadV1 {
            table_code: "05-001-01-02-003".into(),
            votes: BTreeMap::from([
                ("blank".to_string(), 4),
                ("party_a".to_string(), 210),
                ("party_b".to_string(), 188),
            ]),
            declared_total: Some(402),
            validations: BTreeMap::from([
                ("arithmetic-mismatch".to_string(), true),
                ("impossible-value".to_string(), true),
                ("legacy-signature-check".to_string(), false),
            ]),
        }
    }

    #[test]
    fn test_upgrade_then_project_preserves_everything() {
        let original = legacy();
        let current = upgrade(original.clone());
        assert_eq!(current.header.id, "05-001-01-02-003");
        assert_eq!(current.header.components.table.as_deref(), Some("003"));
        assert_eq!(current.tallies.len(), 3);
        assert_eq!(project_v1(&current), original);
    }

    #[test]
    fn test_unknown_rules_survive_without_severity() {
        let current = upgrade(legacy());
        let legacy_rule = current
            .outcomes
            .iter()
            .find(|o| o.rule == "legacy-signature-check")
            .unwrap();
        assert!(!legacy_rule.passed);
        assert_eq!(legacy_rule.severity, None);

        let arithmetic = current
            .outcomes
            .iter()
            .find(|o| o.rule == "arithmetic-mismatch")
            .unwrap();
        assert_eq!(arithmetic.severity, Some(Severity::Critical));
    }

    #[test]
    fn test_undecodable_code_is_kept_verbatim() {
        let mut original = legacy();
        original.table_code = "mesa ilegible".into();
        let current = upgrade(original.clone());
        assert_eq!(current.header.components, TableComponents::default());
        assert_eq!(project_v1(&current).table_code, "mesa ilegible");
    }

    #[test]
    fn test_projection_drops_marks_and_ands_outcomes() {
        let current = PayloadV2 {
            header: TableHeader {
                id: "01-001-01-02-003".into(),
                components: TableComponents::default(),
            },
            tallies: vec![
                TallyEntry {
                    name: "party_a".into(),
                    value: Some(12),
                    mark: None,
                    confidence: 0.98,
                },
                TallyEntry {
                    name: "party_b".into(),
                    value: None,
                    mark: Some("***".into()),
                    confidence: 0.9,
                },
            ],
            declared_total: None,
            outcomes: vec![
                ValidationOutcome {
                    rule: "low-ocr-confidence".into(),
                    passed: true,
                    severity: None,
                },
                ValidationOutcome {
                    rule: "low-ocr-confidence".into(),
                    passed: false,
                    severity: None,
                },
            ],
        };
        let projected = project_v1(&current);
        assert_eq!(projected.votes, BTreeMap::from([("party_a".to_string(), 12)]));
        assert!(!projected.validations["low-ocr-confidence"]);
    }

    #[test]
    fn test_tagged_serialisation() {
        let payload = ExtractionPayload::V1(legacy());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["version"], "1");
        assert_eq!(value["tableCode"], "05-001-01-02-003");

        let parsed: ExtractionPayload = serde_json::from_value(json!({
            "version": "2",
            "header": {"id": "x", "components": {}},
            "tallies": [],
            "outcomes": []
        }))
        .unwrap();
        assert_eq!(parsed.version(), 2);
        assert_eq!(parsed.into_current().header.id, "x");
    }

    #[test]
    fn test_from_document_collects_tallies_and_total() {
        let now = chrono::Utc::now();
        let doc = Document {
            id: "d1".into(),
            source_ref: "mesa-003.png".into(),
            content_hash: "h".into(),
            page_count: 1,
            classification: Classification::TallySheet,
            format: DocumentFormat::Png,
            mime_type: None,
            eligible_voters: None,
            status: DocumentStatus::Extracted,
            status_reason: None,
            submitted_at: now,
            updated_at: now,
        };
        let output = FixtureProvider::output(
            &[
                ("header.department", "05", 0.99),
                ("header.municipality", "001", 0.99),
                ("header.zone", "01", 0.99),
                ("header.station", "02", 0.99),
                ("header.table", "003", 0.99),
                ("tally.party_a", "210", 0.97),
                ("tally.party_b", "***", 0.95),
                ("total.urn", "210", 0.99),
            ],
            Some("05-001-01-02-003"),
        );
        let fields = FieldExtractor::default().extract_fields(&doc, &output, now);
        let cross = cross_validate(
            decode(Some("05-001-01-02-003")),
            OcrHeader::from_fields(&fields),
        );

        let payload = PayloadV2::from_document("d1", &fields, Some(&cross), &[]);
        assert_eq!(payload.header.id, "05-001-01-02-003");
        assert_eq!(payload.declared_total, Some(210));
        assert_eq!(payload.tallies.len(), 2);
        let marked = payload.tallies.iter().find(|t| t.name == "party_b").unwrap();
        assert_eq!(marked.value, None);
        assert_eq!(marked.mark.as_deref(), Some("***"));
    }
}
