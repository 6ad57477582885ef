use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::macros::str_enum;

str_enum! {
    pub enum Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

str_enum! {
    pub enum RuleId {
        ArithmeticMismatch => "arithmetic-mismatch",
        ArithmeticIndeterminate => "arithmetic-indeterminate",
        HeaderCodeMismatch => "header-code-mismatch",
        CodeUnavailable => "code-unavailable",
        LowOcrConfidence => "low-ocr-confidence",
        ImpossibleValue => "impossible-value",
        E11UrnMismatch => "e11-urn-mismatch",
        MissingSignatures => "missing-signatures",
        MarkDetected => "mark-detected",
    }
}

impl RuleId {
    pub fn default_severity(&self) -> Severity {
        match self {
            RuleId::ArithmeticMismatch | RuleId::HeaderCodeMismatch => Severity::Critical,
            RuleId::LowOcrConfidence | RuleId::ImpossibleValue | RuleId::E11UrnMismatch => {
                Severity::High
            }
            RuleId::ArithmeticIndeterminate | RuleId::MissingSignatures => Severity::Medium,
            RuleId::CodeUnavailable | RuleId::MarkDetected => Severity::Low,
        }
    }

    /// Finding type reported to operators. Header/code disagreement is a
    /// "source-mismatch" between two independent readings.
    pub fn finding_type(&self) -> &'static str {
        match self {
            RuleId::HeaderCodeMismatch => "source-mismatch",
            other => other.as_str(),
        }
    }
}

/// The outcome of one rule check. Findings are never merged: a field may be
/// referenced by several findings at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationFinding {
    pub id: String,
    pub document_id: String,
    pub table_id: Option<String>,
    pub rule_id: RuleId,
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
    pub field_keys: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationFinding {
    pub fn failed(&self) -> bool {
        !self.passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_rule_defaults() {
        assert_eq!(
            RuleId::ArithmeticMismatch.default_severity(),
            Severity::Critical
        );
        assert_eq!(RuleId::HeaderCodeMismatch.finding_type(), "source-mismatch");
        assert_eq!(RuleId::ImpossibleValue.finding_type(), "impossible-value");
        assert_eq!(
            "e11-urn-mismatch".parse::<RuleId>().unwrap(),
            RuleId::E11UrnMismatch
        );
    }
}
