use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::Alternative;
use crate::macros::str_enum;
use crate::validation::{RuleId, Severity};

str_enum! {
    /// Review tiers, most urgent first.
    pub enum ReviewPriority {
        Urgent => "urgent",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
}

impl ReviewPriority {
    /// Sort key: lower ranks are served first.
    pub fn rank(&self) -> i64 {
        match self {
            ReviewPriority::Urgent => 0,
            ReviewPriority::High => 1,
            ReviewPriority::Normal => 2,
            ReviewPriority::Low => 3,
        }
    }

    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => ReviewPriority::Urgent,
            Severity::High => ReviewPriority::High,
            Severity::Medium => ReviewPriority::Normal,
            Severity::Low => ReviewPriority::Low,
        }
    }
}

str_enum! {
    pub enum ReviewReason {
        ArithmeticMismatch => "arithmetic_mismatch",
        SourceMismatch => "source_mismatch",
        LowConfidence => "low_confidence",
        ImpossibleValue => "impossible_value",
        MarkDetected => "mark_detected",
        Unreadable => "unreadable",
        Other => "other",
    }
}

impl ReviewReason {
    pub fn from_rule(rule: RuleId) -> Self {
        match rule {
            RuleId::ArithmeticMismatch | RuleId::E11UrnMismatch => ReviewReason::ArithmeticMismatch,
            RuleId::HeaderCodeMismatch | RuleId::CodeUnavailable => ReviewReason::SourceMismatch,
            RuleId::LowOcrConfidence => ReviewReason::LowConfidence,
            RuleId::ImpossibleValue => ReviewReason::ImpossibleValue,
            RuleId::MarkDetected => ReviewReason::MarkDetected,
            RuleId::ArithmeticIndeterminate => ReviewReason::Unreadable,
            RuleId::MissingSignatures => ReviewReason::Other,
        }
    }
}

str_enum! {
    pub enum ReviewStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Rejected => "rejected",
    }
}

impl ReviewStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReviewStatus::Completed | ReviewStatus::Rejected)
    }
}

/// One field a reviewer is asked to check, with what the system read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub field_id: String,
    pub field_key: String,
    pub page: u32,
    pub raw_text: String,
    pub value: Option<i64>,
    pub mark: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
    /// Failed rules that reference this field.
    #[serde(default)]
    pub rules: Vec<RuleId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: String,
    /// Insertion sequence; breaks ties within a priority tier.
    pub seq: i64,
    pub document_id: String,
    pub priority: ReviewPriority,
    pub reason: ReviewReason,
    pub status: ReviewStatus,
    pub assignee: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sub_items: Vec<SubItem>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReviewItem {
    pub document_id: String,
    pub priority: ReviewPriority,
    pub reason: ReviewReason,
    pub sub_items: Vec<SubItem>,
}

/// A reviewer's value for one field. Either a number or a mark; both
/// absent records the cell as confirmed empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    pub field_id: String,
    pub value: Option<i64>,
    #[serde(default)]
    pub mark: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub pending_by_priority: BTreeMap<ReviewPriority, u64>,
    pub pending_by_reason: BTreeMap<ReviewReason, u64>,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub rejected: u64,
}
