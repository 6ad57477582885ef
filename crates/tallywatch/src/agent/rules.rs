//! Declarative agent rules.
//!
//! A rule pairs a condition evaluated by one poller with an action and an
//! execution mode. Rules are loaded from configuration; the defaults below
//! apply when the config names none.

use serde::{Deserialize, Serialize};

use crate::document::DocumentStatus;
use crate::incident::IncidentType;
use crate::macros::str_enum;
use crate::validation::{RuleId, Severity};

str_enum! {
    /// Which poller evaluates a rule.
    pub enum Concern {
        Documents => "documents",
        Incidents => "incidents",
        Kpis => "kpis",
        Deadlines => "deadlines",
    }
}

str_enum! {
    pub enum RuleMode {
        /// Every action is executed.
        Automatic => "automatic",
        /// Incidents and alerts are executed; escalation is only recommended.
        SemiAutomatic => "semi_automatic",
        /// Nothing is mutated; the action is reported as a recommendation.
        RecommendationOnly => "recommendation_only",
    }
}

impl Default for RuleMode {
    fn default() -> Self {
        RuleMode::Automatic
    }
}

str_enum! {
    /// Grouping for finding clusters, derived from the canonical table id.
    pub enum ClusterScope {
        Table => "table",
        Municipality => "municipality",
        Department => "department",
    }
}

str_enum! {
    pub enum KpiMetric {
        /// Failed jobs over finished jobs in the window.
        JobFailureRate => "job_failure_rate",
        AvgJobDurationMs => "avg_job_duration_ms",
        /// Pending plus in-progress review items.
        ReviewBacklog => "review_backlog",
        OpenCriticalIncidents => "open_critical_incidents",
        /// 1 while the provider breaker is open, else 0.
        BreakerOpen => "breaker_open",
    }
}

str_enum! {
    pub enum Comparison {
        Above => "above",
        Below => "below",
    }
}

impl Comparison {
    pub fn holds(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => observed > threshold,
            Comparison::Below => observed < threshold,
        }
    }
}

str_enum! {
    pub enum AlertLevel {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCondition {
    /// At least `min_count` failures of `rule_id` within the window, grouped
    /// by `scope`.
    FindingCluster {
        rule_id: RuleId,
        min_count: u32,
        window_minutes: i64,
        #[serde(default = "default_scope")]
        scope: ClusterScope,
    },
    /// Documents stuck in one of `statuses` for longer than the threshold.
    StaleDocuments {
        older_than_minutes: i64,
        #[serde(default = "default_stale_statuses")]
        statuses: Vec<DocumentStatus>,
    },
    /// Open critical incidents older than the threshold, not yet escalated.
    OverdueCritical { older_than_minutes: i64 },
    KpiThreshold {
        metric: KpiMetric,
        comparison: Comparison,
        value: f64,
        #[serde(default = "default_kpi_window")]
        window_minutes: i64,
    },
}

fn default_scope() -> ClusterScope {
    ClusterScope::Municipality
}

fn default_stale_statuses() -> Vec<DocumentStatus> {
    vec![
        DocumentStatus::Queued,
        DocumentStatus::Processing,
        DocumentStatus::Extracted,
        DocumentStatus::Validated,
    ]
}

fn default_kpi_window() -> i64 {
    60
}

impl RuleCondition {
    /// The poller that owns this kind of condition.
    pub fn concern(&self) -> Concern {
        match self {
            RuleCondition::FindingCluster { .. } | RuleCondition::StaleDocuments { .. } => {
                Concern::Documents
            }
            RuleCondition::OverdueCritical { .. } => Concern::Incidents,
            RuleCondition::KpiThreshold { .. } => Concern::Kpis,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RuleCondition::FindingCluster { .. } => "finding_cluster",
            RuleCondition::StaleDocuments { .. } => "stale_documents",
            RuleCondition::OverdueCritical { .. } => "overdue_critical",
            RuleCondition::KpiThreshold { .. } => "kpi_threshold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    CreateIncident {
        incident_type: IncidentType,
        severity: Severity,
    },
    Alert {
        #[serde(default = "default_alert_level")]
        level: AlertLevel,
    },
    /// Only meaningful for incident conditions.
    Escalate,
}

fn default_alert_level() -> AlertLevel {
    AlertLevel::Warning
}

impl RuleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleAction::CreateIncident { .. } => "create_incident",
            RuleAction::Alert { .. } => "alert",
            RuleAction::Escalate => "escalate",
        }
    }

    /// Whether `mode` allows this action to change state or notify.
    pub fn executes_under(&self, mode: RuleMode) -> bool {
        match mode {
            RuleMode::Automatic => true,
            RuleMode::SemiAutomatic => !matches!(self, RuleAction::Escalate),
            RuleMode::RecommendationOnly => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRule {
    pub id: String,
    pub concern: Concern,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub mode: RuleMode,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl AgentRule {
    /// Structural checks beyond what the JSON schema expresses.
    pub fn check(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule id is empty".to_string());
        }
        if self.condition.concern() != self.concern {
            return Err(format!(
                "condition {} belongs to the {} poller, not {}",
                self.condition.kind(),
                self.condition.concern(),
                self.concern
            ));
        }
        if matches!(self.action, RuleAction::Escalate)
            && !matches!(self.condition, RuleCondition::OverdueCritical { .. })
        {
            return Err("escalate only applies to overdue_critical".to_string());
        }
        let window = match &self.condition {
            RuleCondition::FindingCluster {
                window_minutes,
                min_count,
                ..
            } => {
                if *min_count == 0 {
                    return Err("min_count must be at least 1".to_string());
                }
                *window_minutes
            }
            RuleCondition::StaleDocuments {
                older_than_minutes, ..
            }
            | RuleCondition::OverdueCritical { older_than_minutes } => *older_than_minutes,
            RuleCondition::KpiThreshold { window_minutes, .. } => *window_minutes,
        };
        if window <= 0 {
            return Err("time window must be positive".to_string());
        }
        Ok(())
    }
}

/// Rules used when the configuration does not list any.
pub fn default_rules() -> Vec<AgentRule> {
    vec![
        AgentRule {
            id: "arithmetic-cluster".to_string(),
            concern: Concern::Documents,
            condition: RuleCondition::FindingCluster {
                rule_id: RuleId::ArithmeticMismatch,
                min_count: 3,
                window_minutes: 60,
                scope: ClusterScope::Municipality,
            },
            action: RuleAction::CreateIncident {
                incident_type: IncidentType::AnomalyCluster,
                severity: Severity::High,
            },
            mode: RuleMode::Automatic,
            enabled: true,
        },
        AgentRule {
            id: "stale-documents".to_string(),
            concern: Concern::Documents,
            condition: RuleCondition::StaleDocuments {
                older_than_minutes: 30,
                statuses: default_stale_statuses(),
            },
            action: RuleAction::CreateIncident {
                incident_type: IncidentType::PublicationDelay,
                severity: Severity::High,
            },
            mode: RuleMode::SemiAutomatic,
            enabled: true,
        },
        AgentRule {
            id: "overdue-critical".to_string(),
            concern: Concern::Incidents,
            condition: RuleCondition::OverdueCritical {
                older_than_minutes: 30,
            },
            action: RuleAction::Escalate,
            mode: RuleMode::Automatic,
            enabled: true,
        },
        AgentRule {
            id: "job-failure-rate".to_string(),
            concern: Concern::Kpis,
            condition: RuleCondition::KpiThreshold {
                metric: KpiMetric::JobFailureRate,
                comparison: Comparison::Above,
                value: 0.2,
                window_minutes: 60,
            },
            action: RuleAction::Alert {
                level: AlertLevel::Warning,
            },
            mode: RuleMode::Automatic,
            enabled: true,
        },
    ]
}
