use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::AlertLevel;
use crate::macros::str_enum;

str_enum! {
    pub enum AlertKind {
        SlaWarning => "sla_warning",
        SlaBreach => "sla_breach",
        Anomaly => "anomaly",
        Kpi => "kpi",
        Escalation => "escalation",
        /// An action the rule's mode did not allow the agent to take itself.
        Recommendation => "recommendation",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub level: AlertLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, level: AlertLevel, message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            level,
            rule_id: None,
            incident_id: None,
            table_id: None,
            message: message.into(),
            details: serde_json::Value::Null,
            at,
        }
    }

    pub fn with_rule(mut self, rule_id: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    pub fn with_incident(mut self, incident_id: &str) -> Self {
        self.incident_id = Some(incident_id.to_string());
        self
    }

    pub fn with_table(mut self, table_id: &str) -> Self {
        self.table_id = Some(table_id.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for agent alerts. Delivery to people happens elsewhere.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Keeps every alert in memory; used by tests and the CLI's one-shot mode.
#[derive(Default)]
pub struct CollectingSink {
    alerts: std::sync::Mutex<Vec<Alert>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Alert> {
        match self.alerts.lock() {
            Ok(mut alerts) => std::mem::take(&mut *alerts),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl AlertSink for CollectingSink {
    fn emit(&self, alert: Alert) {
        match self.alerts.lock() {
            Ok(mut alerts) => alerts.push(alert),
            Err(poisoned) => poisoned.into_inner().push(alert),
        }
    }
}
