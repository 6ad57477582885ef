//! Monitoring agent: rule-driven pollers over documents, incidents, KPIs and
//! SLA deadlines.

pub mod alerts;
mod monitor;
pub mod poller;
pub mod rules;

pub use alerts::{Alert, AlertKind, AlertSink, CollectingSink};
pub use monitor::{Agent, AgentHandle, PollReport};
pub use poller::PollerHandle;
pub use rules::{
    default_rules, AgentRule, AlertLevel, ClusterScope, Comparison, Concern, KpiMetric,
    RuleAction, RuleCondition, RuleMode,
};
