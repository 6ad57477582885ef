//! The monitoring agent.
//!
//! Four independent polls read the database, evaluate the configured rules
//! and act on them according to each rule's mode. Actions a mode does not
//! allow are reported as recommendation alerts instead.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use super::alerts::{Alert, AlertKind, AlertSink};
use super::poller::{self, PollerHandle};
use super::rules::{AgentRule, AlertLevel, ClusterScope, Concern, KpiMetric, RuleAction, RuleCondition};
use crate::context::AppContext;
use crate::db::{document_repo, field_repo, finding_repo, incident_repo, job_repo};
use crate::error::{IncidentError, Result};
use crate::incident::{IncidentFilter, IncidentSource, NewIncident, PageRequest};
use crate::provider::BreakerState;
use crate::validation::{Severity, ValidationFinding};

const ACTOR: &str = "agent";

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollReport {
    pub concern: Concern,
    pub rules_evaluated: usize,
    pub incidents_created: Vec<String>,
    pub escalated: Vec<String>,
    pub alerts: usize,
    pub recommendations: usize,
}

impl PollReport {
    fn new(concern: Concern) -> Self {
        Self {
            concern,
            rules_evaluated: 0,
            incidents_created: Vec::new(),
            escalated: Vec::new(),
            alerts: 0,
            recommendations: 0,
        }
    }
}

/// Something a rule condition matched.
struct Subject {
    /// Cooldown key, unique per rule.
    key: String,
    table_id: String,
    document_id: Option<String>,
    incident_id: Option<String>,
    message: String,
    details: Value,
}

pub struct Agent {
    ctx: AppContext,
    rules: Vec<AgentRule>,
    sink: Arc<dyn AlertSink>,
    /// Last emission per cooldown key.
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Agent {
    /// An agent running the rules from the context's configuration.
    pub fn new(ctx: AppContext, sink: Arc<dyn AlertSink>) -> Self {
        let rules = ctx.config.agent.rules.clone();
        Self {
            ctx,
            rules,
            sink,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_rules(mut self, rules: Vec<AgentRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &[AgentRule] {
        &self.rules
    }

    pub fn poll(&self, concern: Concern) -> Result<PollReport> {
        match concern {
            Concern::Documents => self.poll_documents(),
            Concern::Incidents => self.poll_incidents(),
            Concern::Kpis => self.poll_kpis(),
            Concern::Deadlines => self.poll_deadlines(),
        }
    }

    /// Runs every poll once, in a fixed order.
    pub fn run_once(&self) -> Result<Vec<PollReport>> {
        Concern::ALL.iter().map(|c| self.poll(*c)).collect()
    }

    /// Starts one poller thread per concern. Poll errors are logged and the
    /// poller keeps running.
    pub fn start(self: Arc<Self>) -> std::io::Result<AgentHandle> {
        let intervals = &self.ctx.config.agent.intervals;
        let jitter = StdDuration::from_millis(self.ctx.config.agent.jitter_ms);
        let schedule = [
            (Concern::Documents, intervals.documents_secs),
            (Concern::Incidents, intervals.incidents_secs),
            (Concern::Kpis, intervals.kpis_secs),
            (Concern::Deadlines, intervals.deadlines_secs),
        ];

        let mut pollers = Vec::with_capacity(schedule.len());
        for (concern, secs) in schedule {
            let agent = Arc::clone(&self);
            let handle = poller::spawn(concern, StdDuration::from_secs(secs), jitter, move || {
                match agent.poll(concern) {
                    Ok(report) => log::debug!(
                        "{} poll: {} rule(s), {} incident(s), {} alert(s), {} recommendation(s)",
                        concern,
                        report.rules_evaluated,
                        report.incidents_created.len(),
                        report.alerts,
                        report.recommendations
                    ),
                    Err(e) => log::error!("{} poll failed: {} [{}]", concern, e, e.code()),
                }
            })?;
            pollers.push(handle);
        }
        log::info!("Monitoring agent started with {} rule(s)", self.rules.len());
        Ok(AgentHandle { pollers })
    }

    /// Finding clusters and stale documents.
    pub fn poll_documents(&self) -> Result<PollReport> {
        let now = self.ctx.clock.now();
        let mut report = PollReport::new(Concern::Documents);

        for rule in self.rules_for(Concern::Documents) {
            report.rules_evaluated += 1;
            match &rule.condition {
                RuleCondition::FindingCluster {
                    rule_id,
                    min_count,
                    window_minutes,
                    scope,
                } => {
                    let since = now - Duration::minutes(*window_minutes);
                    let failures = self
                        .ctx
                        .db
                        .with_conn(|conn| finding_repo::failures_since(conn, *rule_id, since))?;
                    for (key, group) in cluster(&failures, *scope) {
                        if group.len() < *min_count as usize {
                            continue;
                        }
                        let tables: BTreeSet<&str> =
                            group.iter().filter_map(|f| f.table_id.as_deref()).collect();
                        let documents: BTreeSet<&str> =
                            group.iter().map(|f| f.document_id.as_str()).collect();
                        let subject = Subject {
                            key: key.clone(),
                            table_id: key.clone(),
                            document_id: None,
                            incident_id: None,
                            message: format!(
                                "{} {} failures in {} {} within {} minutes",
                                group.len(),
                                rule_id,
                                scope,
                                key,
                                window_minutes
                            ),
                            details: json!({
                                "ruleId": rule_id.as_str(),
                                "scope": scope.as_str(),
                                "count": group.len(),
                                "windowMinutes": window_minutes,
                                "tables": tables,
                                "documents": documents,
                                "findings": group.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
                            }),
                        };
                        self.apply(rule, subject, now, &mut report)?;
                    }
                }
                RuleCondition::StaleDocuments {
                    older_than_minutes,
                    statuses,
                } => {
                    let cutoff = now - Duration::minutes(*older_than_minutes);
                    let stale = self
                        .ctx
                        .db
                        .with_conn(|conn| document_repo::list_stale(conn, statuses, cutoff))?;
                    for doc in stale {
                        let table_id = self
                            .ctx
                            .db
                            .with_conn(|conn| field_repo::load_cross_validation(conn, &doc.id))?
                            .map(|cross| cross.table_ref(&doc.id))
                            .unwrap_or_else(|| format!("unidentified:{}", doc.id));
                        let minutes = (now - doc.updated_at).num_minutes();
                        let subject = Subject {
                            key: doc.id.clone(),
                            table_id,
                            document_id: Some(doc.id.clone()),
                            incident_id: None,
                            message: format!(
                                "document {} {} for {} minutes",
                                doc.id, doc.status, minutes
                            ),
                            details: json!({
                                "documentId": doc.id,
                                "sourceRef": doc.source_ref,
                                "status": doc.status.as_str(),
                                "since": doc.updated_at.to_rfc3339(),
                                "minutes": minutes,
                            }),
                        };
                        self.apply(rule, subject, now, &mut report)?;
                    }
                }
                _ => {}
            }
        }
        Ok(report)
    }

    /// Overdue critical incidents.
    pub fn poll_incidents(&self) -> Result<PollReport> {
        let now = self.ctx.clock.now();
        let mut report = PollReport::new(Concern::Incidents);

        for rule in self.rules_for(Concern::Incidents) {
            report.rules_evaluated += 1;
            if let RuleCondition::OverdueCritical { older_than_minutes } = &rule.condition {
                let cutoff = now - Duration::minutes(*older_than_minutes);
                let overdue = self
                    .ctx
                    .db
                    .with_conn(|conn| incident_repo::critical_open_older_than(conn, cutoff))?;
                for incident in overdue {
                    let subject = Subject {
                        key: incident.id.clone(),
                        table_id: incident.table_id.clone(),
                        document_id: incident.document_id.clone(),
                        incident_id: Some(incident.id.clone()),
                        message: format!(
                            "critical incident {} unresolved for more than {} minutes",
                            incident.id, older_than_minutes
                        ),
                        details: json!({
                            "incidentId": incident.id,
                            "incidentType": incident.incident_type.as_str(),
                            "status": incident.status.as_str(),
                            "createdAt": incident.created_at.to_rfc3339(),
                        }),
                    };
                    self.apply(rule, subject, now, &mut report)?;
                }
            }
        }
        Ok(report)
    }

    /// Throughput and backlog thresholds.
    pub fn poll_kpis(&self) -> Result<PollReport> {
        let now = self.ctx.clock.now();
        let mut report = PollReport::new(Concern::Kpis);

        for rule in self.rules_for(Concern::Kpis) {
            report.rules_evaluated += 1;
            if let RuleCondition::KpiThreshold {
                metric,
                comparison,
                value,
                window_minutes,
            } = &rule.condition
            {
                let observed = self.observe(*metric, now - Duration::minutes(*window_minutes))?;
                if !comparison.holds(observed, *value) {
                    continue;
                }
                let subject = Subject {
                    key: metric.to_string(),
                    table_id: format!("kpi:{}", metric),
                    document_id: None,
                    incident_id: None,
                    message: format!(
                        "{} is {:.3}, {} threshold {}",
                        metric, observed, comparison, value
                    ),
                    details: json!({
                        "metric": metric.as_str(),
                        "observed": observed,
                        "comparison": comparison.as_str(),
                        "threshold": value,
                        "windowMinutes": window_minutes,
                    }),
                };
                self.apply(rule, subject, now, &mut report)?;
            }
        }
        Ok(report)
    }

    /// SLA warnings and breaches for every open incident.
    pub fn poll_deadlines(&self) -> Result<PollReport> {
        let now = self.ctx.clock.now();
        let thresholds = &self.ctx.config.agent.warning_minutes;
        let mut report = PollReport::new(Concern::Deadlines);

        let open = self.ctx.incidents.list_open()?;
        for incident in &open {
            let remaining = incident.remaining_sla_minutes(now);
            let details = json!({
                "incidentType": incident.incident_type.as_str(),
                "severity": incident.severity.as_str(),
                "deadline": incident.sla_deadline.to_rfc3339(),
                "remainingMinutes": remaining,
            });

            if remaining <= 0.0 {
                let alert = Alert::new(
                    AlertKind::SlaBreach,
                    AlertLevel::Critical,
                    format!(
                        "incident {} breached its SLA {:.1} minutes ago",
                        incident.id, -remaining
                    ),
                    now,
                );
                self.sink.emit(
                    alert
                        .with_incident(&incident.id)
                        .with_table(&incident.table_id)
                        .with_details(details),
                );
                report.alerts += 1;
            } else if remaining <= thresholds.for_severity(incident.severity)
                && self.cooldown_elapsed(&sla_key(&incident.id), now)
            {
                let level = if incident.severity == Severity::Critical {
                    AlertLevel::Critical
                } else {
                    AlertLevel::Warning
                };
                let alert = Alert::new(
                    AlertKind::SlaWarning,
                    level,
                    format!(
                        "incident {} is due in {:.1} minutes",
                        incident.id, remaining
                    ),
                    now,
                );
                self.sink.emit(
                    alert
                        .with_incident(&incident.id)
                        .with_table(&incident.table_id)
                        .with_details(details),
                );
                report.alerts += 1;
            }
        }

        let open_ids: BTreeSet<String> = open.iter().map(|i| sla_key(&i.id)).collect();
        self.cooldowns()
            .retain(|key, _| !key.starts_with("sla:") || open_ids.contains(key));
        Ok(report)
    }

    fn rules_for(&self, concern: Concern) -> impl Iterator<Item = &AgentRule> {
        self.rules
            .iter()
            .filter(move |r| r.enabled && r.concern == concern)
    }

    fn observe(&self, metric: KpiMetric, since: DateTime<Utc>) -> Result<f64> {
        Ok(match metric {
            KpiMetric::JobFailureRate => self
                .ctx
                .db
                .with_conn(|conn| job_repo::stats_since(conn, since))?
                .failure_rate(),
            KpiMetric::AvgJobDurationMs => self
                .ctx
                .db
                .with_conn(|conn| job_repo::stats_since(conn, since))?
                .avg_duration_ms
                .unwrap_or(0.0),
            KpiMetric::ReviewBacklog => {
                let stats = self.ctx.review.stats()?;
                (stats.pending + stats.in_progress) as f64
            }
            KpiMetric::OpenCriticalIncidents => {
                let filter = IncidentFilter {
                    severity: Some(Severity::Critical),
                    ..IncidentFilter::default()
                };
                let page = PageRequest {
                    page: 1,
                    per_page: 1,
                };
                self.ctx.incidents.list(&filter, page)?.critical as f64
            }
            KpiMetric::BreakerOpen => match self.ctx.breaker.state() {
                BreakerState::Open => 1.0,
                BreakerState::Closed | BreakerState::HalfOpen => 0.0,
            },
        })
    }

    fn apply(
        &self,
        rule: &AgentRule,
        subject: Subject,
        now: DateTime<Utc>,
        report: &mut PollReport,
    ) -> Result<()> {
        let cooldown_key = format!("{}:{}", rule.id, subject.key);

        if !rule.action.executes_under(rule.mode) {
            if self.cooldown_elapsed(&cooldown_key, now) {
                let alert = Alert::new(
                    AlertKind::Recommendation,
                    AlertLevel::Info,
                    format!(
                        "rule {} recommends {}: {}",
                        rule.id,
                        rule.action.kind(),
                        subject.message
                    ),
                    now,
                )
                .with_rule(&rule.id)
                .with_table(&subject.table_id)
                .with_details(json!({
                    "action": rule.action.kind(),
                    "mode": rule.mode.as_str(),
                    "evidence": subject.details,
                }));
                self.sink.emit(with_incident(alert, subject.incident_id.as_deref()));
                report.recommendations += 1;
            }
            return Ok(());
        }

        match &rule.action {
            RuleAction::CreateIncident {
                incident_type,
                severity,
            } => {
                let evidence = json!({
                    "rule": rule.id,
                    "condition": rule.condition.kind(),
                    "message": subject.message,
                    "details": subject.details,
                });
                let mut incident = NewIncident::standard(
                    *incident_type,
                    *severity,
                    subject.table_id,
                    evidence,
                    IncidentSource::Agent,
                );
                if let Some(document_id) = subject.document_id {
                    incident = incident.with_document(document_id);
                }
                let outcome = self.ctx.incidents.create(incident, true)?;
                if outcome.created {
                    report.incidents_created.push(outcome.incident.id);
                }
            }
            RuleAction::Alert { level } => {
                if self.cooldown_elapsed(&cooldown_key, now) {
                    let alert = Alert::new(alert_kind(rule.concern), *level, subject.message, now)
                        .with_rule(&rule.id)
                        .with_table(&subject.table_id)
                        .with_details(subject.details);
                    self.sink.emit(with_incident(alert, subject.incident_id.as_deref()));
                    report.alerts += 1;
                }
            }
            RuleAction::Escalate => {
                let Some(incident_id) = subject.incident_id else {
                    return Ok(());
                };
                match self.ctx.incidents.escalate(&incident_id, &subject.message, ACTOR) {
                    Ok(incident) => {
                        let alert = Alert::new(
                            AlertKind::Escalation,
                            AlertLevel::Critical,
                            subject.message,
                            now,
                        )
                        .with_rule(&rule.id)
                        .with_incident(&incident.id)
                        .with_table(&incident.table_id)
                        .with_details(subject.details);
                        self.sink.emit(alert);
                        report.escalated.push(incident.id);
                        report.alerts += 1;
                    }
                    // Closed or escalated since the scan.
                    Err(IncidentError::InvalidTransition { .. })
                    | Err(IncidentError::Closed { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// True, and the window restarted, when `key` last fired more than the
    /// configured cooldown ago. Expired entries are dropped on the way.
    fn cooldown_elapsed(&self, key: &str, now: DateTime<Utc>) -> bool {
        let window = Duration::minutes(self.ctx.config.agent.alert_cooldown_minutes);
        let mut cooldowns = self.cooldowns();
        cooldowns.retain(|_, last| now - *last < window);
        match cooldowns.get(key) {
            Some(last) if now - *last < window => false,
            _ => {
                cooldowns.insert(key.to_string(), now);
                true
            }
        }
    }

    #[cfg(test)]
    fn cooldown_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cooldowns().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn cooldowns(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        match self.cooldowns.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Agent cooldown map was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Running pollers of a started agent.
pub struct AgentHandle {
    pollers: Vec<PollerHandle>,
}

impl AgentHandle {
    pub fn concerns(&self) -> Vec<Concern> {
        self.pollers.iter().map(|p| p.concern()).collect()
    }

    /// Cancels one poller, leaving the others running.
    pub fn cancel(&self, concern: Concern) {
        for poller in self.pollers.iter().filter(|p| p.concern() == concern) {
            poller.cancel();
        }
    }

    pub fn stop(self) {
        for poller in &self.pollers {
            poller.cancel();
        }
        for poller in self.pollers {
            poller.join();
        }
        log::info!("Monitoring agent stopped");
    }
}

fn sla_key(incident_id: &str) -> String {
    format!("sla:{}", incident_id)
}

fn alert_kind(concern: Concern) -> AlertKind {
    match concern {
        Concern::Documents => AlertKind::Anomaly,
        Concern::Incidents => AlertKind::Escalation,
        Concern::Kpis => AlertKind::Kpi,
        Concern::Deadlines => AlertKind::SlaWarning,
    }
}

fn with_incident(alert: Alert, incident_id: Option<&str>) -> Alert {
    match incident_id {
        Some(id) => alert.with_incident(id),
        None => alert,
    }
}

/// Groups failures by the scope prefix of their canonical table id.
/// Findings without a table id cannot be placed and are skipped.
fn cluster(
    findings: &[ValidationFinding],
    scope: ClusterScope,
) -> BTreeMap<String, Vec<&ValidationFinding>> {
    let mut groups: BTreeMap<String, Vec<&ValidationFinding>> = BTreeMap::new();
    for finding in findings {
        let Some(table_id) = finding.table_id.as_deref() else {
            continue;
        };
        groups
            .entry(scope_key(table_id, scope))
            .or_default()
            .push(finding);
    }
    groups
}

fn scope_key(table_id: &str, scope: ClusterScope) -> String {
    let take = match scope {
        ClusterScope::Table => return table_id.to_string(),
        ClusterScope::Municipality => 2,
        ClusterScope::Department => 1,
    };
    table_id.split('-').take(take).collect::<Vec<_>>().join("-")
}
